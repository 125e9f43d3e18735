pub mod config;
pub mod font;
pub mod search;
pub mod services;
pub mod transport;

pub use tuer_api as api;
pub use tuer_prefs as prefs;
