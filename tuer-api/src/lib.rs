pub mod limits;
pub mod response;

pub use response::{
    decode_envelope, DecodeError, EnvelopeShape, SearchEnvelope, SearchResult, UnknownShape,
};
