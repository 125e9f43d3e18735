use std::sync::Arc;

use tuer_prefs::{is_truthy, keys, PreferenceStore, PrefsError};

pub const DYSLEXIC_FONT_FAMILY: &str = "Comic Sans MS";

/// The dyslexia-friendly font toggle, kept in the configuration store.
#[derive(Debug, Clone)]
pub struct DyslexicFont {
    prefs: Arc<PreferenceStore>,
}

impl DyslexicFont {
    pub fn new(prefs: Arc<PreferenceStore>) -> Self {
        Self { prefs }
    }

    pub fn is_enabled(&self) -> bool {
        self.prefs
            .get(keys::DYSLEXIC_FONT)
            .map(|v| is_truthy(&v))
            .unwrap_or(false)
    }

    /// Flip and persist; returns the new state.
    pub fn toggle(&self) -> Result<bool, PrefsError> {
        self.prefs.toggle(keys::DYSLEXIC_FONT)
    }

    pub fn font_family<'a>(&self, default: &'a str) -> &'a str {
        if self.is_enabled() {
            DYSLEXIC_FONT_FAMILY
        } else {
            default
        }
    }
}
