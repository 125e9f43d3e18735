use std::sync::Arc;

use tuer_prefs::{storage_keys, PreferenceStore, StorageBackend};

use crate::config::ClientConfig;
use crate::font::DyslexicFont;
use crate::search::SearchSession;
use crate::transport::{HttpTransport, SearchTransport};

/// Everything the client needs, built once per process and handed out by
/// reference.
///
/// Initialization order: storage backend, preference stores, transport, then
/// the search session (it reads persisted history when constructed).
#[derive(Clone)]
pub struct Services<T = HttpTransport> {
    configuration: Arc<PreferenceStore>,
    local: Arc<PreferenceStore>,
    session: Arc<SearchSession<T>>,
    font: DyslexicFont,
}

impl Services<HttpTransport> {
    pub fn init(cfg: &ClientConfig) -> Self {
        let backend = cfg.prefs.open_backend();
        Self::assemble(backend, HttpTransport::from_config(cfg))
    }
}

impl<T: SearchTransport> Services<T> {
    pub fn assemble(backend: Arc<dyn StorageBackend>, transport: T) -> Self {
        let configuration = Arc::new(PreferenceStore::open(
            backend.clone(),
            storage_keys::CONFIGURATION,
        ));
        let local = Arc::new(PreferenceStore::open(backend, storage_keys::LOCAL));
        let session = Arc::new(SearchSession::new(transport, local.clone()));
        let font = DyslexicFont::new(configuration.clone());
        Self {
            configuration,
            local,
            session,
            font,
        }
    }

    pub fn session(&self) -> &Arc<SearchSession<T>> {
        &self.session
    }

    pub fn font(&self) -> &DyslexicFont {
        &self.font
    }

    pub fn configuration(&self) -> &Arc<PreferenceStore> {
        &self.configuration
    }

    pub fn local(&self) -> &Arc<PreferenceStore> {
        &self.local
    }
}
