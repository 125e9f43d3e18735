//! Search session state: the current query, the in-flight request, the ranked
//! result view and the persisted search history.
//!
//! Overlapping searches are resolved by submission order. Every call to
//! [`SearchSession::search`] takes the next sequence number and a response is
//! applied only if its number is still the latest one issued; anything older
//! settles as [`SearchOutcome::Superseded`] without touching state.
//!
//! History is written to the preference store after the state lock is
//! released. Each append bumps a revision and a writer skips revisions older
//! than the one already persisted, so blobs still land in append order.
//! The write itself is synchronous and runs on the calling task.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use tuer_api::SearchResult;
use tuer_prefs::{keys, PreferenceStore};

use crate::transport::{SearchTransport, TransportError};

pub mod rank;

pub use rank::rank_by_score;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    /// The most recently issued request has not settled yet.
    Searching,
}

/// How one `search` call ended. Failures are reported here, never as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Empty query: results cleared, nothing sent.
    Cleared,
    Applied { results: usize },
    Failed(TransportError),
    /// A newer submission was made while this one was in flight.
    Superseded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub last_query: Option<String>,
    pub results: Vec<SearchResult>,
    pub spellchecked_query: Option<String>,
    pub history: Vec<String>,
    pub last_failure: Option<TransportError>,
}

#[derive(Debug, Default)]
struct SessionState {
    issued: u64,
    /// Sequence number of the latest request while it is unsettled.
    pending: Option<u64>,
    last_query: Option<String>,
    raw: Vec<SearchResult>,
    ranked: Vec<SearchResult>,
    spellchecked_query: Option<String>,
    history: Vec<String>,
    /// Bumped on every history append.
    history_rev: u64,
    last_failure: Option<TransportError>,
}

impl SessionState {
    fn next_seq(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn replace_results(&mut self, raw: Vec<SearchResult>, spellchecked: Option<String>) {
        self.ranked = rank_by_score(&raw);
        self.raw = raw;
        self.spellchecked_query = spellchecked;
    }
}

pub struct SearchSession<T> {
    transport: T,
    prefs: Arc<PreferenceStore>,
    state: Mutex<SessionState>,
    /// Latest history revision handed to the preference store.
    persisted_rev: Mutex<u64>,
}

impl<T: SearchTransport> SearchSession<T> {
    /// `prefs` must already be open: persisted history is read here.
    pub fn new(transport: T, prefs: Arc<PreferenceStore>) -> Self {
        let history = load_history(&prefs);
        debug!(target: "tuer::search", "loaded {} history entries", history.len());
        Self {
            transport,
            prefs,
            state: Mutex::new(SessionState {
                history,
                ..SessionState::default()
            }),
            persisted_rev: Mutex::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn search(&self, query: &str) -> SearchOutcome {
        if query.is_empty() {
            let mut st = self.lock_state();
            // still a submission: older in-flight responses must not repopulate
            st.next_seq();
            st.pending = None;
            st.last_failure = None;
            st.replace_results(Vec::new(), None);
            debug!(target: "tuer::search", "empty query, results cleared");
            return SearchOutcome::Cleared;
        }

        let seq = {
            let mut st = self.lock_state();
            let seq = st.next_seq();
            st.pending = Some(seq);
            st.last_query = Some(query.to_string());
            seq
        };
        debug!(target: "tuer::search", seq, query, "search issued");

        let guard = PendingGuard {
            state: &self.state,
            seq,
            armed: true,
        };
        let settled = self.transport.search(query).await;
        guard.disarm();

        let mut st = self.lock_state();
        if st.issued != seq {
            debug!(target: "tuer::search", seq, latest = st.issued, "discarding superseded response");
            return SearchOutcome::Superseded;
        }
        st.pending = None;

        match settled {
            Ok(envelope) => {
                let count = envelope.results.len();
                st.replace_results(envelope.results, envelope.spellchecked_query);
                st.last_failure = None;
                st.history.push(query.to_string());
                st.history_rev += 1;
                let rev = st.history_rev;
                let history = st.history.clone();
                drop(st);

                self.persist_history(rev, history);
                info!(target: "tuer::search", seq, results = count, "search applied");
                SearchOutcome::Applied { results: count }
            }
            Err(err) => {
                warn!(target: "tuer::search", seq, "search failed: {err}");
                st.last_failure = Some(err.clone());
                SearchOutcome::Failed(err)
            }
        }
    }

    fn persist_history(&self, rev: u64, history: Vec<String>) {
        let mut persisted = self
            .persisted_rev
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *persisted >= rev {
            debug!(target: "tuer::search", rev, latest = *persisted, "newer history already persisted");
            return;
        }
        *persisted = rev;
        if let Err(e) = self.prefs.set(keys::LAST_SEARCHES, Value::from(history)) {
            warn!(target: "tuer::search", "persisting search history failed: {e}");
        }
    }

    pub fn results(&self) -> Vec<SearchResult> {
        self.lock_state().ranked.clone()
    }

    pub fn last_query(&self) -> Option<String> {
        self.lock_state().last_query.clone()
    }

    pub fn history(&self) -> Vec<String> {
        self.lock_state().history.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        phase_of(&self.lock_state())
    }

    pub fn last_failure(&self) -> Option<TransportError> {
        self.lock_state().last_failure.clone()
    }

    pub fn spellchecked_query(&self) -> Option<String> {
        self.lock_state().spellchecked_query.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let st = self.lock_state();
        SessionSnapshot {
            phase: phase_of(&st),
            last_query: st.last_query.clone(),
            results: st.ranked.clone(),
            spellchecked_query: st.spellchecked_query.clone(),
            history: st.history.clone(),
            last_failure: st.last_failure.clone(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears `pending` if a search is dropped before its response arrives, so an
/// aborted task does not leave the session `Searching`.
struct PendingGuard<'a> {
    state: &'a Mutex<SessionState>,
    seq: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if st.pending == Some(self.seq) {
            st.pending = None;
            debug!(target: "tuer::search", seq = self.seq, "search abandoned before settling");
        }
    }
}

fn phase_of(st: &SessionState) -> SessionPhase {
    if st.pending.is_some() {
        SessionPhase::Searching
    } else {
        SessionPhase::Idle
    }
}

fn load_history(prefs: &PreferenceStore) -> Vec<String> {
    match prefs.get(keys::LAST_SEARCHES) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(_) => {
            warn!(target: "tuer::search", "stored {} is not an array ; ignoring", keys::LAST_SEARCHES);
            Vec::new()
        }
        None => Vec::new(),
    }
}
