use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use tuer::api::{SearchEnvelope, SearchResult};
use tuer::prefs::{keys, storage_keys, MemoryStorage, PreferenceStore, StorageBackend};
use tuer::search::{SearchOutcome, SearchSession, SessionPhase};
use tuer::transport::{SearchTransport, TransportError};

fn hit(id: i64, title: &str, score: Option<f64>) -> SearchResult {
    SearchResult {
        id,
        title: title.into(),
        url: format!("u{id}"),
        description: format!("d{id}"),
        summary: format!("s{id}"),
        score,
        tags: None,
    }
}

fn envelope(query: &str, results: Vec<SearchResult>) -> SearchEnvelope {
    SearchEnvelope {
        query: query.into(),
        spellchecked_query: None,
        results,
    }
}

fn titles(results: &[SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.title.clone()).collect()
}

fn local_store(mem: &MemoryStorage) -> Arc<PreferenceStore> {
    Arc::new(PreferenceStore::open(Arc::new(mem.clone()), storage_keys::LOCAL))
}

/// Answers from a fixed table; unknown queries fail with a 500.
#[derive(Default)]
struct ScriptedTransport {
    answers: Mutex<HashMap<String, Result<SearchEnvelope, TransportError>>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn answer(self, query: &str, result: Result<SearchEnvelope, TransportError>) -> Self {
        self.answers.lock().unwrap().insert(query.to_string(), result);
        self
    }
}

#[async_trait]
impl SearchTransport for ScriptedTransport {
    async fn search(&self, query: &str) -> Result<SearchEnvelope, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or(Err(TransportError::Status(500)))
    }
}

/// Holds each request until the test releases it, and reports arrivals.
struct GatedTransport {
    gates: Mutex<HashMap<String, oneshot::Receiver<Result<SearchEnvelope, TransportError>>>>,
    arrived: mpsc::UnboundedSender<String>,
}

impl GatedTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                gates: Mutex::new(HashMap::new()),
                arrived: tx,
            },
            rx,
        )
    }

    fn gate(&self, query: &str) -> oneshot::Sender<Result<SearchEnvelope, TransportError>> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().insert(query.to_string(), rx);
        tx
    }
}

#[async_trait]
impl SearchTransport for GatedTransport {
    async fn search(&self, query: &str) -> Result<SearchEnvelope, TransportError> {
        let gate = self.gates.lock().unwrap().remove(query).expect("gate registered");
        self.arrived.send(query.to_string()).unwrap();
        gate.await.unwrap_or(Err(TransportError::Connection("gate dropped".into())))
    }
}

#[tokio::test]
async fn tuebingen_example() {
    let transport = ScriptedTransport::default().answer(
        "tübingen",
        Ok(envelope(
            "tübingen",
            vec![hit(1, "A", Some(0.5)), hit(2, "B", Some(0.9))],
        )),
    );
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));

    let outcome = session.search("tübingen").await;
    assert_eq!(outcome, SearchOutcome::Applied { results: 2 });
    assert_eq!(titles(&session.results()), vec!["B", "A"]);
    assert_eq!(session.last_query().as_deref(), Some("tübingen"));
    assert_eq!(session.history(), vec!["tübingen".to_string()]);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.last_failure().is_none());
}

#[tokio::test]
async fn empty_query_clears_without_network() {
    let transport = ScriptedTransport::default()
        .answer("rust", Ok(envelope("rust", vec![hit(1, "R", Some(1.0))])));
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));

    session.search("rust").await;
    assert_eq!(session.results().len(), 1);

    assert_eq!(session.search("").await, SearchOutcome::Cleared);
    assert!(session.results().is_empty());
    assert_eq!(session.transport().calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.history(), vec!["rust".to_string()]);
    assert_eq!(session.last_query().as_deref(), Some("rust"));
}

#[tokio::test]
async fn whitespace_is_a_real_query() {
    let transport = ScriptedTransport::default().answer(" ", Ok(envelope(" ", vec![])));
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));
    assert_eq!(session.search(" ").await, SearchOutcome::Applied { results: 0 });
    assert_eq!(session.transport().calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.history(), vec![" ".to_string()]);
}

#[tokio::test]
async fn failure_keeps_results_and_history() {
    let transport = ScriptedTransport::default()
        .answer("good", Ok(envelope("good", vec![hit(1, "G", Some(0.2)), hit(2, "H", None)])))
        .answer("down", Err(TransportError::Connection("refused".into())))
        .answer("garbled", Err(TransportError::Malformed("expected object".into())));
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));

    session.search("good").await;
    let before = session.results();

    let outcome = session.search("down").await;
    assert_eq!(
        outcome,
        SearchOutcome::Failed(TransportError::Connection("refused".into()))
    );
    assert_eq!(session.results(), before);
    assert_eq!(session.history(), vec!["good".to_string()]);
    assert_eq!(
        session.last_failure(),
        Some(TransportError::Connection("refused".into()))
    );
    // the failed query is still the last one submitted
    assert_eq!(session.last_query().as_deref(), Some("down"));

    assert!(matches!(
        session.search("garbled").await,
        SearchOutcome::Failed(TransportError::Malformed(_))
    ));
    assert_eq!(session.results(), before);

    // next success clears the failure signal
    session.search("good").await;
    assert!(session.last_failure().is_none());
    assert_eq!(session.history(), vec!["good".to_string(), "good".to_string()]);
}

#[tokio::test]
async fn history_is_persisted_and_reloaded() {
    let mem = MemoryStorage::new();
    let transport = ScriptedTransport::default()
        .answer("a", Ok(envelope("a", vec![])))
        .answer("b", Ok(envelope("b", vec![])));
    {
        let session = SearchSession::new(transport, local_store(&mem));
        session.search("a").await;
        session.search("nope").await;
        session.search("b").await;
        session.search("a").await;
    }

    let store = local_store(&mem);
    assert_eq!(store.get(keys::LAST_SEARCHES), Some(json!(["a", "b", "a"])));

    let session = SearchSession::new(ScriptedTransport::default(), store);
    assert_eq!(session.history(), vec!["a", "b", "a"]);
}

#[tokio::test]
async fn history_ignores_foreign_entries() {
    let mem = MemoryStorage::new();
    let store = local_store(&mem);
    store
        .set(keys::LAST_SEARCHES, json!(["ok", 3, null, "fine"]))
        .unwrap();
    let session = SearchSession::new(ScriptedTransport::default(), store.clone());
    assert_eq!(session.history(), vec!["ok", "fine"]);

    store.set(keys::LAST_SEARCHES, json!("not a list")).unwrap();
    let session = SearchSession::new(ScriptedTransport::default(), store);
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn spellchecked_query_is_exposed() {
    let mut env = envelope("tubingen", vec![hit(1, "T", None)]);
    env.spellchecked_query = Some("tübingen".into());
    let transport = ScriptedTransport::default()
        .answer("tubingen", Ok(env))
        .answer("x", Ok(envelope("x", vec![])));
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));

    session.search("tubingen").await;
    assert_eq!(session.spellchecked_query().as_deref(), Some("tübingen"));
    session.search("x").await;
    assert!(session.spellchecked_query().is_none());
}

#[tokio::test]
async fn ties_keep_transport_order() {
    let transport = ScriptedTransport::default().answer(
        "q",
        Ok(envelope(
            "q",
            vec![
                hit(1, "first-zero", None),
                hit(2, "high", Some(2.0)),
                hit(3, "second-zero", Some(0.0)),
                hit(4, "mid", Some(1.0)),
                hit(5, "third-zero", None),
            ],
        )),
    );
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));
    session.search("q").await;
    assert_eq!(
        titles(&session.results()),
        vec!["high", "mid", "first-zero", "second-zero", "third-zero"]
    );
}

#[tokio::test]
async fn later_query_wins_when_earlier_answers_last() {
    let (transport, mut arrived) = GatedTransport::new();
    let release_q1 = transport.gate("q1");
    let release_q2 = transport.gate("q2");
    let mem = MemoryStorage::new();
    let session = Arc::new(SearchSession::new(transport, local_store(&mem)));

    let s1 = session.clone();
    let first = tokio::spawn(async move { s1.search("q1").await });
    assert_eq!(arrived.recv().await.as_deref(), Some("q1"));

    let s2 = session.clone();
    let second = tokio::spawn(async move { s2.search("q2").await });
    assert_eq!(arrived.recv().await.as_deref(), Some("q2"));
    assert_eq!(session.phase(), SessionPhase::Searching);

    release_q2
        .send(Ok(envelope("q2", vec![hit(2, "from q2", Some(0.1))])))
        .unwrap();
    assert_eq!(second.await.unwrap(), SearchOutcome::Applied { results: 1 });
    assert_eq!(session.phase(), SessionPhase::Idle);

    release_q1
        .send(Ok(envelope("q1", vec![hit(1, "from q1", Some(0.9))])))
        .unwrap();
    assert_eq!(first.await.unwrap(), SearchOutcome::Superseded);

    assert_eq!(titles(&session.results()), vec!["from q2"]);
    assert_eq!(session.last_query().as_deref(), Some("q2"));
    assert_eq!(session.history(), vec!["q2".to_string()]);
    assert_eq!(local_store(&mem).get(keys::LAST_SEARCHES), Some(json!(["q2"])));
}

#[tokio::test]
async fn stale_failure_does_not_mark_session_failed() {
    let (transport, mut arrived) = GatedTransport::new();
    let release_old = transport.gate("old");
    let release_new = transport.gate("new");
    let session = Arc::new(SearchSession::new(transport, local_store(&MemoryStorage::new())));

    let s1 = session.clone();
    let old = tokio::spawn(async move { s1.search("old").await });
    arrived.recv().await;
    let s2 = session.clone();
    let new = tokio::spawn(async move { s2.search("new").await });
    arrived.recv().await;

    release_old.send(Err(TransportError::Timeout)).unwrap();
    assert_eq!(old.await.unwrap(), SearchOutcome::Superseded);
    assert!(session.last_failure().is_none());
    assert_eq!(session.phase(), SessionPhase::Searching);

    release_new.send(Ok(envelope("new", vec![]))).unwrap();
    assert_eq!(new.await.unwrap(), SearchOutcome::Applied { results: 0 });
    assert_eq!(session.phase(), SessionPhase::Idle);
}

#[tokio::test]
async fn clearing_discards_in_flight_response() {
    let (transport, mut arrived) = GatedTransport::new();
    let release = transport.gate("slow");
    let session = Arc::new(SearchSession::new(transport, local_store(&MemoryStorage::new())));

    let s1 = session.clone();
    let pending = tokio::spawn(async move { s1.search("slow").await });
    arrived.recv().await;

    assert_eq!(session.search("").await, SearchOutcome::Cleared);
    assert_eq!(session.phase(), SessionPhase::Idle);

    release
        .send(Ok(envelope("slow", vec![hit(1, "late", Some(1.0))])))
        .unwrap();
    assert_eq!(pending.await.unwrap(), SearchOutcome::Superseded);
    assert!(session.results().is_empty());
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn snapshot_is_consistent() {
    let transport = ScriptedTransport::default()
        .answer("q", Ok(envelope("q", vec![hit(1, "one", Some(0.1)), hit(2, "two", Some(0.2))])));
    let session = SearchSession::new(transport, local_store(&MemoryStorage::new()));
    session.search("q").await;

    let snap = session.snapshot();
    assert_eq!(snap.phase, SessionPhase::Idle);
    assert_eq!(snap.last_query.as_deref(), Some("q"));
    assert_eq!(titles(&snap.results), vec!["two", "one"]);
    assert_eq!(snap.history, vec!["q".to_string()]);
    assert!(snap.last_failure.is_none());
}

#[tokio::test]
async fn aborted_search_does_not_stay_searching() {
    let (transport, mut arrived) = GatedTransport::new();
    let _release = transport.gate("gone");
    let session = Arc::new(SearchSession::new(transport, local_store(&MemoryStorage::new())));

    let s1 = session.clone();
    let task = tokio::spawn(async move { s1.search("gone").await });
    arrived.recv().await;
    assert_eq!(session.phase(), SessionPhase::Searching);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(session.last_query().as_deref(), Some("gone"));
    assert!(session.history().is_empty());
}

#[tokio::test]
async fn aborting_an_older_search_keeps_the_newer_pending() {
    let (transport, mut arrived) = GatedTransport::new();
    let _release_old = transport.gate("old");
    let release_new = transport.gate("new");
    let session = Arc::new(SearchSession::new(transport, local_store(&MemoryStorage::new())));

    let s1 = session.clone();
    let old = tokio::spawn(async move { s1.search("old").await });
    arrived.recv().await;
    let s2 = session.clone();
    let new = tokio::spawn(async move { s2.search("new").await });
    arrived.recv().await;

    old.abort();
    assert!(old.await.unwrap_err().is_cancelled());
    assert_eq!(session.phase(), SessionPhase::Searching);

    release_new.send(Ok(envelope("new", vec![]))).unwrap();
    assert_eq!(new.await.unwrap(), SearchOutcome::Applied { results: 0 });
    assert_eq!(session.phase(), SessionPhase::Idle);
}

/// Blocks every write until the test lets it through.
struct SlowDisk {
    inner: MemoryStorage,
    entered: Mutex<std_mpsc::Sender<()>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

impl StorageBackend for SlowDisk {
    fn read(&self, key: &str) -> io::Result<Option<String>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, contents: &str) -> io::Result<()> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.write(key, contents)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_is_readable_while_history_is_written() {
    let (entered_tx, entered_rx) = std_mpsc::channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let mem = MemoryStorage::new();
    let disk = SlowDisk {
        inner: mem.clone(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let prefs = Arc::new(PreferenceStore::open(Arc::new(disk), storage_keys::LOCAL));
    let transport = ScriptedTransport::default()
        .answer("castle", Ok(envelope("castle", vec![hit(1, "A", None)])));
    let session = Arc::new(SearchSession::new(transport, prefs));

    let s1 = session.clone();
    let task = tokio::spawn(async move { s1.search("castle").await });
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();

    // the history write is parked; the read model must not wait on it
    assert_eq!(session.history(), vec!["castle".to_string()]);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert_eq!(titles(&session.results()), vec!["A"]);

    release_tx.send(()).unwrap();
    assert_eq!(task.await.unwrap(), SearchOutcome::Applied { results: 1 });
    assert_eq!(local_store(&mem).get(keys::LAST_SEARCHES), Some(json!(["castle"])));
}
