//! Per-session fetch deduplication.
//!
//! Concurrent lookups of the same session id share one backing-store fetch.
//! The first caller for an id becomes the leader: it registers a result cell
//! for the id and spawns the fetch. Callers arriving while that fetch is in
//! flight attach to the same cell and wait for it to resolve.
//!
//! Outcomes differ by role on failure: the leader resolves to `Ok(None)` (the
//! error is logged) while every follower receives the tagged
//! [`SessionFetchError`]. Middleware relies on this: a leader's `None` is
//! treated as "no session", a follower's error as a server failure.
//!
//! There is no timeout. If the backing store never answers, the leader and all
//! followers for that id wait with it; wrap `fetch` in `tokio::time::timeout`
//! where that matters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Instrument};

use super::session::{Session, SharedSessionStore};
use super::storage::{StorageHandle, StoreError};

/// Failure delivered to callers that joined an in-flight fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionFetchError {
    #[error("session fetch failed for {session_id}: {source}")]
    Backend {
        session_id: String,
        #[source]
        source: Arc<StoreError>,
    },

    /// The fetch task ended without publishing (it panicked).
    #[error("session fetch for {session_id} ended without a result")]
    Abandoned { session_id: String },
}

impl SessionFetchError {
    pub fn session_id(&self) -> &str {
        match self {
            SessionFetchError::Backend { session_id, .. }
            | SessionFetchError::Abandoned { session_id } => session_id,
        }
    }
}

pub type FetchOutcome = Result<Option<Session>, SessionFetchError>;

type Cell = watch::Receiver<Option<FetchOutcome>>;
type InFlight = Arc<Mutex<HashMap<String, Cell>>>;

enum Role {
    Leader(watch::Sender<Option<FetchOutcome>>, Cell),
    Follower(Cell),
}

/// Deduplicating front for a [`SessionStore`](super::SessionStore).
///
/// Cheap to clone; clones share the in-flight map.
#[derive(Clone)]
pub struct SessionDeduplicator {
    store: SharedSessionStore,
    in_flight: InFlight,
}

impl SessionDeduplicator {
    pub fn new(store: SharedSessionStore) -> Self {
        Self { store, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Resolve `session_id`, fetching from the backing store at most once at a
    /// time per id.
    pub async fn fetch(&self, session_id: &str, storage: Option<StorageHandle>) -> FetchOutcome {
        let role = {
            let mut map = self.in_flight.lock();
            match map.get(session_id) {
                Some(cell) => Role::Follower(cell.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    map.insert(session_id.to_string(), rx.clone());
                    Role::Leader(tx, rx)
                }
            }
        };

        match role {
            Role::Follower(cell) => {
                debug!(target: "session_dedup", session_id, "joining in-flight fetch");
                wait_for_outcome(session_id, cell).await
            }
            Role::Leader(tx, cell) => {
                self.spawn_fetch(session_id.to_string(), storage, tx);
                match wait_for_outcome(session_id, cell).await {
                    Err(err) => {
                        warn!(target: "session_dedup", session_id, error = %err, "session fetch failed; leader resolves to no session");
                        Ok(None)
                    }
                    ok => ok,
                }
            }
        }
    }

    /// True while a fetch for `session_id` is outstanding.
    pub fn in_flight(&self, session_id: &str) -> bool { self.in_flight.lock().contains_key(session_id) }

    pub fn in_flight_len(&self) -> usize { self.in_flight.lock().len() }

    fn spawn_fetch(&self, session_id: String, storage: Option<StorageHandle>, tx: watch::Sender<Option<FetchOutcome>>) {
        let store = self.store.clone();
        let cycle = FetchCycle { in_flight: self.in_flight.clone(), session_id: session_id.clone(), tx: Some(tx) };
        let span = info_span!("session_fetch", session_id = %session_id);
        tokio::spawn(
            async move {
                let outcome = store
                    .fetch_session_by_id(&session_id, storage)
                    .await
                    .map_err(|e| SessionFetchError::Backend { session_id: session_id.clone(), source: Arc::new(e) });
                debug!(target: "session_dedup", found = matches!(outcome, Ok(Some(_))), failed = outcome.is_err(), "fetch settled");
                cycle.publish(outcome);
            }
            .instrument(span),
        );
    }
}

async fn wait_for_outcome(session_id: &str, mut cell: Cell) -> FetchOutcome {
    let settled = cell.wait_for(Option::is_some).await.map(|slot| (*slot).clone());
    match settled {
        Ok(Some(outcome)) => outcome,
        _ => Err(SessionFetchError::Abandoned { session_id: session_id.to_string() }),
    }
}

/// One leader's fetch. Removes its id from the in-flight map exactly once,
/// before the outcome becomes visible, or on drop if it never publishes.
struct FetchCycle {
    in_flight: InFlight,
    session_id: String,
    tx: Option<watch::Sender<Option<FetchOutcome>>>,
}

impl FetchCycle {
    fn publish(mut self, outcome: FetchOutcome) {
        if let Some(tx) = self.tx.take() {
            self.in_flight.lock().remove(&self.session_id);
            let _ = tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FetchCycle {
    fn drop(&mut self) {
        // tx is dropped after this body runs, so waiters wake only once the id is released
        if self.tx.is_some() {
            self.in_flight.lock().remove(&self.session_id);
            warn!(target: "session_dedup", session_id = %self.session_id, "session fetch abandoned");
        }
    }
}
