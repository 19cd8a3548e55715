pub mod data;
mod key;
pub mod pool;

pub use key::{ConnectionKind, ConnectionSpec};
pub use pool::{ConnectionPool, PoolError};

use crate::{dataset::cut::Cut, fetcher::Fetcher};
use data::{Datum, Format, Observation, Payload, Sort};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Weak,
};
use tokio::task::JoinHandle;

/// Typed replacement for the `connection:*` events.
pub trait ConnectionListener: Send + Sync {
    /// A request was issued; the connection's data is about to change.
    fn on_fetching(&self, _connection: &Connection) {}
    /// A request completed and its payload was stored.
    fn on_synced(&self, connection: &Connection);
    /// The cut changed in a way that needs a re-render but no new data.
    /// Every connection touched by one cut change reports the same `change`.
    fn on_changed(&self, _connection: &Connection, _change: u64) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy)]
pub struct Subscription {
    pub id: SubscriptionId,
    /// Loaded with no request in flight: no `on_synced` will follow until
    /// the next fetch.
    pub settled: bool,
}

/// Lookup key for [`Connection::get_value`].
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'a> {
    Id(&'a str),
    Index(usize),
}

#[derive(Default)]
struct State {
    cut: Cut,
    payload: Option<Payload>,
    last_request: u64,
    in_flight: usize,
    listeners: Vec<(SubscriptionId, Weak<dyn ConnectionListener>)>,
    next_subscription: u64,
}

/// A cached remote fetch, shared through the [`ConnectionPool`].
pub struct Connection {
    key: String,
    spec: ConnectionSpec,
    path: String,
    fetcher: Arc<dyn Fetcher>,
    discard_stale_responses: bool,
    usage: AtomicUsize,
    state: parking_lot::Mutex<State>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("usage", &self.usage())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        key: String,
        spec: ConnectionSpec,
        path: String,
        cut: Cut,
        fetcher: Arc<dyn Fetcher>,
        discard_stale_responses: bool,
    ) -> Self {
        Self {
            key,
            spec,
            path,
            fetcher,
            discard_stale_responses,
            usage: AtomicUsize::new(0),
            state: parking_lot::Mutex::new(State {
                cut,
                ..Default::default()
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    pub fn kind(&self) -> &ConnectionKind {
        &self.spec.kind
    }

    pub fn dimension(&self) -> Option<&str> {
        self.spec.dimension.as_deref()
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::SeqCst)
    }

    // Both only ever called with the pool lock held.
    pub(crate) fn retain(&self) -> usize {
        self.usage.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release(&self) -> Option<usize> {
        let decrement = |usage: usize| usage.checked_sub(1);
        self.usage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, decrement)
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn cut(&self) -> Cut {
        self.state.lock().cut.clone()
    }

    pub(crate) fn set_cut(&self, cut: Cut) {
        self.state.lock().cut = cut;
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().payload.is_some()
    }

    pub fn is_fetching(&self) -> bool {
        self.state.lock().in_flight > 0
    }

    pub fn subscribe(&self, listener: Weak<dyn ConnectionListener>) -> Subscription {
        let mut state = self.state.lock();
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.listeners.push((id, listener));
        Subscription {
            id,
            settled: state.payload.is_some() && state.in_flight == 0,
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().listeners.retain(|(sid, _)| *sid != id);
    }

    /// Starts a request with the current parameters. Earlier requests are
    /// not cancelled.
    pub fn fetch(self: &Arc<Self>) -> JoinHandle<()> {
        let (request_id, query) = {
            let mut state = self.state.lock();
            state.last_request += 1;
            state.in_flight += 1;
            (state.last_request, self.spec.query(&state.cut))
        };
        log::debug!(target: "connection", "fetching {} (request {})", self.key, request_id);
        self.notify(|listener| listener.on_fetching(self));

        let connection = Arc::clone(self);
        tokio::spawn(async move { connection.load(request_id, query).await })
    }

    async fn load(&self, request_id: u64, query: Vec<(String, String)>) {
        let result = self.fetcher.fetch(&self.path, &query).await;
        let synced = {
            let mut state = self.state.lock();
            state.in_flight -= 1;
            match result.map(|value| Payload::parse(&self.spec.kind, value)) {
                Err(err) => {
                    log::warn!(target: "connection", "fetching {} failed: {}", self.key, err);
                    false
                }
                Ok(Err(err)) => {
                    log::warn!(target: "connection", "bad payload for {}: {}", self.key, err);
                    false
                }
                Ok(Ok(_)) if self.discard_stale_responses && request_id != state.last_request => {
                    log::debug!(
                        target: "connection",
                        "discarding response {} of {}, request {} is newer",
                        request_id,
                        self.key,
                        state.last_request
                    );
                    false
                }
                Ok(Ok(payload)) => {
                    state.payload = Some(payload);
                    true
                }
            }
        };
        if synced {
            log::debug!(target: "connection", "synced {} (request {})", self.key, request_id);
            self.notify(|listener| listener.on_synced(self));
        }
    }

    pub(crate) fn emit_changed(&self, change: u64) {
        self.notify(|listener| listener.on_changed(self, change));
    }

    fn notify(&self, f: impl Fn(&dyn ConnectionListener)) {
        let listeners: Vec<_> = {
            let mut state = self.state.lock();
            state
                .listeners
                .retain(|(_, listener)| listener.strong_count() > 0);
            state
                .listeners
                .iter()
                .filter_map(|(_, listener)| listener.upgrade())
                .collect()
        };
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    /// Observations converted to `format` and optionally sorted. `None`
    /// until loaded, or for connections that don't hold observations.
    pub fn get_data(&self, format: Format, sort: Option<Sort>) -> Option<Vec<Observation>> {
        match &self.state.lock().payload {
            Some(Payload::Observations(observations)) => Some(observations.formatted(format, sort)),
            _ => None,
        }
    }

    pub fn get_value(&self, lookup: Lookup<'_>, format: Format) -> Option<Datum> {
        let state = self.state.lock();
        match (state.payload.as_ref()?, lookup) {
            (Payload::Observations(observations), Lookup::Index(index)) => {
                observations.value_at(index, format).map(Datum::Observation)
            }
            (Payload::Observations(observations), Lookup::Id(id)) => observations
                .as_slice()
                .iter()
                .position(|o| o.id == id)
                .and_then(|index| observations.value_at(index, format))
                .map(Datum::Observation),
            (Payload::DimensionValues(values), Lookup::Id(id)) => {
                values.get(id).cloned().map(Datum::DimensionValue)
            }
            _ => None,
        }
    }

    /// Label of a dimension value; `None` when this connection holds no
    /// label for `id`.
    pub fn label_for(&self, id: &str) -> Option<String> {
        match &self.state.lock().payload {
            Some(Payload::DimensionValues(values)) => {
                values.get(id).map(|value| value.label().to_string())
            }
            _ => None,
        }
    }

    /// Sum of all totals. When this connection's own dimension is cut to a
    /// single id only that id's observations are counted.
    pub fn get_total(&self) -> Option<f64> {
        let state = self.state.lock();
        let Some(Payload::Observations(observations)) = &state.payload else {
            return None;
        };
        let self_cut = self
            .dimension()
            .and_then(|dimension| state.cut.get(dimension))
            .and_then(|value| value.as_id());
        Some(match self_cut {
            Some(id) => observations.sum_for(id),
            None => observations.sum(),
        })
    }

    pub fn payload(&self) -> Option<Payload> {
        self.state.lock().payload.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::cut::CutValue,
        tests::mock_fetcher::MockFetcher,
    };
    use data::{SortDirection, SortKey};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const PATH: &str = "api/datasets/ds/observations/region";

    #[derive(Default)]
    struct Recorder {
        fetching: AtomicUsize,
        synced: AtomicUsize,
        changed: AtomicUsize,
    }

    impl ConnectionListener for Recorder {
        fn on_fetching(&self, _: &Connection) {
            self.fetching.fetch_add(1, Ordering::SeqCst);
        }

        fn on_synced(&self, _: &Connection) {
            self.synced.fetch_add(1, Ordering::SeqCst);
        }

        fn on_changed(&self, _: &Connection, _: u64) {
            self.changed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connection(fetcher: Arc<MockFetcher>, discard_stale_responses: bool) -> Arc<Connection> {
        let spec = ConnectionSpec::observations(Some("region"), Some("amount"), "sum");
        Arc::new(Connection::new(
            spec.key(),
            spec.clone(),
            spec.path("ds"),
            Cut::default(),
            fetcher,
            discard_stale_responses,
        ))
    }

    fn observations() -> serde_json::Value {
        json!([
            {"id": "a", "total": 1000},
            {"id": "b", "total": 999.99},
            {"id": "b", "total": 0.01}
        ])
    }

    #[tokio::test]
    async fn loads_and_notifies() {
        let fetcher = Arc::new(MockFetcher::new([(PATH, observations())]));
        let conn = connection(fetcher.clone(), true);
        let recorder = Arc::new(Recorder::default());
        let subscription =
            conn.subscribe(Arc::downgrade(&recorder) as Weak<dyn ConnectionListener>);
        assert!(!subscription.settled);
        assert!(!conn.is_loaded());
        assert_eq!(conn.get_total(), None);

        conn.fetch().await.unwrap();

        assert!(conn.is_loaded());
        assert_eq!(recorder.fetching.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.synced.load(Ordering::SeqCst), 1);
        let total = conn.get_total().unwrap();
        assert!((total - 2000.0).abs() < 1e-9, "total was {total}");

        let request = &fetcher.requests()[0];
        assert_eq!(request.param("aggregation"), Some("sum"));
        assert_eq!(request.param("measure"), Some("amount"));
    }

    #[tokio::test]
    async fn total_is_narrowed_by_self_cut() {
        let fetcher = Arc::new(MockFetcher::new([(PATH, observations())]));
        let conn = connection(fetcher, true);
        conn.fetch().await.unwrap();

        conn.set_cut([("region", CutValue::id("b"))].into_iter().collect());
        let total = conn.get_total().unwrap();
        assert!((total - 1000.0).abs() < 1e-9);

        conn.set_cut([("other", CutValue::id("b"))].into_iter().collect());
        let total = conn.get_total().unwrap();
        assert!((total - 2000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn data_and_values() {
        let fetcher = Arc::new(MockFetcher::new([(
            PATH,
            json!([{"id": "a", "total": 25}, {"id": "b", "total": 75}]),
        )]));
        let conn = connection(fetcher, true);
        conn.fetch().await.unwrap();

        assert_eq!(
            conn.get_data(Format::Percentage, None).unwrap(),
            vec![Observation::new("a", 0.25), Observation::new("b", 0.75)]
        );
        let by_total = Sort::new(SortKey::Total, SortDirection::Desc);
        assert_eq!(
            conn.get_data(Format::Absolute, Some(by_total)).unwrap()[0],
            Observation::new("b", 75.0)
        );
        assert_eq!(
            conn.get_value(Lookup::Index(1), Format::Absolute),
            Some(Datum::Observation(Observation::new("b", 75.0)))
        );
        assert_eq!(conn.get_value(Lookup::Index(2), Format::Absolute), None);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_connection_unloaded() {
        let fetcher = Arc::new(MockFetcher::new([]));
        let conn = connection(fetcher, true);
        let recorder = Arc::new(Recorder::default());
        conn.subscribe(Arc::downgrade(&recorder) as Weak<dyn ConnectionListener>);

        conn.fetch().await.unwrap();

        assert!(!conn.is_loaded());
        assert!(!conn.is_fetching());
        assert_eq!(recorder.synced.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_response_is_discarded() {
        let fetcher = Arc::new(MockFetcher::gated([(PATH, observations())]));
        let conn = connection(fetcher.clone(), true);
        let recorder = Arc::new(Recorder::default());
        conn.subscribe(Arc::downgrade(&recorder) as Weak<dyn ConnectionListener>);

        let first = conn.fetch();
        let second = conn.fetch();
        fetcher.wait_pending(2).await;

        fetcher.release_with(PATH, Ok(json!([{"id": "old", "total": 1}])));
        first.await.unwrap();
        assert!(!conn.is_loaded());
        assert_eq!(recorder.synced.load(Ordering::SeqCst), 0);

        fetcher.release_with(PATH, Ok(json!([{"id": "new", "total": 2}])));
        second.await.unwrap();
        assert_eq!(conn.get_total(), Some(2.0));
        assert_eq!(recorder.synced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn last_write_wins_without_guard() {
        let fetcher = Arc::new(MockFetcher::gated([(PATH, observations())]));
        let conn = connection(fetcher.clone(), false);
        let recorder = Arc::new(Recorder::default());
        conn.subscribe(Arc::downgrade(&recorder) as Weak<dyn ConnectionListener>);

        let first = conn.fetch();
        let second = conn.fetch();
        fetcher.wait_pending(2).await;

        fetcher.release_with(PATH, Ok(json!([{"id": "new", "total": 2}])));
        first.await.unwrap();
        fetcher.release_with(PATH, Ok(json!([{"id": "old", "total": 1}])));
        tokio::time::timeout(Duration::from_secs(10), second)
            .await
            .expect("fetch should complete")
            .unwrap();

        // both completions are stored and reported
        assert_eq!(recorder.synced.load(Ordering::SeqCst), 2);
        assert_eq!(conn.get_total(), Some(1.0));
    }

    #[tokio::test]
    async fn dropped_listener_is_pruned() {
        let fetcher = Arc::new(MockFetcher::new([(PATH, observations())]));
        let conn = connection(fetcher, true);
        {
            let recorder = Arc::new(Recorder::default());
            conn.subscribe(Arc::downgrade(&recorder) as Weak<dyn ConnectionListener>);
        }
        conn.fetch().await.unwrap();
        assert!(conn.state.lock().listeners.is_empty());

        let recorder = Arc::new(Recorder::default());
        let subscription =
            conn.subscribe(Arc::downgrade(&recorder) as Weak<dyn ConnectionListener>);
        assert!(subscription.settled);
        conn.unsubscribe(subscription.id);
        conn.emit_changed(1);
        assert_eq!(recorder.changed.load(Ordering::SeqCst), 0);
    }
}
