//! `TokenEventSink` that records events for assertions.

use common::types::ClientName;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use token_engine::{CacheEntry, EngineState, TokenError, TokenEventSink};

/// One recorded event. Errors are reduced to their `kind()` label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    FetchStarted,
    FetchSucceeded { expires_in: u64 },
    FetchFailed { kind: &'static str, retry_in: Option<Duration> },
    FetchJoined,
    StateChanged { from: EngineState, to: EngineState },
    AdapterFailed { adapter: &'static str, kind: &'static str },
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(ClientName, SinkEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All events, in order.
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Events reported for `client`.
    pub fn events_for(&self, client: &str) -> Vec<SinkEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.as_str() == client)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// States the engine moved into, in order.
    pub fn states(&self) -> Vec<EngineState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SinkEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }

    fn push(&self, client: &ClientName, event: SinkEvent) {
        self.events.lock().unwrap().push((client.clone(), event));
    }
}

impl TokenEventSink for RecordingSink {
    fn fetch_started(&self, client: &ClientName) {
        self.push(client, SinkEvent::FetchStarted);
    }

    fn fetch_succeeded(&self, client: &ClientName, entry: &CacheEntry, _elapsed: Duration) {
        self.push(
            client,
            SinkEvent::FetchSucceeded {
                expires_in: entry.token().expires_in,
            },
        );
    }

    fn fetch_failed(
        &self,
        client: &ClientName,
        error: &TokenError,
        _elapsed: Duration,
        retry_in: Option<Duration>,
    ) {
        self.push(
            client,
            SinkEvent::FetchFailed {
                kind: error.kind(),
                retry_in,
            },
        );
    }

    fn fetch_joined(&self, client: &ClientName) {
        self.push(client, SinkEvent::FetchJoined);
    }

    fn state_changed(&self, client: &ClientName, from: EngineState, to: EngineState) {
        self.push(client, SinkEvent::StateChanged { from, to });
    }

    fn adapter_failed(&self, client: &ClientName, adapter: &'static str, error: &TokenError) {
        self.push(
            client,
            SinkEvent::AdapterFailed {
                adapter,
                kind: error.kind(),
            },
        );
    }
}
