//! Progress streams and in-flight resolution sharing.
//!
//! Each running resolution owns an [`InFlight`] record holding a broadcast
//! channel of states and the latest state. A subscriber snapshots the latest
//! state and subscribes under the same lock, so it sees every state from
//! the snapshot onwards exactly once. Dropping the last subscriber cancels
//! the resolution task.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::media::MediaLink;
use crate::resolver::state::ResolutionState;

/// Identity of a resolution; concurrent requests with equal keys share one
/// provider pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ResolutionKey {
    pub film_id: String,
    pub episode_id: Option<String>,
    pub preferred_provider: Option<String>,
}

pub(crate) type FlightTable = Mutex<HashMap<ResolutionKey, Arc<InFlight>>>;

/// Failure recorded for one provider during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider_id: String,
    pub provider_name: String,
    pub reason: String,
    /// False when the provider simply had nothing for the title
    pub unexpected: bool,
}

/// Terminal result of a resolution.
#[derive(Debug, Clone)]
pub struct ResolutionOutcome {
    pub state: ResolutionState,
    /// Registry id of the provider that produced `links`
    pub provider_id: Option<String>,
    pub links: Vec<MediaLink>,
    pub failures: Vec<ProviderFailure>,
    pub from_cache: bool,
}

impl ResolutionOutcome {
    pub fn stream_links(&self) -> impl Iterator<Item = &MediaLink> {
        self.links.iter().filter(|l| l.is_stream())
    }
}

/// Every state a stream produced plus the terminal outcome.
#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub states: Vec<ResolutionState>,
    pub outcome: Option<Arc<ResolutionOutcome>>,
}

impl ResolutionReport {
    pub fn final_state(&self) -> Option<&ResolutionState> {
        self.states.last()
    }
}

/// Shared record of a running resolution.
pub(crate) struct InFlight {
    sender: broadcast::Sender<ResolutionState>,
    current: Mutex<ResolutionState>,
    outcome: Mutex<Option<Arc<ResolutionOutcome>>>,
    subscribers: AtomicUsize,
    token: CancellationToken,
}

impl InFlight {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            sender,
            current: Mutex::new(ResolutionState::Idle),
            outcome: Mutex::new(None),
            subscribers: AtomicUsize::new(0),
            token: CancellationToken::new(),
        })
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Records `state` as current and broadcasts it.
    pub fn publish(&self, state: ResolutionState) {
        let mut current = self.current.lock();
        *current = state.clone();
        // No receivers is fine; late subscribers read `current`
        let _ = self.sender.send(state);
    }

    /// Stores the outcome, then broadcasts its terminal state.
    pub fn complete(&self, outcome: ResolutionOutcome) {
        let state = outcome.state.clone();
        *self.outcome.lock() = Some(Arc::new(outcome));
        self.publish(state);
    }

    fn outcome(&self) -> Option<Arc<ResolutionOutcome>> {
        self.outcome.lock().clone()
    }
}

/// Keeps a flight alive; the last one dropped cancels it.
struct Subscription {
    flight: Arc<InFlight>,
    table: Arc<FlightTable>,
    key: ResolutionKey,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if self.flight.subscribers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if self.flight.outcome().is_none() {
            tracing::debug!("Last subscriber left, cancelling resolution of {}", self.key.film_id);
        }
        self.flight.token.cancel();

        if table
            .get(&self.key)
            .is_some_and(|f| Arc::ptr_eq(f, &self.flight))
        {
            table.remove(&self.key);
        }
    }
}

enum Source {
    Ready(Arc<ResolutionOutcome>),
    Flight(Subscription),
}

/// Progress states of one resolution, ending with a terminal state.
pub struct ResolutionStream {
    inner: BoxStream<'static, ResolutionState>,
    source: Source,
}

impl ResolutionStream {
    /// Stream that yields the terminal state of an already known outcome.
    pub(crate) fn ready(outcome: ResolutionOutcome) -> Self {
        let state = outcome.state.clone();
        Self {
            inner: stream::iter([state]).boxed(),
            source: Source::Ready(Arc::new(outcome)),
        }
    }

    /// Subscribes to a flight. Caller must hold the flight table lock.
    pub(crate) fn attach(
        flight: Arc<InFlight>,
        table: Arc<FlightTable>,
        key: ResolutionKey,
    ) -> Self {
        flight.subscribers.fetch_add(1, Ordering::AcqRel);

        let (snapshot, receiver) = {
            let current = flight.current.lock();
            (current.clone(), flight.sender.subscribe())
        };

        let live = if snapshot.is_terminal() {
            stream::empty().boxed()
        } else {
            live_states(receiver)
        };

        Self {
            inner: stream::iter([snapshot]).chain(live).boxed(),
            source: Source::Flight(Subscription { flight, table, key }),
        }
    }

    /// Terminal outcome, once the stream has produced its terminal state.
    pub fn outcome(&self) -> Option<Arc<ResolutionOutcome>> {
        match &self.source {
            Source::Ready(outcome) => Some(Arc::clone(outcome)),
            Source::Flight(subscription) => subscription.flight.outcome(),
        }
    }

    /// Drains the stream to its terminal state.
    pub async fn collect_final(mut self) -> ResolutionReport {
        let mut states = Vec::new();
        while let Some(state) = self.next().await {
            states.push(state);
        }

        ResolutionReport {
            states,
            outcome: self.outcome(),
        }
    }
}

impl Stream for ResolutionStream {
    type Item = ResolutionState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

fn live_states(receiver: broadcast::Receiver<ResolutionState>) -> BoxStream<'static, ResolutionState> {
    stream::unfold(Some(receiver), |receiver| async move {
        let mut receiver = receiver?;
        loop {
            match receiver.recv().await {
                Ok(state) => {
                    let next = (!state.is_terminal()).then_some(receiver);
                    return Some((state, next));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Progress subscriber skipped {} states", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
