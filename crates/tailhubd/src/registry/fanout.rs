//! Subscription fan-out.
//!
//! Every tracked log owns one bounded `broadcast` ring. Each subscriber holds
//! its own cursor into that ring, so a subscriber that stops draining only
//! loses its own oldest events; the producer and every other subscriber carry
//! on at full speed. A lagging subscriber is told how much it skipped via
//! [`Delivery::Missed`] and can re-read the buffer to recover.

use std::fmt;
use std::sync::Weak;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use tailhub_core::LogId;

use super::commands::LogEvent;
use super::tracked::TrackedLog;

/// Identifier of one subscriber within a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Event(LogEvent),
    /// The subscriber fell behind and this many events were dropped for it.
    Missed(u64),
}

/// A registered interest in one log's future events.
///
/// Dropping the subscription unsubscribes. It never keeps the log alive.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    log: LogId,
    receiver: broadcast::Receiver<LogEvent>,
    owner: Weak<TrackedLog>,
    missed: u64,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        log: LogId,
        receiver: broadcast::Receiver<LogEvent>,
        owner: Weak<TrackedLog>,
        finished: bool,
    ) -> Self {
        Self {
            id,
            log,
            receiver,
            owner,
            missed: 0,
            finished,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn log(&self) -> &LogId {
        &self.log
    }

    /// Total events dropped for this subscriber so far.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// Waits for the next delivery.
    ///
    /// Returns `None` once the log has been untracked.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        let result = self.receiver.recv().await;
        self.settle(result)
    }

    /// Blocking variant of [`Subscription::recv`] for plain threads.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_recv(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        let result = self.receiver.blocking_recv();
        self.settle(result)
    }

    /// Returns the next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(event) => self.settle(Ok(event)),
            Err(TryRecvError::Lagged(n)) => self.settle(Err(RecvError::Lagged(n))),
            Err(TryRecvError::Closed) => self.settle(Err(RecvError::Closed)),
            Err(TryRecvError::Empty) => None,
        }
    }

    fn settle(&mut self, result: Result<LogEvent, RecvError>) -> Option<Delivery> {
        match result {
            Ok(event) => {
                if event == LogEvent::Removed {
                    self.finished = true;
                }
                Some(Delivery::Event(event))
            }
            Err(RecvError::Lagged(n)) => {
                self.missed = self.missed.saturating_add(n);
                Some(Delivery::Missed(n))
            }
            Err(RecvError::Closed) => {
                self.finished = true;
                None
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_subscriber(self.id);
        }
    }
}
