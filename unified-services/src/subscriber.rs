//! Callback registries with best-effort delivery
//!
//! Callbacks run synchronously in registration order. A callback that returns
//! an error or panics is reported as a discarded delivery and never affects
//! the other callbacks or the caller.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a delivery was discarded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    #[error("subscriber failed: {0}")]
    Failed(String),

    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

impl SubscriberError {
    pub fn failed(msg: impl Into<String>) -> Self {
        SubscriberError::Failed(msg.into())
    }
}

/// Outcome of delivering one event to one subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Discarded(SubscriberError),
}

/// Outcomes of one notification, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcomes: Vec<(SubscriberId, Delivery)>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, d)| matches!(d, Delivery::Delivered))
            .count()
    }

    pub fn discarded(&self) -> impl Iterator<Item = (SubscriberId, &SubscriberError)> {
        self.outcomes.iter().filter_map(|(id, d)| match d {
            Delivery::Discarded(e) => Some((*id, e)),
            Delivery::Delivered => None,
        })
    }
}

pub type Callback<A> = Arc<dyn Fn(&A) -> Result<(), SubscriberError> + Send + Sync>;

/// Ordered set of callbacks for one kind of event
pub struct Registry<A> {
    /// Log prefix, e.g. "[Store]"
    name: &'static str,
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriberId, Callback<A>)>>,
}

impl<A> Registry<A> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&A) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if the id was not registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver `event` to every callback registered at the time of the call
    pub fn notify(&self, event: &A) -> DeliveryReport {
        // Snapshot so callbacks may (un)subscribe without deadlocking
        let entries: Vec<(SubscriberId, Callback<A>)> = self.entries.read().clone();

        let outcomes = entries
            .into_iter()
            .map(|(id, callback)| {
                let delivery = match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(Ok(())) => Delivery::Delivered,
                    Ok(Err(e)) => Delivery::Discarded(e),
                    Err(payload) => Delivery::Discarded(SubscriberError::Panicked(panic_message(
                        payload.as_ref(),
                    ))),
                };
                if let Delivery::Discarded(e) = &delivery {
                    warn!("{} Subscriber {} discarded event: {}", self.name, id, e);
                }
                (id, delivery)
            })
            .collect();

        DeliveryReport { outcomes }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<A> std::fmt::Debug for Registry<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("subscribers", &self.len())
            .finish()
    }
}
