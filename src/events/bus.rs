//! In-process event bus.
//!
//! Subscribers register a name pattern where `*` matches any run of
//! characters (`*.entity.created`, `posts.*`). Delivery is synchronous and in
//! subscription order. A subscriber that errors or panics is logged and
//! skipped; it never stops delivery to the others or fails the publisher.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::types::EventEnvelope;
use crate::cache::lock::{rw_read, rw_write};
use crate::util::wildcard;

const SOURCE: &str = "events::bus";
const METRIC_EVENT_PUBLISHED_TOTAL: &str = "repocache_event_published_total";
const METRIC_EVENT_SUBSCRIBER_FAILURE_TOTAL: &str = "repocache_event_subscriber_failure_total";

#[derive(Debug, Error)]
#[error("{message}")]
pub struct SubscriberError {
    message: String,
}

impl SubscriberError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

type Handler = Arc<dyn Fn(&EventEnvelope) -> Result<(), SubscriberError> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: Handler,
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers whose pattern matched.
    pub matched: usize,
    /// Matched subscribers that returned an error or panicked.
    pub failed: usize,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, pattern: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&EventEnvelope) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        let pattern = pattern.into();
        debug!(subscription = %id, pattern = %pattern, "Event subscriber registered");
        rw_write(&self.subscriptions, SOURCE, "subscribe").push(Subscription {
            id,
            pattern,
            handler: Arc::new(handler),
        });
        id
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = rw_write(&self.subscriptions, SOURCE, "unsubscribe");
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        rw_read(&self.subscriptions, SOURCE, "subscriber_count").len()
    }

    pub fn publish(&self, envelope: &EventEnvelope) -> Delivery {
        // Handlers run without the lock held so they may (un)subscribe.
        let matching: Vec<Subscription> = rw_read(&self.subscriptions, SOURCE, "publish")
            .iter()
            .filter(|subscription| wildcard::matches(&subscription.pattern, &envelope.name, '*'))
            .cloned()
            .collect();

        counter!(METRIC_EVENT_PUBLISHED_TOTAL, "event" => envelope.name.clone()).increment(1);
        debug!(
            event_id = %envelope.id,
            event = %envelope.name,
            subscribers = matching.len(),
            "Event published"
        );

        let mut delivery = Delivery {
            matched: matching.len(),
            failed: 0,
        };

        for subscription in matching {
            let failure = match catch_unwind(AssertUnwindSafe(|| (subscription.handler)(envelope)))
            {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(format!("subscriber panicked: {}", panic_message(&*panic))),
            };

            if let Some(error) = failure {
                delivery.failed += 1;
                counter!(METRIC_EVENT_SUBSCRIBER_FAILURE_TOTAL, "event" => envelope.name.clone())
                    .increment(1);
                warn!(
                    event_id = %envelope.id,
                    event = %envelope.name,
                    subscription = %subscription.id,
                    pattern = %subscription.pattern,
                    error = %error,
                    "Event subscriber failed"
                );
            }
        }

        delivery
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
