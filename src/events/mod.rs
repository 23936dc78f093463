//! Mutation lifecycle events.
//!
//! [`MutationNotifier`] brackets every store mutation with
//! `<tag>.entity.<verb>ing` and `<tag>.entity.<verb>ed` events on an
//! [`EventBus`], then invalidates the repository's cache tag and publishes
//! `<tag>.cache.flushed`.

mod bus;
mod notifier;
mod types;

pub use bus::{Delivery, EventBus, SubscriberError, SubscriptionId};
pub use notifier::MutationNotifier;
pub use types::{EventEnvelope, Lifecycle};
