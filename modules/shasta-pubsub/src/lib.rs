//! Snapshot+delta distribution.
//!
//! A [`Publisher`] keys every value by its identifier and routes all values of
//! one scope to one log partition. A [`Worker`] consumes those partitions and
//! commits each value to the cache, updating the scope's latest-value table and
//! delta log in one atomic step. A [`Subscriber`] reads the table once, emits
//! it as a single snapshot and then tails the delta log from exactly the
//! snapshot's sequence id, so no change is skipped or seen twice.

pub mod error;
pub mod publisher;
pub mod queue;
pub mod retry;
pub mod subscriber;
pub mod worker;

pub use error::{PublishError, SubscriberError, WorkerError};
pub use publisher::Publisher;
pub use queue::MessageQueue;
pub use retry::RetryPolicy;
pub use subscriber::{Subscriber, SubscriberOptions, Subscription};
pub use worker::{Worker, WorkerOptions};
