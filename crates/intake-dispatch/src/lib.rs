// crates/intake-dispatch/src/lib.rs
// ============================================================================
// Crate: intake-dispatch
// Description: Outbox dispatcher — composite subscriber fan-out with retry,
// backoff, and dead-letter bookkeeping, driven by a single cooperative
// worker loop.
// Dependencies: intake-core, tokio, rand, tracing
// ============================================================================

//! Drains the transactional outbox and fans each entry out to every
//! registered [`subscriber::Subscriber`]. Delivery failures are recorded as
//! retries with exponential backoff and jitter, up to a configured attempt
//! budget, after which an entry is left dispatched-but-dead-lettered for the
//! `dead_letters` query path. The drain loop itself runs on a single
//! cooperative worker (see [`worker`]) so at most one drain pass is ever in
//! flight.

pub mod dispatcher;
pub mod subscriber;
pub mod worker;

pub use dispatcher::CompositeDispatcher;
pub use dispatcher::DispatchPolicy;
pub use dispatcher::DrainSummary;
pub use subscriber::Interest;
pub use subscriber::LoggingSubscriber;
pub use subscriber::Subscriber;
pub use subscriber::SubscriberError;
pub use worker::WorkerHandle;
