//! Message storage and queueing primitives.
//!
//! The [`MessagePool`](pool::MessagePool) owns message storage and enforces a
//! bounded wrapper budget; [`MessageQueue`](queue::MessageQueue)s hold
//! in-flight wrappers between a producer (any thread) and the single worker
//! that drains them.

pub mod pool;
pub mod queue;

pub use pool::{Message, MessagePool, MessageTag, MessageWrapper, PoolError};
pub use queue::MessageQueue;
