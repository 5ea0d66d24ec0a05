//! Message storage pool: owner of message payloads and the wrapper budget.
//!
//! Every message that enters a scheduler queue travels inside a
//! [`MessageWrapper`] acquired from a [`MessagePool`]. The pool is the only
//! place where wrappers are created or retired; queues and workers merely
//! borrow them while a message is in transit. Exhaustion is reported here,
//! never by a queue.
//!
//! Wrappers are plain owned nodes rather than intrusive list links, so the
//! pool tracks a bounded wrapper budget instead of recycling raw storage.
//! `acquire` debits the budget, `release` credits it back; a wrapper must
//! return to the pool exactly once regardless of dispatch outcome.

use std::any::Any;
use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::sync::lock;

/// Type tag carried by every message.
///
/// The scheduler core never interprets the tag; it exists so subsystem
/// handlers can demultiplex their own message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageTag(pub u16);

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// A scheduler message: type tag plus an opaque payload.
///
/// Payloads are opaque to the dispatch core; handlers downcast via
/// [`Message::payload_ref`].
pub struct Message {
    tag: MessageTag,
    payload: Option<Box<dyn Any + Send>>,
}

impl Message {
    /// Creates a payload-less message (pure event).
    #[must_use]
    pub fn new(tag: MessageTag) -> Self {
        Self { tag, payload: None }
    }

    /// Creates a message carrying an opaque payload.
    #[must_use]
    pub fn with_payload(tag: MessageTag, payload: Box<dyn Any + Send>) -> Self {
        Self {
            tag,
            payload: Some(payload),
        }
    }

    /// Returns the message's type tag.
    #[must_use]
    pub fn tag(&self) -> MessageTag {
        self.tag
    }

    /// Attempts to borrow the payload as a concrete type.
    ///
    /// Returns `None` if there is no payload or the type does not match.
    #[must_use]
    pub fn payload_ref<T: 'static>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("tag", &self.tag)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Queue-linkage node owning one in-flight [`Message`].
///
/// Created only by [`MessagePool::acquire`] and consumed only by
/// [`MessagePool::release`].
#[derive(Debug)]
pub struct MessageWrapper {
    message: Message,
}

impl MessageWrapper {
    /// Borrows the wrapped message.
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// Error acquiring a wrapper from the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// All wrappers are outstanding; the caller must back off or drop.
    #[error("message pool exhausted ({capacity} wrappers outstanding)")]
    Exhausted {
        /// Total wrapper budget of the pool.
        capacity: usize,
    },
}

/// Bounded wrapper pool shared by all scheduler queues.
pub struct MessagePool {
    capacity: usize,
    free: Mutex<usize>,
}

impl MessagePool {
    /// Creates a pool with a budget of `capacity` in-flight wrappers.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free: Mutex::new(capacity),
        }
    }

    /// Wraps `message` for queueing, debiting one wrapper from the budget.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] when every wrapper is outstanding.
    /// The message is dropped in that case; callers treat exhaustion as a
    /// shed message, not a queue failure.
    pub fn acquire(&self, message: Message) -> Result<MessageWrapper, PoolError> {
        let mut free = lock(&self.free);
        if *free == 0 {
            return Err(PoolError::Exhausted {
                capacity: self.capacity,
            });
        }
        *free -= 1;
        Ok(MessageWrapper { message })
    }

    /// Returns a wrapper to the pool, crediting the budget.
    ///
    /// The wrapped message (and its payload) is dropped here; subsystem
    /// resources referenced by the payload must be released beforehand via
    /// the handler's `free` callback.
    pub fn release(&self, wrapper: MessageWrapper) {
        drop(wrapper);
        let mut free = lock(&self.free);
        debug_assert!(*free < self.capacity, "wrapper released twice");
        *free += 1;
    }

    /// Number of wrappers currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        *lock(&self.free)
    }

    /// Total wrapper budget.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for MessagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release_round_trip() {
        let pool = MessagePool::new(4);
        assert_eq!(pool.available(), 4);

        let wrapper = pool.acquire(Message::new(MessageTag(1))).unwrap();
        assert_eq!(pool.available(), 3);
        assert_eq!(wrapper.message().tag(), MessageTag(1));

        pool.release(wrapper);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn exhaustion_fails_at_the_pool() {
        let pool = MessagePool::new(2);
        let a = pool.acquire(Message::new(MessageTag(1))).unwrap();
        let b = pool.acquire(Message::new(MessageTag(2))).unwrap();

        assert!(matches!(
            pool.acquire(Message::new(MessageTag(3))),
            Err(PoolError::Exhausted { capacity: 2 })
        ));

        pool.release(a);
        let c = pool.acquire(Message::new(MessageTag(4))).unwrap();
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn payload_downcast() {
        let msg = Message::with_payload(MessageTag(7), Box::new(42u32));
        assert_eq!(msg.payload_ref::<u32>(), Some(&42));
        assert_eq!(msg.payload_ref::<String>(), None);

        let bare = Message::new(MessageTag(8));
        assert_eq!(bare.payload_ref::<u32>(), None);
    }
}
