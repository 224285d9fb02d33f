use std::collections::VecDeque;

use parking_lot::Mutex;

/// Opaque handle correlating a delivery outcome back to the caller-supplied
/// completion callback registered for that message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryToken(u64);

impl DeliveryToken {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        DeliveryToken(raw)
    }

    #[inline]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// One delivery confirmation produced by the broker client's callback
/// thread. `error` is `None` on successful delivery.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub token: Option<DeliveryToken>,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    #[inline]
    pub fn ok(token: Option<DeliveryToken>) -> Self {
        Self { token, error: None }
    }

    #[inline]
    pub fn failed<E: Into<String>>(token: Option<DeliveryToken>, error: E) -> Self {
        Self { token, error: Some(error.into()) }
    }
}

/// FIFO carrying delivery outcomes from the broker client's callback thread
/// to the caller thread. Push happens on the callback thread, pop on the
/// caller thread; ordering is callback-arrival order, which reflects network
/// completion order and not necessarily submission order.
///
/// The caller drains on its own schedule and never blocks waiting for data,
/// so a mutex without a condition variable is enough.
#[derive(Debug, Default)]
pub struct DeliveryQueue {
    inner: Mutex<VecDeque<DeliveryOutcome>>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the broker client's callback thread. The lock is held
    /// only for the append.
    #[inline]
    pub fn push(&self, outcome: DeliveryOutcome) {
        self.inner.lock().push_back(outcome);
    }

    /// Called from the caller thread; removes the oldest outcome, `None`
    /// when empty.
    #[inline]
    pub fn pop_one(&self) -> Option<DeliveryOutcome> {
        self.inner.lock().pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything still queued, returning how many outcomes were
    /// discarded. Only meaningful once the broker client can produce no
    /// further callbacks.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.len();
        inner.clear();
        dropped
    }
}
