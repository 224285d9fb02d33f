use bytestring::ByteString;

use crate::{EgressError, Result};

/// Growable name → topic-handle cache, so a topic is registered with the
/// broker client once per session instead of on every produce call.
///
/// Lookup is a linear scan; the number of distinct topics per session is
/// small and bounded in practice. Storage starts at a fixed capacity and
/// doubles on overflow, with the reservation done fallibly so exhaustion
/// surfaces as `OutOfMemory` for the triggering operation.
///
/// Only ever touched from the caller thread.
pub struct TopicCache<T> {
    entries: Vec<(ByteString, T)>,
    created: usize,
}

impl<T> TopicCache<T> {
    pub const INITIAL_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self { entries: Vec::new(), created: 0 }
    }

    /// Live handle count.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total handles ever created by this cache, an instrumentation hook.
    #[inline]
    pub fn created(&self) -> usize {
        self.created
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.iter().find(|(n, _)| AsRef::<str>::as_ref(n) == name).map(|(_, handle)| handle)
    }

    /// Returns the cached handle for `name`, or invokes `create` and caches
    /// its result. When `create` fails the cache is left unchanged, no
    /// partial entry remains.
    pub fn resolve_with<F>(&mut self, name: &str, create: F) -> Result<T>
    where
        T: Clone,
        F: FnOnce() -> Result<T>,
    {
        if let Some(handle) = self.get(name) {
            return Ok(handle.clone());
        }
        let handle = create()?;
        self.grow_if_full()?;
        self.entries.push((ByteString::from(name), handle.clone()));
        self.created += 1;
        Ok(handle)
    }

    fn grow_if_full(&mut self) -> Result<()> {
        if self.entries.len() < self.entries.capacity() {
            return Ok(());
        }
        let additional = if self.entries.capacity() == 0 {
            Self::INITIAL_CAPACITY
        } else {
            self.entries.capacity()
        };
        self.entries.try_reserve_exact(additional).map_err(|_| EgressError::OutOfMemory)
    }

    /// Releases every handle and the storage itself; handle resources are
    /// released by drop. Called once, from session close.
    pub fn destroy_all(&mut self) -> usize {
        let released = self.entries.len();
        self.entries = Vec::new();
        released
    }
}

impl<T> Default for TopicCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
