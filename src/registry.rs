//! # Operation Registry
//!
//! Tracks every live publish and browse operation for the lifetime of the
//! runtime.
//!
//! ## Key Types
//!
//! - [`Registry`] - handle allocation plus the two operation maps
//! - [`OperationHandle`] - opaque integer identifying one operation to the host
//! - [`PublishRecord`] / [`BrowseRecord`] - state kept per live operation
//!
//! Handles are issued from a single monotonic counter shared by publishers
//! and browsers, starting at [`HANDLE_BASE`], and are never reused for the
//! process lifetime. The maps are guarded by one mutex; every operation on
//! them is short and non-blocking, so a coarse lock is enough.

use crate::backend::ListenerToken;
use crate::error::BridgeError;
use crate::event::ServiceDescriptor;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Opaque identifier for one publish or browse operation.
pub type OperationHandle = u32;

/// First handle ever issued. Kept from the original plugin.
pub const HANDLE_BASE: OperationHandle = 1984;

/// State for one active publish operation.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    /// Token of the native registration listener, for teardown.
    pub token: ListenerToken,
    /// The service as advertised (name, type, port, attributes).
    pub service: ServiceDescriptor,
}

/// State for one active browse operation.
#[derive(Debug, Clone)]
pub struct BrowseRecord {
    /// Token of the native discovery listener, for teardown.
    pub token: ListenerToken,
    /// The service type filter the discovery was started with.
    pub service_type: String,
}

#[derive(Default)]
struct Operations {
    publishers: HashMap<OperationHandle, PublishRecord>,
    browsers: HashMap<OperationHandle, BrowseRecord>,
}

/// Handle allocator and owner of the publisher/browser maps.
///
/// Constructed once per runtime and shared (`Arc`) with the callback
/// listeners, which hold only handles back into it, never host state.
pub struct Registry {
    next_handle: AtomicU32,
    ops: Mutex<Operations>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            next_handle: AtomicU32::new(HANDLE_BASE),
            ops: Mutex::new(Operations::default()),
        }
    }

    /// Issue the next handle. Strictly increasing, shared namespace for
    /// publishers and browsers, safe from any thread.
    pub fn next_handle(&self) -> OperationHandle {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_publish(
        &self,
        handle: OperationHandle,
        record: PublishRecord,
    ) -> Result<(), BridgeError> {
        let mut ops = self.ops.lock().unwrap();
        if ops.publishers.contains_key(&handle) {
            return Err(BridgeError::DuplicateHandle(handle));
        }
        ops.publishers.insert(handle, record);
        Ok(())
    }

    pub fn register_browse(
        &self,
        handle: OperationHandle,
        record: BrowseRecord,
    ) -> Result<(), BridgeError> {
        let mut ops = self.ops.lock().unwrap();
        if ops.browsers.contains_key(&handle) {
            return Err(BridgeError::DuplicateHandle(handle));
        }
        ops.browsers.insert(handle, record);
        Ok(())
    }

    pub fn lookup_publish(&self, handle: OperationHandle) -> Option<PublishRecord> {
        self.ops.lock().unwrap().publishers.get(&handle).cloned()
    }

    pub fn lookup_browse(&self, handle: OperationHandle) -> Option<BrowseRecord> {
        self.ops.lock().unwrap().browsers.get(&handle).cloned()
    }

    /// Attach the native listener token once the backend has issued it.
    /// A no-op when the record is already gone, which happens when the
    /// backend reported a terminal failure synchronously during the start
    /// call and the listener removed the record first.
    pub fn assign_publish_token(&self, handle: OperationHandle, token: ListenerToken) {
        if let Some(record) = self.ops.lock().unwrap().publishers.get_mut(&handle) {
            record.token = token;
        }
    }

    /// Browse counterpart of [`Self::assign_publish_token`].
    pub fn assign_browse_token(&self, handle: OperationHandle, token: ListenerToken) {
        if let Some(record) = self.ops.lock().unwrap().browsers.get_mut(&handle) {
            record.token = token;
        }
    }

    /// Remove a publish record. Idempotent: an absent handle returns `None`.
    pub fn remove_publish(&self, handle: OperationHandle) -> Option<PublishRecord> {
        self.ops.lock().unwrap().publishers.remove(&handle)
    }

    /// Remove a browse record. Idempotent: an absent handle returns `None`.
    pub fn remove_browse(&self, handle: OperationHandle) -> Option<BrowseRecord> {
        self.ops.lock().unwrap().browsers.remove(&handle)
    }

    /// Atomically empty the publisher map, returning all entries.
    pub fn drain_publishers(&self) -> Vec<(OperationHandle, PublishRecord)> {
        self.ops.lock().unwrap().publishers.drain().collect()
    }

    /// Atomically empty the browser map, returning all entries.
    pub fn drain_browsers(&self) -> Vec<(OperationHandle, BrowseRecord)> {
        self.ops.lock().unwrap().browsers.drain().collect()
    }

    pub fn publisher_count(&self) -> usize {
        self.ops.lock().unwrap().publishers.len()
    }

    pub fn browser_count(&self) -> usize {
        self.ops.lock().unwrap().browsers.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish_record() -> PublishRecord {
        PublishRecord {
            token: ListenerToken(7),
            service: ServiceDescriptor::default(),
        }
    }

    fn browse_record() -> BrowseRecord {
        BrowseRecord {
            token: ListenerToken(8),
            service_type: "_zconf._tcp".into(),
        }
    }

    #[test]
    fn test_handles_start_at_base_and_increase() {
        let registry = Registry::new();
        assert_eq!(registry.next_handle(), HANDLE_BASE);
        assert_eq!(registry.next_handle(), HANDLE_BASE + 1);
        assert_eq!(registry.next_handle(), HANDLE_BASE + 2);
    }

    #[test]
    fn test_shared_namespace_never_collides() {
        let registry = Registry::new();
        let publisher = registry.next_handle();
        let browser = registry.next_handle();
        assert_ne!(publisher, browser);

        registry.register_publish(publisher, publish_record()).unwrap();
        registry.register_browse(browser, browse_record()).unwrap();
        assert!(registry.lookup_publish(publisher).is_some());
        assert!(registry.lookup_browse(browser).is_some());
        // Cross-kind lookups miss.
        assert!(registry.lookup_publish(browser).is_none());
        assert!(registry.lookup_browse(publisher).is_none());
    }

    #[test]
    fn test_duplicate_handle_rejected() {
        let registry = Registry::new();
        let handle = registry.next_handle();
        registry.register_publish(handle, publish_record()).unwrap();
        let err = registry.register_publish(handle, publish_record());
        assert!(matches!(err, Err(BridgeError::DuplicateHandle(h)) if h == handle));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let handle = registry.next_handle();
        registry.register_browse(handle, browse_record()).unwrap();

        assert!(registry.remove_browse(handle).is_some());
        assert!(registry.remove_browse(handle).is_none());
        assert!(registry.remove_publish(9999).is_none());
    }

    #[test]
    fn test_assign_token_after_removal_is_noop() {
        let registry = Registry::new();
        let handle = registry.next_handle();
        let record = PublishRecord {
            token: ListenerToken::UNASSIGNED,
            service: ServiceDescriptor::default(),
        };
        registry.register_publish(handle, record).unwrap();
        registry.assign_publish_token(handle, ListenerToken(5));
        assert_eq!(registry.lookup_publish(handle).unwrap().token, ListenerToken(5));

        registry.remove_publish(handle);
        registry.assign_publish_token(handle, ListenerToken(6));
        assert!(registry.lookup_publish(handle).is_none());
    }

    #[test]
    fn test_drain_empties_registry() {
        let registry = Registry::new();
        for _ in 0..3 {
            let handle = registry.next_handle();
            registry.register_publish(handle, publish_record()).unwrap();
        }
        let drained = registry.drain_publishers();
        assert_eq!(drained.len(), 3);
        assert_eq!(registry.publisher_count(), 0);
        assert!(registry.drain_publishers().is_empty());
    }

    #[test]
    fn test_concurrent_allocation_unique() {
        use std::sync::Arc;
        let registry = Arc::new(Registry::new());
        let mut joins = Vec::new();
        for _ in 0..4 {
            let registry = registry.clone();
            joins.push(std::thread::spawn(move || {
                (0..100).map(|_| registry.next_handle()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<OperationHandle> =
            joins.into_iter().flat_map(|j| j.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 400);
    }
}
