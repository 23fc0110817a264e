//! # Zeroconf Runtime Module
//!
//! High-level runtime exposing the host-facing operation surface.
//!
//! ## Key Types
//!
//! - [`ZeroconfRuntime`] - Owns the registry, dispatcher and backend
//! - [`PublishParams`] / [`BrowseParams`] - Typed operation parameters
//! - [`BridgeConfig`] - Defaults for service type and name
//!
//! ## Lifecycle
//!
//! 1. Construct: `ZeroconfRuntime::new()` (or `with_backend` for tests)
//! 2. Attach a listener: `let mut events = runtime.init();`
//! 3. Operate: `runtime.publish(...)`, `runtime.browse(...)`
//! 4. Tear down: `runtime.unpublish_all(); runtime.stop_browse_all();`
//!
//! ## Example
//!
//! ```ignore
//! let runtime = ZeroconfRuntime::new();
//! let mut events = runtime.init();
//! let handle = runtime.publish(PublishParams { port: Some(8080), ..Default::default() })?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

pub mod config;

pub use config::{BridgeConfig, DEFAULT_SERVICE_TYPE};

use crate::backend::{ListenerToken, MdnsBackend, NsdBackend};
use crate::dispatcher::EventDispatcher;
use crate::error::BridgeError;
use crate::event::{Event, ServiceDescriptor};
use crate::listeners::{DiscoveryListener, RegistrationListener};
use crate::registry::{BrowseRecord, OperationHandle, PublishRecord, Registry};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Parameters for `publish`. Only `port` is required; everything else is
/// filled from [`BridgeConfig`] defaults.
#[derive(Debug, Clone, Default)]
pub struct PublishParams {
    /// Port the advertised service listens on. Required.
    pub port: Option<u16>,
    pub name: Option<String>,
    /// Overrides `name` when both are given.
    pub service_name: Option<String>,
    pub service_type: Option<String>,
    /// TXT attribute map: string keys, byte values.
    pub data: HashMap<String, Vec<u8>>,
}

/// Parameters for `browse`.
#[derive(Debug, Clone, Default)]
pub struct BrowseParams {
    pub service_type: Option<String>,
}

enum BackendSlot {
    Unset,
    Ready(Arc<dyn NsdBackend>),
    /// First initialization failed; the runtime stays unusable rather than
    /// retrying against a missing OS facility.
    Failed(String),
}

pub struct ZeroconfRuntime {
    config: BridgeConfig,
    registry: Arc<Registry>,
    dispatcher: EventDispatcher,
    backend: Mutex<BackendSlot>,
}

impl ZeroconfRuntime {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    /// The real mDNS backend is created lazily, on the first publish or
    /// browse, matching the original plugin's on-demand service lookup.
    pub fn with_config(config: BridgeConfig) -> Self {
        ZeroconfRuntime {
            config,
            registry: Arc::new(Registry::new()),
            dispatcher: EventDispatcher::new(),
            backend: Mutex::new(BackendSlot::Unset),
        }
    }

    /// Use a pre-built backend (mock in tests, or a shared daemon).
    pub fn with_backend(config: BridgeConfig, backend: Arc<dyn NsdBackend>) -> Self {
        let runtime = Self::with_config(config);
        *runtime.backend.lock().unwrap() = BackendSlot::Ready(backend);
        runtime
    }

    /// Install the host event listener, replacing any previous one, and
    /// return the receiving end of the event queue.
    pub fn init(&self) -> mpsc::UnboundedReceiver<Event> {
        self.dispatcher.init()
    }

    /// Detach the host listener; later events are dropped until the next
    /// `init`.
    pub fn clear_listener(&self) {
        self.dispatcher.clear();
    }

    fn backend(&self) -> Result<Arc<dyn NsdBackend>, BridgeError> {
        let mut slot = self.backend.lock().unwrap();
        match &*slot {
            BackendSlot::Ready(backend) => Ok(backend.clone()),
            BackendSlot::Failed(reason) => Err(BridgeError::BackendUnavailable(reason.clone())),
            BackendSlot::Unset => match MdnsBackend::new() {
                Ok(backend) => {
                    let backend: Arc<dyn NsdBackend> = Arc::new(backend);
                    *slot = BackendSlot::Ready(backend.clone());
                    Ok(backend)
                }
                Err(e) => {
                    let reason = match e {
                        BridgeError::BackendUnavailable(reason) => reason,
                        other => other.to_string(),
                    };
                    error!("zeroconf: discovery backend unavailable: {reason}");
                    *slot = BackendSlot::Failed(reason.clone());
                    Err(BridgeError::BackendUnavailable(reason))
                }
            },
        }
    }

    /// Backend for teardown paths: never triggers initialization.
    fn current_backend(&self) -> Option<Arc<dyn NsdBackend>> {
        match &*self.backend.lock().unwrap() {
            BackendSlot::Ready(backend) => Some(backend.clone()),
            _ => None,
        }
    }

    fn device_name(&self) -> String {
        if let Some(name) = &self.config.device_name {
            return name.clone();
        }
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown-device".to_string())
    }

    /// Start advertising a service.
    ///
    /// Returns `Ok(None)` when the parameters are invalid (missing port),
    /// a synchronous validation failure, distinct from the asynchronous
    /// registration failure that arrives as an error event. On success the
    /// handle is returned immediately; registration is still pending.
    pub fn publish(&self, params: PublishParams) -> Result<Option<OperationHandle>, BridgeError> {
        let Some(port) = params.port else {
            error!("zeroconf.publish(): parameters do not contain 'port' field");
            return Ok(None);
        };
        let backend = self.backend()?;

        let name = params
            .service_name
            .or(params.name)
            .unwrap_or_else(|| self.device_name());
        let service_type = params
            .service_type
            .unwrap_or_else(|| self.config.default_service_type.clone());
        let service = ServiceDescriptor {
            name: Some(name),
            service_type: Some(service_type),
            port: Some(port),
            data: params.data,
            addresses: Vec::new(),
        };

        let handle = self.registry.next_handle();
        let listener = Arc::new(RegistrationListener::new(
            handle,
            self.registry.clone(),
            self.dispatcher.clone(),
        ));
        // Insert before the native start: the backend may report a terminal
        // failure synchronously on this thread, and the listener's removal
        // must find the record.
        let record = PublishRecord {
            token: ListenerToken::UNASSIGNED,
            service: service.clone(),
        };
        self.registry.register_publish(handle, record)?;
        let token = backend.start_publish(&service, listener);
        self.registry.assign_publish_token(handle, token);
        Ok(Some(handle))
    }

    /// Stop advertising. Unknown handles are a logged no-op; native stop is
    /// best-effort.
    pub fn unpublish(&self, handle: OperationHandle) {
        match self.registry.remove_publish(handle) {
            Some(record) => {
                if let Some(backend) = self.current_backend() {
                    backend.stop_publish(record.token);
                }
            }
            None => warn!("zeroconf.unpublish(): unable to find such service ({handle})"),
        }
    }

    /// Start browsing for services of a type. The handle is returned
    /// synchronously; found/lost/error events follow asynchronously.
    pub fn browse(&self, params: BrowseParams) -> Result<OperationHandle, BridgeError> {
        let backend = self.backend()?;
        let service_type = params
            .service_type
            .unwrap_or_else(|| self.config.default_service_type.clone());

        let handle = self.registry.next_handle();
        let listener = Arc::new(DiscoveryListener::new(
            handle,
            self.registry.clone(),
            self.dispatcher.clone(),
            Arc::downgrade(&backend),
            self.config.log_resolve_failures,
        ));
        // Same ordering as publish: record first, native start second.
        let record = BrowseRecord {
            token: ListenerToken::UNASSIGNED,
            service_type: service_type.clone(),
        };
        self.registry.register_browse(handle, record)?;
        let token = backend.start_discovery(&service_type, listener);
        self.registry.assign_browse_token(handle, token);
        Ok(handle)
    }

    /// Stop a browse operation. Same semantics as [`Self::unpublish`].
    pub fn stop_browse(&self, handle: OperationHandle) {
        match self.registry.remove_browse(handle) {
            Some(record) => {
                if let Some(backend) = self.current_backend() {
                    backend.stop_discovery(record.token);
                }
            }
            None => warn!("zeroconf.stopBrowse(): unable to find such browser ({handle})"),
        }
    }

    /// Drain and best-effort-stop every publisher. The registry is left
    /// empty even if individual stops fail.
    pub fn unpublish_all(&self) {
        let drained = self.registry.drain_publishers();
        if drained.is_empty() {
            return;
        }
        let Some(backend) = self.current_backend() else {
            return;
        };
        for (handle, record) in drained {
            debug!("zeroconf.unpublishAll(): stopping publisher {handle}");
            backend.stop_publish(record.token);
        }
    }

    /// Drain and best-effort-stop every browser.
    pub fn stop_browse_all(&self) {
        let drained = self.registry.drain_browsers();
        if drained.is_empty() {
            return;
        }
        let Some(backend) = self.current_backend() else {
            return;
        };
        for (handle, record) in drained {
            debug!("zeroconf.stopBrowseAll(): stopping browser {handle}");
            backend.stop_discovery(record.token);
        }
    }
}

impl Default for ZeroconfRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::registry::HANDLE_BASE;

    fn runtime_with_mock() -> (ZeroconfRuntime, Arc<MockBackend>) {
        let backend = MockBackend::new();
        let runtime = ZeroconfRuntime::with_backend(BridgeConfig::default(), backend.clone());
        (runtime, backend)
    }

    #[test]
    fn test_publish_without_port_returns_none() {
        let (runtime, backend) = runtime_with_mock();
        let result = runtime.publish(PublishParams::default()).unwrap();
        assert_eq!(result, None);
        // No handle consumed, no native operation started.
        assert_eq!(backend.counters().publish_starts, 0);
        let handle = runtime
            .publish(PublishParams { port: Some(8080), ..Default::default() })
            .unwrap();
        assert_eq!(handle, Some(HANDLE_BASE));
    }

    #[test]
    fn test_publish_fills_defaults() {
        let (runtime, _backend) = runtime_with_mock();
        let handle = runtime
            .publish(PublishParams { port: Some(8080), ..Default::default() })
            .unwrap()
            .unwrap();

        let record = runtime.registry.lookup_publish(handle).unwrap();
        assert_eq!(record.service.service_type.as_deref(), Some(DEFAULT_SERVICE_TYPE));
        assert_eq!(record.service.port, Some(8080));
        // Name defaulted to some device identifier.
        assert!(!record.service.name.as_deref().unwrap_or_default().is_empty());
    }

    #[test]
    fn test_service_name_overrides_name() {
        let (runtime, _backend) = runtime_with_mock();
        let handle = runtime
            .publish(PublishParams {
                port: Some(8080),
                name: Some("Fallback".into()),
                service_name: Some("Primary".into()),
                ..Default::default()
            })
            .unwrap()
            .unwrap();

        let record = runtime.registry.lookup_publish(handle).unwrap();
        assert_eq!(record.service.name.as_deref(), Some("Primary"));
    }

    #[test]
    fn test_configured_device_name_used() {
        let backend = MockBackend::new();
        let config = BridgeConfig {
            device_name: Some("TestDevice".into()),
            ..Default::default()
        };
        let runtime = ZeroconfRuntime::with_backend(config, backend);
        let handle = runtime
            .publish(PublishParams { port: Some(9000), ..Default::default() })
            .unwrap()
            .unwrap();

        let record = runtime.registry.lookup_publish(handle).unwrap();
        assert_eq!(record.service.name.as_deref(), Some("TestDevice"));
    }

    #[test]
    fn test_browse_defaults_type() {
        let (runtime, _backend) = runtime_with_mock();
        let handle = runtime.browse(BrowseParams::default()).unwrap();
        let record = runtime.registry.lookup_browse(handle).unwrap();
        assert_eq!(record.service_type, DEFAULT_SERVICE_TYPE);
    }

    #[test]
    fn test_unpublish_unknown_handle_is_noop() {
        let (runtime, backend) = runtime_with_mock();
        runtime.unpublish(999);
        assert_eq!(backend.counters().publish_stops, 0);
    }

    #[test]
    fn test_stop_browse_exactly_once() {
        let (runtime, backend) = runtime_with_mock();
        let handle = runtime.browse(BrowseParams::default()).unwrap();

        runtime.stop_browse(handle);
        assert_eq!(runtime.registry.browser_count(), 0);
        assert_eq!(backend.counters().discovery_stops, 1);

        // Second stop: no error, no duplicate native stop.
        runtime.stop_browse(handle);
        assert_eq!(backend.counters().discovery_stops, 1);
    }

    #[test]
    fn test_unpublish_all_then_unpublish() {
        let (runtime, backend) = runtime_with_mock();
        let first = runtime
            .publish(PublishParams { port: Some(8080), ..Default::default() })
            .unwrap()
            .unwrap();
        runtime
            .publish(PublishParams { port: Some(8081), ..Default::default() })
            .unwrap()
            .unwrap();

        runtime.unpublish_all();
        assert_eq!(runtime.registry.publisher_count(), 0);
        assert_eq!(backend.counters().publish_stops, 2);

        // Previously known handle now behaves as not-found.
        runtime.unpublish(first);
        assert_eq!(backend.counters().publish_stops, 2);
    }

    #[test]
    fn test_handles_unique_across_kinds() {
        let (runtime, _backend) = runtime_with_mock();
        let publisher = runtime
            .publish(PublishParams { port: Some(8080), ..Default::default() })
            .unwrap()
            .unwrap();
        let browser = runtime.browse(BrowseParams::default()).unwrap();
        assert_eq!(publisher, HANDLE_BASE);
        assert_eq!(browser, HANDLE_BASE + 1);
    }
}
