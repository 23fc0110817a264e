use crate::event::{ServiceDescriptor, ServiceStub};
use std::sync::Arc;

/// Generic failure code for backend-internal errors.
pub const ERROR_INTERNAL: i32 = 1;
/// The request carried parameters the backend rejected.
pub const ERROR_BAD_PARAMETERS: i32 = 2;
/// The operation was already active in the OS facility.
pub const ERROR_ALREADY_ACTIVE: i32 = 3;

/// Opaque token identifying one native listener inside a backend.
/// Issued by `start_publish`/`start_discovery`, stored in the registry,
/// and handed back for teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

impl ListenerToken {
    /// Placeholder held in a registry record until the backend has issued
    /// the real token. Backends number their tokens from 1.
    pub const UNASSIGNED: ListenerToken = ListenerToken(0);
}

/// Callback sink for one registration (publish) operation.
pub trait RegistrationEvents: Send + Sync {
    fn on_registered(&self, service: ServiceDescriptor);
    fn on_registration_failed(&self, service: ServiceDescriptor, error_code: i32);
    fn on_unregistered(&self);
    fn on_unregistration_failed(&self, error_code: i32);
}

/// Callback sink for one discovery (browse) operation.
pub trait DiscoveryEvents: Send + Sync {
    fn on_discovery_started(&self);
    fn on_start_discovery_failed(&self, error_code: i32);
    fn on_service_found(&self, stub: ServiceStub);
    fn on_service_lost(&self, service: ServiceDescriptor);
    fn on_discovery_stopped(&self);
    fn on_stop_discovery_failed(&self, error_code: i32);
}

/// Callback sink for one resolve attempt (per found occurrence, not per
/// browse handle).
pub trait ResolveEvents: Send + Sync {
    fn on_resolved(&self, service: ServiceDescriptor);
    fn on_resolve_failed(&self, stub: ServiceStub, error_code: i32);
}

/// Trait wrapping the OS discovery capability.
/// Designed to be object-safe and pluggable (real mDNS daemon or an
/// in-memory mock for tests).
///
/// Failure policy: in the steady state every OS-side failure surfaces
/// through the sinks on whatever thread the backend uses, never as a return
/// value from these calls. Only backend *construction* is fallible, and that
/// is fatal to the owning runtime.
pub trait NsdBackend: Send + Sync {
    /// Begin advertising. The result (registered / failed) arrives later on
    /// `events`; the returned token only identifies the operation.
    fn start_publish(
        &self,
        service: &ServiceDescriptor,
        events: Arc<dyn RegistrationEvents>,
    ) -> ListenerToken;

    /// Request de-registration. Best-effort: tolerates already-stopped or
    /// unknown tokens without raising; failures arrive via the sink.
    fn stop_publish(&self, token: ListenerToken);

    /// Begin browsing for `service_type`. Start failures arrive on `events`.
    fn start_discovery(
        &self,
        service_type: &str,
        events: Arc<dyn DiscoveryEvents>,
    ) -> ListenerToken;

    /// Request discovery stop. Same tolerance as `stop_publish`.
    fn stop_discovery(&self, token: ListenerToken);

    /// Resolve a found service into a fully addressed descriptor. Invoked
    /// internally between `on_service_found` and the host-facing `found`
    /// event; a failed resolve produces no host event at all.
    fn resolve(&self, stub: &ServiceStub, events: Arc<dyn ResolveEvents>);
}
