//! Per-operation callback handlers.
//!
//! One handler per operation kind, each created for a single `publish` or
//! `browse` call and discarded once terminal. A handler binds the operation
//! handle to the event-dispatch path; it holds the shared registry and the
//! dispatcher, never host state, so a torn-down host cannot be kept alive
//! through the callback chain.

use crate::backend::{DiscoveryEvents, NsdBackend, RegistrationEvents, ResolveEvents};
use crate::dispatcher::EventDispatcher;
use crate::event::{Event, EventPhase, ServiceDescriptor, ServiceStub};
use crate::registry::{OperationHandle, Registry};
use log::{debug, info};
use std::sync::{Arc, Weak};

/// Handles callbacks for one publish operation.
///
/// States: Registering -> {Registered, RegisterFailed};
/// Registered -> Unregistering -> {Unregistered, UnregisterFailed}.
pub(crate) struct RegistrationListener {
    publisher: OperationHandle,
    registry: Arc<Registry>,
    dispatcher: EventDispatcher,
}

impl RegistrationListener {
    pub(crate) fn new(
        publisher: OperationHandle,
        registry: Arc<Registry>,
        dispatcher: EventDispatcher,
    ) -> Self {
        RegistrationListener { publisher, registry, dispatcher }
    }
}

impl RegistrationEvents for RegistrationListener {
    fn on_registered(&self, service: ServiceDescriptor) {
        self.dispatcher.dispatch(Event::new(
            EventPhase::Published,
            Some(service),
            0,
            None,
            Some(self.publisher),
        ));
    }

    fn on_registration_failed(&self, service: ServiceDescriptor, error_code: i32) {
        self.dispatcher.dispatch(Event::new(
            EventPhase::Published,
            Some(service),
            error_code,
            None,
            Some(self.publisher),
        ));
        // Terminal: a record with no live native registration must not
        // remain in the registry.
        self.registry.remove_publish(self.publisher);
    }

    fn on_unregistered(&self) {
        // Usually already removed by unpublish; removal is idempotent.
        self.registry.remove_publish(self.publisher);
    }

    fn on_unregistration_failed(&self, error_code: i32) {
        // Best-effort teardown: no event, record goes either way.
        info!(
            "publisher {}: unregistration failed (code {}), removing anyway",
            self.publisher, error_code
        );
        self.registry.remove_publish(self.publisher);
    }
}

/// Handles callbacks for one browse operation.
///
/// States: Starting -> {Started, StartFailed};
/// Started -> Stopping -> {Stopped, StopFailed}.
pub(crate) struct DiscoveryListener {
    browser: OperationHandle,
    registry: Arc<Registry>,
    dispatcher: EventDispatcher,
    backend: Weak<dyn NsdBackend>,
    log_resolve_failures: bool,
}

impl DiscoveryListener {
    pub(crate) fn new(
        browser: OperationHandle,
        registry: Arc<Registry>,
        dispatcher: EventDispatcher,
        backend: Weak<dyn NsdBackend>,
        log_resolve_failures: bool,
    ) -> Self {
        DiscoveryListener { browser, registry, dispatcher, backend, log_resolve_failures }
    }
}

impl DiscoveryEvents for DiscoveryListener {
    fn on_discovery_started(&self) {
        // No event: the host already holds the handle from browse's return.
        debug!("browser {}: discovery started", self.browser);
    }

    fn on_start_discovery_failed(&self, error_code: i32) {
        self.dispatcher.dispatch(Event::new(
            EventPhase::BrowseError,
            None,
            error_code,
            Some(self.browser),
            None,
        ));
        // The browse record stays registered until an explicit stop_browse.
    }

    fn on_service_found(&self, stub: ServiceStub) {
        // Not surfaced yet: the host only hears about a service once it is
        // fully resolved.
        match self.backend.upgrade() {
            Some(backend) => {
                let resolver = Arc::new(ResolveListener {
                    browser: self.browser,
                    dispatcher: self.dispatcher.clone(),
                    log_failures: self.log_resolve_failures,
                });
                backend.resolve(&stub, resolver);
            }
            None => debug!("browser {}: backend gone, dropping found service", self.browser),
        }
    }

    fn on_service_lost(&self, service: ServiceDescriptor) {
        // Lost services are reported unresolved.
        self.dispatcher.dispatch(Event::new(
            EventPhase::Lost,
            Some(service),
            0,
            Some(self.browser),
            None,
        ));
    }

    fn on_discovery_stopped(&self) {
        self.registry.remove_browse(self.browser);
    }

    fn on_stop_discovery_failed(&self, error_code: i32) {
        info!(
            "browser {}: stop discovery failed (code {}), removing anyway",
            self.browser, error_code
        );
        self.registry.remove_browse(self.browser);
    }
}

/// Handles the outcome of one resolve attempt. Created per found occurrence;
/// the handle it carries may already be gone from the registry by the time
/// the resolve completes, and the event is delivered regardless so the host
/// can correlate (and ignore) it.
pub(crate) struct ResolveListener {
    browser: OperationHandle,
    dispatcher: EventDispatcher,
    log_failures: bool,
}

impl ResolveEvents for ResolveListener {
    fn on_resolved(&self, service: ServiceDescriptor) {
        self.dispatcher.dispatch(Event::new(
            EventPhase::Found,
            Some(service),
            0,
            Some(self.browser),
            None,
        ));
    }

    fn on_resolve_failed(&self, stub: ServiceStub, error_code: i32) {
        // Silently dropped unless the diagnostic hook is enabled.
        if self.log_failures {
            debug!(
                "browser {}: resolve failed for '{}' (code {})",
                self.browser, stub.fullname, error_code
            );
        }
    }
}
