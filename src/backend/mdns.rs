//! Real backend over the `mdns-sd` daemon.
//!
//! One daemon per backend instance. Registrations map directly onto
//! `register`/`unregister`. Browses are shared per service type: the first
//! browse of a type starts a daemon browse and a worker thread draining its
//! event receiver; further browses of the same type attach to the running
//! worker, and the daemon browse stops only when the last one detaches.
//! The daemon resolves found services on its own; completions are matched
//! to pending [`ResolveEvents`] sinks by DNS-SD fullname, so `resolve`
//! never blocks.

use super::traits::{
    DiscoveryEvents, ERROR_BAD_PARAMETERS, ERROR_INTERNAL, ListenerToken, NsdBackend,
    RegistrationEvents, ResolveEvents,
};
use crate::error::BridgeError;
use crate::event::{ServiceDescriptor, ServiceStub};
use log::{debug, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How often an idle worker rechecks whether its type is still browsed.
/// Covers the case where `stop_browse` fails and no `SearchStopped` event
/// will ever arrive.
const WORKER_POLL: Duration = Duration::from_millis(500);

struct Publication {
    fullname: String,
    events: Arc<dyn RegistrationEvents>,
}

struct Browse {
    ty_domain: String,
    events: Arc<dyn DiscoveryEvents>,
}

/// Outcome of detaching one browse token from the shared state.
enum StopAction {
    Unknown,
    /// Other browses of the type remain; only this sink is told.
    Detach(Arc<dyn DiscoveryEvents>),
    /// Last browse of the type; the daemon browse itself must stop.
    StopType(String, Arc<dyn DiscoveryEvents>),
}

#[derive(Default)]
struct MdnsShared {
    publications: HashMap<u64, Publication>,
    browses: HashMap<u64, Browse>,
    /// Live browse count per ty_domain. An entry exists exactly while a
    /// daemon browse and its worker thread do.
    active_types: HashMap<String, usize>,
    /// Fully resolved services seen by any browse, keyed by fullname.
    resolved: HashMap<String, ServiceDescriptor>,
    /// Resolve sinks waiting for the daemon to resolve a fullname.
    pending_resolves: HashMap<String, Vec<Arc<dyn ResolveEvents>>>,
}

impl MdnsShared {
    fn sinks_for(&self, ty_domain: &str) -> Vec<Arc<dyn DiscoveryEvents>> {
        self.browses
            .values()
            .filter(|b| b.ty_domain == ty_domain)
            .map(|b| b.events.clone())
            .collect()
    }

    /// Remove one browse and account for its type. The caller acts on the
    /// returned [`StopAction`] outside the lock.
    fn detach_browse(&mut self, token: u64) -> StopAction {
        let Some(browse) = self.browses.remove(&token) else {
            return StopAction::Unknown;
        };
        let remaining = match self.active_types.get_mut(&browse.ty_domain) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => 0,
        };
        if remaining == 0 {
            self.active_types.remove(&browse.ty_domain);
            StopAction::StopType(browse.ty_domain, browse.events)
        } else {
            StopAction::Detach(browse.events)
        }
    }

    /// Drop cached resolutions and waiting sinks for one type, called when
    /// its worker exits so unresolvable stubs do not accumulate sinks.
    fn prune_type(&mut self, ty_domain: &str) {
        self.resolved.retain(|fullname, _| !fullname.ends_with(ty_domain));
        self.pending_resolves
            .retain(|fullname, _| !fullname.ends_with(ty_domain));
    }
}

pub struct MdnsBackend {
    daemon: ServiceDaemon,
    next_token: AtomicU64,
    shared: Arc<Mutex<MdnsShared>>,
}

/// "_http._tcp" -> "_http._tcp.local." (the form the daemon expects).
fn full_type(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    if trimmed.ends_with(".local") {
        format!("{trimmed}.")
    } else {
        format!("{trimmed}.local.")
    }
}

/// "_http._tcp.local." -> "_http._tcp" (the form the host uses).
fn host_type(ty_domain: &str) -> String {
    ty_domain
        .trim_end_matches('.')
        .trim_end_matches(".local")
        .to_string()
}

/// Extract the instance name from a DNS-SD fullname.
fn instance_of(fullname: &str, ty_domain: &str) -> String {
    fullname
        .strip_suffix(ty_domain)
        .unwrap_or(fullname)
        .trim_end_matches('.')
        .to_string()
}

fn descriptor_from(info: &ServiceInfo) -> ServiceDescriptor {
    let mut data = HashMap::new();
    for property in info.get_properties().iter() {
        data.insert(
            property.key().to_string(),
            property.val().unwrap_or_default().to_vec(),
        );
    }
    // Numeric addresses only; no reverse lookup. Sorted for stable output.
    let mut addresses: Vec<String> = info.get_addresses().iter().map(|a| a.to_string()).collect();
    addresses.sort();

    ServiceDescriptor {
        name: Some(instance_of(info.get_fullname(), info.get_type())),
        service_type: Some(host_type(info.get_type())),
        port: Some(info.get_port()),
        data,
        addresses,
    }
}

impl MdnsBackend {
    /// Start the mDNS daemon. Failure here means the OS facility is
    /// unavailable, which is fatal for the owning runtime.
    pub fn new() -> Result<Self, BridgeError> {
        let daemon =
            ServiceDaemon::new().map_err(|e| BridgeError::BackendUnavailable(e.to_string()))?;
        Ok(MdnsBackend {
            daemon,
            next_token: AtomicU64::new(1),
            shared: Arc::new(Mutex::new(MdnsShared::default())),
        })
    }

    fn alloc_token(&self) -> ListenerToken {
        ListenerToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// One worker per browsed type. Fans daemon events out to every sink
    /// attached to the type at delivery time; exits on `SearchStopped` or,
    /// when that never arrives, on noticing the type is no longer active.
    fn browse_loop(
        receiver: mdns_sd::Receiver<ServiceEvent>,
        shared: Arc<Mutex<MdnsShared>>,
        ty_domain: String,
    ) {
        let mut started = false;
        loop {
            let event = match receiver.recv_timeout(WORKER_POLL) {
                Ok(event) => event,
                Err(_) => {
                    if !shared.lock().unwrap().active_types.contains_key(&ty_domain) {
                        break;
                    }
                    continue;
                }
            };
            // Sinks are collected under the lock and invoked outside it:
            // callback handlers may reenter the backend (found -> resolve).
            match event {
                ServiceEvent::SearchStarted(_) => {
                    // The daemon re-announces on retransmission; report once.
                    if !started {
                        started = true;
                        let sinks = shared.lock().unwrap().sinks_for(&ty_domain);
                        for sink in sinks {
                            sink.on_discovery_started();
                        }
                    }
                }
                ServiceEvent::ServiceFound(ty, fullname) => {
                    let stub = ServiceStub {
                        name: instance_of(&fullname, &ty),
                        service_type: host_type(&ty),
                        fullname,
                    };
                    let sinks = shared.lock().unwrap().sinks_for(&ty_domain);
                    for sink in sinks {
                        sink.on_service_found(stub.clone());
                    }
                }
                ServiceEvent::ServiceResolved(info) => {
                    let descriptor = descriptor_from(&info);
                    let fullname = info.get_fullname().to_string();
                    let waiting = {
                        let mut shared = shared.lock().unwrap();
                        shared.resolved.insert(fullname.clone(), descriptor.clone());
                        shared.pending_resolves.remove(&fullname).unwrap_or_default()
                    };
                    for sink in waiting {
                        sink.on_resolved(descriptor.clone());
                    }
                }
                ServiceEvent::ServiceRemoved(ty, fullname) => {
                    let (dropped, sinks) = {
                        let mut shared = shared.lock().unwrap();
                        shared.resolved.remove(&fullname);
                        let dropped =
                            shared.pending_resolves.remove(&fullname).unwrap_or_default();
                        (dropped, shared.sinks_for(&ty_domain))
                    };
                    let stub = ServiceStub {
                        name: instance_of(&fullname, &ty),
                        service_type: host_type(&ty),
                        fullname,
                    };
                    for sink in dropped {
                        sink.on_resolve_failed(stub.clone(), ERROR_INTERNAL);
                    }
                    for sink in sinks {
                        sink.on_service_lost(ServiceDescriptor {
                            name: Some(stub.name.clone()),
                            service_type: Some(stub.service_type.clone()),
                            ..Default::default()
                        });
                    }
                }
                // The stopping sink was already told in stop_discovery; a
                // restarted browse of the same type runs its own worker.
                ServiceEvent::SearchStopped(_) => break,
            }
        }

        let mut shared = shared.lock().unwrap();
        if !shared.active_types.contains_key(&ty_domain) {
            shared.prune_type(&ty_domain);
        }
    }
}

impl NsdBackend for MdnsBackend {
    fn start_publish(
        &self,
        service: &ServiceDescriptor,
        events: Arc<dyn RegistrationEvents>,
    ) -> ListenerToken {
        let token = self.alloc_token();

        let instance = service.name.clone().unwrap_or_default();
        let ty_domain = full_type(service.service_type.as_deref().unwrap_or_default());
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string());
        let host = format!("{host}.local.");
        let properties: HashMap<String, String> = service
            .data
            .iter()
            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
            .collect();

        let info = match ServiceInfo::new(
            &ty_domain,
            &instance,
            &host,
            (),
            service.port.unwrap_or_default(),
            Some(properties),
        ) {
            Ok(info) => info.enable_addr_auto(),
            Err(e) => {
                warn!("mdns: invalid service info for '{instance}': {e}");
                events.on_registration_failed(service.clone(), ERROR_BAD_PARAMETERS);
                return token;
            }
        };

        let fullname = info.get_fullname().to_string();
        match self.daemon.register(info) {
            Ok(()) => {
                self.shared
                    .lock()
                    .unwrap()
                    .publications
                    .insert(token.0, Publication { fullname, events: events.clone() });
                events.on_registered(service.clone());
            }
            Err(e) => {
                warn!("mdns: failed to register '{fullname}': {e}");
                events.on_registration_failed(service.clone(), ERROR_INTERNAL);
            }
        }
        token
    }

    fn stop_publish(&self, token: ListenerToken) {
        let publication = self.shared.lock().unwrap().publications.remove(&token.0);
        match publication {
            Some(publication) => match self.daemon.unregister(&publication.fullname) {
                Ok(_status) => publication.events.on_unregistered(),
                Err(e) => {
                    warn!("mdns: failed to unregister '{}': {e}", publication.fullname);
                    publication.events.on_unregistration_failed(ERROR_INTERNAL);
                }
            },
            None => debug!("mdns: stop_publish for unknown token {token:?}"),
        }
    }

    fn start_discovery(
        &self,
        service_type: &str,
        events: Arc<dyn DiscoveryEvents>,
    ) -> ListenerToken {
        let token = self.alloc_token();
        let ty_domain = full_type(service_type);

        let is_first = {
            let mut shared = self.shared.lock().unwrap();
            let count = shared.active_types.entry(ty_domain.clone()).or_insert(0);
            *count += 1;
            let is_first = *count == 1;
            shared.browses.insert(
                token.0,
                Browse { ty_domain: ty_domain.clone(), events: events.clone() },
            );
            is_first
        };

        if !is_first {
            // The daemon is already browsing this type; the attached sink
            // just missed SearchStarted.
            events.on_discovery_started();
            return token;
        }

        match self.daemon.browse(&ty_domain) {
            Ok(receiver) => {
                let shared = self.shared.clone();
                let ty = ty_domain.clone();
                thread::Builder::new()
                    .name(format!("mdns-browse-{}", token.0))
                    .spawn(move || Self::browse_loop(receiver, shared, ty))
                    .expect("failed to spawn browse thread");
            }
            Err(e) => {
                warn!("mdns: failed to browse '{ty_domain}': {e}");
                {
                    let mut shared = self.shared.lock().unwrap();
                    shared.browses.remove(&token.0);
                    shared.active_types.remove(&ty_domain);
                }
                events.on_start_discovery_failed(ERROR_INTERNAL);
            }
        }
        token
    }

    fn stop_discovery(&self, token: ListenerToken) {
        let action = self.shared.lock().unwrap().detach_browse(token.0);
        match action {
            StopAction::Unknown => debug!("mdns: stop_discovery for unknown token {token:?}"),
            StopAction::Detach(events) => events.on_discovery_stopped(),
            StopAction::StopType(ty_domain, events) => {
                match self.daemon.stop_browse(&ty_domain) {
                    Ok(()) => events.on_discovery_stopped(),
                    Err(e) => {
                        // The worker notices the inactive type on its next
                        // poll and exits without a SearchStopped event.
                        warn!("mdns: failed to stop browse '{ty_domain}': {e}");
                        events.on_stop_discovery_failed(ERROR_INTERNAL);
                    }
                }
            }
        }
    }

    fn resolve(&self, stub: &ServiceStub, events: Arc<dyn ResolveEvents>) {
        let hit = {
            let mut shared = self.shared.lock().unwrap();
            match shared.resolved.get(&stub.fullname) {
                Some(descriptor) => Some(descriptor.clone()),
                None => {
                    shared
                        .pending_resolves
                        .entry(stub.fullname.clone())
                        .or_default()
                        .push(events.clone());
                    None
                }
            }
        };
        if let Some(descriptor) = hit {
            events.on_resolved(descriptor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl DiscoveryEvents for NullSink {
        fn on_discovery_started(&self) {}
        fn on_start_discovery_failed(&self, _error_code: i32) {}
        fn on_service_found(&self, _stub: ServiceStub) {}
        fn on_service_lost(&self, _service: ServiceDescriptor) {}
        fn on_discovery_stopped(&self) {}
        fn on_stop_discovery_failed(&self, _error_code: i32) {}
    }

    fn shared_with_browses(ty_domain: &str, tokens: &[u64]) -> MdnsShared {
        let mut shared = MdnsShared::default();
        for &token in tokens {
            shared.browses.insert(
                token,
                Browse { ty_domain: ty_domain.to_string(), events: Arc::new(NullSink) },
            );
        }
        shared.active_types.insert(ty_domain.to_string(), tokens.len());
        shared
    }

    #[test]
    fn test_type_normalization() {
        assert_eq!(full_type("_http._tcp"), "_http._tcp.local.");
        assert_eq!(full_type("_http._tcp."), "_http._tcp.local.");
        assert_eq!(full_type("_http._tcp.local."), "_http._tcp.local.");
        assert_eq!(host_type("_http._tcp.local."), "_http._tcp");
        assert_eq!(host_type("_http._tcp"), "_http._tcp");
    }

    #[test]
    fn test_instance_extraction() {
        assert_eq!(
            instance_of("Printer._http._tcp.local.", "_http._tcp.local."),
            "Printer"
        );
        // Unparseable fullname falls back to the raw string, trimmed.
        assert_eq!(instance_of("odd-name.", "_ipp._tcp.local."), "odd-name");
    }

    #[test]
    fn test_detach_keeps_shared_type_alive() {
        let mut shared = shared_with_browses("_http._tcp.local.", &[1, 2]);

        // First detach leaves the type browsed for the remaining token.
        assert!(matches!(shared.detach_browse(1), StopAction::Detach(_)));
        assert_eq!(shared.active_types.get("_http._tcp.local."), Some(&1));
        assert!(shared.browses.contains_key(&2));

        // Last detach stops the type itself.
        assert!(matches!(
            shared.detach_browse(2),
            StopAction::StopType(ty, _) if ty == "_http._tcp.local."
        ));
        assert!(shared.active_types.is_empty());

        assert!(matches!(shared.detach_browse(2), StopAction::Unknown));
    }

    #[test]
    fn test_detach_distinct_types_independent() {
        let mut shared = shared_with_browses("_http._tcp.local.", &[1]);
        shared.browses.insert(
            2,
            Browse { ty_domain: "_ipp._tcp.local.".to_string(), events: Arc::new(NullSink) },
        );
        shared.active_types.insert("_ipp._tcp.local.".to_string(), 1);

        assert!(matches!(
            shared.detach_browse(1),
            StopAction::StopType(ty, _) if ty == "_http._tcp.local."
        ));
        // The other type is untouched.
        assert_eq!(shared.active_types.get("_ipp._tcp.local."), Some(&1));
    }

    #[test]
    fn test_prune_type_clears_per_type_state() {
        let mut shared = MdnsShared::default();
        shared
            .resolved
            .insert("Printer._http._tcp.local.".to_string(), ServiceDescriptor::default());
        shared
            .resolved
            .insert("Cam._rtsp._tcp.local.".to_string(), ServiceDescriptor::default());
        shared
            .pending_resolves
            .insert("Printer._http._tcp.local.".to_string(), Vec::new());

        shared.prune_type("_http._tcp.local.");
        assert!(!shared.resolved.contains_key("Printer._http._tcp.local."));
        assert!(shared.resolved.contains_key("Cam._rtsp._tcp.local."));
        assert!(shared.pending_resolves.is_empty());
    }
}
