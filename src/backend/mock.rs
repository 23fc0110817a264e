//! In-memory backend simulating a DNS-SD network for tests and demos.
//!
//! Services published through the mock (or injected with
//! [`MockBackend::publish_remote`]) become visible to discoveries of the
//! same type; resolution succeeds with the stored descriptor. Callbacks are
//! queued rather than invoked inline and delivered by [`MockBackend::pump`],
//! mirroring the asynchrony of a real OS facility while keeping tests
//! deterministic. Failure injection knobs cover registration failure,
//! discovery-start failure and dropped resolves.

use super::traits::{
    DiscoveryEvents, ERROR_INTERNAL, ListenerToken, NsdBackend, RegistrationEvents, ResolveEvents,
};
use crate::event::{ServiceDescriptor, ServiceStub};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Callback = Box<dyn FnOnce() + Send>;

/// Call counts, for asserting best-effort teardown behavior (e.g. that a
/// second `stop_browse` does not reach the backend).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockCounters {
    pub publish_starts: usize,
    pub publish_stops: usize,
    pub discovery_starts: usize,
    pub discovery_stops: usize,
    pub resolves: usize,
}

struct Publication {
    fullname: String,
    events: Arc<dyn RegistrationEvents>,
}

struct Discovery {
    service_type: String,
    events: Arc<dyn DiscoveryEvents>,
}

#[derive(Default)]
struct MockInner {
    next_token: u64,
    publications: HashMap<ListenerToken, Publication>,
    discoveries: HashMap<ListenerToken, Discovery>,
    /// The simulated network: fullname -> advertised descriptor.
    remote: HashMap<String, ServiceDescriptor>,
    fail_next_registration: Option<i32>,
    fail_next_discovery_start: Option<i32>,
    drop_next_resolve: bool,
    queue: VecDeque<Callback>,
    counters: MockCounters,
}

pub struct MockBackend {
    inner: Mutex<MockInner>,
}

fn fullname_of(service: &ServiceDescriptor) -> String {
    format!(
        "{}.{}",
        service.name.as_deref().unwrap_or_default(),
        service.service_type.as_deref().unwrap_or_default()
    )
}

fn stub_of(service: &ServiceDescriptor) -> ServiceStub {
    ServiceStub {
        name: service.name.clone().unwrap_or_default(),
        service_type: service.service_type.clone().unwrap_or_default(),
        fullname: fullname_of(service),
    }
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(MockBackend {
            inner: Mutex::new(MockInner::default()),
        })
    }

    /// Deliver all queued callbacks, returning how many ran. Callbacks may
    /// enqueue further callbacks (found -> resolve); those run too.
    pub fn pump(&self) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.inner.lock().unwrap().queue.pop_front();
            match next {
                Some(callback) => {
                    callback();
                    delivered += 1;
                }
                None => break,
            }
        }
        delivered
    }

    pub fn counters(&self) -> MockCounters {
        self.inner.lock().unwrap().counters.clone()
    }

    /// The next `start_publish` fails asynchronously with `error_code`.
    pub fn fail_next_registration(&self, error_code: i32) {
        self.inner.lock().unwrap().fail_next_registration = Some(error_code);
    }

    /// The next `start_discovery` fails asynchronously with `error_code`.
    pub fn fail_next_discovery_start(&self, error_code: i32) {
        self.inner.lock().unwrap().fail_next_discovery_start = Some(error_code);
    }

    /// The next `resolve` fails (and, per the bridge contract, produces no
    /// host event at all).
    pub fn drop_next_resolve(&self) {
        self.inner.lock().unwrap().drop_next_resolve = true;
    }

    /// Simulate a service appearing on the network. Matching discoveries
    /// receive a found callback.
    pub fn publish_remote(&self, service: ServiceDescriptor) {
        let mut inner = self.inner.lock().unwrap();
        inner.remote.insert(fullname_of(&service), service.clone());
        Self::notify_found(&mut inner, &service);
    }

    /// Simulate a service disappearing. Matching discoveries receive a lost
    /// callback carrying the unresolved descriptor (name and type only).
    pub fn remove_remote(&self, name: &str, service_type: &str) {
        let mut inner = self.inner.lock().unwrap();
        let lost = ServiceDescriptor {
            name: Some(name.to_string()),
            service_type: Some(service_type.to_string()),
            ..Default::default()
        };
        inner.remote.remove(&fullname_of(&lost));
        Self::notify_lost(&mut inner, &lost);
    }

    fn notify_found(inner: &mut MockInner, service: &ServiceDescriptor) {
        let stub = stub_of(service);
        let sinks: Vec<Arc<dyn DiscoveryEvents>> = inner
            .discoveries
            .values()
            .filter(|d| Some(d.service_type.as_str()) == service.service_type.as_deref())
            .map(|d| d.events.clone())
            .collect();
        for sink in sinks {
            let stub = stub.clone();
            inner.queue.push_back(Box::new(move || sink.on_service_found(stub)));
        }
    }

    fn notify_lost(inner: &mut MockInner, service: &ServiceDescriptor) {
        let sinks: Vec<Arc<dyn DiscoveryEvents>> = inner
            .discoveries
            .values()
            .filter(|d| Some(d.service_type.as_str()) == service.service_type.as_deref())
            .map(|d| d.events.clone())
            .collect();
        for sink in sinks {
            let lost = service.clone();
            inner.queue.push_back(Box::new(move || sink.on_service_lost(lost)));
        }
    }

    fn alloc_token(inner: &mut MockInner) -> ListenerToken {
        inner.next_token += 1;
        ListenerToken(inner.next_token)
    }
}

impl NsdBackend for MockBackend {
    fn start_publish(
        &self,
        service: &ServiceDescriptor,
        events: Arc<dyn RegistrationEvents>,
    ) -> ListenerToken {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.publish_starts += 1;
        let token = Self::alloc_token(&mut inner);

        if let Some(code) = inner.fail_next_registration.take() {
            let service = service.clone();
            inner
                .queue
                .push_back(Box::new(move || events.on_registration_failed(service, code)));
            return token;
        }

        let fullname = fullname_of(service);
        inner.remote.insert(fullname.clone(), service.clone());
        inner.publications.insert(token, Publication { fullname, events: events.clone() });

        let registered = service.clone();
        inner.queue.push_back(Box::new(move || events.on_registered(registered)));
        Self::notify_found(&mut inner, service);
        token
    }

    fn stop_publish(&self, token: ListenerToken) {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.publish_stops += 1;
        match inner.publications.remove(&token) {
            Some(publication) => {
                let lost = inner.remote.remove(&publication.fullname);
                let events = publication.events;
                inner.queue.push_back(Box::new(move || events.on_unregistered()));
                if let Some(lost) = lost {
                    let unresolved = ServiceDescriptor {
                        name: lost.name,
                        service_type: lost.service_type,
                        ..Default::default()
                    };
                    Self::notify_lost(&mut inner, &unresolved);
                }
            }
            None => debug!("mock: stop_publish for unknown token {token:?}"),
        }
    }

    fn start_discovery(
        &self,
        service_type: &str,
        events: Arc<dyn DiscoveryEvents>,
    ) -> ListenerToken {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.discovery_starts += 1;
        let token = Self::alloc_token(&mut inner);

        if let Some(code) = inner.fail_next_discovery_start.take() {
            inner
                .queue
                .push_back(Box::new(move || events.on_start_discovery_failed(code)));
            return token;
        }

        inner.discoveries.insert(
            token,
            Discovery { service_type: service_type.to_string(), events: events.clone() },
        );
        let started = events.clone();
        inner.queue.push_back(Box::new(move || started.on_discovery_started()));

        // Services already on the network are found immediately.
        let existing: Vec<ServiceStub> = inner
            .remote
            .values()
            .filter(|s| s.service_type.as_deref() == Some(service_type))
            .map(stub_of)
            .collect();
        for stub in existing {
            let events = events.clone();
            inner.queue.push_back(Box::new(move || events.on_service_found(stub)));
        }
        token
    }

    fn stop_discovery(&self, token: ListenerToken) {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.discovery_stops += 1;
        match inner.discoveries.remove(&token) {
            Some(discovery) => {
                let events = discovery.events;
                inner.queue.push_back(Box::new(move || events.on_discovery_stopped()));
            }
            None => debug!("mock: stop_discovery for unknown token {token:?}"),
        }
    }

    fn resolve(&self, stub: &ServiceStub, events: Arc<dyn ResolveEvents>) {
        let mut inner = self.inner.lock().unwrap();
        inner.counters.resolves += 1;

        if inner.drop_next_resolve {
            inner.drop_next_resolve = false;
            let stub = stub.clone();
            inner
                .queue
                .push_back(Box::new(move || events.on_resolve_failed(stub, ERROR_INTERNAL)));
            return;
        }

        match inner.remote.get(&stub.fullname) {
            Some(service) => {
                let mut resolved = service.clone();
                if resolved.addresses.is_empty() {
                    resolved.addresses.push("127.0.0.1".to_string());
                }
                inner.queue.push_back(Box::new(move || events.on_resolved(resolved)));
            }
            None => {
                // Found-then-removed race: the occurrence is unresolvable.
                let stub = stub.clone();
                inner
                    .queue
                    .push_back(Box::new(move || events.on_resolve_failed(stub, ERROR_INTERNAL)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        found: AtomicUsize,
        lost: AtomicUsize,
        started: AtomicUsize,
    }

    impl DiscoveryEvents for CountingSink {
        fn on_discovery_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_start_discovery_failed(&self, _error_code: i32) {}
        fn on_service_found(&self, _stub: ServiceStub) {
            self.found.fetch_add(1, Ordering::SeqCst);
        }
        fn on_service_lost(&self, _service: ServiceDescriptor) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
        fn on_discovery_stopped(&self) {}
        fn on_stop_discovery_failed(&self, _error_code: i32) {}
    }

    fn http_service(name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: Some(name.to_string()),
            service_type: Some("_http._tcp".to_string()),
            port: Some(80),
            ..Default::default()
        }
    }

    #[test]
    fn test_callbacks_are_deferred_until_pump() {
        let backend = MockBackend::new();
        let sink = Arc::new(CountingSink::default());
        backend.start_discovery("_http._tcp", sink.clone());

        assert_eq!(sink.started.load(Ordering::SeqCst), 0);
        backend.pump();
        assert_eq!(sink.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remote_service_found_and_lost() {
        let backend = MockBackend::new();
        let sink = Arc::new(CountingSink::default());
        backend.start_discovery("_http._tcp", sink.clone());
        backend.pump();

        backend.publish_remote(http_service("Printer"));
        backend.remove_remote("Printer", "_http._tcp");
        backend.pump();

        assert_eq!(sink.found.load(Ordering::SeqCst), 1);
        assert_eq!(sink.lost.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_type_filter_respected() {
        let backend = MockBackend::new();
        let sink = Arc::new(CountingSink::default());
        backend.start_discovery("_ipp._tcp", sink.clone());
        backend.pump();

        backend.publish_remote(http_service("Printer"));
        backend.pump();
        assert_eq!(sink.found.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_unknown_token_is_tolerated() {
        let backend = MockBackend::new();
        backend.stop_discovery(ListenerToken(42));
        backend.stop_publish(ListenerToken(43));
        assert_eq!(backend.pump(), 0);
    }
}
