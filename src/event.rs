//! Host-facing event values.
//!
//! Every asynchronous callback that reaches the host is marshalled into one
//! [`Event`]: an immutable value carrying the operation handle it belongs to
//! and, when available, a [`ServiceDescriptor`]. Events serialize with the
//! field names the host sees (`isError`, `errorCode`, `serviceName`, ...).

use crate::registry::OperationHandle;
use serde::Serialize;
use std::collections::HashMap;

/// Lifecycle phase of an event, matching the host-facing string enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventPhase {
    Published,
    BrowseError,
    Lost,
    Found,
}

/// A discovered or advertised service as reported to the host.
///
/// Transient: produced per callback, never stored in the registry.
/// `addresses` holds numeric address strings only; reverse hostname lookup
/// is intentionally skipped because it can block for seconds on the
/// callback thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "serviceName", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Vec<u8>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

/// A found-but-unresolved service occurrence. Carries just enough for the
/// backend to resolve it into a full [`ServiceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStub {
    pub name: String,
    pub service_type: String,
    /// Backend correlation key (e.g. the DNS-SD fullname).
    pub fullname: String,
}

/// One event delivered to the host listener. Constructed once per callback
/// occurrence, delivered exactly once, never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub phase: EventPhase,
    #[serde(rename = "isError")]
    pub is_error: bool,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<OperationHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<OperationHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceDescriptor>,
}

impl Event {
    /// Build an event the way the original callback path did: a zero error
    /// code means success, anything else marks the event as an error and
    /// carries the code.
    pub fn new(
        phase: EventPhase,
        service: Option<ServiceDescriptor>,
        error_code: i32,
        browser: Option<OperationHandle>,
        publisher: Option<OperationHandle>,
    ) -> Self {
        Event {
            phase,
            is_error: error_code != 0,
            error_code: (error_code != 0).then_some(error_code),
            browser,
            publisher,
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_event_omits_error_code() {
        let ev = Event::new(EventPhase::Published, None, 0, None, Some(1984));
        assert!(!ev.is_error);
        assert_eq!(ev.error_code, None);

        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["phase"], "published");
        assert_eq!(json["isError"], false);
        assert!(json.get("errorCode").is_none());
        assert_eq!(json["publisher"], 1984);
        assert!(json.get("browser").is_none());
        assert!(json.get("service").is_none());
    }

    #[test]
    fn test_error_event_carries_code() {
        let ev = Event::new(EventPhase::BrowseError, None, 3, Some(1985), None);
        assert!(ev.is_error);
        assert_eq!(ev.error_code, Some(3));

        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["phase"], "browseError");
        assert_eq!(json["errorCode"], 3);
        assert_eq!(json["browser"], 1985);
    }

    #[test]
    fn test_service_field_names() {
        let service = ServiceDescriptor {
            name: Some("Printer".into()),
            service_type: Some("_http._tcp".into()),
            port: Some(80),
            data: HashMap::from([("path".to_string(), b"/index".to_vec())]),
            addresses: vec!["192.168.1.5".into()],
        };
        let ev = Event::new(EventPhase::Found, Some(service), 0, Some(1985), None);

        let json = serde_json::to_value(&ev).unwrap();
        let svc = &json["service"];
        assert_eq!(svc["serviceName"], "Printer");
        assert_eq!(svc["type"], "_http._tcp");
        assert_eq!(svc["port"], 80);
        assert_eq!(svc["addresses"][0], "192.168.1.5");
        assert_eq!(svc["data"]["path"][0], b'/');
    }

    #[test]
    fn test_empty_descriptor_serializes_compact() {
        let json = serde_json::to_value(ServiceDescriptor::default()).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }
}
