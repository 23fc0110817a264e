pub mod backend;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod registry;
pub mod runtime;

mod listeners;

pub use backend::{ListenerToken, MdnsBackend, MockBackend, NsdBackend};
pub use dispatcher::EventDispatcher;
pub use error::BridgeError;
pub use event::{Event, EventPhase, ServiceDescriptor, ServiceStub};
pub use registry::{OperationHandle, Registry};
pub use runtime::{BridgeConfig, BrowseParams, PublishParams, ZeroconfRuntime, DEFAULT_SERVICE_TYPE};
