pub mod credentials;
pub mod error;
pub mod registry;
pub mod rest;
pub mod scheduler;
pub mod stream;

// Re-export commonly used types for convenience
pub use credentials::{CredentialProvider, Credentials, ServiceCredentials};
pub use error::{ConnectorError, ConnectorResult};
pub use registry::ConnectorRegistry;
pub use rest::{Form, Request, Response, RestConnector};
pub use scheduler::{Routine, RoutineId, Scheduler, Step};
pub use stream::{ConnectionState, ControlMessage, KeepAlive, Message, StartMessage, StreamConnector};
