pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod host;
pub mod models;
pub mod paths;
pub mod replay;
pub mod security;
pub mod transport;

pub use config::BrokerConfig;
pub use dispatcher::RequestDispatcher;
pub use error::BrokerError;
pub use executor::{ExecutorOptions, OperationExecutor, ResolvedTargets};
pub use host::BrokerService;
pub use models::{BrokerRequest, BrokerResponse, SecurityPolicy};
pub use replay::ReplayGuard;
pub use security::{CallerIdentity, SecurityValidator};
pub use transport::{BrokerClient, PipeServer, TransportConfig};
