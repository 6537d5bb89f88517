//! Policy model: wire messages, the operation catalog and the security policy.

pub mod operation;
pub mod policy;
pub mod request;

pub use luna_platform::{MouseButton, RegistryValue, TextEncoding, WindowBounds, WindowInfo};
pub use operation::{
    ClickParams, FileReadParams, FileWriteParams, Operation, OperationKind, ProcessArguments,
    ProcessStartParams, ProcessTerminateParams, RegistryReadParams, RegistryWriteParams,
    SendKeysParams,
};
pub use policy::{
    FilePolicy, InputPolicy, POLICY_VERSION, ProcessPolicy, RegistryPolicy, SecurityPolicy,
};
pub use request::{BrokerRequest, BrokerResponse};
