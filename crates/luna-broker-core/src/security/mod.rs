//! Security policy engine for broker requests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Security Validator                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Request ──► Envelope (id, opcode in catalog)                │
//! │                    │                                         │
//! │                    ▼                                         │
//! │            Typed parameters                                  │
//! │                    │                                         │
//! │                    ▼                                         │
//! │         ┌────────────────────┐                               │
//! │         │   Deny rules       │ → Reject                      │
//! │         └────────────────────┘                               │
//! │                    │                                         │
//! │                    ▼                                         │
//! │         ┌────────────────────┐                               │
//! │         │   Allow rules      │ → Accept                      │
//! │         └────────────────────┘                               │
//! │                    │                                         │
//! │                    ▼                                         │
//! │                 Reject (fail closed)                         │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use luna_broker_core::models::{BrokerRequest, SecurityPolicy};
//! use luna_broker_core::security::{CallerIdentity, SecurityValidator, ValidationContext};
//!
//! let validator = SecurityValidator::new(Arc::new(SecurityPolicy::default()));
//! let request = BrokerRequest::new("system.reboot", None);
//! let result = validator.validate(&request, &ValidationContext::new(CallerIdentity::unknown()));
//! assert_eq!(result.reason.as_deref(), Some("Unknown operation"));
//! ```

mod key_sequence;
mod path_resolver;
mod validator;

pub use key_sequence::KeyBlocklist;
pub use path_resolver::{
    ExecutableResolution, NormalizedPath, PathRejection, canonical_path, normalize_file_path,
    normalize_registry_path, resolve_file_target,
};
pub use validator::{
    CallerIdentity, SecurityValidator, ValidationContext, ValidationResult, reason,
};
