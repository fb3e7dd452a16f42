//! Dependency-light contracts shared by every `modelgate` runtime component:
//! capability/request types, the job state machine, backend/health
//! descriptors, the runtime error taxonomy, and structural configuration
//! validation. No networking and no async runtime live here — concrete
//! implementations live in the `modelgate` crate.

pub mod backend;
pub mod capability;
pub mod config;
pub mod error;
pub mod job;
pub mod registry;

pub use backend::{BackendDescriptor, BackendId, BackendStatus, HealthState};
pub use capability::{Capability, CapabilityRequest};
pub use config::{ConfigError, GatewayConfig};
pub use error::DispatchError;
pub use job::{Fingerprint, JobError, JobId, JobRecord, JobStatus};
pub use registry::Router;
