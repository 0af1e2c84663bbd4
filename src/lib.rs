//! Library crate for nmap-task-rs: sanitized nmap scans run as tracked async tasks.
pub mod command;
pub mod error;
pub mod executor;
pub mod registry;
pub mod report;
pub mod server;
pub mod types;
pub mod validate;

pub use command::{EngineConfig, ValidatedCommand};
pub use error::{ExecutionError, ParseError, ScanError, ValidationError};
pub use executor::{ExecLimits, ProcessRunner, RawOutput, ScanRunner};
pub use registry::{RegistryConfig, TaskRegistry};
pub use types::{ScanResult, ServiceInfo, TaskSnapshot, TaskStatus};
pub use validate::{validate_flags, validate_target};
