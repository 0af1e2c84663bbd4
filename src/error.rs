//! Error types for every stage of a scan task.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Caller input rejected before any process is launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("target is required")]
    EmptyTarget,

    #[error("invalid target: {0:?} is not a hostname, IPv4 address or IPv4 CIDR")]
    InvalidTarget(String),

    #[error("flags must not be empty")]
    EmptyFlags,

    #[error("invalid port specification: {0:?}")]
    InvalidPortSpec(String),

    #[error("invalid --top-ports value: {0:?}")]
    InvalidTopPorts(String),

    #[error("invalid --script value: {0:?}")]
    InvalidScriptSpec(String),

    #[error("flag {0:?} contains a forbidden shell character")]
    ForbiddenCharacter(String),

    #[error("unexpected argument {0:?}: only flags starting with '-' are allowed")]
    UnexpectedArgument(String),

    #[error("flag {0:?} requires a value")]
    MissingValue(String),
}

/// Failures of the nmap subprocess itself.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("nmap scan timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("nmap output exceeded the {limit} byte limit")]
    OutputTooLarge { limit: usize },

    #[error("nmap execution failed ({status}): {stderr}")]
    ExecutionFailed { status: ExitStatus, stderr: String },

    #[error("failed to launch nmap: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error while reading nmap output: {0}")]
    Io(#[from] std::io::Error),
}

/// The scan ran but its report could not be decoded.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse nmap XML output: {0}")]
    MalformedOutput(String),
}

/// Anything that can end a scan task in the `failed` state.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("scan task aborted: {0}")]
    Aborted(String),
}
