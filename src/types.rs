use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::validate::DEFAULT_FLAGS;

/// Body of a scan submission.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub flags: Option<String>,
}

/// One port entry of a scanned host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PortEntry {
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub state: Option<String>,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

impl PortEntry {
    pub fn is_open(&self) -> bool {
        self.state.as_deref() == Some("open")
    }
}

/// One host of a scan report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct HostEntry {
    pub address: Option<String>,
    pub address_type: Option<String>,
    pub hostname: Option<String>,
    /// Liveness as reported by nmap (`up`, `down`, ...).
    pub state: Option<String>,
    pub ports: Vec<PortEntry>,
}

/// Normalized nmap report.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScanResult {
    pub scanner: Option<String>,
    pub version: Option<String>,
    pub args: Option<String>,
    pub start_time: Option<String>,
    pub finish_time: Option<String>,
    pub elapsed_secs: Option<f64>,
    pub hosts_up: Option<u32>,
    pub hosts_down: Option<u32>,
    pub hosts: Vec<HostEntry>,
}

/// What a completed task carries.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub summary: String,
    pub scan: ScanResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

/// Read-only copy of a task's state.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub target: String,
    pub flags: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Static description of the service and its single tool.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub capabilities: Vec<&'static str>,
    pub input_schema: Value,
}

impl ServiceInfo {
    pub fn current() -> Self {
        Self {
            name: "Nmap Scanner",
            version: env!("CARGO_PKG_VERSION"),
            description: "Scans a target using Nmap and returns structured results.",
            capabilities: vec![
                "nmapScan: asynchronous port scan of a hostname, IPv4 address or IPv4 CIDR",
                "result polling by task id",
                "structured XML report parsing with an open-port summary",
            ],
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target": { "type": "string", "description": "Domain, IPv4 address or IPv4 CIDR to scan" },
                    "flags": { "type": "string", "description": "Nmap flags (e.g., -T4 -p 1-1000)", "default": DEFAULT_FLAGS }
                },
                "required": ["target"]
            }),
        }
    }
}
