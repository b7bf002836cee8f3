//! Typed jobs exchanged between the server and its agents, plus the
//! server-side tracking record for each job.

use chrono::{DateTime, Utc};
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod memory;

/// Length of the random identifier assigned to each job.
const JOB_ID_LEN: usize = 10;

/// The all-ones agent identifier, addressing every currently known agent.
/// Agents compare this value on the wire, so it is a fixed constant rather
/// than a string spelling.
pub const BROADCAST_ID: Uuid = Uuid::max();

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a job with id {0} is already tracked")]
    Duplicate(String),
    #[error("no job with id {0}")]
    NotFound(String),
}

/// Discriminant for a job's payload and for dispatch on inbound results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Mutates agent configuration (sleep, skew, kill date, ...).
    Control,
    /// Invokes a named agent-side module.
    Module,
    /// Built-in agent action (cd, ls, rm, ...).
    Native,
    /// Exec or shell command.
    Cmd,
    FileTransfer,
    Shellcode,
    Socks,
    /// Inbound only: command output from the agent.
    Result,
    /// Inbound only: refreshed agent metadata.
    AgentInfo,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobType::Control => "Control",
            JobType::Module => "Module",
            JobType::Native => "Native",
            JobType::Cmd => "Cmd",
            JobType::FileTransfer => "FileTransfer",
            JobType::Shellcode => "Shellcode",
            JobType::Socks => "Socks",
            JobType::Result => "Result",
            JobType::AgentInfo => "AgentInfo",
        };
        write!(f, "{s}")
    }
}

/// A command for the agent to run: control directives, module invocations,
/// native actions, and exec/shell commands all share this shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// File content moving between the server and an agent. `is_download`
/// reads from the agent's perspective: false means the agent sends the
/// server bytes, true means the blob is embedded for the agent to write
/// locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTransfer {
    pub location: String,
    /// Base64-encoded file content.
    #[serde(default)]
    pub blob: String,
    pub is_download: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shellcode {
    /// One of `self`, `remote`, `rtlcreateuserthread`, `userapc`.
    pub method: String,
    /// Target process for the remote injection methods.
    #[serde(default)]
    pub pid: u32,
    /// Base64-encoded shellcode.
    pub bytes: String,
}

/// A single frame of SOCKS tunnel traffic. The connection identifier and
/// sequence index are assigned by the SOCKS layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socks {
    pub id: Uuid,
    pub index: u64,
    #[serde(default)]
    pub data: Vec<u8>,
    pub close: bool,
}

/// Command output returned by an agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Results {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Agent metadata reported on check-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub wait_time: String,
    #[serde(default)]
    pub max_retry: u32,
    #[serde(default)]
    pub failed_checkin: u32,
    #[serde(default)]
    pub skew: i64,
    #[serde(default)]
    pub padding: u32,
    #[serde(default)]
    pub kill_date: i64,
    #[serde(default)]
    pub ja3: String,
    #[serde(default)]
    pub sysinfo: SysInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SysInfo {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Payload variants, selected by the job's [`JobType`]. Dispatchers match
/// on the variant, never on a stringly-typed map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "lowercase")]
pub enum Payload {
    Command(Command),
    FileTransfer(FileTransfer),
    Shellcode(Shellcode),
    Socks(Socks),
    Results(Results),
    AgentInfo(AgentInfo),
}

/// The unit of work sent to (or received from) an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Server-assigned except for SOCKS jobs, which carry the identifier
    /// of their connection for every frame.
    #[serde(default)]
    pub id: String,
    pub agent_id: Uuid,
    /// Opaque authenticator bound to the job at build time. Inbound
    /// results must echo it back.
    #[serde(default)]
    pub token: Uuid,
    pub kind: JobType,
    pub payload: Payload,
}

/// Job lifecycle. SOCKS jobs are the only ones that pass through `Active`
/// (an intermediate frame arrived, the connection is still open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Created,
    Sent,
    Active,
    Complete,
    Canceled,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Complete | Status::Canceled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Created => "Created",
            Status::Sent => "Sent",
            Status::Active => "Active",
            Status::Complete => "Complete",
            Status::Canceled => "Canceled",
        };
        write!(f, "{s}")
    }
}

/// Server-side tracking record for a job. Fields are private so status
/// only ever moves through the transition methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    id: String,
    agent_id: Uuid,
    kind: String,
    command: String,
    token: Uuid,
    status: Status,
    created: DateTime<Utc>,
    sent: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
}

impl JobInfo {
    /// Create a tracking record with a fresh job id and token.
    pub fn new(agent_id: Uuid, kind: JobType, command: String) -> Self {
        Self {
            id: new_job_id(),
            agent_id,
            kind: kind.to_string(),
            command,
            token: Uuid::new_v4(),
            status: Status::Created,
            created: Utc::now(),
            sent: None,
            completed: None,
        }
    }

    /// Adopt an externally assigned identity. SOCKS connections mint their
    /// own job id and token and reuse both for every frame.
    pub fn set_identity(&mut self, id: String, token: Uuid) {
        self.id = id;
        self.token = token;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent_id(&self) -> Uuid {
        self.agent_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn sent(&self) -> Option<DateTime<Utc>> {
        self.sent
    }

    pub fn completed(&self) -> Option<DateTime<Utc>> {
        self.completed
    }

    /// The job was drained on a check-in. Stamps the sent time once and
    /// never regresses an `Active` SOCKS job.
    pub fn mark_sent(&mut self) {
        if self.sent.is_none() {
            self.sent = Some(Utc::now());
        }
        if self.status == Status::Created {
            self.status = Status::Sent;
        }
    }

    /// A non-terminal result arrived for an open SOCKS connection.
    pub fn activate(&mut self) {
        self.status = Status::Active;
    }

    pub fn complete(&mut self) {
        self.status = Status::Complete;
        self.completed = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = Status::Canceled;
        self.completed = Some(Utc::now());
    }
}

fn new_job_id() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), JOB_ID_LEN)
}
