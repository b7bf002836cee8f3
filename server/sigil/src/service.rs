//! The job service façade: operator submissions come in through [`Service::add`],
//! agent check-ins drain through [`Service::get`] and post back through
//! [`Service::handle`] (see the `handler` module). One instance serves the
//! whole process.

use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agents::AgentDirectory;
use crate::builder;
use crate::error::Error;
use crate::socks;
use jobs::memory::Repository;
use jobs::{Job, JobInfo, JobType, Payload, BROADCAST_ID};
use messages::UserMessage;

static SERVICE: OnceLock<Arc<Service>> = OnceLock::new();

pub struct Service {
    pub(crate) repo: Repository,
    pub(crate) agents: Arc<AgentDirectory>,
    /// Inbound sink of the external SOCKS layer; SOCKS-typed results are
    /// forwarded here.
    pub(crate) socks_in: mpsc::UnboundedSender<Job>,
}

impl Service {
    /// Build a service and start its SOCKS bridge. Must be called from
    /// within a tokio runtime; the bridge runs until `socks_out`'s sender
    /// side is dropped.
    pub fn new(
        agents: Arc<AgentDirectory>,
        socks_out: mpsc::UnboundedReceiver<Job>,
        socks_in: mpsc::UnboundedSender<Job>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            repo: Repository::new(),
            agents,
            socks_in,
        });
        socks::spawn_bridge(service.clone(), socks_out);
        service
    }

    /// Process-wide instance. The first call constructs the service and
    /// starts the bridge; later calls return the existing instance and
    /// drop the supplied channels.
    pub fn install(
        agents: Arc<AgentDirectory>,
        socks_out: mpsc::UnboundedReceiver<Job>,
        socks_in: mpsc::UnboundedSender<Job>,
    ) -> Arc<Self> {
        SERVICE
            .get_or_init(|| Self::new(agents, socks_out, socks_in))
            .clone()
    }

    pub fn global() -> Option<Arc<Self>> {
        SERVICE.get().cloned()
    }

    /// Translate an operator command into one queued job — or one per
    /// known agent when `agent_id` is the broadcast identifier — and
    /// return the human-readable summary (a per-agent creation report for
    /// broadcast). Failures leave the queue and tracking records untouched
    /// for the failing job and are also broadcast at warn level.
    pub fn add(&self, agent_id: Uuid, kind: &str, args: Vec<String>) -> Result<String, Error> {
        self.add_inner(agent_id, kind, args).map_err(|err| {
            messages::send_broadcast(UserMessage::warn(err.to_string()));
            err
        })
    }

    fn add_inner(&self, agent_id: Uuid, kind: &str, args: Vec<String>) -> Result<String, Error> {
        let built = builder::build(kind, args)?;

        if agent_id == BROADCAST_ID {
            let known = self.agents.agents();
            if known.is_empty() {
                return Err(Error::NoAgents);
            }
            let mut report = format!(
                "creating jobs for all agents via broadcast identifier {BROADCAST_ID}"
            );
            for id in known {
                let info =
                    self.build_job(id, built.kind, built.payload.clone(), &built.args, None)?;
                report.push_str(&format!(
                    "\n\tcreated job {} for agent {} at {}",
                    info.id(),
                    id,
                    info.created().to_rfc3339()
                ));
            }
            return Ok(report);
        }

        let info = self.build_job(agent_id, built.kind, built.payload, &built.args, None)?;
        Ok(info.command().to_string())
    }

    /// Fill in the server-side fields for a job, queue it, and start
    /// tracking it. `identity` carries a SOCKS connection's pre-assigned
    /// id and token; every other job gets a fresh pair.
    pub(crate) fn build_job(
        &self,
        agent_id: Uuid,
        kind: JobType,
        payload: Payload,
        args: &[String],
        identity: Option<(String, Uuid)>,
    ) -> Result<JobInfo, Error> {
        if !self.agents.exist(agent_id) {
            return Err(Error::UnknownAgent(agent_id));
        }

        let command = summarize(kind, &payload, args);
        self.log_build(agent_id, kind, &payload, args)?;

        let mut info = JobInfo::new(agent_id, kind, command);
        let mut job = Job {
            id: String::new(),
            agent_id,
            token: Uuid::nil(),
            kind,
            payload,
        };
        match identity {
            Some((id, token)) => {
                info.set_identity(id.clone(), token);
                job.id = id;
                job.token = token;
            }
            None => {
                job.id = info.id().to_string();
                job.token = info.token();
            }
        }

        self.repo.add(job, info.clone())?;
        self.agents.log(
            agent_id,
            &format!(
                "created job {} (type {}, status {}): {}",
                info.id(),
                info.kind(),
                info.status(),
                info.command()
            ),
        )?;
        Ok(info)
    }

    // Audit-log lines for builds that moved file content.
    fn log_build(
        &self,
        agent_id: Uuid,
        kind: JobType,
        payload: &Payload,
        args: &[String],
    ) -> Result<(), Error> {
        match payload {
            Payload::Command(cmd)
                if kind == JobType::Module
                    && cmd.name == "clr"
                    && cmd.args.first().map(String::as_str) == Some("load-assembly") =>
            {
                if let (Some(path), Some(hash)) = (args.first(), args.last()) {
                    self.agents.log(
                        agent_id,
                        &format!("loading assembly from {path} with SHA-256 {hash}"),
                    )?;
                }
            }
            Payload::FileTransfer(ft) if ft.is_download => {
                if args.len() > 3 {
                    self.agents.log(
                        agent_id,
                        &format!(
                            "uploading file from server at {} of size {} bytes and SHA-256 {} to agent at {}",
                            args[0], args[3], args[2], args[1]
                        ),
                    )?;
                }
            }
            Payload::FileTransfer(ft) => {
                self.agents
                    .log(agent_id, &format!("downloading file from agent at {}", ft.location))?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Drain the agent's queue for delivery on this check-in. An empty
    /// batch is normal.
    pub fn get(&self, agent_id: Uuid) -> Vec<Job> {
        self.repo.get_jobs(agent_id)
    }

    /// Drop the agent's not-yet-sent jobs; already-drained jobs cannot be
    /// recalled.
    pub fn clear(&self, agent_id: Uuid) -> Result<(), Error> {
        if !self.agents.exist(agent_id) {
            return Err(Error::UnknownAgent(agent_id));
        }
        self.repo.clear(agent_id);
        Ok(())
    }

    pub fn clear_all(&self) {
        self.repo.clear_all();
    }

    /// Non-terminal jobs for one agent, as id/command/status/created/sent
    /// rows for the console.
    pub fn active_jobs(&self, agent_id: Uuid) -> Result<Vec<[String; 5]>, Error> {
        if !self.agents.exist(agent_id) {
            return Err(Error::UnknownAgent(agent_id));
        }
        let mut infos: Vec<JobInfo> = self
            .repo
            .get_all()
            .into_values()
            .filter(|info| info.agent_id() == agent_id && !info.status().is_terminal())
            .collect();
        infos.sort_by_key(|info| info.created());
        Ok(infos
            .into_iter()
            .map(|info| {
                [
                    info.id().to_string(),
                    info.command().to_string(),
                    info.status().to_string(),
                    info.created().to_rfc3339(),
                    info.sent().map(|t| t.to_rfc3339()).unwrap_or_default(),
                ]
            })
            .collect())
    }

    /// Non-terminal jobs across every agent, with the agent id prepended
    /// to each row.
    pub fn all_jobs(&self) -> Vec<[String; 6]> {
        let mut infos: Vec<JobInfo> = self
            .repo
            .get_all()
            .into_values()
            .filter(|info| !info.status().is_terminal())
            .collect();
        infos.sort_by_key(|info| info.created());
        infos
            .into_iter()
            .map(|info| {
                [
                    info.agent_id().to_string(),
                    info.id().to_string(),
                    info.command().to_string(),
                    info.status().to_string(),
                    info.created().to_rfc3339(),
                    info.sent().map(|t| t.to_rfc3339()).unwrap_or_default(),
                ]
            })
            .collect()
    }
}

/// Derive the human-readable summary shown in job tables and audit logs.
/// The argument portion is capped at 30 characters.
fn summarize(kind: JobType, payload: &Payload, args: &[String]) -> String {
    match payload {
        Payload::Command(cmd) => {
            let arg_part = truncate_args(&cmd.args.join(" "));
            match kind {
                JobType::Cmd if cmd.name == "shell" => {
                    format!("shell {arg_part}").trim_end().to_string()
                }
                JobType::Cmd => format!("run {} {}", cmd.name, arg_part)
                    .trim_end()
                    .to_string(),
                _ => format!("{} {}", cmd.name, arg_part).trim_end().to_string(),
            }
        }
        Payload::FileTransfer(ft) if ft.is_download => {
            format!(
                "upload {} {}",
                args.first().map(String::as_str).unwrap_or_default(),
                args.get(1).map(String::as_str).unwrap_or(&ft.location)
            )
        }
        Payload::FileTransfer(ft) => format!("download {}", ft.location),
        Payload::Shellcode(sc) => {
            format!("shellcode {} {} length {}", sc.method, sc.pid, sc.bytes.len())
        }
        Payload::Socks(s) => format!("SOCKS connection {} packet {}", s.id, s.index),
        Payload::Results(_) | Payload::AgentInfo(_) => kind.to_string(),
    }
}

fn truncate_args(args: &str) -> String {
    const MAX_ARG_CHARS: usize = 30;
    if args.chars().count() > MAX_ARG_CHARS {
        let head: String = args.chars().take(MAX_ARG_CHARS).collect();
        format!("{head}...")
    } else {
        args.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs::Command;

    #[test]
    fn test_truncate_args_caps_at_thirty() {
        let short = "a".repeat(30);
        assert_eq!(truncate_args(&short), short);

        let long = "b".repeat(31);
        let got = truncate_args(&long);
        assert_eq!(got.chars().count(), 33);
        assert!(got.ends_with("..."));
        assert!(got.starts_with(&"b".repeat(30)));
    }

    #[test]
    fn test_summarize_shell_and_run() {
        let shell = Payload::Command(Command {
            name: "shell".to_string(),
            args: vec!["ping".to_string(), "-c".to_string(), "3".to_string()],
        });
        assert_eq!(summarize(JobType::Cmd, &shell, &[]), "shell ping -c 3");

        let run = Payload::Command(Command {
            name: "ping".to_string(),
            args: vec!["-c".to_string(), "3".to_string()],
        });
        assert_eq!(summarize(JobType::Cmd, &run, &[]), "run ping -c 3");

        let bare = Payload::Command(Command {
            name: "whoami".to_string(),
            args: Vec::new(),
        });
        assert_eq!(summarize(JobType::Cmd, &bare, &[]), "run whoami");
    }

    #[test]
    fn test_summarize_control() {
        let sleep = Payload::Command(Command {
            name: "sleep".to_string(),
            args: vec!["30s".to_string()],
        });
        assert_eq!(summarize(JobType::Control, &sleep, &[]), "sleep 30s");
    }

    #[test]
    fn test_summarize_socks() {
        let id = Uuid::new_v4();
        let frame = Payload::Socks(jobs::Socks {
            id,
            index: 4,
            data: vec![1, 2, 3],
            close: false,
        });
        assert_eq!(
            summarize(JobType::Socks, &frame, &[]),
            format!("SOCKS connection {id} packet 4")
        );
    }
}
