//! Inbound side of the check-in exchange: validates each posted job
//! against its tracking record, routes the payload, and advances the
//! status machine.

use std::fs;
use std::io::Write;
use std::path::Path;

use uuid::Uuid;

use crate::error::Error;
use crate::service::Service;
use base64::engine::general_purpose;
use base64::Engine;
use jobs::{FileTransfer, Job, JobType, Payload, Results};
use messages::UserMessage;

impl Service {
    /// Process a batch of jobs posted by a checking-in agent, in received
    /// order. The first unrecoverable per-item error aborts the batch and
    /// is also broadcast at warn level; uncorrelated RESULT messages are
    /// tolerated so an agent's free-form errors cannot poison a batch.
    pub fn handle(&self, agent_id: Uuid, batch: Vec<Job>) -> Result<(), Error> {
        log::debug!("processing {} inbound jobs from agent {agent_id}", batch.len());
        for job in batch {
            self.handle_one(job).map_err(|err| {
                messages::send_broadcast(UserMessage::warn(err.to_string()));
                err
            })?;
        }
        Ok(())
    }

    fn handle_one(&self, job: Job) -> Result<(), Error> {
        // One bad agent id must not drop the rest of the batch.
        if !self.agents.exist(job.agent_id) {
            messages::send_broadcast(UserMessage::warn(format!(
                "job {} was for an unknown agent {}",
                job.id, job.agent_id
            )));
            return Ok(());
        }

        let mut info = match self.repo.get_info(&job.id) {
            Ok(info) => info,
            Err(_) if job.kind == JobType::Result => {
                // Agents emit error messages that never belonged to a job.
                if let Payload::Results(res) = &job.payload {
                    log::debug!(
                        "uncorrelated result from agent {}: stdout={:?} stderr={:?}",
                        job.agent_id,
                        res.stdout,
                        res.stderr
                    );
                }
                return Ok(());
            }
            Err(_) => return Err(Error::UnknownJob(job.id)),
        };

        if job.token != info.token() {
            return Err(Error::BadToken(job.id));
        }
        if info.status().is_terminal() {
            return Err(Error::AlreadyTerminal {
                id: job.id,
                status: info.status(),
            });
        }

        match &job.payload {
            Payload::Results(res) => self.handle_result(&job, res)?,
            Payload::AgentInfo(agent_info) => {
                self.agents.update_info(job.agent_id, agent_info.clone())?;
            }
            Payload::FileTransfer(ft) => self.file_transfer(job.agent_id, ft)?,
            Payload::Socks(_) => {
                if self.socks_in.send(job.clone()).is_err() {
                    log::warn!("SOCKS inbound sink is gone, dropping frame for job {}", job.id);
                }
            }
            // Outbound-only payload shapes carry nothing to route.
            Payload::Command(_) | Payload::Shellcode(_) => {}
        }

        match &job.payload {
            Payload::Socks(s) if !s.close => info.activate(),
            _ => info.complete(),
        }
        self.repo.update_info(info)?;
        Ok(())
    }

    fn handle_result(&self, job: &Job, res: &Results) -> Result<(), Error> {
        self.agents
            .log(job.agent_id, &format!("results for job {}", job.id))?;
        messages::send_broadcast(UserMessage::note(format!(
            "results of job {} for agent {}",
            job.id, job.agent_id
        )));
        if !res.stdout.is_empty() {
            self.agents
                .log(job.agent_id, &format!("job {} stdout:\n{}", job.id, res.stdout))?;
            messages::send_broadcast(UserMessage::success(res.stdout.clone()));
        }
        if !res.stderr.is_empty() {
            self.agents
                .log(job.agent_id, &format!("job {} stderr:\n{}", job.id, res.stderr))?;
            messages::send_broadcast(UserMessage::warn(res.stderr.clone()));
        }
        Ok(())
    }

    /// Materialize a file an agent sent back. `is_download == false`
    /// reads from the agent's perspective: the agent sent the server
    /// bytes. The embedded-for-agent direction carries nothing to land
    /// server-side.
    fn file_transfer(&self, agent_id: Uuid, ft: &FileTransfer) -> Result<(), Error> {
        if ft.is_download {
            return Ok(());
        }

        self.landing(agent_id, ft).map_err(|err| {
            let _ = self.agents.log(agent_id, &err.to_string());
            messages::send_broadcast(UserMessage::warn(err.to_string()));
            err
        })
    }

    fn landing(&self, agent_id: Uuid, ft: &FileTransfer) -> Result<(), Error> {
        let agent_dir = self.agents.agent_dir(agent_id);
        if !agent_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("agent data directory {} does not exist", agent_dir.display()),
            )));
        }

        let blob = general_purpose::STANDARD.decode(ft.blob.as_bytes()).map_err(|err| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("decoding the file blob for {}: {err}", ft.location),
            ))
        })?;

        let name = Path::new(&ft.location).file_name().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("remote location {} has no file name", ft.location),
            ))
        })?;
        let dest = agent_dir.join(name);
        write_owner_only(&dest, &blob)?;

        let msg = format!(
            "downloaded file {} ({} bytes) from agent {} to {}",
            ft.location,
            blob.len(),
            agent_id,
            dest.display()
        );
        messages::send_broadcast(UserMessage::success(msg.clone()));
        self.agents.log(agent_id, &msg)?;
        Ok(())
    }
}

/// Write the file readable and writable by the owner only.
fn write_owner_only(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(data)?;
    // The mode above only applies on create; clamp pre-existing files too.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
