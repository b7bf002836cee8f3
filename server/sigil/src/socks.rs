//! Bridge between the external SOCKS layer and the job queue. Outbound
//! frames become SOCKS-typed jobs against the target agent; inbound
//! SOCKS-typed results are forwarded back in the `handler` module.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::service::Service;
use jobs::{Job, JobType};
use messages::UserMessage;

/// Pump the outbound SOCKS channel into the job queue for the lifetime of
/// the channel. Build failures surface as operator messages, never as
/// dropped frames killing the pump.
pub(crate) fn spawn_bridge(service: Arc<Service>, mut socks_out: mpsc::UnboundedReceiver<Job>) {
    tokio::spawn(async move {
        log::debug!("SOCKS bridge started");
        while let Some(job) = socks_out.recv().await {
            if let Err(err) = service.enqueue_socks(job) {
                messages::send_broadcast(UserMessage::warn(format!(
                    "failed to queue SOCKS traffic for the agent: {err}"
                )));
            }
        }
        log::debug!("SOCKS bridge stopped, outbound channel closed");
    });
}

impl Service {
    /// Queue one outbound SOCKS frame. Frames arrive with the connection's
    /// own id and token; the first frame creates the tracking record and
    /// later frames ride on it.
    pub(crate) fn enqueue_socks(&self, job: Job) -> Result<(), Error> {
        if !self.agents.exist(job.agent_id) {
            return Err(Error::UnknownAgent(job.agent_id));
        }

        match self.repo.get_info(&job.id) {
            Ok(info) => {
                if info.token() != job.token {
                    return Err(Error::BadToken(job.id));
                }
                log::debug!("queueing SOCKS continuation frame for job {}", job.id);
                self.repo.push(job)?;
                Ok(())
            }
            Err(jobs::Error::NotFound(_)) => {
                self.build_job(
                    job.agent_id,
                    JobType::Socks,
                    job.payload,
                    &[],
                    Some((job.id, job.token)),
                )?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
