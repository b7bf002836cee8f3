//! In-memory job repository: per-agent FIFO queues of jobs awaiting
//! delivery, plus the id-keyed tracking records. The only shared mutable
//! state in the service, guarded by a single mutex so every operation is
//! atomic with respect to the others.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::{Error, Job, JobInfo, Status};

#[derive(Default)]
struct Inner {
    /// Queued jobs per agent, insertion order preserved per agent.
    queue: HashMap<Uuid, Vec<Job>>,
    /// Every tracking record ever created, kept for history queries.
    info: HashMap<String, JobInfo>,
}

#[derive(Default)]
pub struct Repository {
    inner: Mutex<Inner>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job and start tracking it. Fails without mutation if a
    /// record with the same id already exists.
    pub fn add(&self, job: Job, info: JobInfo) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.info.contains_key(info.id()) {
            return Err(Error::Duplicate(info.id().to_string()));
        }
        inner.info.insert(info.id().to_string(), info);
        inner.queue.entry(job.agent_id).or_default().push(job);
        Ok(())
    }

    /// Queue a job against an existing tracking record. Used for SOCKS
    /// continuation frames, which reuse the connection's job id.
    pub fn push(&self, job: Job) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.info.contains_key(&job.id) {
            return Err(Error::NotFound(job.id));
        }
        inner.queue.entry(job.agent_id).or_default().push(job);
        Ok(())
    }

    /// Atomically remove and return every queued job for the agent, in
    /// insertion order, stamping each record as sent. An empty result is
    /// not an error.
    pub fn get_jobs(&self, agent_id: Uuid) -> Vec<Job> {
        let mut inner = self.inner.lock().unwrap();
        let drained = inner.queue.remove(&agent_id).unwrap_or_default();
        for job in &drained {
            if let Some(info) = inner.info.get_mut(&job.id) {
                info.mark_sent();
            }
        }
        drained
    }

    pub fn get_info(&self, id: &str) -> Result<JobInfo, Error> {
        let inner = self.inner.lock().unwrap();
        inner
            .info
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Replace a tracking record by id.
    pub fn update_info(&self, info: JobInfo) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.info.contains_key(info.id()) {
            return Err(Error::NotFound(info.id().to_string()));
        }
        inner.info.insert(info.id().to_string(), info);
        Ok(())
    }

    /// Drop the not-yet-sent jobs queued for one agent, canceling their
    /// tracking records. Jobs already drained are unaffected.
    pub fn clear(&self, agent_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        Self::clear_agent(&mut inner, agent_id);
    }

    /// `clear`, across every agent with queued jobs.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        let agents: Vec<Uuid> = inner.queue.keys().copied().collect();
        for agent_id in agents {
            Self::clear_agent(&mut inner, agent_id);
        }
    }

    fn clear_agent(inner: &mut Inner, agent_id: Uuid) {
        let Some(dropped) = inner.queue.remove(&agent_id) else {
            return;
        };
        for job in dropped {
            if let Some(info) = inner.info.get_mut(&job.id) {
                if info.status() == Status::Created {
                    info.cancel();
                }
            }
        }
    }

    /// Snapshot of every tracking record, for reporting.
    pub fn get_all(&self) -> HashMap<String, JobInfo> {
        self.inner.lock().unwrap().info.clone()
    }
}
