//! Directory of known agents: registration, metadata, and the per-agent
//! audit log. Each registered agent owns a data directory under
//! `<root>/data/agents/<agent_id>/` that also receives downloaded files.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Error;
use jobs::AgentInfo;

const AGENT_LOG_FILE: &str = "agent.log";

struct AgentRecord {
    info: Option<AgentInfo>,
    registered: DateTime<Utc>,
}

pub struct AgentDirectory {
    data_dir: PathBuf,
    inner: Mutex<HashMap<Uuid, AgentRecord>>,
}

impl AgentDirectory {
    /// `root` is normally the server's working directory; agent artifacts
    /// live under `<root>/data/agents`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            data_dir: root.as_ref().join("data").join("agents"),
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn agent_dir(&self, id: Uuid) -> PathBuf {
        self.data_dir.join(id.to_string())
    }

    /// Add an agent, creating its data directory. Re-registration is a
    /// no-op for the record but still ensures the directory exists.
    pub fn register(&self, id: Uuid) -> Result<(), Error> {
        fs::create_dir_all(self.agent_dir(id))?;
        self.inner
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| AgentRecord {
                info: None,
                registered: Utc::now(),
            });
        log::debug!("registered agent {id}");
        Ok(())
    }

    pub fn agents(&self) -> Vec<Uuid> {
        self.inner.lock().unwrap().keys().copied().collect()
    }

    pub fn exist(&self, id: Uuid) -> bool {
        self.inner.lock().unwrap().contains_key(&id)
    }

    pub fn registered(&self, id: Uuid) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().get(&id).map(|r| r.registered)
    }

    pub fn info(&self, id: Uuid) -> Option<AgentInfo> {
        self.inner
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|r| r.info.clone())
    }

    /// Replace the agent's metadata with what it reported on check-in.
    pub fn update_info(&self, id: Uuid, info: AgentInfo) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&id) {
            Some(record) => {
                record.info = Some(info);
                Ok(())
            }
            None => Err(Error::UnknownAgent(id)),
        }
    }

    /// Append a timestamped line to the agent's audit log.
    pub fn log(&self, id: Uuid, msg: &str) -> Result<(), Error> {
        if !self.exist(id) {
            return Err(Error::UnknownAgent(id));
        }
        let path = self.agent_dir(id).join(AGENT_LOG_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "[{}] {}", Utc::now().to_rfc3339(), msg)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_creates_agent_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = AgentDirectory::new(root.path());
        let id = Uuid::new_v4();

        assert!(!dir.exist(id));
        dir.register(id).unwrap();
        assert!(dir.exist(id));
        assert!(dir.agent_dir(id).is_dir());
        assert!(dir.registered(id).is_some());
    }

    #[test]
    fn test_log_appends_lines() {
        let root = tempfile::tempdir().unwrap();
        let dir = AgentDirectory::new(root.path());
        let id = Uuid::new_v4();
        dir.register(id).unwrap();

        dir.log(id, "first line").unwrap();
        dir.log(id, "second line").unwrap();

        let contents = fs::read_to_string(dir.agent_dir(id).join(AGENT_LOG_FILE)).unwrap();
        assert!(contents.contains("first line"));
        assert!(contents.contains("second line"));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_log_unknown_agent() {
        let root = tempfile::tempdir().unwrap();
        let dir = AgentDirectory::new(root.path());
        assert!(matches!(
            dir.log(Uuid::new_v4(), "nope"),
            Err(Error::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_update_info() {
        let root = tempfile::tempdir().unwrap();
        let dir = AgentDirectory::new(root.path());
        let id = Uuid::new_v4();
        dir.register(id).unwrap();
        assert!(dir.info(id).is_none());

        let mut info = AgentInfo::default();
        info.sysinfo.hostname = "workstation-07".to_string();
        dir.update_info(id, info).unwrap();
        assert_eq!(dir.info(id).unwrap().sysinfo.hostname, "workstation-07");

        assert!(matches!(
            dir.update_info(Uuid::new_v4(), AgentInfo::default()),
            Err(Error::UnknownAgent(_))
        ));
    }
}
