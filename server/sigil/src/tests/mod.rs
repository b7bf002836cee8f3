mod builder_tests;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agents::AgentDirectory;
use crate::service::Service;
use jobs::{Job, JobType, Payload, Socks};

/// A service wired to a throwaway data root, with this test acting as the
/// external SOCKS layer on both sides of the bridge.
pub(crate) struct Harness {
    pub service: Arc<Service>,
    pub agents: Arc<AgentDirectory>,
    pub socks_out: mpsc::UnboundedSender<Job>,
    pub socks_in: mpsc::UnboundedReceiver<Job>,
    // Held for its Drop; the tempdir outlives the service.
    pub _root: tempfile::TempDir,
}

/// Must be called from within a tokio runtime (the bridge task spawns on
/// construction).
pub(crate) fn harness() -> Harness {
    let _ = pretty_env_logger::try_init();
    let root = tempfile::tempdir().unwrap();
    let agents = Arc::new(AgentDirectory::new(root.path()));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let service = Service::new(agents.clone(), out_rx, in_tx);
    Harness {
        service,
        agents,
        socks_out: out_tx,
        socks_in: in_rx,
        _root: root,
    }
}

pub(crate) fn register_agent(harness: &Harness) -> Uuid {
    let id = Uuid::new_v4();
    harness.agents.register(id).unwrap();
    id
}

pub(crate) fn socks_frame(
    agent_id: Uuid,
    conn: Uuid,
    token: Uuid,
    index: u64,
    close: bool,
) -> Job {
    Job {
        id: conn.to_string(),
        agent_id,
        token,
        kind: JobType::Socks,
        payload: Payload::Socks(Socks {
            id: conn,
            index,
            data: vec![0xde, 0xad, 0xbe, 0xef],
            close,
        }),
    }
}

pub(crate) async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
