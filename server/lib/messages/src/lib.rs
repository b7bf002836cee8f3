//! Messages surfaced to operators. Components push through
//! [`send_broadcast`]; interactive frontends pull a feed with
//! [`subscribe`]. The hub is process-wide so errors reach the console even
//! when the immediate caller discards the return value.

use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Info,
    Note,
    Warn,
    Debug,
    Success,
    Plain,
}

/// A single operator-visible message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub level: Level,
    pub message: String,
    pub time: DateTime<Utc>,
    pub error: bool,
}

impl UserMessage {
    fn new(level: Level, message: impl Into<String>, error: bool) -> Self {
        Self {
            level,
            message: message.into(),
            time: Utc::now(),
            error,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message, false)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Level::Note, message, false)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Level::Warn, message, true)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(Level::Success, message, false)
    }

    pub fn plain(message: impl Into<String>) -> Self {
        Self::new(Level::Plain, message, false)
    }
}

static HUB: OnceLock<Mutex<Vec<mpsc::UnboundedSender<UserMessage>>>> = OnceLock::new();

fn hub() -> &'static Mutex<Vec<mpsc::UnboundedSender<UserMessage>>> {
    HUB.get_or_init(|| Mutex::new(Vec::new()))
}

/// Register a new feed. The receiver sees every message broadcast after
/// this call; dropping it unsubscribes on the next send.
pub fn subscribe() -> mpsc::UnboundedReceiver<UserMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    hub().lock().unwrap().push(tx);
    rx
}

/// Fan a message out to every live subscriber, pruning closed ones.
pub fn send_broadcast(msg: UserMessage) {
    match msg.level {
        Level::Warn => log::warn!("{}", msg.message),
        Level::Debug => log::debug!("{}", msg.message),
        _ => log::info!("{}", msg.message),
    }
    hub().lock().unwrap().retain(|tx| tx.send(msg.clone()).is_ok());
}
