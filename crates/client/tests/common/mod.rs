//! Scripted in-memory transport for driving a `Conversation` in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use cs_client::Conversation;
use cs_domain::config::Config;
use cs_domain::error::{Error, Result};
use cs_domain::frame::QueryRequest;
use cs_sessions::{HistoryStore, MemoryStore};
use cs_stream::{ByteStream, ChatTransport};

/// One step of a scripted response body.
#[derive(Clone)]
pub enum Step {
    Chunk(String),
    /// The connection drops mid-body.
    Break(String),
    /// Block until the gate is opened.
    Wait(Arc<Notify>),
    /// Never produce anything more.
    Hang,
}

pub fn chunk(s: &str) -> Step {
    Step::Chunk(s.to_owned())
}

pub enum Script {
    Body(Vec<Step>),
    OpenError(String),
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<QueryRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open(&self, req: &QueryRequest) -> Result<ByteStream> {
        self.requests.lock().push(req.clone());
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::OpenError("no script left".into()));

        let steps = match script {
            Script::OpenError(msg) => return Err(Error::Http(msg)),
            Script::Body(steps) => steps,
        };

        let stream = async_stream::stream! {
            for step in steps {
                match step {
                    Step::Chunk(s) => yield Ok(s.into_bytes()),
                    Step::Break(msg) => {
                        yield Err(Error::Http(msg));
                        break;
                    }
                    Step::Wait(gate) => gate.notified().await,
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.conversation.settle_delay_ms = 0;
    config.conversation.persist = false;
    config
}

pub fn open(transport: Arc<ScriptedTransport>) -> (Arc<Conversation>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let conversation =
        Conversation::open(&test_config(), transport, store.clone() as Arc<dyn HistoryStore>)
            .unwrap();
    (Arc::new(conversation), store)
}

pub const SEARCHING: &str = "{\"type\":\"processing_step\",\"message\":\"Searching\"}\n";
pub const READING: &str = "{\"type\":\"processing_step\",\"message\":\"Reading docs\"}\n";

pub fn complete(response: &str, token: Option<&str>) -> String {
    match token {
        Some(t) => format!("{{\"type\":\"complete\",\"response\":\"{response}\",\"session_id\":\"{t}\"}}\n"),
        None => format!("{{\"type\":\"complete\",\"response\":\"{response}\"}}\n"),
    }
}
