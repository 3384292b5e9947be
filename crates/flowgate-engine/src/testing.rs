//! Test doubles shared by the unit tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::collaborators::{
    ActionContext, Collaborators, DirectoryLookup, DomainOperations, Notification, NotificationSender,
    UserContact,
};
use crate::config::EngineConfig;
use crate::definition::{parse_definition_json, WorkflowDefinition};
use crate::engine::WorkflowEngine;
use crate::processors::ProcessorDeps;
use crate::store::InMemoryStore;
use crate::template::TemplateRenderer;

pub(crate) struct TestDeps {
    pub store: Arc<InMemoryStore>,
    pub domain: Arc<RecordingDomain>,
    pub directory: Arc<StaticDirectory>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: EngineConfig,
}

impl TestDeps {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(self.domain.clone(), self.directory.clone(), self.notifier.clone())
    }

    pub fn processor_deps(&self) -> ProcessorDeps {
        ProcessorDeps {
            store: self.store.clone(),
            collaborators: self.collaborators(),
            renderer: Arc::new(TemplateRenderer::new()),
            http: reqwest::Client::new(),
            config: Arc::new(self.config.clone()),
        }
    }

    pub fn engine(&self) -> WorkflowEngine {
        self.engine_with(self.config.clone())
    }

    pub fn engine_with(&self, config: EngineConfig) -> WorkflowEngine {
        WorkflowEngine::with_collaborators(self.store.clone(), self.collaborators(), config)
            .expect("engine")
    }
}

pub(crate) fn deps() -> TestDeps {
    TestDeps {
        store: Arc::new(InMemoryStore::new()),
        domain: Arc::new(RecordingDomain::default()),
        directory: Arc::new(StaticDirectory::default()),
        notifier: Arc::new(RecordingNotifier::default()),
        config: EngineConfig::default(),
    }
}

pub(crate) fn definition(document: Value) -> WorkflowDefinition {
    parse_definition_json(&document.to_string()).expect("definition")
}

/// Records every domain call as `op:requestId[:arg]`.
#[derive(Default)]
pub(crate) struct RecordingDomain {
    calls: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl RecordingDomain {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, call: String) -> anyhow::Result<()> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

fn rid(ctx: &ActionContext) -> &str {
    ctx.request_id.as_deref().unwrap_or("-")
}

#[async_trait]
impl DomainOperations for RecordingDomain {
    async fn approve_request(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        self.record(format!("approve:{}", rid(ctx)))
    }

    async fn reject_request(&self, ctx: &ActionContext, _reason: Option<&str>) -> anyhow::Result<()> {
        self.record(format!("reject:{}", rid(ctx)))
    }

    async fn fulfill_request(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        self.record(format!("fulfill:{}", rid(ctx)))
    }

    async fn create_purchase_requisition(&self, ctx: &ActionContext, vendor_id: &str) -> anyhow::Result<String> {
        self.record(format!("create_pr:{}:{}", rid(ctx), vendor_id))?;
        Ok(format!("pr-{}", rid(ctx)))
    }

    async fn reserve_stock(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        self.record(format!("reserve:{}", rid(ctx)))
    }

    async fn update_request_status(&self, ctx: &ActionContext, status: &str) -> anyhow::Result<()> {
        self.record(format!("status:{}:{}", rid(ctx), status))
    }
}

#[derive(Default)]
pub(crate) struct StaticDirectory {
    roles: Mutex<HashMap<(String, Option<String>), String>>,
    users: Mutex<HashMap<String, UserContact>>,
}

impl StaticDirectory {
    pub fn add_role(&self, role: &str, site_id: Option<&str>, user_id: &str) {
        self.roles.lock().unwrap().insert(
            (role.to_string(), site_id.map(str::to_string)),
            user_id.to_string(),
        );
    }

    pub fn add_user(&self, user_id: &str, email: Option<&str>) {
        self.users.lock().unwrap().insert(
            user_id.to_string(),
            UserContact {
                id: user_id.to_string(),
                email: email.map(str::to_string),
                ..Default::default()
            },
        );
    }
}

#[async_trait]
impl DirectoryLookup for StaticDirectory {
    async fn resolve_role_assignee(&self, role: &str, site_id: Option<&str>) -> anyhow::Result<Option<String>> {
        let roles = self.roles.lock().unwrap();
        Ok(roles
            .get(&(role.to_string(), site_id.map(str::to_string)))
            .or_else(|| roles.get(&(role.to_string(), None)))
            .cloned())
    }

    async fn resolve_user(&self, user_id: &str) -> anyhow::Result<Option<UserContact>> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(String, Notification)>>,
    failure: Mutex<Option<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    fn record(&self, channel: &str, notification: &Notification) -> anyhow::Result<()> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            anyhow::bail!(message);
        }
        self.sent
            .lock()
            .unwrap()
            .push((channel.to_string(), notification.clone()));
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send_email(&self, notification: &Notification) -> anyhow::Result<()> {
        self.record("email", notification)
    }

    async fn send_in_app(&self, notification: &Notification) -> anyhow::Result<()> {
        self.record("in_app", notification)
    }

    async fn send_sms(&self, notification: &Notification) -> anyhow::Result<()> {
        self.record("sms", notification)
    }

    async fn send_slack(&self, notification: &Notification) -> anyhow::Result<()> {
        self.record("slack", notification)
    }
}

/// Serve a single HTTP response, then close.
pub(crate) async fn serve_once(status_line: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find_header_end(&buf) {
                let headers = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        let _ = socket.write_all(response.as_bytes()).await;
        let _ = socket.shutdown().await;
    });

    addr
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Accepts connections and never answers.
pub(crate) async fn silent_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}
