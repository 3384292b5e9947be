//! Interfaces to services the engine drives but does not own.
//!
//! Implementations report failures through `anyhow`; processors map them to
//! the matching node error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What a domain operation is being invoked for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    pub execution_id: Uuid,
    pub node_id: String,
    /// Taken from `requestData.id` when present
    pub request_id: Option<String>,
    pub context: Map<String, Value>,
}

/// Request-level business operations. Each call is transactional on the
/// collaborator side; the engine never compensates.
#[async_trait]
pub trait DomainOperations: Send + Sync {
    async fn approve_request(&self, ctx: &ActionContext) -> anyhow::Result<()>;

    async fn reject_request(&self, ctx: &ActionContext, reason: Option<&str>) -> anyhow::Result<()>;

    async fn fulfill_request(&self, ctx: &ActionContext) -> anyhow::Result<()>;

    /// Returns the id of the created purchase requisition.
    async fn create_purchase_requisition(
        &self,
        ctx: &ActionContext,
        vendor_id: &str,
    ) -> anyhow::Result<String>;

    async fn reserve_stock(&self, ctx: &ActionContext) -> anyhow::Result<()>;

    async fn update_request_status(&self, ctx: &ActionContext, status: &str) -> anyhow::Result<()>;
}

/// Contact details for a directory user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContact {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub slack_id: Option<String>,
}

#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// User id currently holding `role`, optionally scoped to a site.
    async fn resolve_role_assignee(
        &self,
        role: &str,
        site_id: Option<&str>,
    ) -> anyhow::Result<Option<String>>;

    async fn resolve_user(&self, user_id: &str) -> anyhow::Result<Option<UserContact>>;
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub execution_id: Uuid,
    pub node_id: String,
    /// User id or literal address, as resolved from `sendTo`
    pub recipient: String,
    pub contact: Option<UserContact>,
    pub template: Option<String>,
    pub message: String,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_email(&self, notification: &Notification) -> anyhow::Result<()>;

    async fn send_in_app(&self, notification: &Notification) -> anyhow::Result<()>;

    async fn send_sms(&self, notification: &Notification) -> anyhow::Result<()>;

    async fn send_slack(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// The set of collaborators handed to the processors.
#[derive(Clone)]
pub struct Collaborators {
    pub domain: Arc<dyn DomainOperations>,
    pub directory: Arc<dyn DirectoryLookup>,
    pub notifier: Arc<dyn NotificationSender>,
}

impl Collaborators {
    pub fn new(
        domain: Arc<dyn DomainOperations>,
        directory: Arc<dyn DirectoryLookup>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            domain,
            directory,
            notifier,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
