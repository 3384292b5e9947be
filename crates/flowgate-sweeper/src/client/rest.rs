//! REST client for the collaborator service.
//!
//! Routes:
//! - `POST /requests/{id}/approve|reject|fulfill|reserve-stock|status`
//! - `POST /requests/{id}/purchase-requisitions`
//! - `GET /directory/roles/{role}?siteId=`, `GET /directory/users/{id}`
//! - `POST /notifications/{channel}`

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use flowgate_engine::collaborators::{
    ActionContext, DirectoryLookup, DomainOperations, Notification, NotificationSender, UserContact,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleAssignee {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PurchaseRequisition {
    id: String,
}

/// HTTP client implementing every collaborator interface.
#[derive(Debug, Clone)]
pub struct RestCollaborators {
    client: reqwest::Client,
    base_url: Url,
}

impl RestCollaborators {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build collaborator HTTP client")?;
        let base_url = Url::parse(base_url).with_context(|| format!("invalid collaborator URL '{}'", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("collaborator URL '{}' cannot be a base", base_url);
        }

        Ok(Self { client, base_url })
    }

    /// Base URL plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("collaborator URL cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, url: Url, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("POST {} returned {}: {}", url, status, text);
        }
        Ok(response)
    }

    async fn request_op(&self, ctx: &ActionContext, op: &str, extra: Value) -> Result<reqwest::Response> {
        let request_id = request_id(ctx)?;
        let mut body = json!({
            "executionId": ctx.execution_id,
            "nodeId": ctx.node_id,
        });
        if let (Value::Object(body), Value::Object(extra)) = (&mut body, extra) {
            body.extend(extra);
        }
        self.post(self.url(&["requests", request_id, op])?, &body).await
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<Option<T>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => {
                let text = response.text().await.unwrap_or_default();
                anyhow::bail!("GET {} returned {}: {}", url, status, text)
            }
        }
    }

    async fn notify(&self, channel: &str, notification: &Notification) -> Result<()> {
        let body = serde_json::to_value(notification)?;
        self.post(self.url(&["notifications", channel])?, &body).await?;
        Ok(())
    }
}

fn request_id(ctx: &ActionContext) -> Result<&str> {
    ctx.request_id
        .as_deref()
        .ok_or_else(|| anyhow!("execution {} has no requestData.id", ctx.execution_id))
}

#[async_trait]
impl DomainOperations for RestCollaborators {
    async fn approve_request(&self, ctx: &ActionContext) -> Result<()> {
        self.request_op(ctx, "approve", json!({})).await?;
        Ok(())
    }

    async fn reject_request(&self, ctx: &ActionContext, reason: Option<&str>) -> Result<()> {
        self.request_op(ctx, "reject", json!({ "reason": reason })).await?;
        Ok(())
    }

    async fn fulfill_request(&self, ctx: &ActionContext) -> Result<()> {
        self.request_op(ctx, "fulfill", json!({})).await?;
        Ok(())
    }

    async fn create_purchase_requisition(&self, ctx: &ActionContext, vendor_id: &str) -> Result<String> {
        let response = self
            .request_op(ctx, "purchase-requisitions", json!({ "vendorId": vendor_id }))
            .await?;
        let created: PurchaseRequisition = response
            .json()
            .await
            .context("purchase requisition response")?;
        Ok(created.id)
    }

    async fn reserve_stock(&self, ctx: &ActionContext) -> Result<()> {
        self.request_op(ctx, "reserve-stock", json!({})).await?;
        Ok(())
    }

    async fn update_request_status(&self, ctx: &ActionContext, status: &str) -> Result<()> {
        self.request_op(ctx, "status", json!({ "status": status })).await?;
        Ok(())
    }
}

#[async_trait]
impl DirectoryLookup for RestCollaborators {
    async fn resolve_role_assignee(&self, role: &str, site_id: Option<&str>) -> Result<Option<String>> {
        let mut url = self.url(&["directory", "roles", role])?;
        if let Some(site_id) = site_id {
            url.query_pairs_mut().append_pair("siteId", site_id);
        }
        Ok(self
            .get_optional::<RoleAssignee>(url)
            .await?
            .and_then(|r| r.user_id))
    }

    async fn resolve_user(&self, user_id: &str) -> Result<Option<UserContact>> {
        self.get_optional(self.url(&["directory", "users", user_id])?).await
    }
}

#[async_trait]
impl NotificationSender for RestCollaborators {
    async fn send_email(&self, notification: &Notification) -> Result<()> {
        self.notify("email", notification).await
    }

    async fn send_in_app(&self, notification: &Notification) -> Result<()> {
        self.notify("in_app", notification).await
    }

    async fn send_sms(&self, notification: &Notification) -> Result<()> {
        self.notify("sms", notification).await
    }

    async fn send_slack(&self, notification: &Notification) -> Result<()> {
        self.notify("slack", notification).await
    }
}
