//! The write path: admission gate first, then validation, then the store.
//!
//! Reads go straight to [`Store`] and never touch the admission controller.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::info;

use crate::admission::{AdmissionController, Decision, DenyReason, Quota};
use crate::logutil::escape_log;
use crate::storage::{Addressee, Message, Store, StoreError};
use crate::validation::{validate_content, ValidationError};

/// Result of a post attempt that did not hit a storage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostOutcome {
    Accepted { message: Message, quota: Quota },
    Throttled {
        reason: DenyReason,
        retry_after: Option<u64>,
    },
    Invalid(ValidationError),
    RecipientNotFound,
}

impl PostOutcome {
    /// HTTP-style status code for this outcome.
    pub fn status(&self) -> u16 {
        match self {
            PostOutcome::Accepted { .. } => 201,
            PostOutcome::Throttled { .. } => 429,
            PostOutcome::Invalid(_) => 400,
            PostOutcome::RecipientNotFound => 404,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let status = self.status();
        match self {
            PostOutcome::Accepted { message, quota } => serde_json::json!({
                "status": status,
                "message": message,
                "limit": quota.limit,
                "remaining": quota.remaining,
                "reset": quota.reset,
            }),
            PostOutcome::Throttled {
                reason,
                retry_after,
            } => serde_json::json!({
                "status": status,
                "error": reason.as_str(),
                "retryAfter": retry_after,
            }),
            PostOutcome::Invalid(e) => serde_json::json!({ "status": status, "error": e.to_string() }),
            PostOutcome::RecipientNotFound => {
                serde_json::json!({ "status": status, "error": "recipient not found" })
            }
        }
    }
}

#[derive(Clone)]
pub struct MessageService {
    admission: Arc<AdmissionController>,
    store: Arc<Store>,
}

impl MessageService {
    pub fn new(admission: Arc<AdmissionController>, store: Arc<Store>) -> Self {
        Self { admission, store }
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Post to the public feed on behalf of `client_id`.
    pub async fn post_public(&self, client_id: &str, content: &str, now: DateTime<Utc>) -> Result<PostOutcome> {
        self.post(client_id, None, content, now).await
    }

    /// Post a direct message to the user behind `recipient_id`.
    pub async fn post_to_recipient(
        &self,
        client_id: &str,
        recipient_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<PostOutcome> {
        self.post(client_id, Some(recipient_id), content, now).await
    }

    async fn post(
        &self,
        client_id: &str,
        recipient_id: Option<&str>,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<PostOutcome> {
        let quota = match self.admission.check_and_record(client_id, now) {
            Decision::Allow(quota) => quota,
            Decision::Deny {
                reason,
                retry_after,
            } => return Ok(PostOutcome::Throttled { reason, retry_after }),
        };

        let content = match validate_content(content) {
            Ok(c) => c,
            Err(e) => return Ok(PostOutcome::Invalid(e)),
        };

        let to = recipient_id.map_or(Addressee::Feed, Addressee::Recipient);
        let message = match self.store.insert_message(&content, to).await {
            Ok(message) => message,
            Err(StoreError::RecipientNotFound(_)) => return Ok(PostOutcome::RecipientNotFound),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Accepted message id={} from client={} \"{}\"",
            message.id,
            client_id,
            escape_log(&message.content)
        );
        Ok(PostOutcome::Accepted { message, quota })
    }
}
