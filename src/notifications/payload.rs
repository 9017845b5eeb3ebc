//! Notification content and the JSON shapes of the invocation API.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::agreement::SubscriberKeys;
use super::dispatch::{DispatchReport, RecordResult};
use super::push::{PushSubscription, SubscriberFilter};
use super::vapid;
use crate::constants::MAX_PLAINTEXT_LEN;

/// What the service worker receives after decryption.
///
/// The crypto layer treats this as opaque JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification title.
    #[serde(default)]
    pub title: String,
    /// Notification body text.
    #[serde(default)]
    pub body: String,
    /// Replaces an earlier notification with the same tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Page opened when the notification is clicked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Icon URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationPayload {
    /// Payload with just a title and body.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    /// JSON bytes handed to the encryptor.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize notification payload")
    }
}

/// Rejected invocation or registration request.
///
/// Always the caller's fault; rendered as HTTP 400.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Body is not valid JSON for the expected shape.
    #[error("Invalid request body: {0}")]
    Malformed(#[from] serde_json::Error),
    /// `notification` object missing.
    #[error("notification is required")]
    MissingNotification,
    /// A required notification field is missing or blank.
    #[error("notification.{0} is required")]
    MissingField(&'static str),
    /// Encoded payload cannot fit in one push message.
    #[error("Notification is {size} bytes encoded; at most {limit} fit in one push message")]
    PayloadTooLarge {
        /// Encoded size.
        size: usize,
        /// Maximum plaintext size.
        limit: usize,
    },
    /// Subscription registration carried unusable data.
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),
}

/// Body of `POST /notify`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyRequest {
    /// Target accounts; omitted or empty means everyone.
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
    /// Content to deliver.
    #[serde(default)]
    pub notification: Option<NotificationPayload>,
}

impl NotifyRequest {
    /// Parse and validate a raw request body.
    pub fn parse(body: &[u8]) -> Result<(SubscriberFilter, NotificationPayload), RequestError> {
        let request: Self = serde_json::from_slice(body)?;
        request.validate()
    }

    /// Check required fields and size, splitting into filter and payload.
    pub fn validate(self) -> Result<(SubscriberFilter, NotificationPayload), RequestError> {
        let notification = self
            .notification
            .ok_or(RequestError::MissingNotification)?;
        if notification.title.trim().is_empty() {
            return Err(RequestError::MissingField("title"));
        }
        if notification.body.trim().is_empty() {
            return Err(RequestError::MissingField("body"));
        }

        let size = serde_json::to_vec(&notification)?.len();
        if size > MAX_PLAINTEXT_LEN {
            return Err(RequestError::PayloadTooLarge {
                size,
                limit: MAX_PLAINTEXT_LEN,
            });
        }

        Ok((SubscriberFilter::from_user_ids(self.user_ids), notification))
    }
}

/// Body of `POST /notify` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResponse {
    /// Whether the invocation ran to completion.
    pub success: bool,
    /// Records the relay accepted.
    pub sent: usize,
    /// Records that failed for any reason.
    pub failed: usize,
    /// Per-record outcomes, in store order.
    #[serde(default)]
    pub results: Vec<RecordResult>,
    /// Invocation-level error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Informational note, e.g. why nothing was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NotifyResponse {
    /// Invocation-level failure with no per-record results.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            sent: 0,
            failed: 0,
            results: Vec::new(),
            error: Some(error.into()),
            message: None,
        }
    }
}

impl From<DispatchReport> for NotifyResponse {
    fn from(report: DispatchReport) -> Self {
        Self {
            success: true,
            sent: report.sent,
            failed: report.failed,
            results: report.results,
            error: None,
            message: report.message,
        }
    }
}

/// Body of `POST /subscriptions`: the browser's `PushSubscription.toJSON()`
/// plus the owning account.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    /// Owning account.
    pub user_id: String,
    /// Browser subscription.
    pub subscription: BrowserSubscription,
}

/// `PushSubscription.toJSON()` as produced by browsers.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Encryption keys.
    pub keys: BrowserKeys,
}

/// The `keys` member of a browser subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserKeys {
    /// Subscriber public key (base64url).
    pub p256dh: String,
    /// Auth secret (base64url).
    pub auth: String,
}

impl RegisterRequest {
    /// Parse a raw body and validate it into a storable record.
    ///
    /// Keys and endpoint are checked now so a bad registration fails
    /// here instead of on every later send.
    pub fn parse(body: &[u8]) -> Result<PushSubscription, RequestError> {
        let request: Self = serde_json::from_slice(body)?;
        request.into_subscription()
    }

    /// Validate into a storable record.
    pub fn into_subscription(self) -> Result<PushSubscription, RequestError> {
        if self.user_id.trim().is_empty() {
            return Err(RequestError::InvalidSubscription(
                "user_id is required".to_string(),
            ));
        }
        vapid::audience_for_endpoint(&self.subscription.endpoint)
            .map_err(|e| RequestError::InvalidSubscription(format!("{e:#}")))?;
        SubscriberKeys::from_base64url(&self.subscription.keys.p256dh, &self.subscription.keys.auth)
            .map_err(|e| RequestError::InvalidSubscription(format!("{e:#}")))?;

        Ok(PushSubscription {
            endpoint: self.subscription.endpoint,
            p256dh: self.subscription.keys.p256dh,
            auth: self.subscription.keys.auth,
            user_id: self.user_id,
            created_at: Some(Utc::now()),
        })
    }
}
