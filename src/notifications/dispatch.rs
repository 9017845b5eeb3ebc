//! Delivery of one notification to every matching subscription.
//!
//! Each record goes through its own sign → derive → encrypt → frame → POST
//! pipeline. Records share nothing mutable, so they run concurrently up to
//! [`DispatchSettings::max_concurrency`]; results come back in store order.
//! One record failing (bad keys, network error, relay rejection) never
//! affects the others.
//!
//! # Relay responses
//!
//! | Status      | Outcome                                          |
//! |-------------|--------------------------------------------------|
//! | 2xx         | sent                                             |
//! | 404, 410    | failed; subscription deleted from the store      |
//! | anything else | failed; kept, not retried within this call     |

// Rust guideline compliant 2026-02

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{self, StreamExt};
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};

use super::payload::NotificationPayload;
use super::push::{PushSubscription, SubscriberFilter, SubscriberStore};
use super::vapid::{self, VapidKeys};
use super::{cipher, envelope};
use crate::constants;

/// RFC 8030 §5.3 `Urgency` header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    /// Deliver when the device is on power and wifi.
    VeryLow,
    /// Deliver on power or wifi.
    Low,
    /// Deliver unless the device is in low-battery mode.
    Normal,
    /// Deliver immediately.
    High,
}

impl Urgency {
    /// Header value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "very-low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => anyhow::bail!(
                "Unknown urgency '{other}' (expected very-low, low, normal or high)"
            ),
        }
    }
}

/// Knobs for one [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// `sub` claim of every VAPID token.
    pub subject: String,
    /// `TTL` header, seconds.
    pub ttl: u32,
    /// Optional `Urgency` header.
    pub urgency: Option<Urgency>,
    /// Maximum relay requests in flight.
    pub max_concurrency: usize,
    /// Timeout for each relay request.
    pub request_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            subject: constants::DEFAULT_VAPID_SUBJECT.to_string(),
            ttl: constants::DEFAULT_TTL_SECS,
            urgency: None,
            max_concurrency: constants::DEFAULT_MAX_CONCURRENCY,
            request_timeout: constants::HTTP_REQUEST_TIMEOUT,
        }
    }
}

/// Outcome for one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordResult {
    /// Owner of the subscription.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Whether the relay accepted the message.
    pub success: bool,
    /// Why it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Subscription endpoint. Not part of the API response.
    #[serde(skip)]
    pub endpoint: String,
    /// Relay HTTP status, if a response arrived.
    #[serde(skip)]
    pub status: Option<u16>,
    /// Whether the subscription was deleted as expired.
    #[serde(skip)]
    pub removed: bool,
}

impl RecordResult {
    fn pending(record: &PushSubscription) -> Self {
        Self {
            user_id: record.user_id.clone(),
            success: false,
            error: None,
            endpoint: record.endpoint.clone(),
            status: None,
            removed: false,
        }
    }
}

/// Aggregated outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Records the relay accepted.
    pub sent: usize,
    /// Records that failed.
    pub failed: usize,
    /// Per-record outcomes, in store order.
    pub results: Vec<RecordResult>,
    /// Set when nothing was attempted.
    pub message: Option<String>,
}

impl DispatchReport {
    fn nothing_to_send(filter: &SubscriberFilter) -> Self {
        let message = match filter {
            SubscriberFilter::All => "No push subscriptions registered".to_string(),
            SubscriberFilter::Users(ids) => {
                format!("No push subscriptions registered for {} user(s)", ids.len())
            }
        };
        Self {
            message: Some(message),
            ..Self::default()
        }
    }

    fn from_results(results: Vec<RecordResult>) -> Self {
        let sent = results.iter().filter(|r| r.success).count();
        Self {
            sent,
            failed: results.len() - sent,
            results,
            message: None,
        }
    }

    /// Number of subscriptions deleted as expired.
    pub fn removed(&self) -> usize {
        self.results.iter().filter(|r| r.removed).count()
    }
}

#[derive(Debug, thiserror::Error)]
enum DeliveryError {
    #[error("Subscription expired (HTTP {0})")]
    Gone(u16),
    #[error("Push service rejected message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

/// Signed token per relay origin, or the signing error.
type TokenMap = HashMap<String, Result<String, String>>;

/// Sends notifications to stored subscriptions.
pub struct Dispatcher {
    store: Arc<dyn SubscriberStore>,
    keys: VapidKeys,
    client: reqwest::Client,
    settings: DispatchSettings,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("keys", &self.keys)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher with its own HTTP client.
    ///
    /// Redirects are not followed: a 3xx from a relay is a failed delivery.
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        keys: VapidKeys,
        settings: DispatchSettings,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(constants::user_agent())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, store, keys, settings))
    }

    /// Create a dispatcher with a pre-configured HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        store: Arc<dyn SubscriberStore>,
        keys: VapidKeys,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            keys,
            client,
            settings,
        }
    }

    /// Server identity used for signing.
    pub fn vapid_keys(&self) -> &VapidKeys {
        &self.keys
    }

    /// Active settings.
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Deliver `payload` to every subscription matching `filter`.
    ///
    /// Only failures that prevent any attempt (payload cannot be encoded,
    /// store cannot be read) are returned as `Err`; everything per record
    /// ends up in the report.
    pub async fn send(
        &self,
        filter: &SubscriberFilter,
        payload: &NotificationPayload,
    ) -> Result<DispatchReport> {
        let plaintext = payload.to_bytes()?;
        cipher::ensure_fits(plaintext.len())?;

        let records = self
            .store
            .list(filter)
            .await
            .context("Failed to load push subscriptions")?;
        if records.is_empty() {
            log::info!("[Dispatch] No push subscriptions match {:?}", filter);
            return Ok(DispatchReport::nothing_to_send(filter));
        }

        log::info!(
            "[Dispatch] Sending '{}' to {} subscription(s)",
            payload.title,
            records.len()
        );

        let tokens = self.sign_per_audience(&records);
        let plaintext = plaintext.as_slice();
        let tokens = &tokens;
        let deliveries = records.into_iter().map(|record| async move {
            self.deliver(&record, plaintext, tokens).await
        });
        let results: Vec<RecordResult> = stream::iter(deliveries)
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let report = DispatchReport::from_results(results);
        log::info!(
            "[Dispatch] Done: {} sent, {} failed, {} expired removed",
            report.sent,
            report.failed,
            report.removed()
        );
        Ok(report)
    }

    /// One token per relay origin; every record on that relay shares it.
    fn sign_per_audience(&self, records: &[PushSubscription]) -> TokenMap {
        let mut tokens = TokenMap::new();
        for record in records {
            // Unparseable endpoints fail later, per record.
            let Ok(audience) = vapid::audience_for_endpoint(&record.endpoint) else {
                continue;
            };
            tokens.entry(audience).or_insert_with_key(|audience| {
                vapid::sign(audience, &self.settings.subject, &self.keys)
                    .map_err(|e| format!("{e:#}"))
            });
        }
        tokens
    }

    async fn deliver(
        &self,
        record: &PushSubscription,
        plaintext: &[u8],
        tokens: &TokenMap,
    ) -> RecordResult {
        let mut result = RecordResult::pending(record);

        match self.try_deliver(record, plaintext, tokens).await {
            Ok(status) => {
                log::debug!(
                    "[Dispatch] Delivered to {} (HTTP {status})",
                    short_endpoint(&record.endpoint)
                );
                result.success = true;
                result.status = Some(status);
            }
            Err(err) => {
                log::warn!(
                    "[Dispatch] Delivery to {} for user {} failed: {err}",
                    short_endpoint(&record.endpoint),
                    record.user_id
                );
                result.error = Some(err.to_string());
                match err {
                    DeliveryError::Gone(status) => {
                        result.status = Some(status);
                        result.removed = self.remove_expired(record).await;
                    }
                    DeliveryError::Rejected { status, .. } => result.status = Some(status),
                    DeliveryError::Failed(_) => {}
                }
            }
        }

        result
    }

    async fn try_deliver(
        &self,
        record: &PushSubscription,
        plaintext: &[u8],
        tokens: &TokenMap,
    ) -> Result<u16, DeliveryError> {
        let audience = vapid::audience_for_endpoint(&record.endpoint)?;
        let token = match tokens.get(&audience) {
            Some(Ok(token)) => token,
            Some(Err(e)) => return Err(anyhow!("VAPID signing failed: {e}").into()),
            None => return Err(anyhow!("No VAPID token for {audience}").into()),
        };

        let keys = record.keys().context("Invalid subscription keys")?;
        let body = envelope::seal(&keys, plaintext, 0)?;

        let mut request = self
            .client
            .post(&record.endpoint)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_ENCODING, constants::CONTENT_ENCODING)
            .header("TTL", self.settings.ttl.to_string())
            .header(
                header::AUTHORIZATION,
                vapid::authorization_header(token, &self.keys),
            )
            .body(body);
        if let Some(urgency) = self.settings.urgency {
            request = request.header("Urgency", urgency.as_str());
        }

        let response = request.send().await.context("Push request failed")?;
        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(DeliveryError::Gone(status.as_u16()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            status: status.as_u16(),
            body: truncate(body.trim(), 200),
        })
    }

    /// Delete an expired subscription. Failure is logged, never escalated.
    async fn remove_expired(&self, record: &PushSubscription) -> bool {
        match self.store.remove_endpoint(&record.endpoint).await {
            Ok(removed) => {
                if removed {
                    log::info!(
                        "[Dispatch] Removed expired subscription {} for user {}",
                        short_endpoint(&record.endpoint),
                        record.user_id
                    );
                }
                removed
            }
            Err(e) => {
                log::warn!(
                    "[Dispatch] Failed to remove expired subscription {}: {e:#}",
                    short_endpoint(&record.endpoint)
                );
                false
            }
        }
    }
}

/// Relay origin plus the last few characters of the channel id.
///
/// Full endpoints are bearer capabilities; keep them out of logs.
fn short_endpoint(endpoint: &str) -> String {
    let tail: Vec<char> = endpoint.chars().rev().take(8).collect();
    let tail: String = tail.into_iter().rev().collect();
    match vapid::audience_for_endpoint(endpoint) {
        Ok(origin) => format!("{origin}/…{tail}"),
        Err(_) => format!("…{tail}"),
    }
}

fn truncate(input: &str, max_chars: usize) -> String {
    let mut chars = input.chars();
    let mut out: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
