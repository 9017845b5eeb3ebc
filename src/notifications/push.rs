//! Push subscription records and the stores that hold them.
//!
//! The attendance application keeps subscriptions in its own database; the
//! dispatcher only sees the [`SubscriberStore`] trait. Two implementations
//! ship here: [`MemoryStore`] and [`JsonFileStore`], which persists the same
//! data to a JSON file for standalone deployments.

// Rust guideline compliant 2026-02

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::agreement::SubscriberKeys;

/// A browser's push subscription.
///
/// Contains everything needed to deliver a web push message to one device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Browser's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Shared auth secret (base64url).
    pub auth: String,
    /// Account this device belongs to.
    pub user_id: String,
    /// When the browser registered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PushSubscription {
    /// Decode and validate the stored key material.
    pub fn keys(&self) -> Result<SubscriberKeys> {
        SubscriberKeys::from_base64url(&self.p256dh, &self.auth)
    }
}

/// Which subscriptions an invocation targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubscriberFilter {
    /// Every stored subscription.
    #[default]
    All,
    /// Subscriptions owned by any of these users.
    Users(Vec<String>),
}

impl SubscriberFilter {
    /// `None` or an empty list targets everyone.
    pub fn from_user_ids(user_ids: Option<Vec<String>>) -> Self {
        match user_ids {
            Some(ids) if !ids.is_empty() => Self::Users(ids),
            _ => Self::All,
        }
    }

    /// Whether `subscription` is targeted.
    pub fn matches(&self, subscription: &PushSubscription) -> bool {
        match self {
            Self::All => true,
            Self::Users(ids) => ids.iter().any(|id| *id == subscription.user_id),
        }
    }
}

/// Storage backend for push subscriptions.
///
/// Endpoints are unique: upserting an existing endpoint replaces it.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Subscriptions matching `filter`, in registration order.
    async fn list(&self, filter: &SubscriberFilter) -> Result<Vec<PushSubscription>>;

    /// Add a subscription or replace the one with the same endpoint.
    async fn upsert(&self, subscription: PushSubscription) -> Result<()>;

    /// Delete by endpoint. Returns whether anything was removed.
    async fn remove_endpoint(&self, endpoint: &str) -> Result<bool>;
}

/// Ordered, endpoint-unique set of subscriptions.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PushSubscriptionStore {
    subscriptions: Vec<PushSubscription>,
}

impl PushSubscriptionStore {
    /// Add or replace by endpoint.
    ///
    /// A replaced entry keeps its position. If the endpoint moved to another
    /// account (shared computer, different student logged in), the new owner wins.
    pub fn upsert(&mut self, subscription: PushSubscription) {
        if let Some(existing) = self
            .subscriptions
            .iter_mut()
            .find(|s| s.endpoint == subscription.endpoint)
        {
            if existing.user_id != subscription.user_id {
                log::info!(
                    "[WebPush] Endpoint re-registered by user {} (was {})",
                    subscription.user_id,
                    existing.user_id
                );
            }
            *existing = subscription;
        } else {
            self.subscriptions.push(subscription);
        }
    }

    /// Remove by endpoint.
    pub fn remove(&mut self, endpoint: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.endpoint != endpoint);
        self.subscriptions.len() != before
    }

    /// Subscriptions matching `filter`.
    pub fn matching<'a>(
        &'a self,
        filter: &'a SubscriberFilter,
    ) -> impl Iterator<Item = &'a PushSubscription> + 'a {
        self.subscriptions.iter().filter(move |s| filter.matches(s))
    }

    /// Number of stored subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Whether a subscription with this endpoint exists.
    pub fn contains(&self, endpoint: &str) -> bool {
        self.subscriptions.iter().any(|s| s.endpoint == endpoint)
    }
}

/// In-process store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<PushSubscriptionStore>,
}

impl MemoryStore {
    /// Store pre-populated with `subscriptions`.
    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = PushSubscription>) -> Self {
        let mut store = PushSubscriptionStore::default();
        for subscription in subscriptions {
            store.upsert(subscription);
        }
        Self {
            inner: RwLock::new(store),
        }
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> PushSubscriptionStore {
        self.inner.read().await.clone()
    }
}

#[async_trait]
impl SubscriberStore for MemoryStore {
    async fn list(&self, filter: &SubscriberFilter) -> Result<Vec<PushSubscription>> {
        Ok(self.inner.read().await.matching(filter).cloned().collect())
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<()> {
        self.inner.write().await.upsert(subscription);
        Ok(())
    }

    async fn remove_endpoint(&self, endpoint: &str) -> Result<bool> {
        Ok(self.inner.write().await.remove(endpoint))
    }
}

/// Store persisted as a JSON file, rewritten after every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: RwLock<PushSubscriptionStore>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty if the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let store = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse subscriptions file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PushSubscriptionStore::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read subscriptions file {}", path.display()))
            }
        };

        log::info!(
            "[WebPush] Loaded {} push subscription(s) from {}",
            store.len(),
            path.display()
        );
        Ok(Self {
            path,
            inner: RwLock::new(store),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, store: &PushSubscriptionStore) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content =
            serde_json::to_string_pretty(store).context("Failed to serialize subscriptions")?;

        // Write-then-rename so a crash never leaves a truncated file behind.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .context("Failed to write subscriptions file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .context("Failed to set subscriptions file permissions")?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .context("Failed to replace subscriptions file")?;
        log::debug!("[WebPush] Saved push subscriptions to {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl SubscriberStore for JsonFileStore {
    async fn list(&self, filter: &SubscriberFilter) -> Result<Vec<PushSubscription>> {
        Ok(self.inner.read().await.matching(filter).cloned().collect())
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<()> {
        let mut store = self.inner.write().await;
        store.upsert(subscription);
        self.persist(&store).await
    }

    async fn remove_endpoint(&self, endpoint: &str) -> Result<bool> {
        let mut store = self.inner.write().await;
        if !store.remove(endpoint) {
            return Ok(false);
        }
        self.persist(&store).await?;
        Ok(true)
    }
}
