//! Configuration loading and persistence.
//!
//! Settings live in `config.json` inside the config directory and can be
//! overridden by `ROLLCALL_*` environment variables. The VAPID private key is
//! never written to `config.json`: it comes from the environment or from
//! `vapid.json` (written by `rollcall-push keys generate`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants;
use crate::notifications::dispatch::{DispatchSettings, Urgency};
use crate::notifications::vapid::VapidKeys;

const CONFIG_FILE: &str = "config.json";
const VAPID_FILE: &str = "vapid.json";
const STORE_FILE: &str = "subscriptions.json";

/// Configuration for the push service.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP surface binds to.
    pub listen_addr: String,
    /// Contact URI for the VAPID `sub` claim (`mailto:` or `https:`).
    pub vapid_subject: String,
    /// Subscriptions file. Defaults to `subscriptions.json` in the config dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// `TTL` header in seconds.
    pub push_ttl: u32,
    /// Per-request relay timeout in seconds.
    pub request_timeout: u64,
    /// Maximum concurrent relay requests per invocation.
    pub max_concurrency: usize,
    /// Optional `Urgency` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    /// VAPID public key - NOT serialized (env only).
    #[serde(skip)]
    pub vapid_public_key: Option<String>,
    /// VAPID private key - NOT serialized (env only).
    #[serde(skip)]
    pub vapid_private_key: Option<String>,
    /// Directory this config was loaded from.
    #[serde(skip)]
    dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: constants::DEFAULT_LISTEN_ADDR.to_string(),
            vapid_subject: constants::DEFAULT_VAPID_SUBJECT.to_string(),
            store_path: None,
            push_ttl: constants::DEFAULT_TTL_SECS,
            request_timeout: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            max_concurrency: constants::DEFAULT_MAX_CONCURRENCY,
            urgency: None,
            vapid_public_key: None,
            vapid_private_key: None,
            dir: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `ROLLCALL_CONFIG_DIR` wins; otherwise the platform config dir
    /// (Linux: `~/.config/rollcall-push`).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("ROLLCALL_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("rollcall-push")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_dir(&Self::config_dir()?);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Reads `config.json` from `dir`, falling back to defaults.
    pub fn load_from_dir(dir: &Path) -> Self {
        let mut config = match Self::load_from_file(&dir.join(CONFIG_FILE)) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                log::warn!("[Config] Ignoring unreadable config file: {e:#}");
                Self::default()
            }
        };
        config.dir = Some(dir.to_path_buf());
        config
    }

    fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(config))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `ROLLCALL_*` overrides from `lookup`.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("ROLLCALL_VAPID_PUBLIC_KEY") {
            self.vapid_public_key = Some(key);
        }
        if let Some(key) = lookup("ROLLCALL_VAPID_PRIVATE_KEY") {
            self.vapid_private_key = Some(key);
        }
        if let Some(subject) = lookup("ROLLCALL_VAPID_SUBJECT") {
            self.vapid_subject = subject;
        }
        if let Some(addr) = lookup("ROLLCALL_LISTEN_ADDR") {
            self.listen_addr = addr;
        }
        if let Some(path) = lookup("ROLLCALL_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }

        if let Some(ttl) = lookup("ROLLCALL_PUSH_TTL") {
            match ttl.trim().parse::<u32>() {
                Ok(ttl) => self.push_ttl = ttl,
                Err(_) => log::warn!("[Config] Ignoring invalid ROLLCALL_PUSH_TTL: {ttl}"),
            }
        }

        if let Some(timeout) = lookup("ROLLCALL_REQUEST_TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout = secs,
                _ => log::warn!("[Config] Ignoring invalid ROLLCALL_REQUEST_TIMEOUT: {timeout}"),
            }
        }

        if let Some(max) = lookup("ROLLCALL_MAX_CONCURRENCY") {
            match max.trim().parse::<usize>() {
                Ok(max) if max > 0 => self.max_concurrency = max,
                _ => log::warn!("[Config] Ignoring invalid ROLLCALL_MAX_CONCURRENCY: {max}"),
            }
        }

        if let Some(urgency) = lookup("ROLLCALL_URGENCY") {
            match urgency.parse::<Urgency>() {
                Ok(urgency) => self.urgency = Some(urgency),
                Err(e) => log::warn!("[Config] Ignoring ROLLCALL_URGENCY: {e}"),
            }
        }
    }

    fn dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::config_dir(),
        }
    }

    /// Persists the current configuration to disk.
    /// Note: VAPID keys are NOT saved here (see [`VapidKeys::save`]).
    pub fn save(&self) -> Result<()> {
        let config_path = self.dir()?.join(CONFIG_FILE);
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        // Set restrictive permissions (owner read/write only)
        #[cfg(unix)]
        fs::set_permissions(&config_path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Where `keys generate` writes and the server reads the VAPID keypair.
    pub fn vapid_keys_path(&self) -> Result<PathBuf> {
        Ok(self.dir()?.join(VAPID_FILE))
    }

    /// Subscriptions file location.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.dir()?.join(STORE_FILE)),
        }
    }

    /// Resolve the VAPID keypair: environment first, then `vapid.json`.
    ///
    /// A configured public key must match the private key.
    pub fn vapid_keys(&self) -> Result<VapidKeys> {
        match (&self.vapid_public_key, &self.vapid_private_key) {
            (Some(public), Some(private)) => VapidKeys::from_base64url(public, private)
                .context("Invalid VAPID keys in ROLLCALL_VAPID_*"),
            (None, Some(private)) => VapidKeys::from_private_key(private)
                .context("Invalid ROLLCALL_VAPID_PRIVATE_KEY"),
            (Some(_), None) => anyhow::bail!(
                "ROLLCALL_VAPID_PUBLIC_KEY is set without ROLLCALL_VAPID_PRIVATE_KEY"
            ),
            (None, None) => {
                let path = self.vapid_keys_path()?;
                anyhow::ensure!(
                    path.exists(),
                    "No VAPID keys configured: set ROLLCALL_VAPID_PRIVATE_KEY or run `rollcall-push keys generate`"
                );
                VapidKeys::load(&path)
            }
        }
    }

    /// Delivery settings for the dispatcher.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            subject: self.vapid_subject.clone(),
            ttl: self.push_ttl,
            urgency: self.urgency,
            max_concurrency: self.max_concurrency.max(1),
            request_timeout: Duration::from_secs(self.request_timeout.max(1)),
        }
    }
}
