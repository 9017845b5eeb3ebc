//! Rollcall Push - web push delivery for attendance alerts.
//!
//! Encrypts a notification separately for each browser subscribed by the
//! target accounts and hands it to that browser's push service, following
//! RFC 8291 (message encryption) and RFC 8292 (VAPID).
//!
//! # Modules
//!
//! - [`notifications`] - crypto pipeline, subscriber stores and the dispatcher
//! - [`server`] - HTTP invocation surface
//! - [`config`] - Configuration loading/saving
//! - [`constants`] - Protocol sizes and defaults

pub mod config;
pub mod constants;
pub mod notifications;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use notifications::dispatch::{DispatchReport, DispatchSettings, Dispatcher, Urgency};
pub use notifications::payload::{NotificationPayload, NotifyRequest, NotifyResponse};
pub use notifications::push::{
    JsonFileStore, MemoryStore, PushSubscription, SubscriberFilter, SubscriberStore,
};
pub use notifications::vapid::VapidKeys;
