//! # Notification Module
//!
//! Human-readable status and error text for operators. Delivery happens on a
//! dedicated task fed by a bounded channel, so nothing on the forwarding path
//! ever waits on a webhook.
//!
//! ## Contained Modules:
//!
//! - **`webhook`**: `WebhookNotifier` (Mattermost/Slack style incoming
//!   webhook), the `NotifierHandle` used by the rest of the system and
//!   `spawn_notifier`, which owns the delivery task.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Webhook notifier and its delivery task.
pub mod webhook;

pub use webhook::{spawn_notifier, Notifier, NotifierHandle, WebhookNotifier};
