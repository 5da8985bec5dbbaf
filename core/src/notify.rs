use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A push message for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Deep link the client opens when the notification is tapped.
    pub url: String,
}

/// Delivery channel for prompt notifications.
///
/// Implementations report transport failures as [`crate::Error::External`];
/// the caller leaves the prompt untouched and retries on the next run.
pub trait PushNotifier: Send + Sync {
    fn send(&self, user_id: i64, notification: &Notification) -> Result<()>;
}
