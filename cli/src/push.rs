use anyhow::{Context, Result};
use serde::Serialize;

use larder_core::notify::{Notification, PushNotifier};

/// Delivers prompt notifications as a JSON POST to a webhook.
///
/// The core calls notifiers synchronously, so `send` blocks the calling
/// thread on the runtime handle captured at construction. The server runs
/// the job tick on the blocking pool for that reason.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    rt: tokio::runtime::Handle,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    user_id: i64,
    title: &'a str,
    body: &'a str,
    url: &'a str,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("larder/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            rt: tokio::runtime::Handle::try_current()
                .context("Webhook notifier needs a running Tokio runtime")?,
        })
    }

    async fn send_async(&self, user_id: i64, notification: &Notification) -> reqwest::Result<()> {
        let payload = WebhookPayload {
            user_id,
            title: &notification.title,
            body: &notification.body,
            url: &notification.url,
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl PushNotifier for WebhookNotifier {
    fn send(&self, user_id: i64, notification: &Notification) -> larder_core::Result<()> {
        tokio::task::block_in_place(|| self.rt.block_on(self.send_async(user_id, notification)))
            .map_err(|e| larder_core::Error::External(format!("push webhook: {e}")))?;
        tracing::debug!(user_id, url = %notification.url, "push delivered");
        Ok(())
    }
}

/// Fallback when no webhook is configured: notifications go to the log.
pub struct LogNotifier;

impl PushNotifier for LogNotifier {
    fn send(&self, user_id: i64, notification: &Notification) -> larder_core::Result<()> {
        tracing::info!(
            user_id,
            title = %notification.title,
            body = %notification.body,
            url = %notification.url,
            "notification (no push URL configured)"
        );
        Ok(())
    }
}
