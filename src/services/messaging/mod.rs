pub mod twilio;

use async_trait::async_trait;

/// Sends text notifications (booking confirmations).
#[async_trait]
pub trait MessagingProvider: Send + Sync {
    /// `to` is a canonical phone number.
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()>;
}
