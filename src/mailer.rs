//! Outgoing email.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

pub const SENDER: &str = "admin@shop.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<()>;
}

/// Writes every email to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, email: Email) -> Result<()> {
        info!(
            from = SENDER,
            to = %email.to,
            subject = %email.subject,
            "{}",
            email.body
        );
        Ok(())
    }
}
