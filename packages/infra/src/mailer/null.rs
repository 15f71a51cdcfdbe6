//! Null 送信実装
//!
//! メールを実際に送信せず、ログ出力のみ行う。
//! `MAILER_DSN=null://null` で選択される。

use async_trait::async_trait;

use super::{EmailMessage, MailTransport};
use crate::error::InfraError;

/// Null トランスポート（ログ出力のみ）
#[derive(Debug, Clone)]
pub struct NullTransport;

#[async_trait]
impl MailTransport for NullTransport {
    async fn send(&self, email: &EmailMessage) -> Result<(), InfraError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "Null: メール送信をスキップ"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
