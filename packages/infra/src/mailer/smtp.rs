//! SMTP 送信実装
//!
//! lettre の `AsyncSmtpTransport` を使用してメールを送信する。
//! 開発環境では Mailpit（ローカル SMTP サーバー）に接続する。

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport,
    AsyncTransport,
    Tokio1Executor,
    message::{Message, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};

use super::{EmailMessage, MailTransport};
use crate::error::InfraError;

/// SMTP 送信
///
/// `lettre::AsyncSmtpTransport<Tokio1Executor>` をラップする。
pub struct SmtpTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    /// 新しい SMTP トランスポートを作成
    ///
    /// - `credentials`: `(ユーザー名, パスワード)`。`None` なら認証しない
    pub fn new(host: &str, port: u16, credentials: Option<(String, String)>) -> Self {
        // builder_dangerous: TLS なしで接続（Mailpit 等のローカル SMTP 向け）
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
        if let Some((user, password)) = credentials {
            builder = builder.credentials(Credentials::new(user, password));
        }

        Self {
            transport: builder.build(),
        }
    }
}

/// 送信用の multipart（text + html）メッセージを組み立てる
pub(super) fn build_message(email: &EmailMessage) -> Result<Message, InfraError> {
    Message::builder()
        .from(
            email
                .from
                .parse()
                .map_err(|e| InfraError::mail(format!("送信元アドレス不正: {e}")))?,
        )
        .to(email
            .to
            .parse()
            .map_err(|e| InfraError::mail(format!("宛先アドレス不正: {e}")))?)
        .subject(&email.subject)
        .multipart(
            MultiPart::alternative()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(email.text_body.clone()),
                )
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(email.html_body.clone()),
                ),
        )
        .map_err(|e| InfraError::mail(format!("メッセージ構築失敗: {e}")))
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, email: &EmailMessage) -> Result<(), InfraError> {
        let message = build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| InfraError::mail(format!("SMTP 送信失敗: {e}")))?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InfraErrorKind;

    fn email(to: &str) -> EmailMessage {
        EmailMessage {
            from:      "noreply@pixiekat.test".to_string(),
            to:        to.to_string(),
            subject:   "件名".to_string(),
            html_body: "<p>本文</p>".to_string(),
            text_body: "本文".to_string(),
        }
    }

    #[test]
    fn トランスポートはsendとsyncを実装している() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SmtpTransport>();
    }

    #[test]
    fn multipartメッセージにtextとhtmlが含まれる() {
        let message = build_message(&email("kat@example.com")).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();

        assert!(raw.contains("multipart/alternative"), "{raw}");
        assert!(raw.contains("text/plain"), "{raw}");
        assert!(raw.contains("text/html"), "{raw}");
    }

    #[test]
    fn 宛先アドレスが不正ならエラーになる() {
        let err = build_message(&email("not-an-address")).unwrap_err();
        assert!(matches!(err.kind(), InfraErrorKind::Mail(msg) if msg.contains("宛先")));
    }
}
