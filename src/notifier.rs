use crate::config::TelegramConfig;
use crate::error::NotifyError;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use tracing::debug;

/// Delivers an alert: caption plus a PNG chart.
pub trait Notifier {
    fn send_photo(
        &self,
        caption: &str,
        png: Vec<u8>,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Posts alerts to a Telegram channel through the Bot API `sendPhoto` method.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: String,
    channel_id: String,
}

impl TelegramNotifier {
    pub fn new(http: Client, config: &TelegramConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            channel_id: config.channel_id.clone(),
        }
    }
}

impl Notifier for TelegramNotifier {
    async fn send_photo(&self, caption: &str, png: Vec<u8>) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendPhoto", self.base_url, self.bot_token);
        let photo = Part::bytes(png)
            .file_name("chart.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .text("chat_id", self.channel_id.clone())
            .text("caption", caption.to_string())
            .part("photo", photo);

        let response = self.http.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(channel = %self.channel_id, "alert delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notifier(base_url: &str) -> TelegramNotifier {
        TelegramNotifier::new(
            Client::new(),
            &TelegramConfig {
                base_url: base_url.to_string(),
                bot_token: "123:abc".to_string(),
                channel_id: "@alerts".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn posts_multipart_photo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bot123:abc/sendPhoto"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        notifier(&server.uri())
            .send_photo("Pinbar detected", vec![0x89, b'P', b'N', b'G'])
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("name=\"chat_id\""));
        assert!(body.contains("@alerts"));
        assert!(body.contains("name=\"caption\""));
        assert!(body.contains("Pinbar detected"));
        assert!(body.contains("filename=\"chart.png\""));
    }

    #[tokio::test]
    async fn rejected_request_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("chat not found"))
            .mount(&server)
            .await;

        let err = notifier(&server.uri())
            .send_photo("caption", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 400, ref body } if body == "chat not found"));
    }
}
