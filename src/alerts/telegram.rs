//! Messaging channel adapters: Telegram bot API and a log-only fallback.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use super::dispatcher::{DispatchError, Media, MessagingChannel, Notification};
use crate::config::defaults::{SEND_TIMEOUT_SECS, VIDEO_UPLOAD_TIMEOUT_SECS};

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Telegram caps photo/video captions at 1024 characters.
const CAPTION_LIMIT: usize = 1024;

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

/// Sends notifications through a Telegram bot (HTML parse mode).
#[derive(Clone)]
pub struct TelegramChannel {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramChannel {
    pub fn new(token: &str) -> Result<Self, reqwest::Error> {
        Self::with_api_url(TELEGRAM_API, token)
    }

    pub fn with_api_url(api_url: &str, token: &str) -> Result<Self, reqwest::Error> {
        Self::with_timeout(api_url, token, Duration::from_secs(SEND_TIMEOUT_SECS))
    }

    fn with_timeout(api_url: &str, token: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    /// Caption text plus its parse mode. Over-long captions are sent as
    /// plain text, since cutting HTML can split a tag or an entity.
    fn caption(text: &str) -> (String, Option<&'static str>) {
        if text.chars().count() <= CAPTION_LIMIT {
            return (text.to_string(), Some("HTML"));
        }
        let plain: String = strip_html(text).chars().take(CAPTION_LIMIT).collect();
        (plain, None)
    }

    async fn send_text(&self, chat_id: &str, text: &str) -> Result<reqwest::Response, DispatchError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        Ok(self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await?)
    }

    async fn send_file(
        &self,
        method: &str,
        field: &str,
        chat_id: &str,
        caption: &str,
        part: Part,
    ) -> Result<reqwest::Response, DispatchError> {
        let (caption, parse_mode) = Self::caption(caption);
        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption);
        if let Some(mode) = parse_mode {
            form = form.text("parse_mode", mode);
        }
        let form = form.part(field.to_string(), part);

        let mut request = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .multipart(form);
        if method == "sendVideo" {
            request = request.timeout(Duration::from_secs(VIDEO_UPLOAD_TIMEOUT_SECS));
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl MessagingChannel for TelegramChannel {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<String, DispatchError> {
        let resp = match &notification.media {
            None => self.send_text(recipient, &notification.text).await?,
            Some(Media::Photo(jpeg)) => {
                let part = Part::bytes(jpeg.to_vec())
                    .file_name("alert.jpg")
                    .mime_str("image/jpeg")?;
                self.send_file("sendPhoto", "photo", recipient, &notification.text, part)
                    .await?
            }
            Some(Media::Video { path }) => {
                let bytes = tokio::fs::read(path).await?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "evidence.mjpeg".to_string());
                let part = Part::bytes(bytes)
                    .file_name(name)
                    .mime_str("video/x-motion-jpeg")?;
                self.send_file("sendVideo", "video", recipient, &notification.text, part)
                    .await?
            }
        };

        let status = resp.status();
        let body: TelegramResponse = resp.json().await?;
        if !body.ok {
            return Err(DispatchError::Rejected(
                body.description
                    .unwrap_or_else(|| format!("status {status}")),
            ));
        }
        Ok(match body.result {
            Some(msg) => format!("sent (message {})", msg.message_id),
            None => "sent".to_string(),
        })
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}

/// Channel used when no bot token is configured: logs and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl MessagingChannel for LogChannel {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<String, DispatchError> {
        let media = match &notification.media {
            None => "none",
            Some(Media::Photo(_)) => "photo",
            Some(Media::Video { .. }) => "video",
        };
        info!(recipient = %recipient, media, text = %notification.text, "Notification (log only)");
        Ok("logged only".to_string())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Drop tags and decode the entities [`escape_html`] produces.
fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("Tom & <Jerry>"), "Tom &amp; &lt;Jerry&gt;");
    }

    #[test]
    fn test_response_parsing() {
        let ok: TelegramResponse =
            serde_json::from_str(r#"{"ok":true,"result":{"message_id":42,"chat":{}}}"#).expect("parses");
        assert!(ok.ok);
        assert_eq!(ok.result.map(|m| m.message_id), Some(42));

        let err: TelegramResponse =
            serde_json::from_str(r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#)
                .expect("parses");
        assert!(!err.ok);
        assert_eq!(err.description.as_deref(), Some("Bad Request: chat not found"));
    }

    #[test]
    fn test_short_caption_keeps_html() {
        let (caption, mode) = TelegramChannel::caption("<b>Fall</b> in Tom &amp; Jerry's room");
        assert_eq!(caption, "<b>Fall</b> in Tom &amp; Jerry's room");
        assert_eq!(mode, Some("HTML"));
    }

    #[test]
    fn test_long_caption_falls_back_to_plain_text() {
        // Over the limit only because of markup: the plain text fits whole
        let text = format!("<b>Fall detected</b>\n{}&amp;<i>tail</i>", "x".repeat(1003));
        assert!(text.chars().count() > CAPTION_LIMIT);
        let (caption, mode) = TelegramChannel::caption(&text);
        assert_eq!(mode, None);
        assert!(caption.starts_with("Fall detected\n"));
        assert!(caption.ends_with("x&tail"));

        let (caption, mode) = TelegramChannel::caption(&format!("<b>A &amp; B</b> {}", "y".repeat(2000)));
        assert_eq!(mode, None);
        assert_eq!(caption.chars().count(), CAPTION_LIMIT);
        assert!(caption.starts_with("A & B y"));
    }

    #[test]
    fn test_strip_html_decodes_entities() {
        assert_eq!(strip_html("<b>A &lt;B&gt;</b> &amp; C"), "A <B> & C");
    }

    #[tokio::test]
    async fn test_unresponsive_api_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            // Accept and hold the connection without ever answering
            let (socket, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let channel = TelegramChannel::with_timeout(&format!("http://{addr}"), "token", Duration::from_millis(200))
            .expect("client");
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            channel.send("123", &Notification::text("hello")),
        )
        .await
        .expect("send gives up on its own");
        assert!(result.is_err());
        server.abort();
    }

    #[tokio::test]
    async fn test_log_channel_always_succeeds() {
        let outcome = LogChannel
            .send("123", &Notification::text("hello"))
            .await
            .expect("log channel never fails");
        assert_eq!(outcome, "logged only");
    }
}
