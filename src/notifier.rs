use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("Request to messaging API failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Messaging API returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Outbound messaging channel. Callers treat every call as best-effort.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<u16, NotifierError>;

    async fn send_location(
        &self,
        chat_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<u16, NotifierError>;
}

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, bot_token: &str, timeout: Duration) -> Result<Self, NotifierError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NotifierError::Client)?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }

    /// Builds a notifier and the target chat from config, or `None` when either
    /// the token or the chat id is missing.
    pub fn from_config(config: &TelegramConfig) -> Result<Option<(Self, String)>, NotifierError> {
        match config.credentials() {
            Some((token, chat_id)) => {
                let notifier = Self::new(
                    &config.api_base,
                    token,
                    Duration::from_secs(config.timeout_secs),
                )?;
                Ok(Some((notifier, chat_id.to_string())))
            }
            None => Ok(None),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn post_form(&self, method: &str, form: &[(&str, String)]) -> Result<u16, NotifierError> {
        let response = self
            .client
            .post(self.method_url(method))
            .form(form)
            .send()
            .await
            // Strip the URL so the bot token never reaches the logs.
            .map_err(|e| NotifierError::Request(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, chat_id: &str, text: &str) -> Result<u16, NotifierError> {
        self.post_form(
            "sendMessage",
            &[("chat_id", chat_id.to_string()), ("text", text.to_string())],
        )
        .await
    }

    async fn send_location(
        &self,
        chat_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<u16, NotifierError> {
        self.post_form(
            "sendLocation",
            &[
                ("chat_id", chat_id.to_string()),
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
            ],
        )
        .await
    }
}
