//! Telegram notification sink
//!
//! Sends trade outcomes and task failures to a Telegram chat via the bot
//! HTTP API. Disabled when TELEGRAM_TOKEN / TELEGRAM_CHAT_ID are unset.
//! Delivery is best-effort: failures are logged and never propagate into
//! the trading path.

use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram notifier. Cheap to clone (shares the reqwest client pool).
#[derive(Clone)]
pub struct Notifier {
    token: Option<String>,
    chat_id: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        if token.is_some() && chat_id.is_some() {
            info!("Telegram notifications enabled");
        } else {
            warn!("TELEGRAM_TOKEN / TELEGRAM_CHAT_ID not set - notifications disabled");
        }

        Self {
            token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    /// Notifier that never sends anything (tests, dry runs).
    pub fn disabled() -> Self {
        Self {
            token: None,
            chat_id: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.chat_id.is_some()
    }

    /// Send a message. Errors are swallowed after logging.
    pub async fn send(&self, text: &str) {
        let (token, chat_id) = match (&self.token, &self.chat_id) {
            (Some(t), Some(c)) => (t, c),
            _ => return,
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let body = SendMessage { chat_id, text };

        match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Telegram send failed: HTTP {}", resp.status()),
            Err(e) => warn!("Telegram send failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_credentials() {
        let n = Notifier::new(None, None);
        assert!(!n.is_enabled());

        let n = Notifier::new(Some("token".into()), None);
        assert!(!n.is_enabled());

        let n = Notifier::new(Some("token".into()), Some("chat".into()));
        assert!(n.is_enabled());
    }

    #[tokio::test]
    async fn test_send_is_noop_when_disabled() {
        // Must return without attempting any network I/O.
        Notifier::disabled().send("hello").await;
    }
}
