use std::time::Duration;

use serde_json::json;

use crate::config::EscalationConfig;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Flags utterances that mention an emergency and hands them to a human channel.
#[derive(Debug, Clone)]
pub struct Escalation {
    keywords: Vec<String>,
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Escalation {
    pub fn new(config: &EscalationConfig) -> Self {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let webhook_url = Some(config.webhook_url.trim().to_string()).filter(|u| !u.is_empty());
        Self {
            keywords,
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            keywords: Vec::new(),
            webhook_url: None,
            client: reqwest::Client::new(),
        }
    }

    /// Case-insensitive substring match against the configured keywords.
    pub fn matches(&self, text: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Logs the escalation and posts it to the webhook if one is configured.
    pub async fn raise(&self, call: &str, text: &str) {
        log::warn!("[ESCALATION] call {}: {}", call, text);

        let Some(url) = &self.webhook_url else {
            return;
        };
        let body = json!({ "call": call, "text": text });
        let result = tokio::time::timeout(
            WEBHOOK_TIMEOUT,
            self.client.post(url).json(&body).send(),
        )
        .await;
        match result {
            Ok(Ok(resp)) if resp.status().is_success() => {
                log::info!("Escalation for {} delivered", call);
            }
            Ok(Ok(resp)) => log::error!("Escalation webhook returned {}", resp.status()),
            Ok(Err(e)) => log::error!("Escalation webhook failed: {}", e),
            Err(_) => log::error!(
                "Escalation webhook timed out after {}s",
                WEBHOOK_TIMEOUT.as_secs()
            ),
        }
    }
}
