//! Alert sinks for circuit transitions.

use crate::domain::config::{AlertConfig, SlackConfig};
use crate::ports::outbound::{AlertSink, CircuitAlert, CircuitTransition};
use reqwest::Client;
use std::sync::Arc;
use tracing::{info, warn};

/// Writes alerts to the log.
#[derive(Debug, Clone)]
pub struct LogAlertSink {
    host: String,
}

impl LogAlertSink {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl AlertSink for LogAlertSink {
    fn notify(&self, alert: CircuitAlert) {
        match alert.transition {
            CircuitTransition::Opened => warn!(
                host = %self.host,
                circuit = %alert.target,
                failures = alert.failures,
                "{}", alert
            ),
            CircuitTransition::Closed => info!(
                host = %self.host,
                circuit = %alert.target,
                "{}", alert
            ),
        }
    }
}

/// Posts alerts to a Slack channel through `chat.postMessage`.
///
/// Delivery runs on a spawned task; without a Tokio runtime the alert is
/// only logged.
pub struct SlackAlertSink {
    client: Client,
    config: SlackConfig,
    host: String,
}

impl SlackAlertSink {
    pub fn new(client: Client, config: SlackConfig, host: impl Into<String>) -> Self {
        Self {
            client,
            config,
            host: host.into(),
        }
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_uri.trim_end_matches('/');
        format!("{}/chat.postMessage", base)
    }

    fn text(&self, alert: &CircuitAlert) -> String {
        format!("[{}] {}", self.host, alert)
    }
}

impl AlertSink for SlackAlertSink {
    fn notify(&self, alert: CircuitAlert) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(circuit = %alert.target, "No runtime to deliver Slack alert: {}", alert);
            return;
        };

        let request = self.client.post(self.endpoint()).form(&[
            ("token", self.config.api_token.expose().to_string()),
            ("channel", self.config.channel.clone()),
            ("username", self.config.bot_username.clone()),
            ("text", self.text(&alert)),
        ]);

        handle.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => warn!(
                    status = response.status().as_u16(),
                    "Slack rejected circuit alert"
                ),
                Err(e) => warn!(error = %e, "Failed to post circuit alert to Slack"),
            }
        });
    }
}

/// Forwards every alert to several sinks.
#[derive(Default)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

impl AlertSink for FanoutAlertSink {
    fn notify(&self, alert: CircuitAlert) {
        for sink in &self.sinks {
            sink.notify(alert.clone());
        }
    }
}

/// Sink set described by the `alerts` section: always the log, plus Slack
/// when configured.
pub fn from_config(config: &AlertConfig, client: Client) -> Arc<dyn AlertSink> {
    let log: Arc<dyn AlertSink> = Arc::new(LogAlertSink::new(config.host.clone()));
    match &config.slack {
        Some(slack) => Arc::new(FanoutAlertSink::new(vec![
            log,
            Arc::new(SlackAlertSink::new(client, slack.clone(), config.host.clone())),
        ])),
        None => log,
    }
}
