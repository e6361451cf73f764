//! Gate control via HTTP relay commands (or log-only when no hardware is attached)

use crate::domain::types::Decision;
use crate::infra::config::{Config, GateMode};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Physical action requested from the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Open,
    Block,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Open => "open",
            GateAction::Block => "block",
        }
    }
}

impl From<Decision> for GateAction {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allowed => GateAction::Open,
            Decision::Blocked => GateAction::Block,
        }
    }
}

/// Hardware seam for the gate worker
#[async_trait]
pub trait GateCommand: Send + Sync {
    /// Send a command, returns latency in microseconds
    async fn send(&self, plate: &str, action: GateAction) -> u64;
}

struct HttpTarget {
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpTarget {
    fn parse(url: &str) -> Self {
        let (url, username, password) = GateController::parse_url_with_auth(url);
        Self { url, username, password }
    }
}

pub struct GateController {
    mode: GateMode,
    open_target: Option<HttpTarget>,
    block_target: Option<HttpTarget>,
    http_client: Option<reqwest::Client>,
}

impl GateController {
    pub fn new(config: &Config) -> Self {
        let timeout = Duration::from_millis(config.gate_timeout_ms());

        let http_client = if config.gate_mode() == GateMode::Http {
            reqwest::Client::builder().timeout(timeout).http1_only().build().ok()
        } else {
            None
        };

        let open_target = (!config.gate_open_url().is_empty())
            .then(|| HttpTarget::parse(config.gate_open_url()));
        let block_target = config.gate_block_url().map(HttpTarget::parse);

        Self { mode: config.gate_mode(), open_target, block_target, http_client }
    }

    /// Parse URL and extract basic auth credentials if present
    fn parse_url_with_auth(url: &str) -> (String, Option<String>, Option<String>) {
        if let Some(rest) = url.strip_prefix("http://") {
            if let Some(at_pos) = rest.find('@') {
                let auth_part = &rest[..at_pos];
                let host_part = &rest[at_pos + 1..];

                if let Some(colon_pos) = auth_part.find(':') {
                    let username = auth_part[..colon_pos].to_string();
                    let password = auth_part[colon_pos + 1..].to_string();
                    let clean_url = format!("http://{}", host_part);
                    return (clean_url, Some(username), Some(password));
                }
            }
        }
        (url.to_string(), None, None)
    }

    async fn send_http(&self, plate: &str, action: GateAction, start: Instant) -> u64 {
        let target = match action {
            GateAction::Open => self.open_target.as_ref(),
            GateAction::Block => self.block_target.as_ref(),
        };
        let Some(target) = target else {
            // no relay wired for this action (barrier stays closed on block)
            info!(plate = %plate, action = %action.as_str(), mode = "http", "gate_command_no_target");
            return start.elapsed().as_micros() as u64;
        };
        let Some(ref client) = self.http_client else {
            error!(plate = %plate, "gate_http_client_not_initialized");
            return start.elapsed().as_micros() as u64;
        };

        let mut request = client.get(&target.url).header("Accept", "*/*");
        if let (Some(username), Some(password)) = (&target.username, &target.password) {
            let credentials = format!("{}:{}", username, password);
            let encoded = STANDARD.encode(credentials.as_bytes());
            request = request.header("Authorization", format!("Basic {}", encoded));
        }

        match request.send().await {
            Ok(response) => {
                let latency_us = start.elapsed().as_micros() as u64;
                let status = response.status();
                if !status.is_success() {
                    warn!(plate = %plate, status = %status.as_u16(), "gate_command_rejected");
                }
                info!(
                    plate = %plate,
                    action = %action.as_str(),
                    latency_us = %latency_us,
                    status = %status.as_u16(),
                    mode = "http",
                    "gate_command"
                );
                latency_us
            }
            Err(e) => {
                let latency_us = start.elapsed().as_micros() as u64;
                error!(
                    plate = %plate,
                    action = %action.as_str(),
                    latency_us = %latency_us,
                    error = %e,
                    mode = "http",
                    "gate_command_error"
                );
                latency_us
            }
        }
    }
}

#[async_trait]
impl GateCommand for GateController {
    async fn send(&self, plate: &str, action: GateAction) -> u64 {
        let start = Instant::now();
        match self.mode {
            GateMode::Log => {
                let latency_us = start.elapsed().as_micros() as u64;
                info!(plate = %plate, action = %action.as_str(), mode = "log", "gate_command");
                latency_us
            }
            GateMode::Http => self.send_http(plate, action, start).await,
        }
    }
}
