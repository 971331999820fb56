//! Engine host interface available to providers

use fleetform_resource::Urn;
use serde::{Deserialize, Serialize};

/// Severity of a provider log message. Errors are fatal to the current
/// resource operation; everything else is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub severity: LogSeverity,
    pub message: String,

    /// Resource the message is about, if any
    pub urn: Option<Urn>,

    /// Groups chunks of one logical message; 0 means no stream
    pub stream_id: u32,

    /// Transient status output
    pub ephemeral: bool,
}

impl LogMessage {
    pub fn new(severity: LogSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            urn: None,
            stream_id: 0,
            ephemeral: false,
        }
    }

    pub fn with_urn(mut self, urn: Urn) -> Self {
        self.urn = Some(urn);
        self
    }
}

/// Host services the engine offers to providers
pub trait Host: Send + Sync {
    fn log(&self, message: LogMessage);
}

/// Host that forwards provider logs into `tracing`
#[derive(Debug, Clone, Default)]
pub struct TracingHost;

impl Host for TracingHost {
    fn log(&self, message: LogMessage) {
        let urn = message.urn.as_ref().map(Urn::as_str).unwrap_or("-");
        match message.severity {
            LogSeverity::Debug => tracing::debug!(urn, "{}", message.message),
            LogSeverity::Info => tracing::info!(urn, "{}", message.message),
            LogSeverity::Warning => tracing::warn!(urn, "{}", message.message),
            LogSeverity::Error => tracing::error!(urn, "{}", message.message),
        }
    }
}
