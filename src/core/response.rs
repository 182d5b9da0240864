use serde::Serialize;

use crate::config::ResponseConfig;

/// What the host should do with a request the firewall refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSignal {
    /// Answer with this status and body
    Block { code: u16, message: String },
    /// Send the client elsewhere
    Redirect { to: String },
    /// Stop handling the request immediately
    Abort { code: u16, message: String },
}

impl ActionSignal {
    /// Signal described by a response configuration
    ///
    /// A configured code of 200 means the request is let through and no
    /// signal is produced.
    pub fn from_config(config: &ResponseConfig) -> Option<Self> {
        if config.code == 200 {
            return None;
        }

        let message = config
            .message
            .clone()
            .unwrap_or_else(|| default_message(config.code).to_string());

        if config.abort {
            return Some(ActionSignal::Abort {
                code: config.code,
                message,
            });
        }

        if let Some(to) = &config.redirect_to {
            return Some(ActionSignal::Redirect { to: to.clone() });
        }

        Some(ActionSignal::Block {
            code: config.code,
            message,
        })
    }

    pub fn redirect(to: impl Into<String>) -> Self {
        ActionSignal::Redirect { to: to.into() }
    }

    /// HTTP status the host should use
    pub fn status_code(&self) -> u16 {
        match self {
            ActionSignal::Block { code, .. } | ActionSignal::Abort { code, .. } => *code,
            ActionSignal::Redirect { .. } => 302,
        }
    }
}

fn default_message(code: u16) -> &'static str {
    match code {
        401 => "Unauthorized",
        403 => "Forbidden",
        429 => "Too Many Requests",
        503 => "Service Unavailable",
        _ => "Access denied",
    }
}
