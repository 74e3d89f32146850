//! Client configuration: where the chatline server lives.

use chatline_shared::constants::{DEFAULT_HTTP_PORT, WS_PATH};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server, e.g. `http://localhost:5001`.
    /// Env: `CHATLINE_URL`
    pub base_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn from_env() -> Self {
        match std::env::var("CHATLINE_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Absolute URL of a request/response endpoint.
    pub fn http_url(&self, path: &str) -> String {
        format!("{}{}", self.base(), path)
    }

    /// URL of the live endpoint: `http` becomes `ws`, `https` becomes `wss`.
    pub fn ws_url(&self) -> Result<String> {
        let base = self.base();
        let rest = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ClientError::InvalidUrl(self.base_url.clone()));
        };
        Ok(format!("{rest}{WS_PATH}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = ClientConfig::new("https://chat.example.com/");
        assert_eq!(
            config.http_url("/api/messages/users"),
            "https://chat.example.com/api/messages/users"
        );
        assert_eq!(config.ws_url().unwrap(), "wss://chat.example.com/ws");

        let local = ClientConfig::default();
        assert_eq!(local.ws_url().unwrap(), "ws://localhost:5001/ws");
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        assert!(matches!(
            ClientConfig::new("ftp://example.com").ws_url(),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
