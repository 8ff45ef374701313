//! Hub configuration

use shared::{Codec, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_MAX_TOKEN_LEN};
use std::time::Duration;

/// Tunables for the network hub.
///
/// `Default` gives a loopback hub suitable for local play and tests; the
/// server binary overrides fields from its command line.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the UDP socket binds to
    pub bind_addr: String,
    /// Maximum number of authenticated players
    pub max_clients: usize,
    /// Shared secret clients must present; `None` accepts any non-empty token
    pub auth_token: Option<String>,
    pub max_token_len: usize,
    pub max_message_len: usize,
    /// Malformed packets tolerated from one connection before it is dropped
    pub max_decode_errors: u32,
    /// Silence after which a connection is considered gone
    pub client_timeout: Duration,
    /// Upper bound on how long the loop waits before housekeeping and
    /// re-checking the running flag
    pub poll_interval: Duration,
    /// `None` keeps the inbound state queue unbounded. When set, the network
    /// loop waits for room once the queue is full, until
    /// [`IrisHandle::shutdown`](crate::IrisHandle::shutdown) closes it.
    pub state_queue_capacity: Option<usize>,
    /// How long an incomplete inbound state bundle may stay open
    pub state_flush_interval: Duration,
    /// Number of submitted outbound bundles kept for `send_state`
    pub retained_bundles: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            max_clients: 32,
            auth_token: None,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_decode_errors: 8,
            client_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(50),
            state_queue_capacity: None,
            state_flush_interval: Duration::from_millis(33),
            retained_bundles: 64,
        }
    }
}

impl HubConfig {
    pub fn codec(&self) -> Codec {
        Codec::new(self.max_message_len, self.max_token_len)
    }

    /// Checks a presented credential against the configured secret.
    pub fn accepts_token(&self, token: &str) -> bool {
        match &self.auth_token {
            Some(expected) => token == expected,
            None => !token.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.max_clients, 32);
        assert!(config.state_queue_capacity.is_none());
        assert!(config.poll_interval < config.client_timeout);
    }

    #[test]
    fn test_open_server_accepts_any_non_empty_token() {
        let config = HubConfig::default();
        assert!(config.accepts_token("anyone"));
        assert!(!config.accepts_token(""));
    }

    #[test]
    fn test_secret_must_match() {
        let config = HubConfig {
            auth_token: Some("hunter2".to_string()),
            ..HubConfig::default()
        };
        assert!(config.accepts_token("hunter2"));
        assert!(!config.accepts_token("hunter3"));
        assert!(!config.accepts_token(""));
    }

    #[test]
    fn test_codec_uses_limits() {
        let config = HubConfig {
            max_message_len: 10,
            max_token_len: 20,
            ..HubConfig::default()
        };
        let codec = config.codec();
        assert_eq!(codec.max_message_len, 10);
        assert_eq!(codec.max_token_len, 20);
    }
}
