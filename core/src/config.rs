// Node configuration
//
// The service identifier scopes every network surface the node exposes:
// peers advertising a different identifier are invisible to discovery and
// rejected at session setup. Identifier rules follow DNS-SD service naming
// (1-15 characters, lowercase letters, digits, hyphens, no edge hyphens)
// so the same value is usable on any mDNS stack.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default service identifier
pub const DEFAULT_SERVICE_ID: &str = "nearwave";

/// How long an outgoing invitation may sit unanswered before it is abandoned
pub const DEFAULT_INVITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised when a configuration is rejected
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid service identifier: {0}")]
    InvalidServiceId(String),
    #[error("Invite timeout must be non-zero")]
    ZeroInviteTimeout,
}

/// Configuration for a nearby-ranging node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Shared service identifier peers must match to pair
    pub service_id: String,
    /// Human-readable name advertised to peers; defaults to the device UUID
    pub display_name: Option<String>,
    /// Deadline for outgoing invitations
    pub invite_timeout: Duration,
    /// Invite newly discovered peers automatically
    pub auto_invite: bool,
    /// TCP port to listen on (0 picks an ephemeral port)
    pub listen_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            service_id: DEFAULT_SERVICE_ID.to_string(),
            display_name: None,
            invite_timeout: DEFAULT_INVITE_TIMEOUT,
            auto_invite: true,
            listen_port: 0,
        }
    }
}

impl NodeConfig {
    /// Create a new NodeConfig with the given service identifier
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            ..Self::default()
        }
    }

    /// Set the advertised display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the invitation deadline
    pub fn with_invite_timeout(mut self, timeout: Duration) -> Self {
        self.invite_timeout = timeout;
        self
    }

    /// Set whether discovered peers are invited automatically
    pub fn with_auto_invite(mut self, auto_invite: bool) -> Self {
        self.auto_invite = auto_invite;
        self
    }

    /// Set the listen port
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Check the configuration against the service-naming rules
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = &self.service_id;
        if id.is_empty() || id.len() > 15 {
            return Err(ConfigError::InvalidServiceId(format!(
                "'{}' must be 1-15 characters",
                id
            )));
        }
        if !id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-') {
            return Err(ConfigError::InvalidServiceId(format!(
                "'{}' may only contain lowercase letters, digits, and hyphens",
                id
            )));
        }
        if id.starts_with('-') || id.ends_with('-') {
            return Err(ConfigError::InvalidServiceId(format!(
                "'{}' must not begin or end with a hyphen",
                id
            )));
        }
        if self.invite_timeout.is_zero() {
            return Err(ConfigError::ZeroInviteTimeout);
        }
        Ok(())
    }

    /// Name advertised to peers: the configured override or the device UUID
    pub fn effective_display_name(&self, device_id: Uuid) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| device_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = NodeConfig::new("uwb-demo")
            .with_display_name("Alice")
            .with_invite_timeout(Duration::from_secs(5))
            .with_auto_invite(false)
            .with_listen_port(4100);

        assert_eq!(config.service_id, "uwb-demo");
        assert_eq!(config.display_name.as_deref(), Some("Alice"));
        assert_eq!(config.invite_timeout, Duration::from_secs(5));
        assert!(!config.auto_invite);
        assert_eq!(config.listen_port, 4100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_service_ids() {
        for bad in ["", "sixteen-chars-ab", "MixedCase", "under_score", "-edge", "edge-"] {
            let config = NodeConfig::new(bad);
            assert!(config.validate().is_err(), "expected rejection of {:?}", bad);
        }
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = NodeConfig::default().with_invite_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroInviteTimeout)));
    }

    #[test]
    fn test_effective_display_name_falls_back_to_uuid() {
        let device_id = Uuid::new_v4();

        let unnamed = NodeConfig::default();
        assert_eq!(unnamed.effective_display_name(device_id), device_id.to_string());

        let named = NodeConfig::default().with_display_name("Bob");
        assert_eq!(named.effective_display_name(device_id), "Bob");
    }
}
