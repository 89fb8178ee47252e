// Configuration management for the Nearwave CLI
//
// Cross-platform config stored in:
// - macOS: ~/.config/nearwave/config.json
// - Linux: ~/.config/nearwave/config.json
// - Windows: %APPDATA%\nearwave\config.json

use anyhow::{Context, Result};
use nearwave_core::NodeConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service identifier peers must share to pair
    pub service_id: String,

    /// Display name advertised to peers (defaults to the device id)
    pub display_name: Option<String>,

    /// Default port for listening (0 picks an ephemeral port)
    pub listen_port: u16,

    /// Seconds before an outgoing invitation is abandoned
    pub invite_timeout_secs: u64,

    /// Invite newly discovered peers automatically
    pub auto_invite: bool,

    /// Use the simulated ranging provider
    pub simulate_ranging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_id: "nearwave".to_string(),
            display_name: None,
            listen_port: 0, // Random port
            invite_timeout_secs: 30,
            auto_invite: true,
            simulate_ranging: true,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("nearwave");

        // Create directory if it doesn't exist
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("nearwave");

        // Create directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Build the node configuration this config describes
    pub fn node_config(&self) -> NodeConfig {
        let mut node_config = NodeConfig::new(self.service_id.clone())
            .with_listen_port(self.listen_port)
            .with_invite_timeout(Duration::from_secs(self.invite_timeout_secs))
            .with_auto_invite(self.auto_invite);
        if let Some(name) = &self.display_name {
            node_config = node_config.with_display_name(name.clone());
        }
        node_config
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "service_id" => {
                self.service_id = value.to_string();
            }
            "display_name" => {
                self.display_name = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "listen_port" => {
                self.listen_port = value.parse().context("Invalid port number")?;
            }
            "invite_timeout_secs" => {
                self.invite_timeout_secs = value.parse().context("Invalid number")?;
            }
            "auto_invite" => {
                self.auto_invite = value.parse().context("Invalid boolean value")?;
            }
            "simulate_ranging" => {
                self.simulate_ranging = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        // Reject values the node would refuse later
        self.node_config()
            .validate()
            .context("Configuration is not valid")?;
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "service_id" => Some(self.service_id.clone()),
            "display_name" => Some(
                self.display_name
                    .clone()
                    .unwrap_or_else(|| "(device id)".to_string()),
            ),
            "listen_port" => Some(self.listen_port.to_string()),
            "invite_timeout_secs" => Some(self.invite_timeout_secs.to_string()),
            "auto_invite" => Some(self.auto_invite.to_string()),
            "simulate_ranging" => Some(self.simulate_ranging.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("service_id".to_string(), self.service_id.clone()),
            (
                "display_name".to_string(),
                self.display_name
                    .clone()
                    .unwrap_or_else(|| "(device id)".to_string()),
            ),
            ("listen_port".to_string(), self.listen_port.to_string()),
            (
                "invite_timeout_secs".to_string(),
                format!("{}s", self.invite_timeout_secs),
            ),
            ("auto_invite".to_string(), self.auto_invite.to_string()),
            (
                "simulate_ranging".to_string(),
                self.simulate_ranging.to_string(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_id, "nearwave");
        assert_eq!(config.listen_port, 0);
        assert!(config.auto_invite);
        assert!(config.simulate_ranging);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.service_id, deserialized.service_id);
        assert_eq!(config.invite_timeout_secs, deserialized.invite_timeout_secs);
    }

    #[test]
    fn test_node_config_conversion() {
        let mut config = Config::default();
        config.display_name = Some("kiosk".to_string());
        config.invite_timeout_secs = 10;

        let node_config = config.node_config();
        assert_eq!(node_config.service_id, "nearwave");
        assert_eq!(node_config.display_name, Some("kiosk".to_string()));
        assert_eq!(node_config.invite_timeout, Duration::from_secs(10));
        assert!(node_config.validate().is_ok());
    }
}
