//! Configuration for the setu-plc daemon
//!
//! Loads configuration from a TOML file with the parameters needed to
//! bind the protocol sockets and reach the supervisory controller.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

/// Network configuration (ports and peer address)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Address the daemon sockets bind to
    pub bind_address: String,

    /// UDP request/reply port
    pub request_port: u16,

    /// TCP lock-step request/reply port
    pub lockstep_port: u16,

    /// Controller address that change notifications are sent to
    pub controller_address: String,
}

impl NetworkConfig {
    /// Notification source port, always derived from the request port.
    pub fn notification_port(&self) -> u16 {
        self.request_port + 1
    }

    pub fn request_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.request_port)
    }

    pub fn notification_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.notification_port())
    }

    pub fn lockstep_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.lockstep_port)
    }

    /// Parsed controller address for the notification channel.
    pub fn controller_addr(&self) -> Result<SocketAddr> {
        Ok(self.controller_address.parse()?)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Default configuration for a simulated cell on localhost
    pub fn simulator_defaults() -> Self {
        Self {
            network: NetworkConfig {
                bind_address: "0.0.0.0".to_string(),
                request_port: 5555,
                lockstep_port: 5555,
                controller_address: "127.0.0.1:5557".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::simulator_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::simulator_defaults();
        assert_eq!(config.network.bind_address, "0.0.0.0");
        assert_eq!(config.network.request_port, 5555);
        assert_eq!(config.network.lockstep_port, 5555);
        assert_eq!(config.network.controller_address, "127.0.0.1:5557");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_notification_port_is_derived() {
        let mut config = Config::default();
        assert_eq!(config.network.notification_port(), 5556);

        config.network.request_port = 7000;
        assert_eq!(config.network.notification_port(), 7001);
        assert_eq!(config.network.notification_addr(), "0.0.0.0:7001");
    }

    #[test]
    fn test_controller_addr_parses() {
        let config = Config::default();
        let addr = config.network.controller_addr().unwrap();
        assert_eq!(addr.port(), 5557);

        let mut bad = config.clone();
        bad.network.controller_address = "not-an-address".to_string();
        assert!(bad.network.controller_addr().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = Config::simulator_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[network]"));
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("request_port = 5555"));
        assert!(toml_string.contains("controller_address = \"127.0.0.1:5557\""));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[network]
bind_address = "127.0.0.1"
request_port = 6000
lockstep_port = 6100
controller_address = "10.0.0.2:7000"

[logging]
level = "debug"
output = "stdout"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.network.bind_address, "127.0.0.1");
        assert_eq!(config.network.request_port, 6000);
        assert_eq!(config.network.notification_port(), 6001);
        assert_eq!(config.network.lockstep_port, 6100);
        assert_eq!(config.logging.level, "debug");
    }
}
