//! Deployment configuration
//!
//! Configuration is read from a TOML file and may be overridden by
//! environment variables for the secrets a deployment prefers not to put on
//! disk (`WG_SERVER_PUBLIC_KEY`, `WG_SERVER_ENDPOINT`).

pub mod validation;

use crate::error::{ProvisionError, Result};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

/// Environment variable overriding `server_public_key`
pub const ENV_SERVER_PUBLIC_KEY: &str = "WG_SERVER_PUBLIC_KEY";

/// Environment variable overriding `server_endpoint`
pub const ENV_SERVER_ENDPOINT: &str = "WG_SERVER_ENDPOINT";

/// Deployment configuration for the provisioning service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// WireGuard interface name (e.g., "wg0")
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Client subnet in CIDR notation
    #[serde(default = "default_subnet")]
    pub subnet: String,

    /// Leading host addresses kept out of the client pool
    #[serde(default = "default_reserved_hosts")]
    pub reserved_hosts: u32,

    /// Base64-encoded server public key handed to clients
    #[serde(default)]
    pub server_public_key: String,

    /// Server endpoint (host:port) for client configs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_endpoint: Option<String>,

    /// DNS servers for client configs, in order
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,

    /// Ranges clients route through the tunnel
    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,

    /// Persistent keepalive for client configs in seconds (0 disables)
    #[serde(default)]
    pub keepalive_secs: u16,

    /// Directory rendered config artifacts are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Control socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Persistence command; defaults to `wg-quick save <interface>`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persist_command: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| ProvisionError::Config(format!("Failed to parse TOML config: {}", e)))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ENV_SERVER_PUBLIC_KEY) {
            if !key.is_empty() {
                self.server_public_key = key;
            }
        }
        if let Ok(endpoint) = std::env::var(ENV_SERVER_ENDPOINT) {
            if !endpoint.is_empty() {
                self.server_endpoint = Some(endpoint);
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_interface_name(&self.interface)?;
        validation::validate_subnet(&self.subnet, self.reserved_hosts)?;
        validation::validate_public_key(&self.server_public_key)?;
        validation::validate_keepalive(self.keepalive_secs)?;

        for dns in &self.dns {
            validation::validate_ip_address(dns)?;
        }
        if self.allowed_ips.is_empty() {
            return Err(ProvisionError::Config(
                "Allowed IPs cannot be empty".to_string(),
            ));
        }
        for allowed_ip in &self.allowed_ips {
            validation::validate_cidr(allowed_ip)?;
        }
        if self.output_dir.is_empty() {
            return Err(ProvisionError::Config(
                "Output directory cannot be empty".to_string(),
            ));
        }
        if let Some(command) = &self.persist_command {
            if command.is_empty() {
                return Err(ProvisionError::Config(
                    "Persistence command cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The client subnet, parsed
    pub fn subnet(&self) -> Result<Ipv4Network> {
        validation::validate_subnet(&self.subnet, self.reserved_hosts)
    }

    /// DNS servers, parsed
    pub fn dns_servers(&self) -> Result<Vec<IpAddr>> {
        self.dns
            .iter()
            .map(|s| {
                s.parse::<IpAddr>()
                    .map_err(|_| ProvisionError::Config(format!("Invalid DNS server: {}", s)))
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            subnet: default_subnet(),
            reserved_hosts: default_reserved_hosts(),
            server_public_key: String::new(),
            server_endpoint: None,
            dns: default_dns(),
            allowed_ips: default_allowed_ips(),
            keepalive_secs: 0,
            output_dir: default_output_dir(),
            socket_path: default_socket_path(),
            persist_command: None,
        }
    }
}

// Default value functions for serde
fn default_interface() -> String {
    "wg0".to_string()
}

fn default_subnet() -> String {
    "10.8.0.0/24".to_string()
}

fn default_reserved_hosts() -> u32 {
    2
}

fn default_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()]
}

fn default_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".to_string()]
}

fn default_output_dir() -> String {
    "/var/lib/wg-provision/configs".to_string()
}

fn default_socket_path() -> String {
    "/var/run/wg-provision.sock".to_string()
}
