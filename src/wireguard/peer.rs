//! Peer table model
//!
//! [`PeerEntry`] mirrors one entry in the live WireGuard device's peer
//! table. Entries are created by the reconciler and owned by the device;
//! the provisioning process never retains them past a transaction.

use crate::error::{ProvisionError, Result};
use crate::wireguard::PublicKey;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// One remote endpoint's entry in the device's peer table
#[derive(Debug, Clone)]
pub struct PeerEntry {
    /// Peer's public key
    pub public_key: PublicKey,
    /// Allowed IP ranges (CIDR notation)
    pub allowed_ips: Vec<String>,
    /// Preshared key (optional, for additional security)
    pub preshared_key: Option<[u8; 32]>,
    /// Peer endpoint address
    pub endpoint: Option<SocketAddr>,
    /// Persistent keepalive interval
    pub keepalive_interval: Option<Duration>,
}

impl PeerEntry {
    /// Create a peer entry with no allowed IPs
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            allowed_ips: Vec::new(),
            preshared_key: None,
            endpoint: None,
            keepalive_interval: None,
        }
    }

    /// Create the entry for a provisioned client: a single /32 allowed IP
    /// covering its tunnel address
    pub fn for_client(public_key: PublicKey, tunnel_address: Ipv4Addr) -> Self {
        let mut entry = Self::new(public_key);
        entry.allowed_ips.push(format!("{}/32", tunnel_address));
        entry
    }

    /// Set keepalive interval in seconds (0 disables)
    pub fn set_keepalive_secs(&mut self, secs: u16) {
        if secs > 0 {
            self.keepalive_interval = Some(Duration::from_secs(secs as u64));
        } else {
            self.keepalive_interval = None;
        }
    }

    /// The client tunnel address, if this entry carries exactly one
    /// IPv4 /32 allowed IP
    pub fn tunnel_address(&self) -> Option<Ipv4Addr> {
        for allowed_ip in &self.allowed_ips {
            let Some((ip, prefix)) = allowed_ip.split_once('/') else {
                continue;
            };
            if prefix != "32" {
                continue;
            }
            if let Ok(addr) = ip.parse::<Ipv4Addr>() {
                return Some(addr);
            }
        }
        None
    }

    /// Validate the entry before it reaches the device
    pub fn validate(&self) -> Result<()> {
        if self.allowed_ips.is_empty() {
            return Err(ProvisionError::Device(format!(
                "Peer {} has no allowed IPs",
                self.public_key
            )));
        }
        for allowed_ip in &self.allowed_ips {
            validate_allowed_ip(allowed_ip)?;
        }
        Ok(())
    }
}

/// Validate an allowed IP (CIDR notation)
fn validate_allowed_ip(ip: &str) -> Result<()> {
    let parts: Vec<&str> = ip.split('/').collect();

    if parts.len() != 2 {
        return Err(ProvisionError::Device(format!(
            "Invalid allowed IP format: {} (expected CIDR notation like 10.8.0.3/32)",
            ip
        )));
    }

    let addr: IpAddr = parts[0]
        .parse()
        .map_err(|e| ProvisionError::Device(format!("Invalid IP address in '{}': {}", ip, e)))?;

    let prefix: u8 = parts[1]
        .parse()
        .map_err(|e| ProvisionError::Device(format!("Invalid prefix length in '{}': {}", ip, e)))?;

    let max_prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };

    if prefix > max_prefix {
        return Err(ProvisionError::Device(format!(
            "Prefix length {} exceeds maximum {} for IP address {}",
            prefix, max_prefix, parts[0]
        )));
    }

    Ok(())
}
