//! Configuration validation functions
//!
//! Field-level validation for deployment configuration: interface names,
//! subnets, IP addresses, keys, and keepalive bounds.

use crate::error::{ProvisionError, Result};
use ipnetwork::Ipv4Network;
use std::net::IpAddr;

/// Validate interface name (alphanumeric, max 15 chars)
pub fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::Config(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > 15 {
        return Err(ProvisionError::Config(format!(
            "Interface name '{}' exceeds maximum length of 15 characters",
            name
        )));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(ProvisionError::Config(format!(
            "Interface name '{}' contains invalid characters (only alphanumeric, '_', and '-' allowed)",
            name
        )));
    }

    Ok(())
}

/// Parse and validate the client subnet.
///
/// The subnet must leave room for at least one client after the network
/// address, the broadcast address, and the reserved leading hosts.
pub fn validate_subnet(subnet: &str, reserved_hosts: u32) -> Result<Ipv4Network> {
    let network: Ipv4Network = subnet
        .parse()
        .map_err(|e| ProvisionError::Config(format!("Invalid subnet '{}': {}", subnet, e)))?;

    let unusable = 2u64 + reserved_hosts as u64;
    if u64::from(network.size()) <= unusable {
        return Err(ProvisionError::Config(format!(
            "Subnet '{}' has no room for clients after {} reserved addresses",
            subnet, unusable
        )));
    }

    Ok(network)
}

/// Validate IP address
pub fn validate_ip_address(ip: &str) -> Result<()> {
    ip.parse::<IpAddr>()
        .map_err(|_| ProvisionError::Config(format!("Invalid IP address: {}", ip)))?;
    Ok(())
}

/// Validate CIDR notation (IP/prefix)
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let parts: Vec<&str> = cidr.split('/').collect();

    if parts.len() != 2 {
        return Err(ProvisionError::Config(format!(
            "Invalid CIDR notation: {} (expected format: IP/prefix)",
            cidr
        )));
    }

    validate_ip_address(parts[0])?;

    let prefix: u8 = parts[1].parse().map_err(|_| {
        ProvisionError::Config(format!("Invalid prefix length in CIDR: {}", cidr))
    })?;

    let max_prefix = match parts[0].parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => 32,
        _ => 128,
    };

    if prefix > max_prefix {
        return Err(ProvisionError::Config(format!(
            "Prefix length {} exceeds maximum {} for IP address {}",
            prefix, max_prefix, parts[0]
        )));
    }

    Ok(())
}

/// Validate base64-encoded public key shape
pub fn validate_public_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(ProvisionError::Config(
            "Server public key cannot be empty".to_string(),
        ));
    }

    // WireGuard keys are 32 bytes, base64 encoded = 44 characters (with padding)
    if key.len() != 44 {
        return Err(ProvisionError::Config(format!(
            "Invalid public key length: {} (expected 44 characters)",
            key.len()
        )));
    }

    if !key
        .chars()
        .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        return Err(ProvisionError::Config(
            "Public key contains invalid base64 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate keepalive interval
pub fn validate_keepalive(secs: u16) -> Result<()> {
    // Reasonable range: 0 (disabled) or 10-300 seconds
    if secs > 0 && secs < 10 {
        return Err(ProvisionError::Config(format!(
            "Keepalive interval {} is too short (minimum 10 seconds or 0 to disable)",
            secs
        )));
    }

    if secs > 300 {
        return Err(ProvisionError::Config(format!(
            "Keepalive interval {} is too long (maximum 300 seconds)",
            secs
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_interface_name() {
        assert!(validate_interface_name("wg0").is_ok());
        assert!(validate_interface_name("wg-vpn").is_ok());
        assert!(validate_interface_name("").is_err());
        assert!(validate_interface_name("wg@0").is_err());
        assert!(validate_interface_name("toolonginterfacename").is_err());
    }

    #[test]
    fn test_validate_subnet() {
        assert!(validate_subnet("10.8.0.0/24", 2).is_ok());
        assert!(validate_subnet("10.8.0.0/29", 2).is_ok());
        assert!(validate_subnet("not-a-subnet", 2).is_err());
        // /30 leaves 4 addresses; 2 structural + 2 reserved = nothing usable
        assert!(validate_subnet("10.8.0.0/30", 2).is_err());
    }

    #[test]
    fn test_validate_ip_address() {
        assert!(validate_ip_address("8.8.8.8").is_ok());
        assert!(validate_ip_address("::1").is_ok());
        assert!(validate_ip_address("invalid").is_err());
        assert!(validate_ip_address("256.1.1.1").is_err());
    }

    #[test]
    fn test_validate_cidr() {
        assert!(validate_cidr("0.0.0.0/0").is_ok());
        assert!(validate_cidr("10.8.0.0/24").is_ok());
        assert!(validate_cidr("10.8.0.3").is_err());
        assert!(validate_cidr("10.8.0.0/33").is_err());
    }

    #[test]
    fn test_validate_public_key() {
        let valid_key = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOP==";
        assert_eq!(valid_key.len(), 44);
        assert!(validate_public_key(valid_key).is_ok());
        assert!(validate_public_key("").is_err());
        assert!(validate_public_key("tooshort").is_err());
    }

    #[test]
    fn test_validate_keepalive() {
        assert!(validate_keepalive(0).is_ok());
        assert!(validate_keepalive(25).is_ok());
        assert!(validate_keepalive(5).is_err());
        assert!(validate_keepalive(301).is_err());
    }
}
