//! Client config rendering
//!
//! Turns an assigned tunnel address plus key material into the standard
//! wg-quick `[Interface]`/`[Peer]` client configuration, and writes the
//! artifact to the configured output directory under a per-address file
//! name. Rendering is deterministic: identical inputs produce byte-identical
//! artifacts.

use crate::error::{ProvisionError, Result};
use crate::wireguard::{PrivateKey, PublicKey};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Inputs for one client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// Assigned tunnel address (rendered with a /32 mask)
    pub address: Ipv4Addr,
    /// Client private key, present only when freshly generated
    pub private_key: Option<PrivateKey>,
    /// The server's public key for the `[Peer]` section
    pub server_public_key: PublicKey,
    /// DNS servers, in order
    pub dns: Vec<IpAddr>,
    /// Ranges the client routes through the tunnel (CIDR)
    pub allowed_ips: Vec<String>,
    /// Server endpoint (host:port), if known
    pub endpoint: Option<String>,
    /// Persistent keepalive in seconds, if enabled
    pub keepalive_secs: Option<u16>,
}

/// A rendered, immutable config artifact
#[derive(Debug, Clone)]
pub struct ConfigArtifact {
    /// The config text, parseable by any standard WireGuard client
    pub text: String,
    /// File name the artifact is stored under
    pub file_name: String,
}

/// Render a client configuration.
///
/// Fails with [`ProvisionError::Render`] only on inputs no correct caller
/// produces, such as an empty allowed-IP list.
pub fn render(config: &ClientConfig) -> Result<ConfigArtifact> {
    if config.allowed_ips.is_empty() {
        return Err(ProvisionError::Render(
            "Client config has no allowed IPs".to_string(),
        ));
    }
    for allowed_ip in &config.allowed_ips {
        if allowed_ip.trim().is_empty() {
            return Err(ProvisionError::Render(
                "Client config has an empty allowed IP entry".to_string(),
            ));
        }
    }

    let mut text = String::new();

    // Writing to a String cannot fail
    writeln!(text, "[Interface]").expect("write to String");
    writeln!(text, "Address = {}/32", config.address).expect("write to String");
    if let Some(private_key) = &config.private_key {
        writeln!(text, "PrivateKey = {}", private_key.to_base64()).expect("write to String");
    }
    if !config.dns.is_empty() {
        let dns: Vec<String> = config.dns.iter().map(IpAddr::to_string).collect();
        writeln!(text, "DNS = {}", dns.join(", ")).expect("write to String");
    }

    writeln!(text).expect("write to String");
    writeln!(text, "[Peer]").expect("write to String");
    writeln!(text, "PublicKey = {}", config.server_public_key.to_base64())
        .expect("write to String");
    writeln!(text, "AllowedIPs = {}", config.allowed_ips.join(", ")).expect("write to String");
    if let Some(endpoint) = &config.endpoint {
        writeln!(text, "Endpoint = {}", endpoint).expect("write to String");
    }
    if let Some(keepalive) = config.keepalive_secs {
        writeln!(text, "PersistentKeepalive = {}", keepalive).expect("write to String");
    }

    Ok(ConfigArtifact {
        text,
        file_name: artifact_file_name(config.address),
    })
}

/// Artifact file name for a tunnel address (`wg-10-8-0-3.conf`).
///
/// Addresses are unique while their peer exists, so names cannot collide
/// under concurrent requests.
pub fn artifact_file_name(address: Ipv4Addr) -> String {
    format!("wg-{}.conf", address.to_string().replace('.', "-"))
}

/// Writes rendered artifacts to stable storage
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write the artifact, creating the output directory if needed.
    ///
    /// Failures are [`ProvisionError::Persistence`]: the config was rendered
    /// but could not be stored.
    pub fn write(&self, artifact: &ConfigArtifact) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            ProvisionError::Persistence(format!(
                "Failed to create output directory {:?}: {}",
                self.output_dir, e
            ))
        })?;

        let path = self.output_dir.join(&artifact.file_name);
        std::fs::write(&path, &artifact.text).map_err(|e| {
            ProvisionError::Persistence(format!("Failed to write artifact {:?}: {}", path, e))
        })?;

        info!("Wrote client config artifact to {:?}", path);
        Ok(path)
    }

    /// Delete a previously written artifact (compensation path).
    ///
    /// Missing files are fine; the goal is that no artifact survives a
    /// failed transaction.
    pub fn discard(&self, path: &Path) {
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Discarded artifact {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to discard artifact {:?}: {}", path, e),
        }
    }

    /// The directory artifacts are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wireguard::KeyPair;
    use tempfile::TempDir;

    fn sample(private_key: Option<PrivateKey>) -> ClientConfig {
        ClientConfig {
            address: Ipv4Addr::new(10, 8, 0, 3),
            private_key,
            server_public_key: KeyPair::generate().public,
            dns: vec!["8.8.8.8".parse().unwrap(), "8.8.4.4".parse().unwrap()],
            allowed_ips: vec!["0.0.0.0/0".to_string()],
            endpoint: Some("vpn.example.com:51820".to_string()),
            keepalive_secs: Some(25),
        }
    }

    #[test]
    fn test_render_sections() {
        let keypair = KeyPair::generate();
        let config = sample(Some(keypair.private.clone()));
        let artifact = render(&config).unwrap();

        assert!(artifact.text.starts_with("[Interface]\n"));
        assert!(artifact.text.contains("Address = 10.8.0.3/32\n"));
        assert!(artifact
            .text
            .contains(&format!("PrivateKey = {}\n", keypair.private.to_base64())));
        assert!(artifact.text.contains("DNS = 8.8.8.8, 8.8.4.4\n"));
        assert!(artifact.text.contains("\n[Peer]\n"));
        assert!(artifact.text.contains(&format!(
            "PublicKey = {}\n",
            config.server_public_key.to_base64()
        )));
        assert!(artifact.text.contains("AllowedIPs = 0.0.0.0/0\n"));
        assert!(artifact.text.contains("Endpoint = vpn.example.com:51820\n"));
        assert!(artifact.text.contains("PersistentKeepalive = 25\n"));
    }

    #[test]
    fn test_render_without_private_key() {
        let artifact = render(&sample(None)).unwrap();
        assert!(!artifact.text.contains("PrivateKey"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let config = sample(Some(PrivateKey::generate()));
        let first = render(&config).unwrap();
        let second = render(&config).unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(first.file_name, second.file_name);
    }

    #[test]
    fn test_render_empty_allowed_ips_is_render_error() {
        let mut config = sample(None);
        config.allowed_ips.clear();
        assert!(matches!(
            render(&config),
            Err(ProvisionError::Render(_))
        ));
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(
            artifact_file_name(Ipv4Addr::new(10, 8, 0, 3)),
            "wg-10-8-0-3.conf"
        );
    }

    #[test]
    fn test_store_write_and_discard() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("configs"));
        let artifact = render(&sample(None)).unwrap();

        let path = store.write(&artifact).unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), artifact.text);

        store.discard(&path);
        assert!(!path.exists());

        // Discarding twice must not fail
        store.discard(&path);
    }
}
