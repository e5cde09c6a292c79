//! Device reconciliation
//!
//! Applies peer additions and removals to the live WireGuard device and
//! triggers the durable save of its peer table. The device is the system of
//! record; this module only ever issues targeted single-peer mutations and
//! never replaces the whole peer list.

use crate::error::{ProvisionError, Result};
use crate::wireguard::{PeerEntry, PublicKey};
use std::io::Write;
use std::net::Ipv4Addr;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Abstraction over the live WireGuard device's control surface.
///
/// Implementations must apply each mutation to exactly one peer without
/// disturbing others, and must surface a persistence failure after a
/// successful mutation as [`ProvisionError::Persistence`] so the resulting
/// drift between device and saved state is operator-visible.
pub trait DeviceBackend: Send + Sync {
    /// Add or update one peer on the device
    fn apply_peer(&self, entry: &PeerEntry) -> Result<()>;

    /// Remove one peer from the device
    fn remove_peer(&self, public_key: &PublicKey) -> Result<()>;

    /// Read the device's current peer table
    fn list_peers(&self) -> Result<Vec<PeerEntry>>;

    /// Durably save the device state so it survives a restart
    fn save(&self) -> Result<()>;
}

/// Device backend driving the `wg` control tool.
///
/// Peer mutations go through `wg set`; persistence runs the configured
/// save command (`wg-quick save <interface>` unless overridden).
pub struct WgToolDevice {
    /// WireGuard interface name
    interface: String,
    /// Command invoked to persist the peer table
    persist_command: Vec<String>,
}

impl WgToolDevice {
    /// Create a backend for `interface` using the default persistence
    /// command (`wg-quick save <interface>`)
    pub fn new(interface: impl Into<String>) -> Self {
        let interface = interface.into();
        let persist_command = vec![
            "wg-quick".to_string(),
            "save".to_string(),
            interface.clone(),
        ];
        Self {
            interface,
            persist_command,
        }
    }

    /// Override the persistence command (e.g. a `wg syncconf` wrapper)
    pub fn with_persist_command(mut self, command: Vec<String>) -> Self {
        self.persist_command = command;
        self
    }

    /// Open a scoped handle to the device, verifying the interface exists.
    ///
    /// A missing interface is a deployment-not-ready condition, not a
    /// process error.
    fn open(&self) -> Result<WgHandle<'_>> {
        let output = Command::new("wg")
            .args(["show", &self.interface, "public-key"])
            .output()
            .map_err(|e| ProvisionError::Device(format!("Failed to execute wg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_interface(&stderr) {
                return Err(ProvisionError::DeviceNotReady(format!(
                    "Interface '{}' does not exist",
                    self.interface
                )));
            }
            return Err(ProvisionError::Device(format!(
                "wg show {} failed: {}",
                self.interface,
                stderr.trim()
            )));
        }

        debug!("Opened device handle for interface '{}'", self.interface);
        Ok(WgHandle { device: self })
    }

    fn run_wg(&self, args: &[&str]) -> Result<String> {
        debug!("Executing command: wg {:?}", args);

        let output = Command::new("wg")
            .args(args)
            .output()
            .map_err(|e| ProvisionError::Device(format!("Failed to execute wg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_interface(&stderr) {
                return Err(ProvisionError::DeviceNotReady(format!(
                    "Interface '{}' does not exist",
                    self.interface
                )));
            }
            return Err(ProvisionError::Device(format!(
                "wg {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Scoped device handle.
///
/// Mutations are only reachable through a handle, so acquisition and
/// release bracket every mutation on all exit paths.
struct WgHandle<'a> {
    device: &'a WgToolDevice,
}

impl WgHandle<'_> {
    fn set_peer(&self, entry: &PeerEntry) -> Result<()> {
        let public_key = entry.public_key.to_base64();
        let allowed_ips = entry.allowed_ips.join(",");

        let mut args: Vec<String> = vec![
            "set".to_string(),
            self.device.interface.clone(),
            "peer".to_string(),
            public_key,
            "allowed-ips".to_string(),
            allowed_ips,
        ];

        if let Some(endpoint) = entry.endpoint {
            args.push("endpoint".to_string());
            args.push(endpoint.to_string());
        }
        if let Some(interval) = entry.keepalive_interval {
            args.push("persistent-keepalive".to_string());
            args.push(interval.as_secs().to_string());
        }

        // `wg` only reads preshared keys from a file
        let psk_file = match entry.preshared_key {
            Some(psk) => {
                let file = write_psk_file(&psk)?;
                args.push("preshared-key".to_string());
                args.push(file.to_string_lossy().into_owned());
                Some(file)
            }
            None => None,
        };

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let result = self.device.run_wg(&arg_refs).map(|_| ());

        if let Some(file) = psk_file {
            if let Err(e) = std::fs::remove_file(&file) {
                warn!("Failed to remove preshared key file {:?}: {}", file, e);
            }
        }

        result
    }

    fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        self.device
            .run_wg(&[
                "set",
                &self.device.interface,
                "peer",
                &public_key.to_base64(),
                "remove",
            ])
            .map(|_| ())
    }

    fn dump(&self) -> Result<Vec<PeerEntry>> {
        let output = self
            .device
            .run_wg(&["show", &self.device.interface, "dump"])?;
        parse_dump(&output)
    }
}

impl Drop for WgHandle<'_> {
    fn drop(&mut self) {
        debug!(
            "Released device handle for interface '{}'",
            self.device.interface
        );
    }
}

impl DeviceBackend for WgToolDevice {
    fn apply_peer(&self, entry: &PeerEntry) -> Result<()> {
        entry.validate()?;
        let handle = self.open()?;
        handle.set_peer(entry)?;
        info!(
            "Applied peer {} to interface '{}'",
            entry.public_key, self.interface
        );
        Ok(())
    }

    fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        let handle = self.open()?;
        handle.remove_peer(public_key)?;
        info!(
            "Removed peer {} from interface '{}'",
            public_key, self.interface
        );
        Ok(())
    }

    fn list_peers(&self) -> Result<Vec<PeerEntry>> {
        let handle = self.open()?;
        handle.dump()
    }

    fn save(&self) -> Result<()> {
        let (program, args) = self
            .persist_command
            .split_first()
            .ok_or_else(|| ProvisionError::Config("Persistence command is empty".to_string()))?;

        debug!("Executing persistence command: {} {:?}", program, args);

        let output = Command::new(program).args(args).output().map_err(|e| {
            ProvisionError::Persistence(format!("Failed to execute {}: {}", program, e))
        })?;

        if !output.status.success() {
            return Err(ProvisionError::Persistence(format!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        info!("Persisted peer table for interface '{}'", self.interface);
        Ok(())
    }
}

/// `wg` reports a missing interface differently across platforms
fn is_missing_interface(stderr: &str) -> bool {
    stderr.contains("No such device")
        || stderr.contains("Unable to access interface")
        || stderr.contains("does not exist")
}

/// Write a preshared key to a mode-0600 temp file for `wg set`
fn write_psk_file(psk: &[u8; 32]) -> Result<std::path::PathBuf> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

    let path = std::env::temp_dir().join(format!("wg-psk-{}", std::process::id()));
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&path)
        .map_err(|e| ProvisionError::Device(format!("Failed to create psk file: {}", e)))?;
    file.write_all(BASE64.encode(psk).as_bytes())
        .map_err(|e| ProvisionError::Device(format!("Failed to write psk file: {}", e)))?;
    Ok(path)
}

/// Parse `wg show <if> dump` output into peer entries.
///
/// The first line describes the interface; each following line is one peer
/// as tab-separated fields: public key, preshared key, endpoint,
/// allowed IPs, last handshake, rx, tx, keepalive.
fn parse_dump(dump: &str) -> Result<Vec<PeerEntry>> {
    let mut peers = Vec::new();

    for line in dump.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 4 {
            continue;
        }

        let public_key = PublicKey::from_base64(fields[0]).map_err(|e| {
            ProvisionError::Device(format!("Unparseable public key in wg dump: {}", e))
        })?;

        let mut entry = PeerEntry::new(public_key);
        if fields[2] != "(none)" {
            entry.endpoint = fields[2].parse().ok();
        }
        if fields[3] != "(none)" {
            entry.allowed_ips = fields[3].split(',').map(str::to_string).collect();
        }
        if let Some(keepalive) = fields.get(7) {
            if let Ok(secs) = keepalive.parse::<u64>() {
                entry.keepalive_interval = Some(Duration::from_secs(secs));
            }
        }

        peers.push(entry);
    }

    Ok(peers)
}

/// In-memory device backend for tests and dry runs.
///
/// Behaves like a healthy device by default; failures can be injected per
/// step to exercise the orchestrator's compensation paths.
#[derive(Default)]
pub struct MemoryDevice {
    state: std::sync::Mutex<MemoryState>,
}

/// Failure injected into a [`MemoryDevice`] step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Report the interface as missing
    InterfaceMissing,
    /// Reject the mutation
    MutationRejected,
}

#[derive(Default)]
struct MemoryState {
    peers: Vec<PeerEntry>,
    fail_apply: Option<InjectedFailure>,
    fail_save: bool,
    save_count: u64,
}

impl MemoryDevice {
    /// Create a healthy in-memory device
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next and subsequent `apply_peer` calls fail
    pub fn fail_apply(&self, failure: InjectedFailure) {
        self.state.lock().unwrap().fail_apply = Some(failure);
    }

    /// Make `save` fail until cleared
    pub fn fail_save(&self, fail: bool) {
        self.state.lock().unwrap().fail_save = fail;
    }

    /// Clear injected apply failures
    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_apply = None;
        state.fail_save = false;
    }

    /// Snapshot of the current peer table
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.state.lock().unwrap().peers.clone()
    }

    /// Whether a peer with this public key exists
    pub fn has_peer(&self, public_key: &PublicKey) -> bool {
        self.state
            .lock()
            .unwrap()
            .peers
            .iter()
            .any(|p| &p.public_key == public_key)
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> u64 {
        self.state.lock().unwrap().save_count
    }

    /// Seed the device with an existing peer bound to a tunnel address
    pub fn seed_peer(&self, public_key: PublicKey, tunnel_address: Ipv4Addr) {
        let entry = PeerEntry::for_client(public_key, tunnel_address);
        self.state.lock().unwrap().peers.push(entry);
    }
}

impl DeviceBackend for MemoryDevice {
    fn apply_peer(&self, entry: &PeerEntry) -> Result<()> {
        entry.validate()?;
        let mut state = self.state.lock().unwrap();

        match state.fail_apply {
            Some(InjectedFailure::InterfaceMissing) => {
                return Err(ProvisionError::DeviceNotReady(
                    "Interface 'wg0' does not exist".to_string(),
                ))
            }
            Some(InjectedFailure::MutationRejected) => {
                return Err(ProvisionError::Device(
                    "Device rejected peer mutation".to_string(),
                ))
            }
            None => {}
        }

        // Targeted update: replace this peer's entry only
        state.peers.retain(|p| p.public_key != entry.public_key);
        state.peers.push(entry.clone());
        Ok(())
    }

    fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.peers.len();
        state.peers.retain(|p| &p.public_key != public_key);
        if state.peers.len() == before {
            return Err(ProvisionError::Device(format!(
                "Peer {} not found on device",
                public_key
            )));
        }
        Ok(())
    }

    fn list_peers(&self) -> Result<Vec<PeerEntry>> {
        Ok(self.state.lock().unwrap().peers.clone())
    }

    fn save(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_save {
            return Err(ProvisionError::Persistence(
                "Saved configuration could not be written".to_string(),
            ));
        }
        state.save_count += 1;
        Ok(())
    }
}
