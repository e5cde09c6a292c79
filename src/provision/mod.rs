//! Provisioning orchestration
//!
//! [`Provisioner`] is the single entry point for onboarding a client. Each
//! request walks the transaction states in order, compensating on failure
//! so that a failed request leaves no visible side effect. The exception
//! is a failed persistence step after the device has been mutated: that
//! is reported loudly instead of rolled back, because silently removing a
//! peer the device believes exists would hide the drift rather than fix
//! it.

use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::wireguard::{
    render, AddressAllocator, ArtifactStore, ClientConfig, ConfigArtifact, DeviceBackend,
    KeyPair, PeerEntry, PrivateKey, PublicKey,
};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Upper bound on any single device control call
const DEVICE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How a request identifies the client
#[derive(Debug, Clone)]
pub enum ClientIdentityRequest {
    /// Generate a fresh key pair for the client
    GenerateKeys,
    /// Use this caller-supplied base64 public key
    CallerPublicKey(String),
}

/// Transaction states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    /// Request accepted
    Received,
    /// Key material generated or validated
    KeyResolved,
    /// Tunnel address taken from the pool
    AddressAllocated,
    /// Client config rendered and written
    ConfigRendered,
    /// Peer applied to the live device
    DeviceApplied,
    /// Device state durably saved (terminal success)
    Persisted,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionStage::Received => write!(f, "received"),
            ProvisionStage::KeyResolved => write!(f, "key_resolved"),
            ProvisionStage::AddressAllocated => write!(f, "address_allocated"),
            ProvisionStage::ConfigRendered => write!(f, "config_rendered"),
            ProvisionStage::DeviceApplied => write!(f, "device_applied"),
            ProvisionStage::Persisted => write!(f, "persisted"),
        }
    }
}

/// Result of a successful provisioning transaction
pub struct ProvisionedClient {
    /// The client's public key, as applied to the device
    pub public_key: PublicKey,
    /// The assigned tunnel address
    pub address: Ipv4Addr,
    /// The rendered config artifact
    pub artifact: ConfigArtifact,
    /// Where the artifact was written
    pub artifact_path: PathBuf,
}

impl fmt::Debug for ProvisionedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Artifact text may carry a private key; keep it out of logs
        f.debug_struct("ProvisionedClient")
            .field("public_key", &self.public_key)
            .field("address", &self.address)
            .field("artifact_path", &self.artifact_path)
            .finish()
    }
}

/// Sequences key resolution, address allocation, rendering, device
/// reconciliation, and persistence for each request.
///
/// The allocator sits behind a [`tokio::sync::Mutex`] held from allocation
/// through persistence, so at most one transaction mutates the pool and
/// the device at a time.
pub struct Provisioner {
    server_public_key: PublicKey,
    server_endpoint: Option<String>,
    dns: Vec<IpAddr>,
    allowed_ips: Vec<String>,
    keepalive_secs: u16,
    store: ArtifactStore,
    device: Arc<dyn DeviceBackend>,
    allocator: Mutex<AddressAllocator>,
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("server_public_key", &self.server_public_key)
            .field("server_endpoint", &self.server_endpoint)
            .field("dns", &self.dns)
            .field("allowed_ips", &self.allowed_ips)
            .field("keepalive_secs", &self.keepalive_secs)
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Build a provisioner from deployment configuration and a device
    /// backend. The allocator starts empty; call [`sync_from_device`]
    /// before serving requests.
    ///
    /// [`sync_from_device`]: Provisioner::sync_from_device
    pub fn new(config: &Config, device: Arc<dyn DeviceBackend>) -> Result<Self> {
        config.validate()?;

        let server_public_key = PublicKey::from_base64(&config.server_public_key)
            .map_err(|e| ProvisionError::Config(format!("Server public key: {}", e)))?;
        let subnet = config.subnet()?;
        let dns = config.dns_servers()?;

        Ok(Self {
            server_public_key,
            server_endpoint: config.server_endpoint.clone(),
            dns,
            allowed_ips: config.allowed_ips.clone(),
            keepalive_secs: config.keepalive_secs,
            store: ArtifactStore::new(config.output_dir.clone()),
            device,
            allocator: Mutex::new(AddressAllocator::new(subnet, config.reserved_hosts)),
        })
    }

    /// Seed the allocator from the device's current peer table, so addresses
    /// already bound to live peers are never handed out again.
    pub async fn sync_from_device(&self) -> Result<()> {
        let peers = self.device_call("list peers", |d| d.list_peers()).await?;

        let mut allocator = self.allocator.lock().await;
        let mut seeded = 0usize;
        for peer in &peers {
            if let Some(address) = peer.tunnel_address() {
                if allocator.mark_used(address) {
                    seeded += 1;
                }
            }
        }

        info!(
            "Synced allocator from device: {} peers, {} addresses in use",
            peers.len(),
            seeded
        );
        Ok(())
    }

    /// Run one provisioning transaction.
    ///
    /// On success the device carries the new peer, its state is saved, and
    /// the returned artifact is the only copy of any generated private key.
    pub async fn provision(&self, request: ClientIdentityRequest) -> Result<ProvisionedClient> {
        debug!("provision stage: {}", ProvisionStage::Received);

        // Step 1: resolve identity. Pure, so it runs before the exclusive
        // section.
        let (public_key, private_key) = resolve_identity(request)?;
        debug!("provision stage: {}", ProvisionStage::KeyResolved);

        // Steps 2-5 hold the transaction lock end to end (the allocator
        // reads device state indirectly through its in-use set, and the
        // device must not be mutated concurrently).
        let mut allocator = self.allocator.lock().await;

        // Step 2: allocate. Failure has no side effects to undo.
        let address = allocator.allocate()?;
        debug!(
            "provision stage: {} ({})",
            ProvisionStage::AddressAllocated,
            address
        );

        // Step 3: render and store the artifact. Compensation: release the
        // address.
        let client = ClientConfig {
            address,
            private_key,
            server_public_key: self.server_public_key.clone(),
            dns: self.dns.clone(),
            allowed_ips: self.allowed_ips.clone(),
            endpoint: self.server_endpoint.clone(),
            keepalive_secs: (self.keepalive_secs > 0).then_some(self.keepalive_secs),
        };

        let artifact = match render::render(&client) {
            Ok(artifact) => artifact,
            Err(e) => {
                allocator.release(address);
                error!("Config rendering failed: {}", e);
                return Err(e);
            }
        };
        let artifact_path = match self.store.write(&artifact) {
            Ok(path) => path,
            Err(e) => {
                allocator.release(address);
                warn!("Artifact write failed: {}", e);
                return Err(e);
            }
        };
        debug!("provision stage: {}", ProvisionStage::ConfigRendered);

        // Step 4: apply the peer. Compensation: release the address and
        // discard the artifact.
        let entry = PeerEntry::for_client(public_key.clone(), address);
        if let Err(e) = self
            .device_call("apply peer", move |d| d.apply_peer(&entry))
            .await
        {
            allocator.release(address);
            self.store.discard(&artifact_path);
            match &e {
                ProvisionError::DeviceNotReady(msg) => {
                    warn!("Device not ready, request failed gracefully: {}", msg)
                }
                _ => error!("Device mutation failed: {}", e),
            }
            return Err(e);
        }
        debug!("provision stage: {}", ProvisionStage::DeviceApplied);

        // Step 5: persist. The device already carries the peer, so nothing
        // is rolled back here; a failure means device and saved state
        // disagree and the operator must reconcile.
        if let Err(e) = self.save_device_state().await {
            error!(
                "Peer {} applied but device state was not persisted: {}",
                public_key, e
            );
            return Err(e);
        }
        debug!("provision stage: {}", ProvisionStage::Persisted);

        info!(
            "Provisioned client {} at {} ({})",
            public_key,
            address,
            artifact_path.display()
        );

        Ok(ProvisionedClient {
            public_key,
            address,
            artifact,
            artifact_path,
        })
    }

    /// Remove a client's peer from the device, persist, and return its
    /// tunnel address to the pool.
    pub async fn revoke(&self, public_key_b64: &str) -> Result<()> {
        let public_key = PublicKey::from_base64(public_key_b64)?;

        let mut allocator = self.allocator.lock().await;

        // Find the peer's tunnel address before removing it
        let peers = self.device_call("list peers", |d| d.list_peers()).await?;
        let address = peers
            .iter()
            .find(|p| p.public_key == public_key)
            .and_then(|p| p.tunnel_address());

        let key_for_removal = public_key.clone();
        self.device_call("remove peer", move |d| d.remove_peer(&key_for_removal))
            .await?;

        self.save_device_state().await?;

        // Only a persisted removal frees the address; on failure above the
        // pool still considers it bound, matching the drift-visible rule.
        if let Some(address) = address {
            allocator.release(address);
            self.store
                .discard(&self.store.output_dir().join(render::artifact_file_name(address)));
        }

        info!("Revoked client {}", public_key);
        Ok(())
    }

    /// Read the device's current peer table
    pub async fn list_peers(&self) -> Result<Vec<PeerEntry>> {
        self.device_call("list peers", |d| d.list_peers()).await
    }

    /// Pool usage: (allocated, free)
    pub async fn pool_usage(&self) -> (usize, usize) {
        let allocator = self.allocator.lock().await;
        (allocator.used_count(), allocator.free_count())
    }

    /// Run a device operation on the blocking pool with a bounded timeout.
    /// A non-responding device control surface is a device error, not a
    /// hang.
    async fn device_call<T, F>(&self, what: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DeviceBackend) -> Result<T> + Send + 'static,
    {
        let device = Arc::clone(&self.device);
        let call = tokio::task::spawn_blocking(move || f(device.as_ref()));

        match tokio::time::timeout(DEVICE_CALL_TIMEOUT, call).await {
            Err(_) => Err(ProvisionError::Device(format!(
                "Device call '{}' timed out after {:?}",
                what, DEVICE_CALL_TIMEOUT
            ))),
            Ok(Err(join_err)) => Err(ProvisionError::Device(format!(
                "Device call '{}' failed to run: {}",
                what, join_err
            ))),
            Ok(Ok(result)) => result,
        }
    }

    /// Persist device state; every failure shape here is a persistence
    /// failure, including a timeout, because the mutation already happened.
    async fn save_device_state(&self) -> Result<()> {
        match self.device_call("save", |d| d.save()).await {
            Ok(()) => Ok(()),
            Err(ProvisionError::Persistence(msg)) => Err(ProvisionError::Persistence(msg)),
            Err(other) => Err(ProvisionError::Persistence(other.to_string())),
        }
    }
}

/// Resolve the request's identity into key material
fn resolve_identity(
    request: ClientIdentityRequest,
) -> Result<(PublicKey, Option<PrivateKey>)> {
    match request {
        ClientIdentityRequest::GenerateKeys => {
            let keypair = KeyPair::generate();
            Ok((keypair.public, Some(keypair.private)))
        }
        ClientIdentityRequest::CallerPublicKey(raw) => {
            let public_key = PublicKey::from_base64(&raw)?;
            Ok((public_key, None))
        }
    }
}
