//! WireGuard primitives
//!
//! Key material, tunnel address allocation, the peer-table model, client
//! config rendering, and the reconciler that keeps the live device in step
//! with what has been provisioned.

mod allocator;
mod device;
mod keys;
mod peer;
pub mod render;

pub use allocator::AddressAllocator;
pub use device::{DeviceBackend, InjectedFailure, MemoryDevice, WgToolDevice};
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use peer::PeerEntry;
pub use render::{ArtifactStore, ClientConfig, ConfigArtifact};
