//! wg-provision: WireGuard client provisioning service
//!
//! This library turns an onboarding request ("generate a key pair for me" or
//! "here is my public key") into a ready-to-use WireGuard client config,
//! while keeping the live interface's peer table and its saved state in
//! agreement with every config it hands out.
//!
//! # Architecture
//!
//! A provisioning transaction allocates a unique tunnel address from the
//! deployment subnet, renders the client-side `[Interface]`/`[Peer]` config
//! file, applies the matching peer entry to the running WireGuard device,
//! and triggers a durable save of the device state. Transactions are
//! serialized so concurrent requests can never collide on an address or
//! observe a half-applied device.
//!
//! # Modules
//!
//! - `config`: Deployment configuration parsing and validation
//! - `wireguard`: Keys, address allocation, peer model, config rendering,
//!   and the device reconciler
//! - `provision`: The orchestrator driving a transaction end to end
//! - `control`: Typed request/response API and the Unix-socket server
//! - `error`: Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control;
pub mod error;
pub mod provision;
pub mod wireguard;

// Re-export commonly used types
pub use error::{ProvisionError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
