//! Tunnel address allocation
//!
//! Hands out unique client addresses from the deployment subnet. Addresses
//! are scanned in ascending order so allocation is deterministic: the first
//! address that is not the network address, not the broadcast address, not
//! one of the reserved leading host addresses, and not bound to a live peer
//! wins. No other component computes addresses.

use crate::error::{ProvisionError, Result};
use ipnetwork::Ipv4Network;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::debug;

/// Allocator over a single IPv4 subnet
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    /// Subnet addresses are drawn from
    subnet: Ipv4Network,
    /// Leading host addresses kept for the server side (e.g. `.1`, `.2`)
    reserved_hosts: u32,
    /// Addresses currently bound to peers
    in_use: BTreeSet<Ipv4Addr>,
}

impl AddressAllocator {
    /// Create an allocator for `subnet`, keeping the first `reserved_hosts`
    /// host addresses out of the pool
    pub fn new(subnet: Ipv4Network, reserved_hosts: u32) -> Self {
        Self {
            subnet,
            reserved_hosts,
            in_use: BTreeSet::new(),
        }
    }

    /// Allocate the lowest free address in the subnet.
    ///
    /// Returns [`ProvisionError::AllocationExhausted`] when every usable
    /// address is taken; nothing is allocated in that case.
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let network = self.subnet.network();
        let broadcast = self.subnet.broadcast();

        for (host_index, addr) in self.subnet.iter().enumerate() {
            if addr == network || addr == broadcast {
                continue;
            }
            // host_index 0 is the network address, so reserved hosts are 1..=reserved_hosts
            if (host_index as u32) <= self.reserved_hosts {
                continue;
            }
            if self.in_use.contains(&addr) {
                continue;
            }

            self.in_use.insert(addr);
            debug!("Allocated tunnel address {}", addr);
            return Ok(addr);
        }

        Err(ProvisionError::AllocationExhausted)
    }

    /// Return a previously allocated address to the pool.
    ///
    /// Returns `false` if the address was not allocated (already free or
    /// outside the subnet).
    pub fn release(&mut self, addr: Ipv4Addr) -> bool {
        let was_used = self.in_use.remove(&addr);
        if was_used {
            debug!("Released tunnel address {}", addr);
        }
        was_used
    }

    /// Mark an address as in use without allocating it.
    ///
    /// Used to seed the allocator from the device's existing peer table at
    /// startup. Addresses outside the subnet are ignored.
    pub fn mark_used(&mut self, addr: Ipv4Addr) -> bool {
        if !self.subnet.contains(addr) {
            return false;
        }
        self.in_use.insert(addr)
    }

    /// Whether the address is currently allocated
    pub fn is_used(&self, addr: Ipv4Addr) -> bool {
        self.in_use.contains(&addr)
    }

    /// Number of addresses currently allocated
    pub fn used_count(&self) -> usize {
        self.in_use.len()
    }

    /// Number of addresses still available
    pub fn free_count(&self) -> usize {
        let total = self.subnet.size() as usize;
        // network + broadcast + reserved hosts never leave the pool
        let unusable = 2 + self.reserved_hosts as usize;
        total.saturating_sub(unusable).saturating_sub(self.in_use.len())
    }

    /// The subnet this allocator draws from
    pub fn subnet(&self) -> Ipv4Network {
        self.subnet
    }
}
