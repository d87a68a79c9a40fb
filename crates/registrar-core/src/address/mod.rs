//! Address filtering and selection
//!
//! Turns the socket addresses a server bound into the endpoints that get
//! published:
//!
//! 1. Wildcard listen addresses expand to one candidate per local address,
//!    keeping the listen port.
//! 2. Loopback candidates are dropped.
//! 3. A candidate survives when its leading `mask_bit_len` bits equal those
//!    of the `match` address. Different address widths never match.
//! 4. The [`SelectPolicy`] reduces the survivors to zero, one or many.
//!
//! Candidate order is the order of the listen addresses, and for wildcard
//! listeners the order of the address source. Duplicates are dropped.

mod static_source;

pub use static_source::{StaticAddressFactory, StaticAddressSource};

use crate::config::{AddressSelectionPolicy, SelectPolicy};
use crate::error::{Error, Result};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Compiled form of an [`AddressSelectionPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFilter {
    match_ip: IpAddr,
    mask_bit_len: u32,
    policy: SelectPolicy,
}

impl AddressFilter {
    /// Compile a policy
    ///
    /// # Returns
    ///
    /// - `Ok(AddressFilter)`: The policy is usable
    /// - `Err(Error::Config)`: Malformed `match` literal or mask wider than the address
    pub fn new(policy: &AddressSelectionPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            match_ip: policy.match_ip()?,
            mask_bit_len: u32::from(policy.mask_bit_len),
            policy: policy.select_policy,
        })
    }

    /// The selection policy this filter applies
    pub fn policy(&self) -> SelectPolicy {
        self.policy
    }

    /// Whether `ip` is eligible for publication
    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if ip.is_loopback() {
            return false;
        }

        let (addr_bits, addr_width) = as_bits(ip);
        let (match_bits, match_width) = as_bits(self.match_ip);
        if addr_width != match_width {
            return false;
        }

        let shift = addr_width - self.mask_bit_len;
        addr_bits.checked_shr(shift).unwrap_or(0) == match_bits.checked_shr(shift).unwrap_or(0)
    }

    /// Expand and filter the bound addresses into candidates
    pub fn candidates(&self, listen_addrs: &[SocketAddr], local_addrs: &[IpAddr]) -> Vec<SocketAddr> {
        let mut candidates: Vec<SocketAddr> = Vec::new();
        let mut push = |addr: SocketAddr| {
            if !candidates.contains(&addr) {
                candidates.push(addr);
            }
        };

        for listen in listen_addrs {
            let ip = listen.ip().to_canonical();
            if ip.is_unspecified() {
                local_addrs
                    .iter()
                    .map(|local| local.to_canonical())
                    .filter(|local| self.matches(*local))
                    .for_each(|local| push(SocketAddr::new(local, listen.port())));
            } else if self.matches(ip) {
                push(SocketAddr::new(ip, listen.port()));
            }
        }

        debug!(
            "Address candidates for {:?} (match {}/{}): {:?}",
            listen_addrs, self.match_ip, self.mask_bit_len, candidates
        );
        candidates
    }

    /// Apply the selection policy to a candidate list
    ///
    /// `AT_LEAST_ONE` only differs from `ANY` when nothing is left: it fails
    /// where `ANY` returns an empty list.
    pub fn select<T>(&self, candidates: Vec<T>) -> Result<Vec<T>> {
        match self.policy {
            SelectPolicy::ExactOne => {
                if candidates.len() != 1 {
                    return Err(Error::selection(self.policy.as_str(), candidates.len()));
                }
                Ok(candidates)
            }
            SelectPolicy::PickNoneOrFirst => Ok(candidates.into_iter().take(1).collect()),
            SelectPolicy::PickExactFirst => {
                if candidates.is_empty() {
                    return Err(Error::selection(self.policy.as_str(), 0));
                }
                Ok(candidates.into_iter().take(1).collect())
            }
            SelectPolicy::AtLeastOne => {
                if candidates.is_empty() {
                    return Err(Error::selection(self.policy.as_str(), 0));
                }
                Ok(candidates)
            }
            SelectPolicy::Any => Ok(candidates),
        }
    }

    /// Candidates for `listen_addrs`, reduced by the selection policy
    pub fn publishable(
        &self,
        listen_addrs: &[SocketAddr],
        local_addrs: &[IpAddr],
    ) -> Result<Vec<SocketAddr>> {
        self.select(self.candidates(listen_addrs, local_addrs))
    }
}

fn as_bits(ip: IpAddr) -> (u128, u32) {
    match ip {
        IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}
