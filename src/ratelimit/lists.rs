//! Blacklist and whitelist of client addresses.

use std::collections::HashSet;
use std::net::IpAddr;

use parking_lot::RwLock;
use tracing::info;

/// Loopback addresses seeded by [`ListPolicy::whitelist_local`].
pub const LOCAL_ADDRESSES: [&str; 2] = ["127.0.0.1", "::1"];

/// Result of looking an address up in the lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListVerdict {
    /// Always admitted, without counting
    Whitelisted,
    /// Always refused, without counting
    Blacklisted,
    /// Subject to normal rate limiting
    Unlisted,
}

/// Process-wide address lists consulted before any counting.
///
/// A single instance is shared by every limiter; mutations are visible to
/// all of them immediately.
#[derive(Debug, Default)]
pub struct ListPolicy {
    blacklist: RwLock<HashSet<String>>,
    whitelist: RwLock<HashSet<String>>,
}

impl ListPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_blacklist<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = self.blacklist.write();
        for address in addresses {
            let address = normalize(address.as_ref());
            info!(address = %address, "Adding address to blacklist");
            list.insert(address);
        }
    }

    pub fn add_to_whitelist<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = self.whitelist.write();
        for address in addresses {
            let address = normalize(address.as_ref());
            info!(address = %address, "Adding address to whitelist");
            list.insert(address);
        }
    }

    pub fn remove_from_blacklist<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = self.blacklist.write();
        for address in addresses {
            list.remove(&normalize(address.as_ref()));
        }
    }

    pub fn remove_from_whitelist<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = self.whitelist.write();
        for address in addresses {
            list.remove(&normalize(address.as_ref()));
        }
    }

    /// Whitelist the IPv4 and IPv6 loopback addresses.
    pub fn whitelist_local(&self) {
        self.add_to_whitelist(LOCAL_ADDRESSES);
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklist.read().contains(&normalize(address))
    }

    pub fn is_whitelisted(&self, address: &str) -> bool {
        self.whitelist.read().contains(&normalize(address))
    }

    /// Classify an address. The whitelist wins over the blacklist.
    pub fn verdict(&self, address: &str) -> ListVerdict {
        let address = normalize(address);
        if self.whitelist.read().contains(&address) {
            ListVerdict::Whitelisted
        } else if self.blacklist.read().contains(&address) {
            ListVerdict::Blacklisted
        } else {
            ListVerdict::Unlisted
        }
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.read().len()
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.read().len()
    }
}

/// Canonical form for IP literals; anything else is only trimmed.
fn normalize(address: &str) -> String {
    let address = address.trim();
    address
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|_| address.to_string())
}
