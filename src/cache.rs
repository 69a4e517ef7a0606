//! The DNS caches: independent A, AAAA, and HTTPS memo tables keyed by
//! hostname. Backed by `DashMap` for lock-free reads and internally
//! serialized writes. No eviction; entries are inserted, never
//! removed, within a process run.
use std::net::IpAddr;

use dashmap::DashMap;

/// Per-name DNS memo.
#[derive(Debug, Clone, Default)]
pub struct DomainIp {
    /// Position in the Nose table, or 0 if the name is not under policy.
    pub index: usize,
    /// Ordered sequence of addresses for this name, by cache family.
    pub addresses: Vec<IpAddr>,
}

impl DomainIp {
    pub fn new(index: usize, addresses: Vec<IpAddr>) -> Self {
        DomainIp { index, addresses }
    }

    /// A `{index>0, addresses=[]}` memo means "return a lie for this name".
    pub fn is_poisoned(&self) -> bool {
        self.index > 0 && self.addresses.is_empty()
    }
}

/// A single name -> DomainIp memo table.
#[derive(Default)]
pub struct DnsCache {
    entries: DashMap<String, DomainIp>,
}

impl DnsCache {
    pub fn new() -> Self {
        DnsCache::default()
    }

    pub fn get(&self, name: &str) -> Option<DomainIp> {
        self.entries.get(name).map(|r| r.value().clone())
    }

    pub fn insert(&self, name: impl Into<String>, value: DomainIp) {
        self.entries.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three independent caches: A, AAAA, and HTTPS (address-binding hint).
#[derive(Default)]
pub struct DnsCaches {
    pub a: DnsCache,
    pub aaaa: DnsCache,
    pub https: DnsCache,
}

impl DnsCaches {
    pub fn new() -> Self {
        DnsCaches::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisoned_memo_has_nonzero_index_and_no_addresses() {
        let memo = DomainIp::new(3, Vec::new());
        assert!(memo.is_poisoned());
        let memo = DomainIp::new(0, Vec::new());
        assert!(!memo.is_poisoned());
    }

    #[test]
    fn cache_insert_and_get_roundtrip() {
        let cache = DnsCache::new();
        cache.insert("example.com", DomainIp::new(1, vec!["1.1.1.1".parse().unwrap()]));
        let got = cache.get("example.com").unwrap();
        assert_eq!(got.index, 1);
        assert_eq!(got.addresses, vec!["1.1.1.1".parse::<IpAddr>().unwrap()]);
        assert!(cache.get("nothing.example").is_none());
    }
}
