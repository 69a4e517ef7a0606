//! The domain policy engine: a table mapping hostnames,
//! dotted parent suffixes, CIDR blocks, and bare IPs to a [`Config`], plus
//! the longest-to-shortest suffix lookup walk.
use std::collections::HashMap;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::options::Options;

/// The distinguished key that populates the process-wide default config.
pub const DEFAULT_KEY: &str = "default.config.com";

/// The policy associated with a matched host or address.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub options: Options,
    pub ttl_min: u8,
    pub ttl_max: u8,
    pub mss: u16,
    pub upstream: String,
    pub device: String,
}

impl Config {
    /// A name/address is "under policy" when its options are nonzero.
    pub fn is_under_policy(&self) -> bool {
        !self.options.is_empty()
    }
}

/// Mapping from a key to a [`Config`]. Keys are exact hostnames, dotted
/// parent suffixes (leading dot), literal IP addresses (textual form), or
/// normalized CIDR strings. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    entries: HashMap<String, Config>,
    default_config: Option<Config>,
    /// Maximum number of parent suffixes probed during lookup.
    pub subdomain_depth: usize,
}

impl PolicyTable {
    pub fn new() -> Self {
        PolicyTable {
            entries: HashMap::new(),
            default_config: None,
            subdomain_depth: 2,
        }
    }

    pub fn insert_host(&mut self, host: impl Into<String>, config: Config) {
        self.entries.insert(host.into(), config);
    }

    pub fn insert_ip(&mut self, ip: IpAddr, config: Config) {
        self.entries.insert(ip.to_string(), config);
    }

    pub fn insert_cidr(&mut self, net: IpNet, config: Config) {
        self.entries.insert(net.to_string(), config);
    }

    pub fn set_default(&mut self, config: Config) {
        self.default_config = Some(config);
    }

    pub fn default_config(&self) -> Option<&Config> {
        self.default_config.as_ref()
    }

    pub fn get_exact(&self, key: &str) -> Option<&Config> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the keys in the table, used by the PAC emitter.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `ConfigLookup(name)`:
    /// 1. Exact match wins (one table probe).
    /// 2. Otherwise strip the leftmost label repeatedly, exact-matching the
    ///    remaining suffix (with its leading dot), for up to
    ///    `subdomain_depth - 1` strips. The shorter (more specific) suffix
    ///    wins over longer. A name needing `k` strips to reach a stored
    ///    suffix is only reachable once `subdomain_depth > k`.
    /// 3. If still unmatched, the process-wide default config is a last
    ///    resort, iff it has nonzero options.
    /// 4. Otherwise a zero config with `found=false`.
    pub fn lookup(&self, name: &str) -> (Config, bool) {
        if let Some(cfg) = self.entries.get(name) {
            return (cfg.clone(), true);
        }

        let mut rest = name;
        for _ in 0..self.subdomain_depth.saturating_sub(1) {
            match rest.split_once('.') {
                Some((_, tail)) if !tail.is_empty() => {
                    let suffix = format!(".{tail}");
                    if let Some(cfg) = self.entries.get(&suffix) {
                        return (cfg.clone(), true);
                    }
                    rest = tail;
                }
                _ => break,
            }
        }

        match &self.default_config {
            Some(cfg) if cfg.is_under_policy() => (cfg.clone(), true),
            _ => (Config::default(), false),
        }
    }

    /// IP/CIDR-keyed lookup: exact address match first, then membership in
    /// any stored CIDR network. Exercised by the connection-handling
    /// front-end (out of this core) that has a real client address to
    /// check, rather than a hostname.
    pub fn lookup_ip(&self, ip: IpAddr) -> (Config, bool) {
        if let Some(cfg) = self.entries.get(&ip.to_string()) {
            return (cfg.clone(), true);
        }

        for (key, cfg) in &self.entries {
            if let Ok(net) = key.parse::<IpNet>() {
                if net.contains(&ip) {
                    return (cfg.clone(), true);
                }
            }
        }

        match &self.default_config {
            Some(cfg) if cfg.is_under_policy() => (cfg.clone(), true),
            _ => (Config::default(), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(opts: Options) -> Config {
        Config {
            options: opts,
            ..Default::default()
        }
    }

    #[test]
    fn exact_match_wins_over_suffix() {
        let mut table = PolicyTable::new();
        table.insert_host("example.com", cfg(Options::TTL));
        table.insert_host(".com", cfg(Options::MSS));

        let (found, ok) = table.lookup("example.com");
        assert!(ok);
        assert_eq!(found.options, Options::TTL);
    }

    #[test]
    fn suffix_walk_bounded_by_depth() {
        let mut table = PolicyTable::new();
        table.subdomain_depth = 2;
        table.insert_host(".co.uk", cfg(Options::TTL));

        let (found, ok) = table.lookup("foo.co.uk");
        assert!(ok);
        assert_eq!(found.options, Options::TTL);

        // a.b.co.uk would need depth 3 to reach ".co.uk"
        let (_, ok) = table.lookup("a.b.co.uk");
        assert!(!ok);

        table.subdomain_depth = 3;
        let (found, ok) = table.lookup("a.b.co.uk");
        assert!(ok);
        assert_eq!(found.options, Options::TTL);
    }

    #[test]
    fn ip_lookup_matches_exact_address_and_cidr_membership() {
        let mut table = PolicyTable::new();
        table.insert_ip("1.2.3.4".parse().unwrap(), cfg(Options::TTL));
        table.insert_cidr("10.0.0.0/24".parse().unwrap(), cfg(Options::MSS));

        let (found, ok) = table.lookup_ip("1.2.3.4".parse().unwrap());
        assert!(ok);
        assert_eq!(found.options, Options::TTL);

        let (found, ok) = table.lookup_ip("10.0.0.5".parse().unwrap());
        assert!(ok);
        assert_eq!(found.options, Options::MSS);

        let (_, ok) = table.lookup_ip("10.0.1.5".parse().unwrap());
        assert!(!ok);
    }

    #[test]
    fn default_config_is_last_resort() {
        let mut table = PolicyTable::new();
        table.set_default(cfg(Options::PROXY));
        let (found, ok) = table.lookup("anything.example");
        assert!(ok);
        assert_eq!(found.options, Options::PROXY);
    }

    #[test]
    fn empty_default_never_matches() {
        let mut table = PolicyTable::new();
        table.set_default(Config::default());
        let (_, ok) = table.lookup("anything.example");
        assert!(!ok);
    }

    #[test]
    fn monotonic_lookup_unaffected_by_less_specific_entries() {
        let mut table = PolicyTable::new();
        table.insert_host("example.com", cfg(Options::TTL));
        let (before, _) = table.lookup("example.com");

        table.insert_host(".com", cfg(Options::MSS));
        let (after, _) = table.lookup("example.com");

        assert_eq!(before.options, after.options);
    }
}
