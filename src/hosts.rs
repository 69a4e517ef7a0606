//! Hosts file parsing: tab-separated `<ip>\t<name>` lines, `#` comments.
//! Entries populate the appropriate DNS cache and reserve a Nose index
//! when the name is already under policy.
use std::net::IpAddr;

use log::warn;

use crate::cache::{DnsCaches, DomainIp};
use crate::nose::Nose;
use crate::policy::PolicyTable;

/// Parses hosts-file text, updating `caches` and `nose` in place.
/// Malformed lines are logged and skipped rather than aborting the load.
pub fn load(text: &str, table: &PolicyTable, caches: &DnsCaches, nose: &Nose) {
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((ip_field, name_field)) = line.split_once('\t') else {
            warn!("hosts file line {}: missing tab separator", lineno + 1);
            continue;
        };
        let name = name_field.trim();
        let Ok(ip) = ip_field.trim().parse::<IpAddr>() else {
            warn!("hosts file line {}: unparsable address {ip_field:?}", lineno + 1);
            continue;
        };

        let (config, _) = table.lookup(name);
        let index = if config.is_under_policy() { nose.append(name) } else { 0 };

        let cache = if ip.is_ipv4() { &caches.a } else { &caches.aaaa };
        cache.insert(name, DomainIp::new(index, vec![ip]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_entry_populates_a_cache() {
        let caches = DnsCaches::new();
        let nose = Nose::new();
        let table = PolicyTable::new();
        load("1.2.3.4\texample.com\n", &table, &caches, &nose);
        let memo = caches.a.get("example.com").unwrap();
        assert_eq!(memo.index, 0);
        assert_eq!(memo.addresses, vec!["1.2.3.4".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn ipv6_entry_goes_to_aaaa_cache() {
        let caches = DnsCaches::new();
        let nose = Nose::new();
        let table = PolicyTable::new();
        load("::1\tlocalhost6\n", &table, &caches, &nose);
        assert!(caches.aaaa.contains("localhost6"));
        assert!(!caches.a.contains("localhost6"));
    }

    #[test]
    fn malformed_lines_are_skipped_without_aborting() {
        let caches = DnsCaches::new();
        let nose = Nose::new();
        let table = PolicyTable::new();
        load("not-an-ip\tbroken.example\n1.2.3.4\tgood.example\n", &table, &caches, &nose);
        assert!(!caches.a.contains("broken.example"));
        assert!(caches.a.contains("good.example"));
    }

    #[test]
    fn under_policy_name_reserves_nose_index() {
        use crate::options::Options;
        use crate::policy::Config;

        let caches = DnsCaches::new();
        let nose = Nose::new();
        let mut table = PolicyTable::new();
        table.insert_host(
            "policed.example",
            Config {
                options: Options::TTL,
                ..Default::default()
            },
        );
        load("5.6.7.8\tpoliced.example\n", &table, &caches, &nose);
        let memo = caches.a.get("policed.example").unwrap();
        assert!(memo.index > 0);
    }
}
