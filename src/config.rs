//! The configuration grammar (line-oriented, `#` comments, blank lines
//! skipped). A straight imperative line scanner, same style as the
//! upstream tool's own argument parser: no parser-combinator crate.
use std::net::IpAddr;

use ipnet::IpNet;
use log::warn;

use crate::cache::DnsCaches;
use crate::error::{Error, Result};
use crate::nose::Nose;
use crate::options::Options;
use crate::policy::{Config, PolicyTable, DEFAULT_KEY};

/// A request to start an external port-forwarder, emitted for
/// `tcpmapping=`/`udpmapping=` lines. The forwarder itself lives outside
/// this crate; this is the call the engine hands off to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub local: String,
    pub remote: String,
}

/// A forwarder request collector passed to [`load`]. The default
/// no-op collector just records the mappings; callers wire in the real
/// out-of-core forwarder.
pub trait Forwarder {
    fn tcp_mapping(&mut self, mapping: PortMapping);
    fn udp_mapping(&mut self, mapping: PortMapping);
}

/// Collects mappings in-memory; used by tests and by callers that don't
/// have a forwarder wired up yet.
#[derive(Debug, Default)]
pub struct RecordingForwarder {
    pub tcp: Vec<PortMapping>,
    pub udp: Vec<PortMapping>,
}

impl Forwarder for RecordingForwarder {
    fn tcp_mapping(&mut self, mapping: PortMapping) {
        self.tcp.push(mapping);
    }

    fn udp_mapping(&mut self, mapping: PortMapping) {
        self.udp.push(mapping);
    }
}

/// Accumulated "current" state the loop carries between lines, mirroring
/// how each binding line picks up whatever `server=`/`method=`/`ttl=`/...
/// directive most recently applied.
struct Cursor {
    config: Config,
    global_dns: Option<String>,
    dns_min_ttl: u8,
    subdomain_depth: usize,
}

impl Default for Cursor {
    fn default() -> Self {
        Cursor {
            config: Config::default(),
            global_dns: None,
            dns_min_ttl: 0,
            subdomain_depth: 2,
        }
    }
}

/// Parses a complete config file's text into a [`PolicyTable`], caches,
/// and Nose reservations. `caches`/`nose` are populated as a side effect
/// since binding lines can seed DNS memos directly.
pub fn load(
    text: &str,
    caches: &DnsCaches,
    nose: &Nose,
    forwarder: &mut dyn Forwarder,
) -> Result<(PolicyTable, String)> {
    let mut table = PolicyTable::new();
    let mut cursor = Cursor::default();

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Err(e) = process_line(line, &mut cursor, &mut table, caches, nose, forwarder) {
            return Err(Error::config(format!("line {}: {e}", lineno + 1)));
        }
    }

    table.subdomain_depth = cursor.subdomain_depth;
    let global_dns = cursor.global_dns.unwrap_or_default();
    Ok((table, global_dns))
}

fn process_line(
    line: &str,
    cursor: &mut Cursor,
    table: &mut PolicyTable,
    caches: &DnsCaches,
    nose: &Nose,
    forwarder: &mut dyn Forwarder,
) -> Result<()> {
    let Some((key, value)) = line.split_once('=') else {
        return bare_key(line, cursor, table, caches, nose);
    };
    let key = key.trim();
    let value = value.trim();

    match key {
        "server" => {
            cursor.config.upstream = value.to_string();
            if cursor.global_dns.as_deref().unwrap_or("").is_empty() {
                cursor.global_dns = Some(value.to_string());
            }
        }
        "dns-min-ttl" => cursor.dns_min_ttl = value.parse()?,
        "method" => {
            let (opts, unknown) = Options::from_method_csv(value);
            for name in unknown {
                warn!("unknown method name in config: {name}");
            }
            cursor.config.options = opts;
        }
        "ttl" => cursor.config.ttl_min = value.parse()?,
        "max-ttl" => cursor.config.ttl_max = value.parse()?,
        "mss" => cursor.config.mss = value.parse()?,
        "device" => {
            cursor.config.device = if value == "default" { String::new() } else { value.to_string() };
        }
        "subdomain" => cursor.subdomain_depth = value.parse()?,
        "tcpmapping" => forwarder.tcp_mapping(parse_mapping(value)?),
        "udpmapping" => forwarder.udp_mapping(parse_mapping(value)?),
        _ => binding_line(key, value, cursor, table, caches, nose),
    }

    Ok(())
}

fn parse_mapping(value: &str) -> Result<PortMapping> {
    let (local, remote) = value
        .split_once('>')
        .ok_or_else(|| Error::config(format!("mapping missing '>': {value}")))?;
    Ok(PortMapping {
        local: local.trim().to_string(),
        remote: remote.trim().to_string(),
    })
}

fn binding_line(key: &str, value: &str, cursor: &mut Cursor, table: &mut PolicyTable, caches: &DnsCaches, nose: &Nose) {
    let config = cursor.config.clone();

    if let Ok(ip) = key.parse::<IpAddr>() {
        table.insert_ip(ip, config.clone());
        let index = if config.is_under_policy() { nose.append(key) } else { 0 };
        if ip.is_ipv4() {
            caches.a.insert(key, crate::cache::DomainIp::new(index, vec![ip]));
        } else {
            caches.aaaa.insert(key, crate::cache::DomainIp::new(index, vec![ip]));
        }
        return;
    }

    if key.contains('/') {
        if let Ok(net) = key.parse::<IpNet>() {
            table.insert_cidr(net, config.clone());
            return;
        }
    }

    // Hostname binding.
    table.insert_host(key, config.clone());
    bind_hostname_value(key, value, &config, caches, nose);

    if key == DEFAULT_KEY {
        table.set_default(config);
    }
}

fn bind_hostname_value(key: &str, value: &str, config: &Config, caches: &DnsCaches, nose: &Nose) {
    let mut addresses = Vec::new();

    if let Some(alias) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        if let Some(memo) = caches.a.get(alias) {
            addresses.extend(memo.addresses);
        }
        if let Some(memo) = caches.aaaa.get(alias) {
            addresses.extend(memo.addresses);
        }
        if addresses.is_empty() {
            warn!("alias target {alias} for {key} has no cached addresses; binding config only");
        }
    } else if !value.is_empty() {
        for part in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match part.parse::<IpAddr>() {
                Ok(ip) => addresses.push(ip),
                Err(_) => warn!("unparsable address {part} for {key}; skipped"),
            }
        }
    }

    let index = if config.is_under_policy() { nose.append(key) } else { 0 };

    let (v4, v6): (Vec<IpAddr>, Vec<IpAddr>) = addresses.into_iter().partition(|ip| ip.is_ipv4());
    if !v4.is_empty() || index > 0 {
        caches.a.insert(key, crate::cache::DomainIp::new(index, v4));
    }
    if !v6.is_empty() || index > 0 {
        caches.aaaa.insert(key, crate::cache::DomainIp::new(index, v6));
    }

    if config.options.contains(Options::HTTPS) {
        let https_addrs = if config.options.contains(Options::IPV6) {
            caches.aaaa.get(key).map(|m| m.addresses).unwrap_or_default()
        } else {
            caches.a.get(key).map(|m| m.addresses).unwrap_or_default()
        };
        caches.https.insert(key, crate::cache::DomainIp::new(index, https_addrs));
    } else {
        caches.https.insert(key, crate::cache::DomainIp::new(index, Vec::new()));
    }
}

/// A bare `key` line: stdlib host resolution, per the config grammar's
/// fallback case. `default.config.com` is excluded (it is only ever
/// written with `=`).
fn bare_key(key: &str, cursor: &mut Cursor, table: &mut PolicyTable, caches: &DnsCaches, nose: &Nose) -> Result<()> {
    use std::net::ToSocketAddrs;

    let config = cursor.config.clone();
    match (key, 0).to_socket_addrs() {
        Ok(addrs) => {
            let ips: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            table.insert_host(key, config.clone());
            let index = if config.is_under_policy() { nose.append(key) } else { 0 };
            let (v4, v6): (Vec<IpAddr>, Vec<IpAddr>) = ips.into_iter().partition(|ip| ip.is_ipv4());
            caches.a.insert(key, crate::cache::DomainIp::new(index, v4));
            caches.aaaa.insert(key, crate::cache::DomainIp::new(index, v6));
        }
        Err(_) => {
            if !cursor.config.upstream.is_empty() || cursor.config.is_under_policy() {
                table.insert_host(key, config.clone());
                bind_hostname_value(key, "", &config, caches, nose);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (DnsCaches, Nose, RecordingForwarder) {
        (DnsCaches::new(), Nose::new(), RecordingForwarder::default())
    }

    #[test]
    fn method_then_binding_sets_options_and_caches() {
        let (caches, nose, mut fwd) = fresh();
        let text = "method=ttl\nexample.com=1.1.1.1\n";
        let (table, _) = load(text, &caches, &nose, &mut fwd).unwrap();

        let (cfg, found) = table.lookup("example.com");
        assert!(found);
        assert!(cfg.options.contains(Options::TTL));

        let memo = caches.a.get("example.com").unwrap();
        assert_eq!(memo.index, 1);
        assert_eq!(memo.addresses, vec!["1.1.1.1".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn comment_and_blank_lines_are_skipped() {
        let (caches, nose, mut fwd) = fresh();
        let text = "# a comment\n\n  \nmethod=ttl # trailing comment\nexample.com=1.1.1.1\n";
        let (table, _) = load(text, &caches, &nose, &mut fwd).unwrap();
        assert!(table.lookup("example.com").1);
    }

    #[test]
    fn cidr_key_is_normalized() {
        let (caches, nose, mut fwd) = fresh();
        let text = "method=ttl\n10.0.0.0/24=\n";
        let (table, _) = load(text, &caches, &nose, &mut fwd).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.get_exact("10.0.0.0/24").is_some());
    }

    #[test]
    fn alias_binding_copies_cached_addresses() {
        let (caches, nose, mut fwd) = fresh();
        let text = "method=ttl\nbase.example=9.9.9.9\nmethod=ttl\nalias.example=[base.example]\n";
        let (_, _) = load(text, &caches, &nose, &mut fwd).unwrap();
        let memo = caches.a.get("alias.example").unwrap();
        assert_eq!(memo.addresses, vec!["9.9.9.9".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn failed_alias_still_records_config_and_continues_to_next_line() {
        let (caches, nose, mut fwd) = fresh();
        let text = "method=ttl\nalias.example=[missing.example]\nafter.example=1.1.1.1\n";
        let (table, _) = load(text, &caches, &nose, &mut fwd).unwrap();
        assert!(table.lookup("alias.example").1);
        assert!(table.lookup("after.example").1);
    }

    #[test]
    fn default_config_key_populates_fallback() {
        let (caches, nose, mut fwd) = fresh();
        let text = "method=proxy\ndefault.config.com=\n";
        let (table, _) = load(text, &caches, &nose, &mut fwd).unwrap();
        assert!(table.default_config().unwrap().options.contains(Options::PROXY));
    }

    #[test]
    fn bad_ttl_integer_aborts_load() {
        let (caches, nose, mut fwd) = fresh();
        let text = "ttl=not-a-number\n";
        assert!(load(text, &caches, &nose, &mut fwd).is_err());
    }

    #[test]
    fn unknown_method_name_is_logged_and_continues() {
        let (caches, nose, mut fwd) = fresh();
        let text = "method=ttl,bogus\nexample.com=1.1.1.1\n";
        let result = load(text, &caches, &nose, &mut fwd);
        assert!(result.is_ok());
    }

    #[test]
    fn server_line_sets_global_dns_only_once() {
        let (caches, nose, mut fwd) = fresh();
        let text = "server=udp:///1.1.1.1:53\nexample.com=\nserver=udp:///9.9.9.9:53\n";
        let (_, global) = load(text, &caches, &nose, &mut fwd).unwrap();
        assert_eq!(global, "udp:///1.1.1.1:53");
    }

    #[test]
    fn tcpmapping_line_is_forwarded() {
        let (caches, nose, mut fwd) = fresh();
        let text = "tcpmapping=127.0.0.1:8080>10.0.0.1:80\n";
        load(text, &caches, &nose, &mut fwd).unwrap();
        assert_eq!(
            fwd.tcp[0],
            PortMapping {
                local: "127.0.0.1:8080".to_string(),
                remote: "10.0.0.1:80".to_string(),
            }
        );
    }
}
