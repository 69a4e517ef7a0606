//! The DNS service (intercept -> cache -> policy ->
//! upstream -> lie-or-passthrough.
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, warn};

use crate::cache::{DnsCache, DomainIp};
use crate::dns::transport::{self, UpstreamDescriptor};
use crate::dns::wire::{self, QTYPE_A, QTYPE_AAAA};
use crate::options::Options;
use crate::policy::Config;
use crate::world::World;

pub struct DnsService {
    world: Arc<World>,
}

impl DnsService {
    pub fn new(world: Arc<World>) -> Self {
        DnsService { world }
    }

    fn cache_for(&self, qtype: u16) -> Option<&DnsCache> {
        match qtype {
            QTYPE_A => Some(&self.world.caches.a),
            QTYPE_AAAA => Some(&self.world.caches.aaaa),
            _ => None,
        }
    }

    /// Probes `name`, then its suffixes, in `cache`. A name needing `k`
    /// strips to reach a cached suffix is only reachable once
    /// `subdomain_depth > k`, mirroring [`crate::policy::PolicyTable::lookup`].
    /// A hit propagates but is never copied into the narrower name's own
    /// entry.
    fn cache_lookup_with_suffix(&self, cache: &DnsCache, name: &str) -> Option<DomainIp> {
        if let Some(memo) = cache.get(name) {
            return Some(memo);
        }
        let mut rest = name;
        for _ in 0..self.world.subdomain_depth.saturating_sub(1) {
            match rest.split_once('.') {
                Some((_, tail)) if !tail.is_empty() => {
                    if let Some(memo) = cache.get(tail) {
                        return Some(memo);
                    }
                    rest = tail;
                }
                _ => break,
            }
        }
        None
    }

    /// `NSLookup(name, qtype, server)`: the host-local entry point. Returns
    /// the Nose index (0 if not under policy) and the resolved addresses.
    /// Does not distinguish "lie" from "real" — callers consume the Nose
    /// index directly.
    pub async fn ns_lookup(&self, name: &str, qtype: u16, server: Option<&str>) -> (usize, Vec<IpAddr>) {
        if let Some(cache) = self.cache_for(qtype) {
            if let Some(memo) = self.cache_lookup_with_suffix(cache, name) {
                return (memo.index, memo.addresses);
            }
        }

        let resolved = self.resolve(name, qtype, server, None).await;
        (resolved.index, resolved.ips)
    }

    /// `NSRequest(wire_request)`: the wire-format entry point used by the
    /// DNS-server front-end. Returns `None` on a malformed request.
    pub async fn ns_request(&self, request: &[u8]) -> Option<Vec<u8>> {
        let (name, qtype) = match wire::get_qname(request) {
            Ok(v) => v,
            Err(e) => {
                debug!("malformed DNS request: {e}");
                return None;
            }
        };

        if qtype != QTYPE_A && qtype != QTYPE_AAAA {
            return wire::build_response(request, &[], qtype).ok();
        }

        if let Some(cache) = self.cache_for(qtype) {
            if let Some(memo) = self.cache_lookup_with_suffix(cache, &name) {
                return Some(self.respond_from_memo(request, &memo, qtype));
            }
        }

        let resolved = self.resolve(&name, qtype, None, Some(request)).await;
        if let Some(raw) = resolved.raw_response {
            return Some(raw);
        }
        let memo = DomainIp::new(resolved.index, resolved.ips);
        Some(self.respond_from_memo(request, &memo, qtype))
    }

    fn respond_from_memo(&self, request: &[u8], memo: &DomainIp, qtype: u16) -> Vec<u8> {
        if memo.index > 0 {
            wire::build_lie(request, memo.index, qtype)
                .unwrap_or_else(|_| wire::build_response(request, &[], qtype).unwrap_or_default())
        } else {
            wire::build_response(request, &memo.addresses, qtype).unwrap_or_default()
        }
    }

    /// The remainder of the `NSRequest` algorithm, shared between
    /// `ns_lookup` and `ns_request`. `raw_request` carries the original
    /// wire bytes when called from `ns_request`; `ns_lookup` has no such
    /// bytes to forward and passes `None`.
    async fn resolve(&self, name: &str, qtype: u16, server: Option<&str>, raw_request: Option<&[u8]>) -> Resolved {
        let (config, found) = self.world.policy.lookup(name);

        let upstream_str = if found && !config.upstream.is_empty() {
            config.upstream.clone()
        } else if let Some(s) = server {
            s.to_string()
        } else {
            self.world.global_dns.clone()
        };

        let desc = match UpstreamDescriptor::parse(&upstream_str) {
            Ok(d) => d,
            Err(e) => {
                warn!("bad upstream descriptor {upstream_str:?}: {e}");
                return Resolved::empty();
            }
        };

        // Option `type=A`/`type=AAAA`: single-family domains.
        if let Some(forced) = desc.forced_qtype {
            if forced != qtype {
                return Resolved::empty();
            }
        }

        if config.is_under_policy() {
            return self.resolve_under_policy(name, qtype, &config, &desc).await;
        }

        self.resolve_unpoliced(name, qtype, &desc, raw_request).await
    }

    async fn resolve_under_policy(
        &self,
        name: &str,
        qtype: u16,
        config: &Config,
        desc: &UpstreamDescriptor,
    ) -> Resolved {
        let ipv6_flag = config.options.contains(Options::IPV6);

        if qtype == QTYPE_AAAA && !ipv6_flag {
            return Resolved::empty();
        }

        if desc.transport.is_none() {
            let index = self.world.nose.append(name);
            self.world.caches.a.insert(name, DomainIp::new(index, Vec::new()));
            self.world.caches.aaaa.insert(name, DomainIp::new(index, Vec::new()));
            return Resolved { index, ips: Vec::new(), raw_response: None };
        }

        let query_qtype = if ipv6_flag { QTYPE_AAAA } else { qtype };
        let request = wire::pack_request(name, query_qtype, desc.ecs);

        let response = match transport::query(desc, &request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("upstream resolve failed for {name}: {e}");
                let index = self.world.nose.append(name);
                self.world.caches.a.insert(name, DomainIp::new(index, Vec::new()));
                self.world.caches.aaaa.insert(name, DomainIp::new(index, Vec::new()));
                return Resolved { index, ips: Vec::new(), raw_response: None };
            }
        };

        let mut ips = decode_and_rewrite(&response, desc);

        let index = self.world.nose.append(name);
        let other_cache = if query_qtype == QTYPE_AAAA {
            &self.world.caches.a
        } else {
            &self.world.caches.aaaa
        };
        let own_cache = if query_qtype == QTYPE_AAAA {
            &self.world.caches.aaaa
        } else {
            &self.world.caches.a
        };
        own_cache.insert(name, DomainIp::new(index, std::mem::take(&mut ips)));
        other_cache.insert(name, DomainIp::new(index, Vec::new()));

        let own = own_cache.get(name).unwrap_or_default();
        Resolved {
            index,
            ips: own.addresses,
            raw_response: None,
        }
    }

    /// When `raw_request` is `Some`, those exact wire bytes (the real
    /// client's ID, flags, and EDNS options included) go out to upstream
    /// instead of a freshly packed query, and — unless `desc.pd` forces a
    /// rewrite that only a synthesized response can carry — upstream's
    /// reply comes back unchanged in `Resolved::raw_response` rather than
    /// being re-derived from the decoded addresses.
    async fn resolve_unpoliced(
        &self,
        name: &str,
        qtype: u16,
        desc: &UpstreamDescriptor,
        raw_request: Option<&[u8]>,
    ) -> Resolved {
        if desc.transport.is_none() {
            return Resolved::empty();
        }

        let request = raw_request
            .map(|b| b.to_vec())
            .unwrap_or_else(|| wire::pack_request(name, qtype, desc.ecs));

        let response = match transport::query(desc, &request).await {
            Ok(r) => r,
            Err(e) => {
                warn!("upstream resolve failed for {name}: {e}");
                return Resolved::empty();
            }
        };

        if desc.pd.is_none() {
            let ips = decode_and_rewrite(&response, desc);
            if let Some(cache) = self.cache_for(qtype) {
                cache.insert(name, DomainIp::new(0, ips.clone()));
            }
            return Resolved {
                index: 0,
                ips,
                raw_response: raw_request.map(|_| response),
            };
        }

        let ips = decode_and_rewrite(&response, desc);
        if let Some(cache) = self.cache_for(qtype) {
            cache.insert(name, DomainIp::new(0, ips.clone()));
        }
        Resolved { index: 0, ips, raw_response: None }
    }
}

struct Resolved {
    index: usize,
    ips: Vec<IpAddr>,
    /// Upstream's raw reply bytes, set only when the unpoliced path forwarded
    /// a real client request verbatim and no address rewrite was needed.
    raw_response: Option<Vec<u8>>,
}

impl Resolved {
    fn empty() -> Self {
        Resolved {
            index: 0,
            ips: Vec::new(),
            raw_response: None,
        }
    }
}

/// Decodes answers out of a raw upstream response and, if `desc.pd` is
/// set, rewrites each address by textually prepending the prefix before
/// re-parsing (DNS64-style family synthesis).
fn decode_and_rewrite(response: &[u8], desc: &UpstreamDescriptor) -> Vec<IpAddr> {
    let answers = match wire::get_answers(response) {
        Ok(a) => a,
        Err(e) => {
            debug!("could not decode upstream answers: {e}");
            return Vec::new();
        }
    };

    let mut ips: Vec<IpAddr> = answers.a.into_iter().map(IpAddr::V4).collect();
    ips.extend(answers.aaaa.into_iter().map(IpAddr::V6));

    if let Some(pd) = &desc.pd {
        ips = ips
            .iter()
            .filter_map(|ip| format!("{pd}{ip}").parse::<IpAddr>().ok())
            .collect();
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Config, PolicyTable};

    fn world_with_policy(mut table: PolicyTable) -> Arc<World> {
        table.subdomain_depth = 2;
        Arc::new(World::new(table, "udp:///1.1.1.1:53".to_string()))
    }

    #[tokio::test]
    async fn cache_hit_returns_lie_without_upstream_traffic() {
        let table = PolicyTable::new();
        let world = world_with_policy(table);
        let index = world.nose.append("example.com");
        world
            .caches
            .a
            .insert("example.com", DomainIp::new(index, vec!["1.1.1.1".parse().unwrap()]));

        let service = DnsService::new(world);
        let req = wire::pack_request("example.com", QTYPE_A, None);
        let resp = service.ns_request(&req).await.unwrap();
        let answers = wire::get_answers(&resp).unwrap();
        let ip = IpAddr::V4(answers.a[0]);
        assert_eq!(wire::decode_lie_index(&ip), Some(index));
    }

    #[tokio::test]
    async fn non_address_qtype_gets_empty_response() {
        let world = world_with_policy(PolicyTable::new());
        let service = DnsService::new(world);
        let req = wire::pack_request("example.com", 16, None); // TXT
        let resp = service.ns_request(&req).await.unwrap();
        let answers = wire::get_answers(&resp).unwrap();
        assert!(answers.a.is_empty() && answers.aaaa.is_empty());
    }

    #[tokio::test]
    async fn unrecognized_upstream_scheme_issues_lie_without_dialing() {
        let mut table = PolicyTable::new();
        table.insert_host(
            "blocked.example",
            Config {
                options: Options::TTL,
                upstream: "quic:///9.9.9.9:53".to_string(),
                ..Default::default()
            },
        );
        let world = world_with_policy(table);
        let service = DnsService::new(world.clone());

        let req = wire::pack_request("blocked.example", QTYPE_A, None);
        let resp = service.ns_request(&req).await.unwrap();
        let answers = wire::get_answers(&resp).unwrap();
        assert_eq!(answers.a.len(), 1);
        assert!(world.caches.a.contains("blocked.example"));
        assert!(world.caches.aaaa.contains("blocked.example"));
    }
}
