//! The process-wide "world": policy table, DNS caches, and Nose table,
//! threaded explicitly through a handle rather than kept as bare statics.
use crate::cache::DnsCaches;
use crate::nose::Nose;
use crate::policy::PolicyTable;

pub struct World {
    pub policy: PolicyTable,
    pub caches: DnsCaches,
    pub nose: Nose,
    /// Upstream used when no policy entry (and no per-entry `server=`)
    /// applies.
    pub global_dns: String,
    /// Maximum number of parent suffixes probed during cache lookup,
    /// mirrored from `policy.subdomain_depth` for convenience.
    pub subdomain_depth: usize,
}

impl World {
    pub fn new(policy: PolicyTable, global_dns: String) -> Self {
        World::from_parts(policy, DnsCaches::new(), Nose::new(), global_dns)
    }

    /// Builds a world around caches and a Nose table populated ahead of
    /// time by [`crate::config::load`], instead of starting both empty.
    pub fn from_parts(policy: PolicyTable, caches: DnsCaches, nose: Nose, global_dns: String) -> Self {
        let subdomain_depth = policy.subdomain_depth;
        World {
            policy,
            caches,
            nose,
            global_dns,
            subdomain_depth,
        }
    }
}
