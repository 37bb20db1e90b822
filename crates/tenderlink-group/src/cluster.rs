//! Per-customer clustering of canonical cores.
//!
//! Cores are bucketed by their first `prefix_len` characters and assigned greedily to the
//! first cluster whose representative is similar enough. Assignment never compares cores
//! from different buckets.
//!
//! The merge pass that follows deliberately relaxes that rule: it compares representatives
//! of clusters from different buckets of the same customer, so variants whose leading
//! characters differ can still join. Clusters from buckets over the size cap never take
//! part. At most one pair merges per round, so chains of three or more pairwise-adjacent
//! variants are not guaranteed to collapse.

use std::collections::{HashMap, HashSet};

use tenderlink_core::ResolveConfig;
use tracing::{debug, warn};

use crate::identity::CustomerKey;
use crate::similarity::{char_len, SimilarityCache, SimilarityPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    customer: CustomerKey,
    members: Vec<String>,
    representative: usize,
}

impl Cluster {
    pub fn singleton(customer: impl Into<CustomerKey>, core: impl Into<String>) -> Self {
        Self {
            customer: customer.into(),
            members: vec![core.into()],
            representative: 0,
        }
    }

    pub fn customer(&self) -> &CustomerKey {
        &self.customer
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Longest member; the earliest one wins ties.
    pub fn representative(&self) -> &str {
        &self.members[self.representative]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, core: &str) -> bool {
        self.members.iter().any(|m| m == core)
    }

    fn push(&mut self, core: String) {
        if char_len(&core) > char_len(self.representative()) {
            self.representative = self.members.len();
        }
        self.members.push(core);
    }

    fn absorb(&mut self, other: Cluster) {
        self.members.extend(other.members);
        self.representative = pick_representative(&self.members).unwrap_or(0);
    }
}

/// Index of the longest string, first occurrence on ties.
pub fn pick_representative(members: &[String]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, member) in members.iter().enumerate() {
        match best {
            Some(b) if char_len(&members[b]) >= char_len(member) => {}
            _ => best = Some(idx),
        }
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    pub threshold: f64,
    pub prefix_len: usize,
    pub max_bucket_size: usize,
    pub merge_rounds: usize,
    pub policy: SimilarityPolicy,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self::from(&ResolveConfig::default())
    }
}

impl From<&ResolveConfig> for ClusterSettings {
    fn from(config: &ResolveConfig) -> Self {
        Self {
            threshold: config.threshold,
            prefix_len: config.prefix_len,
            max_bucket_size: config.max_bucket_size,
            merge_rounds: config.merge_rounds,
            policy: SimilarityPolicy::from(config),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStats {
    pub unique_cores: usize,
    pub buckets: usize,
    pub oversized_buckets: usize,
    pub merges: usize,
}

pub fn bucket_key(core: &str, prefix_len: usize) -> String {
    core.chars().take(prefix_len).collect()
}

/// Clusters one customer's cores with a fresh similarity cache.
pub fn cluster_customer(
    customer: impl Into<CustomerKey>,
    cores: &[String],
    settings: &ClusterSettings,
) -> Vec<Cluster> {
    let mut cache = SimilarityCache::new();
    BucketedClusterer::new(*settings)
        .cluster(&customer.into(), cores, &mut cache)
        .0
}

pub struct BucketedClusterer {
    settings: ClusterSettings,
}

impl BucketedClusterer {
    pub fn new(settings: ClusterSettings) -> Self {
        Self { settings }
    }

    /// Partitions `cores` (deduplicated here, first occurrence kept) into clusters.
    /// The cache must not be shared with another customer's call.
    pub fn cluster(
        &self,
        customer: &CustomerKey,
        cores: &[String],
        cache: &mut SimilarityCache,
    ) -> (Vec<Cluster>, ClusterStats) {
        let unique = dedup_in_order(cores);
        let mut stats = ClusterStats {
            unique_cores: unique.len(),
            ..Default::default()
        };

        let buckets = self.bucketize(&unique);
        stats.buckets = buckets.len();

        let mut mergeable = Vec::new();
        let mut capped = Vec::new();
        for (key, bucket) in buckets {
            if bucket.len() > self.settings.max_bucket_size {
                warn!(
                    customer = %customer,
                    bucket_key = %key,
                    size = bucket.len(),
                    max = self.settings.max_bucket_size,
                    "bucket over size cap; emitting singletons"
                );
                stats.oversized_buckets += 1;
                capped.extend(bucket.into_iter().map(|core| Cluster::singleton(customer.clone(), core)));
            } else {
                mergeable.extend(self.assign(customer, bucket, cache));
            }
        }

        stats.merges = self.merge(&mut mergeable, cache);
        debug!(
            customer = %customer,
            clusters = mergeable.len() + capped.len(),
            merges = stats.merges,
            cache_entries = cache.len(),
            "clustered customer cores"
        );

        mergeable.extend(capped);
        (mergeable, stats)
    }

    fn bucketize(&self, cores: &[String]) -> Vec<(String, Vec<String>)> {
        let mut order: Vec<(String, Vec<String>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for core in cores {
            let key = bucket_key(core, self.settings.prefix_len);
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                order.push((key, Vec::new()));
                order.len() - 1
            });
            order[slot].1.push(core.clone());
        }
        order
    }

    fn assign(&self, customer: &CustomerKey, mut bucket: Vec<String>, cache: &mut SimilarityCache) -> Vec<Cluster> {
        // Stable: equal lengths keep input order.
        bucket.sort_by_key(|core| std::cmp::Reverse(char_len(core)));

        let mut clusters: Vec<Cluster> = Vec::new();
        for core in bucket {
            let hit = clusters.iter().position(|cluster| {
                cache.score(cluster.representative(), &core, &self.settings.policy) >= self.settings.threshold
            });
            match hit {
                Some(idx) => clusters[idx].push(core),
                None => clusters.push(Cluster::singleton(customer.clone(), core)),
            }
        }
        clusters
    }

    fn merge(&self, clusters: &mut Vec<Cluster>, cache: &mut SimilarityCache) -> usize {
        let mut merges = 0;
        for _ in 0..self.settings.merge_rounds {
            let Some((i, j)) = self.first_mergeable_pair(clusters, cache) else {
                break;
            };
            let absorbed = clusters.remove(j);
            clusters[i].absorb(absorbed);
            merges += 1;
        }
        merges
    }

    fn first_mergeable_pair(&self, clusters: &[Cluster], cache: &mut SimilarityCache) -> Option<(usize, usize)> {
        for i in 0..clusters.len() {
            for j in (i + 1)..clusters.len() {
                let score = cache.score(
                    clusters[i].representative(),
                    clusters[j].representative(),
                    &self.settings.policy,
                );
                if score >= self.settings.threshold {
                    return Some((i, j));
                }
            }
        }
        None
    }
}

fn dedup_in_order(cores: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    cores
        .iter()
        .filter(|core| seen.insert(core.as_str()))
        .cloned()
        .collect()
}
