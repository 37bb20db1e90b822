use std::collections::HashMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::canonical::normalize_text;
use crate::cluster::Cluster;

pub const PROJECT_ID_LEN: usize = 12;

/// First 12 hex chars of `sha256(normalize(customer) + "\n" + representative)`.
pub fn project_id(customer: &str, representative: &str) -> String {
    digest(normalize_text(customer).as_bytes(), representative)
}

fn digest(customer: &[u8], representative: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(customer);
    hasher.update(b"\n");
    hasher.update(representative.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(PROJECT_ID_LEN);
    id
}

/// Customer partition. Records without a customer never share a key with a named one,
/// including a customer literally called `unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CustomerKey {
    Named(String),
    Unknown,
}

impl CustomerKey {
    /// Width-normalised name; absent or blank names are [`CustomerKey::Unknown`].
    pub fn from_name(name: Option<&str>) -> Self {
        match name.map(normalize_text) {
            Some(name) if !name.is_empty() => CustomerKey::Named(name),
            _ => CustomerKey::Unknown,
        }
    }

    pub fn label<'a>(&'a self, unknown: &'a str) -> &'a str {
        match self {
            CustomerKey::Named(name) => name,
            CustomerKey::Unknown => unknown,
        }
    }

    /// Named keys hash as [`project_id`]. Unknown hashes a NUL customer, which no
    /// normalised name can contain.
    pub fn project_id(&self, representative: &str) -> String {
        match self {
            CustomerKey::Named(name) => project_id(name, representative),
            CustomerKey::Unknown => digest(b"\0", representative),
        }
    }
}

impl From<&str> for CustomerKey {
    fn from(name: &str) -> Self {
        CustomerKey::from_name(Some(name))
    }
}

impl fmt::Display for CustomerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CustomerKey::Named(name) => f.write_str(name),
            CustomerKey::Unknown => f.write_str("<unknown>"),
        }
    }
}

/// `(customer, canonical core) -> project_id` lookup built from clusters.
#[derive(Debug, Clone, Default)]
pub struct ProjectIndex {
    ids: HashMap<(CustomerKey, String), String>,
}

impl ProjectIndex {
    pub fn get(&self, customer: &CustomerKey, core: &str) -> Option<&str> {
        self.ids
            .get(&(customer.clone(), core.to_string()))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn project_count(&self) -> usize {
        let mut ids: Vec<&String> = self.ids.values().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

pub fn assign_ids(clusters: &[Cluster]) -> ProjectIndex {
    let mut index = ProjectIndex::default();
    for cluster in clusters {
        let id = cluster.customer().project_id(cluster.representative());
        for member in cluster.members() {
            index
                .ids
                .insert((cluster.customer().clone(), member.clone()), id.clone());
        }
    }
    index
}
