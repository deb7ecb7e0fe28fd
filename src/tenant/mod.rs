//! Tenant ("chat") records and the directory that resolves them.
//!
//! A tenant owns one knowledge partition in the vector index and a set of
//! hostnames its widget may be embedded on. Hostnames are normalized the
//! same way when the directory is built and when a request is looked up.

pub mod directory;
pub mod source;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use directory::{DirectoryStats, TenantDirectory};
pub use source::{FileTenantSource, RemoteTenantSource, TenantSource};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The configured source exists but cannot be used (missing file,
    /// malformed document). The directory is emptied.
    #[error("tenant source is invalid: {0}")]
    Invalid(String),
    /// The source could not be reached. The previous snapshot is kept.
    #[error("tenant source is unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    /// Scope used for every vector-index query made on behalf of this tenant.
    pub partition_key: String,
    /// Normalized hostnames (without `www.`).
    pub allowed_hosts: BTreeSet<String>,
    pub system_prompt: Option<String>,
    pub display_name: String,
}

impl TenantRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            partition_key: id.clone(),
            display_name: id.clone(),
            id,
            allowed_hosts: BTreeSet::new(),
            system_prompt: None,
        }
    }

    pub fn with_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_hosts
            .extend(hosts.into_iter().filter_map(|h| normalize_host(h.as_ref())));
        self
    }

    pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = partition_key.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt.filter(|p| !p.trim().is_empty());
        self
    }
}

/// Reduces a hostname, origin or URL to the bare lowercase host used as a
/// directory key: scheme, userinfo, path, port, trailing dots and any leading
/// `www.` / `.` are removed. Returns `None` when nothing is left.
///
/// `normalize_host(normalize_host(x)) == normalize_host(x)` for every input.
pub fn normalize_host(value: &str) -> Option<String> {
    let mut current = value.to_lowercase();
    // Each pass only removes characters, so this reaches a fixed point.
    loop {
        let next = strip_host_once(&current);
        if next == current {
            break;
        }
        current = next;
    }

    if current.is_empty() {
        None
    } else {
        Some(current)
    }
}

fn strip_host_once(value: &str) -> String {
    let mut host = value.trim();

    if let Some((_, rest)) = host.split_once("://") {
        host = rest;
    }
    if let Some(end) = host.find(['/', '?', '#']) {
        host = &host[..end];
    }
    if let Some((_, rest)) = host.rsplit_once('@') {
        host = rest;
    }

    if host.starts_with('[') {
        // Bracketed IPv6 literal, optionally followed by a port.
        let inner = host.trim_start_matches('[');
        host = inner.split(']').next().unwrap_or(inner);
    } else if host.matches(':').count() == 1 {
        host = host.split(':').next().unwrap_or(host);
    }

    let mut host = host.trim().trim_end_matches('.');
    loop {
        if let Some(rest) = host.strip_prefix("www.") {
            host = rest;
        } else if let Some(rest) = host.strip_prefix('.') {
            host = rest;
        } else {
            break;
        }
    }

    host.trim().to_string()
}

/// Lookup keys for a host: the canonical form and its `www.` variant.
pub fn host_candidates(value: &str) -> Vec<String> {
    match normalize_host(value) {
        Some(host) => {
            let www = format!("www.{}", host);
            vec![host, www]
        }
        None => Vec::new(),
    }
}
