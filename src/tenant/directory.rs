use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::source::TenantSource;
use super::{host_candidates, normalize_host, DirectoryError, TenantRecord};

/// Immutable view of the tenant set. Refreshes build a new snapshot and
/// swap it in; readers holding the old `Arc` keep a consistent view.
struct DirectorySnapshot {
    tenants: HashMap<String, Arc<TenantRecord>>,
    /// Host (canonical and `www.` variant) -> tenant id.
    hosts: HashMap<String, String>,
    loaded: bool,
    last_error: Option<String>,
    expires_at: Instant,
}

impl DirectorySnapshot {
    fn empty(expires_at: Instant) -> Self {
        Self {
            tenants: HashMap::new(),
            hosts: HashMap::new(),
            loaded: false,
            last_error: None,
            expires_at,
        }
    }

    fn build(records: Vec<TenantRecord>, expires_at: Instant) -> Self {
        let mut tenants = HashMap::with_capacity(records.len());
        let mut hosts = HashMap::new();

        for record in records {
            for host in &record.allowed_hosts {
                for candidate in host_candidates(host) {
                    if let Some(previous) = hosts.insert(candidate.clone(), record.id.clone()) {
                        if previous != record.id {
                            tracing::warn!(
                                host = %candidate,
                                previous = %previous,
                                tenant = %record.id,
                                "Host is claimed by more than one tenant; last one wins"
                            );
                        }
                    }
                }
            }
            tenants.insert(record.id.clone(), Arc::new(record));
        }

        Self {
            tenants,
            hosts,
            loaded: true,
            last_error: None,
            expires_at,
        }
    }

    fn by_host(&self, host: &str) -> Option<Arc<TenantRecord>> {
        host_candidates(host)
            .iter()
            .find_map(|candidate| self.hosts.get(candidate))
            .and_then(|id| self.tenants.get(id))
            .cloned()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    pub loaded: bool,
    pub chat_count: usize,
    pub host_count: usize,
    pub last_error: Option<String>,
    pub available_ids: Vec<String>,
    pub available_hosts: Vec<String>,
    pub source: String,
}

/// Resolves tenant keys and request hosts to tenant records, reloading from
/// its source once the cached snapshot is older than the TTL.
pub struct TenantDirectory {
    source: Arc<dyn TenantSource>,
    ttl: Duration,
    snapshot: RwLock<Arc<DirectorySnapshot>>,
    refresh_lock: Mutex<()>,
}

impl TenantDirectory {
    /// Creates a directory whose first lookup triggers a load.
    pub fn new(source: Arc<dyn TenantSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: RwLock::new(Arc::new(DirectorySnapshot::empty(Instant::now()))),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Creates a directory and loads it immediately.
    pub async fn load(source: Arc<dyn TenantSource>, ttl: Duration) -> Self {
        let directory = Self::new(source, ttl);
        directory.refresh().await;
        directory
    }

    /// Looks a key up as a tenant id first, then as a hostname.
    pub async fn resolve(&self, key: &str) -> Option<Arc<TenantRecord>> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }

        let snapshot = self.current().await;
        if let Some(record) = snapshot.tenants.get(key) {
            return Some(record.clone());
        }
        snapshot.by_host(key)
    }

    /// Matches with or without a `www.` prefix on either side.
    pub async fn find_by_host(&self, host: &str) -> Option<Arc<TenantRecord>> {
        normalize_host(host)?;
        self.current().await.by_host(host)
    }

    /// Reloads from the source now, regardless of the TTL. Never fails:
    /// the outcome is reflected in [`TenantDirectory::stats`].
    pub async fn refresh(&self) -> DirectoryStats {
        let _guard = self.refresh_lock.lock().await;
        self.reload().await;
        self.stats().await
    }

    pub async fn stats(&self) -> DirectoryStats {
        let snapshot = self.snapshot.read().await.clone();

        let mut available_ids: Vec<String> = snapshot.tenants.keys().cloned().collect();
        available_ids.sort();
        let mut available_hosts: Vec<String> = snapshot.hosts.keys().cloned().collect();
        available_hosts.sort();

        DirectoryStats {
            loaded: snapshot.loaded,
            chat_count: snapshot.tenants.len(),
            host_count: snapshot.hosts.len(),
            last_error: snapshot.last_error.clone(),
            available_ids,
            available_hosts,
            source: self.source.describe(),
        }
    }

    async fn current(&self) -> Arc<DirectorySnapshot> {
        let snapshot = self.snapshot.read().await.clone();
        if Instant::now() < snapshot.expires_at {
            return snapshot;
        }

        let _guard = self.refresh_lock.lock().await;
        // Another request may have refreshed while we waited for the lock.
        let snapshot = self.snapshot.read().await.clone();
        if Instant::now() < snapshot.expires_at {
            return snapshot;
        }

        self.reload().await;
        self.snapshot.read().await.clone()
    }

    /// Must be called with `refresh_lock` held.
    async fn reload(&self) {
        let result = self.source.load().await;
        let now = Instant::now();

        let next = match result {
            Ok(records) => {
                let snapshot = DirectorySnapshot::build(records, now + self.ttl);
                tracing::info!(
                    source = %self.source.describe(),
                    tenants = snapshot.tenants.len(),
                    hosts = snapshot.hosts.len(),
                    "Tenant directory loaded"
                );
                snapshot
            }
            Err(DirectoryError::Invalid(reason)) => {
                tracing::error!(
                    source = %self.source.describe(),
                    error = %reason,
                    "Tenant source is invalid; directory is now empty"
                );
                let mut snapshot = DirectorySnapshot::empty(now + self.ttl);
                snapshot.last_error = Some(reason);
                snapshot
            }
            Err(DirectoryError::Unavailable(reason)) => {
                let previous = self.snapshot.read().await.clone();
                tracing::warn!(
                    source = %self.source.describe(),
                    error = %reason,
                    stale_tenants = previous.tenants.len(),
                    "Tenant source unavailable; serving last known snapshot"
                );
                DirectorySnapshot {
                    tenants: previous.tenants.clone(),
                    hosts: previous.hosts.clone(),
                    loaded: previous.loaded,
                    last_error: Some(reason),
                    expires_at: now + self.ttl / 2,
                }
            }
        };

        *self.snapshot.write().await = Arc::new(next);
    }
}
