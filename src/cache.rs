use core::any::TypeId;
use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    any::SharedAny,
    context::Context,
    pipeline::InstanceRef,
    scope::{Scope, ScopeRef},
};

pub(crate) struct CacheEntry {
    pub(crate) binding: usize,
    pub(crate) service: TypeId,
    pub(crate) context: Context,
    pub(crate) instance: InstanceRef,
}

struct Bucket {
    scope: ScopeRef,
    entries: Vec<CacheEntry>,
}

/// Associates created instances with the scope that owns their lifetime.
/// One coarse lock makes `remember`, `try_get`, sweeping and release
/// mutually exclusive: liveness is judged and a dead bucket removed under
/// the same lock, so a racing `remember` is never lost and no bucket is
/// swept twice.
pub(crate) struct ScopeCache {
    buckets: Mutex<BTreeMap<usize, Bucket>>,
}

impl ScopeCache {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub(crate) fn try_get(&self, binding: usize, service: TypeId, scope: &Scope) -> Option<SharedAny> {
        let buckets = self.buckets.lock();
        let bucket = buckets.get(&scope.id())?;
        if !bucket.scope.is_alive() {
            return None;
        }
        bucket
            .entries
            .iter()
            .find(|entry| entry.binding == binding && entry.service == service)
            .map(|entry| entry.instance.get())
    }

    pub(crate) fn remember(&self, context: Context, scope: &Scope, instance: InstanceRef) {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(scope.id()).or_insert_with(|| Bucket {
            scope: scope.downgrade(),
            entries: Vec::new(),
        });
        bucket.entries.push(CacheEntry {
            binding: context.binding().id(),
            service: context.binding().service().id,
            context,
            instance,
        });
        debug!(scope = scope.id(), "Remembered");
    }

    /// Removes every bucket whose scope is no longer alive and hands the
    /// evicted entries back in LIFO order for deactivation.
    #[must_use]
    pub(crate) fn sweep_dead(&self) -> Vec<CacheEntry> {
        let mut buckets = self.buckets.lock();
        let dead: Vec<usize> = buckets
            .iter()
            .filter(|(_, bucket)| !bucket.scope.is_alive())
            .map(|(id, _)| *id)
            .collect();

        let mut removed = Vec::new();
        for id in dead {
            if let Some(bucket) = buckets.remove(&id) {
                debug!(scope = id, entries = bucket.entries.len(), "Scope pruned");
                removed.extend(bucket.entries);
            }
        }
        removed.reverse();
        removed
    }

    /// Removes the entry holding the instance with the given identity,
    /// regardless of its scope's liveness.
    #[must_use]
    pub(crate) fn release(&self, instance: usize) -> Option<CacheEntry> {
        let mut buckets = self.buckets.lock();
        for bucket in buckets.values_mut() {
            if let Some(position) = bucket.entries.iter().position(|entry| entry.instance.identity() == instance) {
                return Some(bucket.entries.remove(position));
            }
        }
        None
    }

    /// Empties the cache entirely, newest entries first.
    #[must_use]
    pub(crate) fn drain(&self) -> Vec<CacheEntry> {
        let mut buckets = self.buckets.lock();
        let mut removed = Vec::new();
        for (_, bucket) in std::mem::take(&mut *buckets) {
            removed.extend(bucket.entries);
        }
        removed.reverse();
        removed
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn entry_count(&self) -> usize {
        self.buckets.lock().values().map(|bucket| bucket.entries.len()).sum()
    }
}
