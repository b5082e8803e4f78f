//! Scope-local and process-wide dependency caches.
//!
//! A [`DependencyCache`] belongs to one scope. Entries resolved with
//! [`Lifetime::PerUnitOfWork`] live until the scope closes, at which point
//! each entry's invalidation callback runs exactly once. Singletons are
//! delegated to the [`SingletonCache`] shared by every scope of a dispatcher
//! and invalidated on shutdown.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// How long a resolved dependency is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// A fresh instance for every resolution; nothing is cached.
    PerResolution,
    /// One instance per unit of work, invalidated when the scope closes.
    PerUnitOfWork,
    /// One instance per dispatcher, invalidated on shutdown.
    Singleton,
}

pub(crate) type Shared = Arc<dyn Any + Send + Sync>;

/// Runs once when a cached value is released.
pub type Invalidate = Box<dyn FnOnce(&(dyn Any + Send + Sync)) + Send + Sync>;

struct CacheEntry {
    value: Shared,
    on_invalidate: Option<Invalidate>,
}

impl CacheEntry {
    fn invalidate(self) {
        if let Some(callback) = self.on_invalidate {
            callback(self.value.as_ref());
        }
    }
}

/// Wraps a typed invalidation callback.
pub fn invalidate_with<T, F>(callback: F) -> Invalidate
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + Sync + 'static,
{
    Box::new(move |value| {
        if let Some(value) = value.downcast_ref::<T>() {
            callback(value);
        }
    })
}

/// Entries shared by every scope of one dispatcher.
#[derive(Default)]
pub struct SingletonCache {
    entries: Mutex<Vec<(TypeId, CacheEntry)>>,
}

impl SingletonCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create` runs under the cache lock and must not resolve other
    /// singletons.
    pub(crate) fn get_or_insert(
        &self,
        type_id: TypeId,
        create: impl FnOnce() -> (Shared, Option<Invalidate>),
    ) -> Shared {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, entry)) = entries.iter().find(|(id, _)| *id == type_id) {
            return Arc::clone(&entry.value);
        }
        let (value, on_invalidate) = create();
        entries.push((
            type_id,
            CacheEntry {
                value: Arc::clone(&value),
                on_invalidate,
            },
        ));
        value
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases every singleton in creation order.
    pub fn shutdown(&self) {
        let entries = {
            let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for (_, entry) in entries {
            entry.invalidate();
        }
    }
}

impl fmt::Debug for SingletonCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingletonCache")
            .field("entries", &self.len())
            .finish()
    }
}

/// Dependency cache of one unit of work.
pub struct DependencyCache {
    entries: HashMap<TypeId, CacheEntry>,
    order: Vec<TypeId>,
    singletons: Arc<SingletonCache>,
    closed: bool,
}

impl DependencyCache {
    /// A scope cache backed by the shared `singletons`.
    pub fn new(singletons: Arc<SingletonCache>) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            singletons,
            closed: false,
        }
    }

    /// Returns the cached `T` for `lifetime`, creating it with `factory` if
    /// there is none.
    pub fn get_or_add<T, F>(&mut self, lifetime: Lifetime, factory: F) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.get_or_add_with(lifetime, factory, None)
    }

    /// Like [`DependencyCache::get_or_add`], registering `on_invalidate` for
    /// a newly created entry. Ignored for [`Lifetime::PerResolution`].
    pub fn get_or_add_with<T, F>(
        &mut self,
        lifetime: Lifetime,
        factory: F,
        on_invalidate: Option<Invalidate>,
    ) -> Arc<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let shared = self.get_or_insert(
            TypeId::of::<T>(),
            lifetime,
            || Arc::new(factory()) as Shared,
            on_invalidate,
        );
        match shared.downcast::<T>() {
            Ok(value) => value,
            // Entries are keyed by the TypeId of their own value.
            Err(_) => unreachable!("cache entry stored under a foreign TypeId"),
        }
    }

    pub(crate) fn get_or_insert(
        &mut self,
        type_id: TypeId,
        lifetime: Lifetime,
        create: impl FnOnce() -> Shared,
        on_invalidate: Option<Invalidate>,
    ) -> Shared {
        match lifetime {
            Lifetime::PerResolution => create(),
            Lifetime::Singleton => self
                .singletons
                .get_or_insert(type_id, || (create(), on_invalidate)),
            Lifetime::PerUnitOfWork => {
                if let Some(entry) = self.entries.get(&type_id) {
                    return Arc::clone(&entry.value);
                }
                debug_assert!(!self.closed, "resolution on a closed scope");
                let value = create();
                self.entries.insert(
                    type_id,
                    CacheEntry {
                        value: Arc::clone(&value),
                        on_invalidate,
                    },
                );
                self.order.push(type_id);
                value
            }
        }
    }

    /// True when an instance of `T` is cached in this scope.
    pub fn contains<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once the scope was closed and its entries invalidated.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Invalidates every per-unit-of-work entry in creation order. Runs at
    /// most once; later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for type_id in std::mem::take(&mut self.order) {
            if let Some(entry) = self.entries.remove(&type_id) {
                entry.invalidate();
            }
        }
    }
}

impl Drop for DependencyCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyCache")
            .field("entries", &self.entries.len())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Connection(usize);

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_per_unit_of_work_is_reused_within_the_scope() {
        let mut cache = DependencyCache::new(Arc::new(SingletonCache::new()));
        let created = counter();

        let first = cache.get_or_add(Lifetime::PerUnitOfWork, || {
            Connection(created.fetch_add(1, Ordering::SeqCst))
        });
        let second = cache.get_or_add(Lifetime::PerUnitOfWork, || {
            Connection(created.fetch_add(1, Ordering::SeqCst))
        });

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(cache.contains::<Connection>());
    }

    #[test]
    fn test_per_resolution_is_never_cached() {
        let mut cache = DependencyCache::new(Arc::new(SingletonCache::new()));

        let first = cache.get_or_add(Lifetime::PerResolution, || Connection(1));
        let second = cache.get_or_add(Lifetime::PerResolution, || Connection(2));

        assert_eq!((first.0, second.0), (1, 2));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidation_runs_once_and_only_on_close() {
        let released = counter();
        let mut cache = DependencyCache::new(Arc::new(SingletonCache::new()));
        let seen = Arc::clone(&released);
        cache.get_or_add_with(
            Lifetime::PerUnitOfWork,
            || Connection(7),
            Some(invalidate_with(move |conn: &Connection| {
                assert_eq!(conn.0, 7);
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert_eq!(released.load(Ordering::SeqCst), 0);
        cache.close();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        cache.close();
        drop(cache);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_an_open_cache() {
        let released = counter();
        {
            let mut cache = DependencyCache::new(Arc::new(SingletonCache::new()));
            let seen = Arc::clone(&released);
            cache.get_or_add_with(
                Lifetime::PerUnitOfWork,
                || Connection(1),
                Some(invalidate_with(move |_: &Connection| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
            );
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_singletons_outlive_scopes_until_shutdown() {
        let singletons = Arc::new(SingletonCache::new());
        let released = counter();

        let first = {
            let mut scope = DependencyCache::new(Arc::clone(&singletons));
            let seen = Arc::clone(&released);
            scope.get_or_add_with(
                Lifetime::Singleton,
                || Connection(1),
                Some(invalidate_with(move |_: &Connection| {
                    seen.fetch_add(1, Ordering::SeqCst);
                })),
            )
        };
        let second = DependencyCache::new(Arc::clone(&singletons))
            .get_or_add(Lifetime::Singleton, || Connection(2));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        singletons.shutdown();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(singletons.is_empty());
    }
}
