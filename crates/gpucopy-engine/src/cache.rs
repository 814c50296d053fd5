//! Device resource cache.
//!
//! Owns every device buffer and surface the engine creates. Callers only
//! ever see [`ArgIndex`] tokens; the objects themselves stay here until
//! [`ResourceCache::teardown_all`].
//!
//! Each category is an arena: a key map into a creation-ordered list. A single
//! mutex guards both categories, so lookups, insertions and teardown never
//! interleave.
//!
//! ```text
//! buffers:  {key -> idx}   [A, B, C]     teardown:  C B A
//! surfaces: {key -> idx}   [D, E]                   E D
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gpucopy_core::{CopyResult, SurfaceHandle};

use crate::device::ArgIndex;

/// Key of a cached device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey {
    /// Page-aligned host address.
    pub base: usize,
    /// Byte length.
    pub len: usize,
}

impl BufferKey {
    pub fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }
}

/// Creation-ordered storage with keyed lookup.
struct Arena<K, T> {
    index: HashMap<K, usize>,
    entries: Vec<(K, T, ArgIndex)>,
}

impl<K: Eq + Hash + Copy, T> Arena<K, T> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn get(&self, key: &K) -> Option<ArgIndex> {
        self.index.get(key).map(|&i| self.entries[i].2)
    }

    fn get_entry(&self, key: &K) -> Option<(&T, ArgIndex)> {
        self.index.get(key).map(|&i| (&self.entries[i].1, self.entries[i].2))
    }

    fn insert(&mut self, key: K, value: T, arg: ArgIndex) {
        self.index.insert(key, self.entries.len());
        self.entries.push((key, value, arg));
    }

    /// Empties the arena, yielding values newest first.
    fn drain_reverse(&mut self) -> impl Iterator<Item = T> + '_ {
        self.index.clear();
        self.entries.drain(..).rev().map(|(_, v, _)| v)
    }
}

struct Inner<B, S> {
    buffers: Arena<BufferKey, B>,
    surfaces: Arena<SurfaceHandle, S>,
    hits: u64,
    misses: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub buffers: usize,
    pub surfaces: usize,
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe owner of device buffers `B` and surfaces `S`.
pub struct ResourceCache<B, S> {
    inner: Mutex<Inner<B, S>>,
}

impl<B, S> Default for ResourceCache<B, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, S> ResourceCache<B, S> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffers: Arena::new(),
                surfaces: Arena::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    // A panic inside a factory leaves the maps consistent: insertion happens
    // only after the factory returns.
    fn lock(&self) -> MutexGuard<'_, Inner<B, S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the token of the buffer at `key`, creating it with `factory` on a miss.
    ///
    /// The lock is held across `factory`, so concurrent callers with the same
    /// key create exactly one buffer. On failure nothing is inserted.
    pub fn get_or_create_buffer<F>(&self, key: BufferKey, factory: F) -> CopyResult<ArgIndex>
    where
        F: FnOnce() -> CopyResult<(B, ArgIndex)>,
    {
        let mut inner = self.lock();
        if let Some(arg) = inner.buffers.get(&key) {
            inner.hits += 1;
            return Ok(arg);
        }
        let (buffer, arg) = factory()?;
        inner.misses += 1;
        inner.buffers.insert(key, buffer, arg);
        Ok(arg)
    }

    /// Surface counterpart of [`get_or_create_buffer`](Self::get_or_create_buffer).
    ///
    /// On a hit `check` validates the cached surface for this use; its error
    /// is returned and the entry stays cached. A fresh surface is validated by
    /// `factory` instead.
    pub fn get_or_create_surface<C, F>(&self, key: SurfaceHandle, check: C, factory: F) -> CopyResult<ArgIndex>
    where
        C: FnOnce(&S) -> CopyResult<()>,
        F: FnOnce() -> CopyResult<(S, ArgIndex)>,
    {
        let mut inner = self.lock();
        if let Some((surface, arg)) = inner.surfaces.get_entry(&key) {
            check(surface)?;
            inner.hits += 1;
            return Ok(arg);
        }
        let (surface, arg) = factory()?;
        inner.misses += 1;
        inner.surfaces.insert(key, surface, arg);
        Ok(arg)
    }

    /// Cached token of a buffer, if present.
    pub fn buffer(&self, key: &BufferKey) -> Option<ArgIndex> {
        self.lock().buffers.get(key)
    }

    /// Cached token of a surface, if present.
    pub fn surface(&self, key: &SurfaceHandle) -> Option<ArgIndex> {
        self.lock().surfaces.get(key)
    }

    /// Destroys all buffers then all surfaces, each newest first, and empties the cache.
    pub fn teardown_all<FB, FS>(&self, mut destroy_buffer: FB, mut destroy_surface: FS)
    where
        FB: FnMut(B),
        FS: FnMut(S),
    {
        let mut inner = self.lock();
        inner.buffers.drain_reverse().for_each(&mut destroy_buffer);
        inner.surfaces.drain_reverse().for_each(&mut destroy_surface);
    }

    /// Number of cached resources.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.buffers.entries.len() + inner.surfaces.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            buffers: inner.buffers.entries.len(),
            surfaces: inner.surfaces.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
        }
    }
}
