//! Process-wide store of compiled kernels, persisted to a single file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use kselect::dispatch::{KernelDescriptor, KernelString};
use kselect::env;
use kselect::hashing::kernel_hash;
use kselect::profiling;
use log::{debug, info, warn};

use crate::compiler::DeviceCompiler;
use crate::cost::{BinarySizeCost, Cost, CostModel};
use crate::error::{CacheError, CacheResult};
use crate::format::{self, BinaryMap};

pub const DEFAULT_CACHE_FILE: &str = "kselect_cache.bin";

/// What a binary is compiled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelIdentity {
    pub build_options: String,
    pub jit: String,
    pub source: String,
}

impl KernelIdentity {
    /// Identity built with no extra compiler flags.
    pub fn new(jit: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            build_options: String::new(),
            jit: jit.into(),
            source: source.into(),
        }
    }

    pub fn with_build_options(mut self, build_options: impl Into<String>) -> Self {
        self.build_options = build_options.into();
        self
    }

    pub fn from_kernel(kernel: &KernelString) -> Self {
        Self {
            build_options: kernel.options.clone(),
            jit: kernel.jit.clone(),
            source: kernel.source.clone(),
        }
    }

    pub fn hash(&self) -> usize {
        kernel_hash(&self.build_options, &self.jit, &self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBinary {
    pub binary: Arc<[u8]>,
    pub cost: Cost,
    pub hit: bool,
}

struct Entry {
    binary: Arc<[u8]>,
    cost: Cost,
    /// `None` for entries read from disk.
    identity: Option<KernelIdentity>,
}

pub struct BinaryCache {
    path: PathBuf,
    cost_model: Box<dyn CostModel>,
    entries: Mutex<BTreeMap<usize, Entry>>,
    compile_gates: Mutex<HashMap<usize, Arc<Mutex<()>>>>,
    dirty: AtomicBool,
}

impl BinaryCache {
    /// Loads `path` eagerly. A missing or truncated file is an error.
    pub fn open(
        path: impl Into<PathBuf>,
        cost_model: impl CostModel + 'static,
    ) -> CacheResult<Self> {
        let path = path.into();
        let bytes = fs::read(&path).map_err(|err| CacheError::io(&path, err))?;
        let loaded = format::deserialize(&bytes)?;
        info!(
            "loaded {} kernel binaries from {}",
            loaded.len(),
            path.display()
        );
        let entries = loaded
            .into_iter()
            .map(|(hash, binary)| {
                let entry = Entry {
                    cost: cost_model.rate(&binary),
                    binary,
                    identity: None,
                };
                (hash, entry)
            })
            .collect();
        let cache = Self::with_entries(path, Box::new(cost_model), entries, false);
        Ok(cache)
    }

    /// Empty store that writes `path` on the first flush.
    pub fn create(path: impl Into<PathBuf>, cost_model: impl CostModel + 'static) -> Self {
        Self::with_entries(path.into(), Box::new(cost_model), BTreeMap::new(), true)
    }

    /// `KSELECT_CACHE_FILE` (or `kselect_cache.bin`) rated by binary size.
    pub fn open_default() -> CacheResult<Self> {
        Self::open(default_path(), BinarySizeCost)
    }

    fn with_entries(
        path: PathBuf,
        cost_model: Box<dyn CostModel>,
        entries: BTreeMap<usize, Entry>,
        dirty: bool,
    ) -> Self {
        Self {
            path,
            cost_model,
            entries: Mutex::new(entries),
            compile_gates: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(dirty),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("binary cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn contains(&self, identity: &KernelIdentity) -> bool {
        self.entries
            .lock()
            .expect("binary cache poisoned")
            .contains_key(&identity.hash())
    }

    /// Stored binary for `identity`, compiling it on a miss.
    pub fn get(
        &self,
        compiler: &dyn DeviceCompiler,
        identity: &KernelIdentity,
    ) -> CacheResult<CachedBinary> {
        self.get_hashed(compiler, identity.hash(), identity)
    }

    /// Binaries for every launch of `descriptor`, its weights reorder first.
    pub fn get_descriptor(
        &self,
        compiler: &dyn DeviceCompiler,
        descriptor: &KernelDescriptor,
    ) -> CacheResult<Vec<CachedBinary>> {
        let mut out = Vec::new();
        if let Some(reorder) = &descriptor.weights_reorder {
            out.extend(self.get_descriptor(compiler, &reorder.kernel)?);
        }
        for launch in &descriptor.kernels {
            let identity = KernelIdentity::from_kernel(&launch.kernel);
            out.push(self.get(compiler, &identity)?);
        }
        Ok(out)
    }

    fn get_hashed(
        &self,
        compiler: &dyn DeviceCompiler,
        hash: usize,
        identity: &KernelIdentity,
    ) -> CacheResult<CachedBinary> {
        if let Some(found) = self.lookup(hash, identity)? {
            profiling::cache_event(profiling::BINARY_HIT);
            return Ok(found);
        }
        profiling::cache_event(profiling::BINARY_MISS);

        let gate = {
            let mut gates = self
                .compile_gates
                .lock()
                .expect("binary cache gate table poisoned");
            gates
                .entry(hash)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let result = {
            let _gate_lock = gate.lock().expect("binary cache gate poisoned");
            self.compile_locked(compiler, hash, identity)
        };
        self.release_gate(hash, &gate);
        result
    }

    /// Runs with the gate for `hash` held.
    fn compile_locked(
        &self,
        compiler: &dyn DeviceCompiler,
        hash: usize,
        identity: &KernelIdentity,
    ) -> CacheResult<CachedBinary> {
        if let Some(found) = self.lookup(hash, identity)? {
            profiling::cache_event(profiling::BINARY_HIT);
            return Ok(found);
        }

        let binary: Arc<[u8]> = Arc::from(compiler.compile(identity)?);
        let cost = self.cost_model.rate(&binary);
        debug!("compiled kernel {hash:#x}: {} bytes", binary.len());
        self.entries.lock().expect("binary cache poisoned").insert(
            hash,
            Entry {
                binary: Arc::clone(&binary),
                cost,
                identity: Some(identity.clone()),
            },
        );
        self.dirty.store(true, Ordering::SeqCst);
        Ok(CachedBinary {
            binary,
            cost,
            hit: false,
        })
    }

    /// Drops the gate once no other caller holds a clone of it.
    fn release_gate(&self, hash: usize, gate: &Arc<Mutex<()>>) {
        let mut gates = self
            .compile_gates
            .lock()
            .expect("binary cache gate table poisoned");
        let held_elsewhere = Arc::strong_count(gate) > 2;
        if !held_elsewhere && gates.get(&hash).is_some_and(|g| Arc::ptr_eq(g, gate)) {
            gates.remove(&hash);
        }
    }

    #[cfg(test)]
    fn open_gates(&self) -> usize {
        self.compile_gates
            .lock()
            .expect("binary cache gate table poisoned")
            .len()
    }

    fn lookup(&self, hash: usize, identity: &KernelIdentity) -> CacheResult<Option<CachedBinary>> {
        let entries = self.entries.lock().expect("binary cache poisoned");
        let Some(entry) = entries.get(&hash) else {
            return Ok(None);
        };
        let known = entry.identity.as_ref();
        if known.is_some_and(|known| known != identity) {
            return Err(CacheError::Collision { hash });
        }
        Ok(Some(CachedBinary {
            binary: Arc::clone(&entry.binary),
            cost: entry.cost,
            hit: true,
        }))
    }

    /// Rewrites the file when anything changed since the last flush. Returns whether it wrote.
    pub fn flush(&self) -> CacheResult<bool> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        let snapshot: BinaryMap = self
            .entries
            .lock()
            .expect("binary cache poisoned")
            .iter()
            .map(|(hash, entry)| (*hash, Arc::clone(&entry.binary)))
            .collect();
        if let Err(err) = fs::write(&self.path, format::serialize(&snapshot)) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(CacheError::io(&self.path, err));
        }
        info!(
            "wrote {} kernel binaries to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(true)
    }
}

impl Drop for BinaryCache {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("binary cache flush failed: {err}");
        }
    }
}

pub fn default_path() -> PathBuf {
    env::var(env::CACHE_FILE_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct Echo(AtomicUsize);

    impl DeviceCompiler for Echo {
        fn compile(&self, kernel: &KernelIdentity) -> CacheResult<Vec<u8>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}{}", kernel.jit, kernel.source).into_bytes())
        }
    }

    struct Broken;

    impl DeviceCompiler for Broken {
        fn compile(&self, _kernel: &KernelIdentity) -> CacheResult<Vec<u8>> {
            Err(CacheError::build("syntax error"))
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let file = format!("kselect-cache-unit-{name}-{}.bin", std::process::id());
        std::env::temp_dir().join(file)
    }

    #[test]
    fn same_hash_different_kernel_collides() {
        let path = scratch("collision");
        let cache = BinaryCache::create(&path, BinarySizeCost);
        let compiler = Echo(AtomicUsize::new(0));
        let a = KernelIdentity::new("", "a");
        let b = KernelIdentity::new("", "b");

        cache.get_hashed(&compiler, 42, &a).expect("first compile");
        let err = cache
            .get_hashed(&compiler, 42, &b)
            .expect_err("hash is taken");
        assert!(
            matches!(err, CacheError::Collision { hash: 42 }),
            "unexpected error: {err}"
        );
        let again = cache.get_hashed(&compiler, 42, &a).expect("same kernel");
        assert!(again.hit);
        assert_eq!(compiler.0.load(Ordering::SeqCst), 1);

        drop(cache);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn flush_runs_once_per_change() {
        let path = scratch("flush");
        let cache = BinaryCache::create(&path, BinarySizeCost);
        let compiler = Echo(AtomicUsize::new(0));
        assert!(
            cache.flush().expect("first flush"),
            "created caches start dirty"
        );
        assert!(!cache.flush().expect("clean flush"));

        let kernel = KernelIdentity::new("-O2 ", "k");
        cache.get(&compiler, &kernel).expect("compile");
        assert!(cache.is_dirty());
        assert!(cache.flush().expect("flush after miss"));
        assert!(!cache.is_dirty());

        drop(cache);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn compile_gates_are_released() {
        let path = scratch("gates");
        let cache = BinaryCache::create(&path, BinarySizeCost);
        let compiler = Echo(AtomicUsize::new(0));

        cache
            .get(&compiler, &KernelIdentity::new("", "single"))
            .expect("compile");
        assert_eq!(cache.open_gates(), 0, "gate left after a miss");

        let err = cache
            .get(&Broken, &KernelIdentity::new("", "broken"))
            .expect_err("build fails");
        assert!(matches!(err, CacheError::Build { .. }));
        assert_eq!(cache.open_gates(), 0, "gate left after a failed build");

        thread::scope(|scope| {
            for i in 0..8 {
                let cache = &cache;
                let compiler = &compiler;
                scope.spawn(move || {
                    let kernel = KernelIdentity::new("", format!("k{}", i % 2));
                    cache.get(compiler, &kernel).expect("compile");
                });
            }
        });
        assert_eq!(cache.open_gates(), 0, "gate left after concurrent gets");
        assert_eq!(compiler.0.load(Ordering::SeqCst), 3);

        drop(cache);
        let _ = fs::remove_file(path);
    }
}
