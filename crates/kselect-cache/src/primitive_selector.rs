//! Best binary among every source registered under a primitive name.

use kselect::db::PrimitiveDb;
use kselect::dispatch::DEFAULT_BUILD_FLAGS;
use kselect::error::{KernelError, SelectorError};
use log::debug;

use crate::binary_cache::{BinaryCache, CachedBinary, KernelIdentity};
use crate::compiler::DeviceCompiler;
use crate::error::CacheResult;

pub struct PrimitiveSelector {
    cache: BinaryCache,
    db: PrimitiveDb,
}

impl PrimitiveSelector {
    pub fn new(cache: BinaryCache, db: PrimitiveDb) -> Self {
        Self { cache, db }
    }

    pub fn cache(&self) -> &BinaryCache {
        &self.cache
    }

    pub fn db(&self) -> &PrimitiveDb {
        &self.db
    }

    /// Compiles each implementation of `name` with `jit` and keeps the cheapest.
    /// The first registered source wins ties.
    pub fn get(
        &self,
        compiler: &dyn DeviceCompiler,
        jit: &str,
        name: &str,
    ) -> CacheResult<CachedBinary> {
        let mut best: Option<CachedBinary> = None;
        for source in self.db.get(name) {
            let identity = KernelIdentity::new(jit, source);
            let identity = identity.with_build_options(DEFAULT_BUILD_FLAGS);
            let candidate = self.cache.get(compiler, &identity)?;
            if best.as_ref().map_or(true, |b| candidate.cost < b.cost) {
                best = Some(candidate);
            }
        }
        let missing = || SelectorError::from(KernelError::source_not_found(name));
        let best = best.ok_or_else(missing)?;
        debug!(
            "primitive `{name}`: {} byte binary, cost {:?}",
            best.binary.len(),
            best.cost
        );
        Ok(best)
    }
}
