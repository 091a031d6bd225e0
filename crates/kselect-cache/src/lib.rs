//! Compiled-binary cache for kselect kernels.

pub mod binary_cache;
pub mod compiler;
pub mod cost;
pub mod error;
pub mod format;
pub mod manager;
pub mod primitive_selector;

pub use binary_cache::{BinaryCache, CachedBinary, KernelIdentity};
pub use compiler::{CommandCompiler, DeviceCompiler};
pub use cost::{BinarySizeCost, Cost, CostModel};
pub use error::{CacheError, CacheResult};
pub use manager::{KernelManager, ProgramLinker};
pub use primitive_selector::PrimitiveSelector;
