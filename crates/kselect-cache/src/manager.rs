//! Assembles a program out of one binary per requested primitive.

use std::sync::Arc;

use crate::compiler::DeviceCompiler;
use crate::error::CacheResult;
use crate::primitive_selector::PrimitiveSelector;

/// Links selected binaries into a runnable program.
pub trait ProgramLinker {
    type Program;

    fn link(&self, binaries: &[Arc<[u8]>]) -> CacheResult<Self::Program>;
}

pub struct KernelManager {
    selector: PrimitiveSelector,
}

impl KernelManager {
    pub fn new(selector: PrimitiveSelector) -> Self {
        Self { selector }
    }

    pub fn selector(&self) -> &PrimitiveSelector {
        &self.selector
    }

    /// `primitives` holds `(jit, primitive name)` pairs, linked in order.
    pub fn get<L: ProgramLinker>(
        &self,
        compiler: &dyn DeviceCompiler,
        linker: &L,
        primitives: &[(String, String)],
    ) -> CacheResult<L::Program> {
        let binaries = primitives
            .iter()
            .map(|(jit, name)| Ok(self.selector.get(compiler, jit, name)?.binary))
            .collect::<CacheResult<Vec<_>>>()?;
        linker.link(&binaries)
    }
}
