//! The device-compiler seam and an implementation that shells out to a compiler binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use kselect::env;
use log::debug;

use crate::binary_cache::KernelIdentity;
use crate::error::{CacheError, CacheResult};

pub const DEFAULT_COMPILER: &str = "kselect-clc";

/// Turns one kernel source into exactly one device binary. Blocking.
pub trait DeviceCompiler: Send + Sync {
    /// Implementations prepend the jit block to the source and build with
    /// `kernel.build_options`.
    fn compile(&self, kernel: &KernelIdentity) -> CacheResult<Vec<u8>>;
}

/// Jit block followed by the kernel body.
pub fn inject_jit(jit: &str, source: &str) -> String {
    let mut program = String::with_capacity(jit.len() + source.len());
    program.push_str(jit);
    program.push_str(source);
    program
}

/// Runs `<program> compile --flags <build options> --in <src> --out <bin>` in a
/// scratch directory.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    work_dir: PathBuf,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Compiler from `KSELECT_COMPILER`, scratch files under the system temp dir.
    pub fn from_env() -> Self {
        let program = env::var(env::COMPILER_VAR)
            .unwrap_or_else(|| DEFAULT_COMPILER.to_string());
        Self::new(program, std::env::temp_dir().join("kselect-clc"))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

impl DeviceCompiler for CommandCompiler {
    fn compile(&self, kernel: &KernelIdentity) -> CacheResult<Vec<u8>> {
        fs::create_dir_all(&self.work_dir)
            .map_err(|err| CacheError::io(&self.work_dir, err))?;
        let hash = kernel.hash();
        let source_path = self.work_dir.join(format!("kernel_{hash:016x}.cl"));
        let binary_path = self.work_dir.join(format!("kernel_{hash:016x}.bin"));
        fs::write(&source_path, inject_jit(&kernel.jit, &kernel.source))
            .map_err(|err| CacheError::io(&source_path, err))?;

        debug!("compiling {} with {}", source_path.display(), self.program);
        let output = Command::new(&self.program)
            .arg("compile")
            .arg("--flags")
            .arg(&kernel.build_options)
            .arg("--in")
            .arg(&source_path)
            .arg("--out")
            .arg(&binary_path)
            .output()
            .map_err(|err| CacheError::build(format!("failed to run {}: {err}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(CacheError::build(format!(
                "{} failed (status={}): stdout='{}' stderr='{}'",
                self.program,
                output.status,
                stdout.trim(),
                stderr.trim()
            )));
        }

        fs::read(&binary_path)
            .map_err(|err| CacheError::io(&binary_path, err))
    }
}
