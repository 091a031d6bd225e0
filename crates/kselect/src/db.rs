//! Kernel template sources, keyed by template name.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::{KernelError, KernelResult};
use crate::kernels::BUILTIN_TEMPLATES;

static BUILTIN: Lazy<PrimitiveDb> = Lazy::new(|| {
    let mut db = PrimitiveDb::new();
    for name in BUILTIN_TEMPLATES {
        db.insert(*name, stub_source(name));
    }
    db
});

fn stub_source(name: &str) -> String {
    let signature = "(const __global UNIT_TYPE* input, __global UNIT_TYPE* output)";
    format!("// {name}\nKERNEL({name}){signature}\n{{\n}}\n")
}

#[derive(Debug, Clone, Default)]
pub struct PrimitiveDb {
    entries: HashMap<String, Vec<String>>,
}

impl PrimitiveDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// A stub body for every template the built-in variants reference.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.entries
            .entry(name.into())
            .or_default()
            .push(source.into());
    }

    pub fn get(&self, name: &str) -> Vec<&str> {
        self.entries
            .get(name)
            .map(|sources| sources.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn get_unique(&self, name: &str) -> KernelResult<&str> {
        let sources = self
            .entries
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default();
        match sources {
            [] => Err(KernelError::source_not_found(name)),
            [only] => Ok(only.as_str()),
            many => Err(KernelError::AmbiguousSource {
                name: name.to_string(),
                count: many.len(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
