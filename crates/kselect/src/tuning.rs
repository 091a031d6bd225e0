//! Offline tuning results: which variant option to use for a given request.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SelectorError, SelectorResult};
use crate::params::OperationParams;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunedKernel {
    pub kernel_name: String,
    pub index: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningTable {
    pub entries: HashMap<String, TunedKernel>,
}

impl TuningTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> SelectorResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            SelectorError::tuning(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> SelectorResult<Self> {
        serde_json::from_str(text)
            .map_err(|err| SelectorError::tuning(format!("invalid tuning table: {err}")))
    }

    pub fn to_json(&self) -> SelectorResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| {
            SelectorError::tuning(format!("failed to encode tuning table: {err}"))
        })
    }

    pub fn insert(
        &mut self,
        params: &OperationParams,
        kernel_name: impl Into<String>,
        index: usize,
    ) {
        self.entries.insert(
            params.tuning_key(),
            TunedKernel {
                kernel_name: kernel_name.into(),
                index,
            },
        );
    }

    pub fn lookup(&self, params: &OperationParams) -> Option<&TunedKernel> {
        self.entries.get(&params.tuning_key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ActivationParams, BaseParams};
    use crate::tensor::{DataLayout, DataTensor, Datatype};

    #[test]
    fn json_round_trip_keeps_lookup() {
        let t = DataTensor::from_extents(&[8, 8, 4, 1], Datatype::F32, DataLayout::Bfyx);
        let base = BaseParams::new("l", vec![t.clone()], t);
        let params: OperationParams = ActivationParams::new(base).into();
        let mut table = TuningTable::new();
        table.insert(&params, "activation_gpu_opt", 0);

        let text = table.to_json().expect("encode");
        let loaded = TuningTable::from_json(&text).expect("decode");
        assert_eq!(
            loaded.lookup(&params).map(|t| t.kernel_name.as_str()),
            Some("activation_gpu_opt")
        );
    }

    #[test]
    fn bad_json_is_a_tuning_error() {
        let err = TuningTable::from_json("{").expect_err("must fail");
        assert!(matches!(err, SelectorError::Tuning(_)));
    }
}
