//! The contract every kernel variant implements.

use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchData, ExeMode, KernelDescriptor};
use crate::error::KernelResult;
use crate::jit::JitConstants;
use crate::key::CapabilityKey;
use crate::params::{KernelKind, OperationParams, OptionalParams};
use crate::selector::SelectionContext;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum AutoTune {
    #[default]
    UseDefault,
    UseTunedOption(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutoTuneOption {
    Tile {
        tile_x: usize,
        tile_y: usize,
        exe_mode: ExeMode,
    },
    Block {
        block_width: usize,
        block_height: usize,
        prefetch: usize,
        exe_mode: ExeMode,
    },
}

pub trait KernelVariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> KernelKind;

    fn supported_key(&self) -> CapabilityKey;

    /// Structural acceptance check. Never errors; false on any kind mismatch.
    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool;

    fn set_default(&self, params: &OperationParams, tune: AutoTune) -> Option<DispatchData>;

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants;

    fn auto_tune_options(&self) -> usize {
        0
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>>;

    fn kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        self.tuned_kernels_data(params, options, ctx, AutoTune::UseDefault)
    }

    /// One descriptor per tuning option, then the default descriptor.
    fn kernels_data_for_auto_tune(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        let mut out = Vec::new();
        for index in 0..self.auto_tune_options() {
            let tune = AutoTune::UseTunedOption(index);
            out.extend(self.tuned_kernels_data(params, options, ctx, tune)?);
        }
        out.extend(self.kernels_data(params, options, ctx)?);
        Ok(out)
    }
}

/// False when `tune` names an option past the variant's list.
pub fn tune_in_range(variant: &dyn KernelVariant, tune: AutoTune) -> bool {
    match tune {
        AutoTune::UseDefault => true,
        AutoTune::UseTunedOption(index) => index < variant.auto_tune_options(),
    }
}

/// Option `tune` from `table`, or `None` for the default dispatch.
pub fn tuned_option(table: &[AutoTuneOption], tune: AutoTune) -> Option<AutoTuneOption> {
    match tune {
        AutoTune::UseDefault => None,
        AutoTune::UseTunedOption(index) => table.get(index).copied(),
    }
}
