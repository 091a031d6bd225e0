use crate::dispatch::{DispatchData, KernelDescriptor, WorkGroups};
use crate::error::KernelResult;
use crate::jit::{make_convolution_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{KernelKind, OperationParams, OptionalParams, Size2};
use crate::priority::Priority;
use crate::selector::SelectionContext;
use crate::tensor::{ceil_div, round_up, DataLayout, Datatype, WeightsLayout, WeightsType};
use crate::variant::{AutoTune, KernelVariant};

use super::{convolution_kernels_data, validate_convolution, ConvolutionFlow};

pub const NAME: &str = "convolution_gpu_bfyx_f16_depthwise";

const WEIGHTS: &[WeightsLayout] = &[WeightsLayout::Oiyx];
const SUB_GROUP_SIZE: usize = 16;
const FEATURE_SLICE_SIZE: usize = 16;
const X_BLOCK_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConvolutionBfyxF16Depthwise;

impl KernelVariant for ConvolutionBfyxF16Depthwise {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Convolution
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F16)
            .enable_input_weights_type(WeightsType::F16)
            .enable_input_layout(DataLayout::BfyxF16)
            .enable_output_layout(DataLayout::BfyxF16)
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_bias_per_feature()
            .enable_non_bias_term()
            .enable_batching()
            .enable_split_support()
            .enable_sub_group()
            .enable_sub_group_short()
            .enable_depthwise_separable_opt();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        if !validate_convolution(params, options, WEIGHTS) {
            return false;
        }
        let Some(conv) = params.as_convolution() else {
            return false;
        };
        let Some(input) = conv.base().inputs.first() else {
            return false;
        };
        conv.depthwise_separable_opt
            && input.feature().v == conv.split
            && conv.filter == Size2::splat(3)
            && input.batch().v == 1
            && matches!(conv.stride.x, 1 | 2)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let conv = params.as_convolution()?;
        let out = &conv.base().output;
        let gws = [
            ceil_div(out.x().v, X_BLOCK_SIZE) * out.y().v,
            round_up(out.feature().v, FEATURE_SLICE_SIZE),
            out.batch().v,
        ];
        let mut dispatch = DispatchData::new(WorkGroups::new(gws, [1, SUB_GROUP_SIZE, 1]), true);
        dispatch.priority = if out.batch().v == 1 {
            Priority::FORCE_PRIORITY_1
        } else {
            Priority::FORCE_PRIORITY_7
        };
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(conv) = params.as_convolution() else {
            return JitConstants::default();
        };
        let xy_blocks = ceil_div(conv.base().output.x().v, X_BLOCK_SIZE);
        let mut jit = make_convolution_jit(conv, dispatch);
        jit.add_constant("SUB_GROUP_SIZE", SUB_GROUP_SIZE)
            .add_constant("XY_BLOCKS", xy_blocks)
            .add_constant("IC_BLOCK", FEATURE_SLICE_SIZE);
        jit
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        let flow = ConvolutionFlow {
            template: NAME,
            weights_layouts: WEIGHTS,
            reorder_input: false,
        };
        convolution_kernels_data(self, &flow, params, options, ctx, tune)
    }
}
