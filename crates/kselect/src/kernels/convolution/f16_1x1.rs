use crate::dispatch::{DispatchData, KernelDescriptor, WorkGroups};
use crate::error::KernelResult;
use crate::jit::{make_convolution_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{KernelKind, OperationParams, OptionalParams};
use crate::priority::Priority;
use crate::selector::SelectionContext;
use crate::tensor::{ceil_div, round_up, DataLayout, Datatype, WeightsLayout, WeightsType};
use crate::variant::{AutoTune, KernelVariant};

use super::{convolution_kernels_data, validate_convolution, ConvolutionFlow};

pub const NAME: &str = "convolution_gpu_bfyx_f16_1x1";

const WEIGHTS: &[WeightsLayout] = &[WeightsLayout::OIYxI16O16];
const SUB_GROUP_SIZE: usize = 16;
const FEATURE_SLICE_SIZE: usize = 16;
const X_BLOCK_SIZE: usize = 8;

/// Pointwise convolution over feature-sliced fp16 tensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvolutionBfyxF16Pointwise;

impl KernelVariant for ConvolutionBfyxF16Pointwise {
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
            .enable_dilation()
            .enable_bias_per_feature()
            .enable_non_bias_term()
            .enable_batching()
            .enable_sub_group()
            .enable_sub_group_short();
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
        let output = &conv.base().output;

        let output_padded = output.x().pad.total() != 0 || output.y().pad.total() != 0;
        let sizes_differ = output.x().v != input.x().v
            || output.y().v != input.y().v
            || output.feature().v % FEATURE_SLICE_SIZE != 0;
        let not_pointwise = conv.filter.x != 1 || conv.filter.y != 1;
        let strided = conv.stride.x != 1 || conv.stride.y != 1;
        !(output_padded || sizes_differ || not_pointwise || strided)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let conv = params.as_convolution()?;
        let out = &conv.base().output;
        let gws = [
            ceil_div(out.x().v * out.y().v, X_BLOCK_SIZE),
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
        let base = conv.base();
        let input_padded = base.inputs.first().is_some_and(|i| i.x().pad.total() != 0);
        let input_features = base.inputs.first().map_or(0, |i| i.feature().v);

        let mut jit = make_convolution_jit(conv, dispatch);
        jit.add_constant("SUB_GROUP_SIZE", SUB_GROUP_SIZE)
            .add_constant("PADDED_INPUT", input_padded)
            .add_constant("PADDED_OUTPUT", base.output.x().pad.total() != 0)
            .add_constant("X_BLOCK_SIZE", X_BLOCK_SIZE)
            .add_constant("X_BLOCKS", ceil_div(base.output.x().v, X_BLOCK_SIZE))
            .add_constant("IC_BLOCKS", ceil_div(input_features, FEATURE_SLICE_SIZE));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::convolution::test_support::engine;
    use crate::params::{BaseParams, ConvolutionParams, Size2, WeightBiasParams};
    use crate::tensor::{DataTensor, WeightsTensor};

    fn pointwise(batch: usize, ofm: usize) -> ConvolutionParams {
        let (dtype, layout) = (Datatype::F16, DataLayout::BfyxF16);
        let input = DataTensor::from_extents(&[14, 14, 32, batch], dtype, layout);
        let output = DataTensor::from_extents(&[14, 14, ofm, batch], dtype, layout);
        let filter = [1, 1, 32, ofm];
        let weights =
            WeightsTensor::from_extents(&filter, WeightsType::F16, WeightsLayout::OIYxI16O16);
        let base = BaseParams::new("pw", vec![input], output)
            .with_engine(engine());
        ConvolutionParams::new(WeightBiasParams::new(base, weights, None))
    }

    fn dispatch(params: &OperationParams) -> DispatchData {
        ConvolutionBfyxF16Pointwise
            .set_default(params, AutoTune::UseDefault)
            .expect("conv")
    }

    fn accepts(conv: ConvolutionParams) -> bool {
        let options = OptionalParams::new(KernelKind::Convolution);
        let params = OperationParams::Convolution(conv);
        ConvolutionBfyxF16Pointwise.validate(&params, &options)
    }

    #[test]
    fn priority_drops_with_batch() {
        let single = OperationParams::Convolution(pointwise(1, 64));
        let d = dispatch(&single);
        assert_eq!(d.gws(), [25, 64, 1]);
        assert_eq!(d.lws(), [1, 16, 1]);
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_1);

        let batched = OperationParams::Convolution(pointwise(4, 64));
        let d = dispatch(&batched);
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_7);
    }

    #[test]
    fn rejects_non_pointwise_shapes() {
        assert!(accepts(pointwise(1, 64)));
        assert!(!accepts(pointwise(1, 40)));

        let mut strided = pointwise(1, 64);
        strided.stride = Size2::splat(2);
        assert!(!accepts(strided));
    }

    #[test]
    fn jit_counts_blocks() {
        let params = OperationParams::Convolution(pointwise(1, 64));
        let d = dispatch(&params);
        let jit = ConvolutionBfyxF16Pointwise.jit_constants(&params, &d);
        assert_eq!(jit.value("X_BLOCKS").as_deref(), Some("2"));
        assert_eq!(jit.value("IC_BLOCKS").as_deref(), Some("2"));
        assert_eq!(jit.value("PADDED_INPUT").as_deref(), Some("0"));
    }
}
