use crate::dispatch::{DispatchData, KernelDescriptor, WorkGroups};
use crate::error::KernelResult;
use crate::jit::{make_convolution_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::kernels::fp16_used;
use crate::params::{KernelKind, OperationParams, OptionalParams};
use crate::selector::SelectionContext;
use crate::tensor::WeightsLayout;
use crate::variant::{AutoTune, KernelVariant};

use super::{bfyx_float_key, convolution_kernels_data, validate_convolution, ConvolutionFlow};

pub const NAME: &str = "convolution_gpu_bfyx_ref";

const WEIGHTS: &[WeightsLayout] = &[WeightsLayout::Oiyx];

/// Naive convolution. Handles padding, dilation and depthwise itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvolutionBfyxRef;

impl KernelVariant for ConvolutionBfyxRef {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Convolution
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = bfyx_float_key();
        k.enable_bias_per_output()
            .enable_dilation()
            .enable_depthwise_separable_opt();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_convolution(params, options, WEIGHTS)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let conv = params.as_convolution()?;
        let out = &conv.base().output;
        let gws = [out.x().v, out.y().v, out.feature().v * out.batch().v];
        Some(DispatchData::new(
            WorkGroups::with_optimal_local(gws),
            fp16_used(conv.base()),
        ))
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        params
            .as_convolution()
            .map(|conv| make_convolution_jit(conv, dispatch))
            .unwrap_or_default()
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
