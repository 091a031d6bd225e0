use crate::dispatch::{DispatchData, ExeMode, GemmConfig, KernelDescriptor, WorkGroups};
use crate::error::KernelResult;
use crate::jit::{make_convolution_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{ConvolutionParams, KernelKind, OperationParams, OptionalParams};
use crate::priority::Priority;
use crate::selector::SelectionContext;
use crate::tensor::{ceil_div, round_up, Datatype, WeightsLayout};
use crate::variant::{AutoTune, KernelVariant};

use super::{
    bfyx_float_key, convolution_check_input, convolution_kernels_data, validate_convolution,
    ConvolutionFlow,
};

pub const NAME: &str = "convolution_gpu_bfyx_gemm_like";
pub const TEMPLATE_FP16: &str = "convolution_gpu_bfyx_gemm_like_fp16";
pub const TEMPLATE_FP32: &str = "convolution_gpu_bfyx_gemm_like_fp32";

const WEIGHTS_FP16: &[WeightsLayout] = &[WeightsLayout::IyXsOsXsv2Osv16Ao32];
const WEIGHTS_FP32: &[WeightsLayout] = &[WeightsLayout::IyXsOsXsv2Osv8Ao32];

/// Convolution as a blocked matrix multiply over the filter rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvolutionBfyxGemmLike;

fn is_fp16(conv: &ConvolutionParams) -> bool {
    conv.base()
        .inputs
        .first()
        .is_some_and(|input| input.dtype() == Datatype::F16)
}

fn weights_layouts(conv: &ConvolutionParams) -> &'static [WeightsLayout] {
    if is_fp16(conv) {
        WEIGHTS_FP16
    } else {
        WEIGHTS_FP32
    }
}

impl KernelVariant for ConvolutionBfyxGemmLike {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Convolution
    }

    fn supported_key(&self) -> CapabilityKey {
        // Short subgroups are only needed for fp16 and are checked in validate.
        let mut k = bfyx_float_key();
        k.enable_sub_group();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        let Some(conv) = params.as_convolution() else {
            return false;
        };
        if !validate_convolution(params, options, weights_layouts(conv))
            || !convolution_check_input(conv, options)
        {
            return false;
        }
        !is_fp16(conv) || conv.base().engine.sub_group_short
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let conv = params.as_convolution()?;
        let out = &conv.base().output;
        let fp16 = is_fp16(conv);
        let (rows, lws1, priority) = if fp16 {
            (1, 16, Priority::FORCE_PRIORITY_6)
        } else {
            (2, 8, Priority::FORCE_PRIORITY_8)
        };
        let gemm = GemmConfig {
            m: rows,
            k: conv.filter.x,
            n: 32,
            dx: 32,
            dy: rows,
        };

        let sgemm_m = round_up(out.x().v * out.y().v, gemm.m);
        let sgemm_n = round_up(out.feature().v, gemm.n);
        let gws = [
            ceil_div(sgemm_n, gemm.dx),
            round_up(ceil_div(sgemm_m, gemm.dy), lws1),
            out.batch().v,
        ];
        let groups = WorkGroups::new(gws, [1, lws1, 1]);
        let mut dispatch = DispatchData::new(groups, fp16);
        dispatch.gemm = Some(gemm);
        dispatch.priority = priority;
        dispatch.exe_mode = ExeMode::AgeBased;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(conv) = params.as_convolution() else {
            return JitConstants::default();
        };
        let mut jit = make_convolution_jit(conv, dispatch);
        let gemm = dispatch.gemm.unwrap_or_default();
        let aligned_ofm = round_up(conv.base().output.feature().v, gemm.n.max(1));
        jit.add_constant("ALIGNED_OFM", aligned_ofm)
            .add_constant("DX", gemm.dx)
            .add_constant("DY", gemm.dy)
            .add_constant("FILTER_SIZE_X_DIV2", conv.filter.x / 2)
            .add_constant("INPUT_BUFFER_WIDTH_PADDED", "")
            .add_constant("INPUT_BUFFER_HEIGHT_PADDED", "");
        jit
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        let Some(conv) = params.as_convolution() else {
            return Ok(Vec::new());
        };
        let template = if is_fp16(conv) {
            TEMPLATE_FP16
        } else {
            TEMPLATE_FP32
        };
        let flow = ConvolutionFlow {
            template,
            weights_layouts: weights_layouts(conv),
            reorder_input: true,
        };
        convolution_kernels_data(self, &flow, params, options, ctx, tune)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::convolution::test_support::conv;

    #[test]
    fn fp32_blocks_two_rows() {
        let params = OperationParams::Convolution(conv(10, 10, 16, 40, 3, Datatype::F32));
        let d = ConvolutionBfyxGemmLike
            .set_default(&params, AutoTune::UseDefault)
            .expect("conv params");
        // 8x8 outputs, 40 features rounded to 64.
        assert_eq!(d.gws(), [2, 32, 1]);
        assert_eq!(d.lws(), [1, 8, 1]);
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_8);
        assert_eq!(d.exe_mode, ExeMode::AgeBased);
    }

    #[test]
    fn fp16_needs_short_subgroups() {
        let mut c = conv(10, 10, 16, 32, 3, Datatype::F16);
        let options = OptionalParams::new(KernelKind::Convolution);
        let params = OperationParams::Convolution(c.clone());
        assert!(ConvolutionBfyxGemmLike.validate(&params, &options));

        c.weight_bias.base.engine.sub_group_short = false;
        let params = OperationParams::Convolution(c);
        assert!(!ConvolutionBfyxGemmLike.validate(&params, &options));
    }

    #[test]
    fn fp16_uses_its_own_template_and_priority() {
        let params = OperationParams::Convolution(conv(10, 10, 16, 32, 3, Datatype::F16));
        let d = ConvolutionBfyxGemmLike
            .set_default(&params, AutoTune::UseDefault)
            .expect("conv params");
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_6);
        assert_eq!(d.lws(), [1, 16, 1]);
        let jit = ConvolutionBfyxGemmLike.jit_constants(&params, &d);
        assert_eq!(jit.value("ALIGNED_OFM").as_deref(), Some("32"));
        assert_eq!(jit.value("FILTER_SIZE_X_DIV2").as_deref(), Some("1"));
    }
}
