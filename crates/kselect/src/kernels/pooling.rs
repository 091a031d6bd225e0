//! Pooling variants.

use crate::dispatch::{argument_bindings, DispatchData, KernelDescriptor, WorkGroups};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_base_params_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{
    ActivationFunction, KernelKind, OperationParams, OptionalParams, PoolDivider, PoolRemainder,
    PoolType, PoolingParams, Size2,
};
use crate::priority::Priority;
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::{ceil_div, round_up, DataLayout, Datatype};
use crate::variant::{AutoTune, KernelVariant};

use super::{check_inputs_outputs_no_pitch_same_dims, fp16_used, kinds_match, simple_kernels_data};

pub const REF_NAME: &str = "pooling_gpu_ref";
pub const AVERAGE_OPT_NAME: &str = "pooling_gpu_average_opt";
pub const BLOCK_OPT_NAME: &str = "pooling_gpu_bfyx_block_opt";
pub const BLOCKED_NAME: &str = "pooling_gpu_blocked";

const SIMD_SIZE: usize = 16;
const AVERAGE_TILE: (usize, usize) = (SIMD_SIZE - 2, 7);
const FEATURE_SLICE_SIZE: usize = 16;
const X_BLOCK_SIZE: usize = 8;

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Pooling)
        .with(PoolingRef)
        .with(PoolingAverageOpt)
        .with(PoolingBfyxBlockOpt)
        .with(PoolingBlocked)
        .build()
}

fn validate_pooling(params: &OperationParams, options: &OptionalParams) -> bool {
    kinds_match(params, options, KernelKind::Pooling)
        && params
            .as_pooling()
            .is_some_and(|p| !p.base.inputs.is_empty())
}

/// True when some window reads outside the input or the grid leaves a remainder.
pub fn needs_boundary_check(params: &PoolingParams) -> bool {
    if params.padding.x != 0 || params.padding.y != 0 {
        return true;
    }
    let Some(input) = params.base.inputs.first() else {
        return true;
    };
    let (in_x, in_y) = (input.x().v, input.y().v);
    if in_x < params.pool_size.x || in_y < params.pool_size.y {
        return true;
    }
    let stride_x = params.stride.x.max(1);
    let stride_y = params.stride.y.max(1);
    (in_x - params.pool_size.x) % stride_x != 0 || (in_y - params.pool_size.y) % stride_y != 0
}

fn pooling_default_dispatch(params: &PoolingParams) -> DispatchData {
    let out = &params.base.output;
    let gws = [out.x().v, out.y().v, out.feature().v * out.batch().v];
    DispatchData::new(WorkGroups::with_optimal_local(gws), fp16_used(&params.base))
}

fn pooling_jit(params: &PoolingParams) -> JitConstants {
    let mut jit = make_base_params_jit(&params.base);
    jit.add_size("POOL", params.pool_size)
        .add_size("STRIDE", params.stride)
        .add_size("PADDING", params.padding)
        .add_constant(format!("{}_POOLING", params.pool_type.as_str()), "")
        .add_constant(format!("{}_KERNEL_DIVIDER", params.divider.as_str()), "");
    if needs_boundary_check(params) {
        jit.add_constant("CHECK_BOUNDRY", "");
    }
    jit
}

fn pooling_base_key() -> CapabilityKey {
    let mut k = CapabilityKey::new();
    k.enable_input_data_type(Datatype::F16)
        .enable_input_data_type(Datatype::F32)
        .enable_output_data_type(Datatype::F16)
        .enable_output_data_type(Datatype::F32)
        .enable_input_layout(DataLayout::Bfyx)
        .enable_output_layout(DataLayout::Bfyx)
        .enable_tensor_offset()
        .enable_tensor_pitches()
        .enable_batching()
        .enable_pool_remainder(PoolRemainder::Floor)
        .enable_pool_remainder(PoolRemainder::Ceil)
        .enable_pool_kernel_divider(PoolDivider::Fixed);
    k
}

fn pooling_kernels_data(
    variant: &dyn KernelVariant,
    template: &str,
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
    tune: AutoTune,
) -> KernelResult<Vec<KernelDescriptor>> {
    simple_kernels_data(
        variant,
        template,
        params,
        options,
        ctx,
        tune,
        argument_bindings(1, false, false, false),
    )
}

macro_rules! pooling_common {
    ($name:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn kind(&self) -> KernelKind {
            KernelKind::Pooling
        }

        fn tuned_kernels_data(
            &self,
            params: &OperationParams,
            options: &OptionalParams,
            ctx: &SelectionContext<'_>,
            tune: AutoTune,
        ) -> KernelResult<Vec<KernelDescriptor>> {
            pooling_kernels_data(self, $name, params, options, ctx, tune)
        }
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingRef;

impl KernelVariant for PoolingRef {
    pooling_common!(REF_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = pooling_base_key();
        k.enable_pool_type(PoolType::Max)
            .enable_pool_type(PoolType::Avg)
            .enable_pool_kernel_divider(PoolDivider::Dynamic);
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_pooling(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        params.as_pooling().map(pooling_default_dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params.as_pooling().map(pooling_jit).unwrap_or_default()
    }
}

/// 3x3 average over register tiles; each subgroup covers a 14x7 patch.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingAverageOpt;

impl KernelVariant for PoolingAverageOpt {
    pooling_common!(AVERAGE_OPT_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F32)
            .enable_input_layout(DataLayout::Bfyx)
            .enable_output_layout(DataLayout::Bfyx)
            .enable_pool_type(PoolType::Avg)
            .enable_pool_remainder(PoolRemainder::Floor)
            .enable_pool_remainder(PoolRemainder::Ceil)
            .enable_pool_kernel_divider(PoolDivider::Fixed);
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        if !validate_pooling(params, options) {
            return false;
        }
        let Some(p) = params.as_pooling() else {
            return false;
        };
        p.base.activation == ActivationFunction::None
            && p.pool_size == Size2::splat(3)
            && p.stride == Size2::splat(1)
            && p.padding == Size2::splat(1)
            && check_inputs_outputs_no_pitch_same_dims(&p.base)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_pooling()?;
        let input = p.base.inputs.first()?;
        let gws = [
            ceil_div(input.x().v, AVERAGE_TILE.0) * SIMD_SIZE,
            ceil_div(input.y().v, AVERAGE_TILE.1),
            input.feature().v,
        ];
        let groups = WorkGroups::new(gws, [SIMD_SIZE, 1, 1]);
        let mut dispatch = DispatchData::new(groups, fp16_used(&p.base));
        dispatch.priority = Priority::FORCE_PRIORITY_7;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_pooling() else {
            return JitConstants::default();
        };
        let mut jit = pooling_jit(p);
        jit.add_constant("SUB_GROUP_SIZE", dispatch.lws()[0])
            .add_constant("TILE_HEIGHT", AVERAGE_TILE.1)
            .add_constant("TILE_WIDTH", AVERAGE_TILE.0)
            .add_constant(
                "ONE_OVER_POOL_SIZE",
                1.0f32 / (p.pool_size.x * p.pool_size.y) as f32,
            );
        jit
    }
}

/// Each work item walks a column block of `pool_y` outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingBfyxBlockOpt;

impl KernelVariant for PoolingBfyxBlockOpt {
    pooling_common!(BLOCK_OPT_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = pooling_base_key();
        k.enable_pool_type(PoolType::Max)
            .enable_pool_type(PoolType::Avg)
            .enable_pool_type(PoolType::MaxWithArgmax)
            .enable_different_types();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_pooling(params, options)
            && params.as_pooling().is_some_and(|p| {
                !needs_boundary_check(p) && p.pool_size.x <= 5 && p.pool_size.y <= 5
            })
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_pooling()?;
        let mut gws = pooling_default_dispatch(p).gws();
        gws[1] = ceil_div(p.base.output.y().v, p.pool_size.y.max(1));
        let groups = WorkGroups::with_optimal_local(gws);
        let mut dispatch = DispatchData::new(groups, fp16_used(&p.base));
        dispatch.priority = Priority::FORCE_PRIORITY_8;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_pooling() else {
            return JitConstants::default();
        };
        let mut jit = pooling_jit(p);
        let block_y = p.pool_size.y + p.pool_size.y * p.stride.y - 1;
        jit.add_constant("BLOCK_SIZE_Y", block_y);
        jit
    }
}

/// Feature-sliced fp16 pooling, eight outputs along x per work item.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolingBlocked;

impl KernelVariant for PoolingBlocked {
    pooling_common!(BLOCKED_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F16)
            .enable_input_layout(DataLayout::BfyxF16)
            .enable_output_layout(DataLayout::BfyxF16)
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_batching()
            .enable_pool_type(PoolType::Max)
            .enable_pool_type(PoolType::Avg)
            .enable_pool_remainder(PoolRemainder::Floor)
            .enable_pool_remainder(PoolRemainder::Ceil)
            .enable_pool_kernel_divider(PoolDivider::Fixed)
            .enable_pool_kernel_divider(PoolDivider::Dynamic)
            .enable_pool_kernel_divider(PoolDivider::DynamicWithPadding)
            .enable_different_types();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_pooling(params, options)
            && params
                .as_pooling()
                .is_some_and(|p| p.base.output.feature().v % FEATURE_SLICE_SIZE == 0)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_pooling()?;
        let out = &p.base.output;
        let gws = [
            ceil_div(out.x().v, X_BLOCK_SIZE) * out.y().v,
            round_up(out.feature().v, FEATURE_SLICE_SIZE),
            out.batch().v,
        ];
        let groups = WorkGroups::new(gws, [1, FEATURE_SLICE_SIZE, 1]);
        let mut dispatch = DispatchData::new(groups, true);
        dispatch.priority = if out.batch().v == 1 {
            Priority::FORCE_PRIORITY_1
        } else {
            Priority::FORCE_PRIORITY_7
        };
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_pooling() else {
            return JitConstants::default();
        };
        let line_size = p.stride.x * (X_BLOCK_SIZE - 1) + p.pool_size.x;
        let mut jit = pooling_jit(p);
        jit.add_constant("IC_BLOCK", FEATURE_SLICE_SIZE)
            .add_constant("X_BLOCK_SIZE", X_BLOCK_SIZE)
            .add_constant("INPUT_LINE_SIZE", line_size)
            .add_constant("SUB_GROUP_SIZE", FEATURE_SLICE_SIZE)
            .add_constant("X_BLOCKS", ceil_div(p.base.output.x().v, X_BLOCK_SIZE));
        jit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PrimitiveDb;
    use crate::params::BaseParams;
    use crate::selector::SelectorConfig;
    use crate::tensor::DataTensor;

    fn pooling(
        in_xy: usize,
        out_xy: usize,
        pool: usize,
        stride: usize,
        pool_type: PoolType,
    ) -> PoolingParams {
        let (dtype, layout) = (Datatype::F32, DataLayout::Bfyx);
        let input = DataTensor::from_extents(&[in_xy, in_xy, 8, 1], dtype, layout);
        let output = DataTensor::from_extents(&[out_xy, out_xy, 8, 1], dtype, layout);
        PoolingParams::new(
            BaseParams::new("pool", vec![input], output),
            pool_type,
            Size2::splat(pool),
            Size2::splat(stride),
        )
    }

    #[test]
    fn boundary_check_tracks_remainders() {
        assert!(!needs_boundary_check(&pooling(8, 4, 2, 2, PoolType::Max)));
        assert!(needs_boundary_check(&pooling(9, 4, 2, 2, PoolType::Max)));
        assert!(needs_boundary_check(&pooling(1, 1, 2, 2, PoolType::Max)));

        let mut padded = pooling(8, 4, 2, 2, PoolType::Max);
        padded.padding = Size2::splat(1);
        assert!(needs_boundary_check(&padded));
    }

    #[test]
    fn block_opt_wins_over_reference_when_aligned() {
        let selector = selector().expect("pooling selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::Pooling);

        let aligned = OperationParams::Pooling(pooling(8, 4, 2, 2, PoolType::Max));
        let best = selector
            .get_best_kernels(&aligned, &options, &ctx)
            .expect("selection succeeds");
        assert_eq!(best[0].kernel_name, BLOCK_OPT_NAME);
        let launch = best[0].primary().expect("launch");
        assert_eq!(launch.work_groups.global, [4, 2, 8]);

        let ragged = OperationParams::Pooling(pooling(9, 4, 2, 2, PoolType::Max));
        let best = selector
            .get_best_kernels(&ragged, &options, &ctx)
            .expect("selection succeeds");
        assert_eq!(best[0].kernel_name, REF_NAME);
        let jit = &best[0].kernels[0].kernel.jit;
        assert!(jit.contains("#define CHECK_BOUNDRY"));
    }

    #[test]
    fn average_opt_needs_same_dims_and_no_activation() {
        let options = OptionalParams::new(KernelKind::Pooling);
        let mut p = pooling(16, 16, 3, 1, PoolType::Avg);
        p.padding = Size2::splat(1);
        let params = OperationParams::Pooling(p.clone());
        assert!(PoolingAverageOpt.validate(&params, &options));

        let d = PoolingAverageOpt
            .set_default(&params, AutoTune::UseDefault)
            .expect("pooling");
        assert_eq!(d.gws(), [32, 3, 8]);

        p.base.activation = ActivationFunction::Relu;
        let params = OperationParams::Pooling(p);
        assert!(!PoolingAverageOpt.validate(&params, &options));
    }
}
