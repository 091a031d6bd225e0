//! Fully connected variants.

use log::debug;

use crate::dispatch::{argument_bindings, divisor_lws, DispatchData, KernelDescriptor, WorkGroups};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_weight_bias_params_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{
    ActivationFunction, FullyConnectedParams, KernelKind, OperationParams, OptionalParams,
};
use crate::priority::Priority;
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::{
    ceil_div, round_up, DataLayout, DataTensor, Datatype, WeightsLayout, WeightsType,
};
use crate::variant::{tune_in_range, AutoTune, KernelVariant};
use crate::weights::update_weights_params;

use super::{build_descriptor, fp16_used, kinds_match};

pub const REF_NAME: &str = "fully_connected_gpu_ref";
pub const GEMM_NAME: &str = "fully_connected_gpu_gemm";
pub const BS_F_BSV16_B1_NAME: &str = "fully_connected_gpu_bs_f_bsv16_b1";
pub const FB_IO_BLOCK_NAME: &str = "fully_connected_gpu_fb_io_block";

const SUB_GROUP_SIZE: usize = 16;
const CHUNK_TYPE: &str = "uint";
const CHUNK_BYTE_SIZE: usize = 4;
const GEMM_LOCAL_X: usize = 64;
const GEMM_VEC_SIZE: usize = 4;

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::FullyConnected)
        .with(FullyConnectedRef)
        .with(FullyConnectedGemm)
        .with(FullyConnectedBsFBsv16B1)
        .with(FullyConnectedFbIoBlock)
        .build()
}

fn supported_activation(activation: ActivationFunction) -> bool {
    matches!(
        activation,
        ActivationFunction::None | ActivationFunction::Relu | ActivationFunction::ReluNegativeSlope
    )
}

/// Layout the variant reads already, either exactly or by flattening a pitch-free 4d input.
pub fn input_is_proper(input: &DataTensor, layout: DataLayout) -> bool {
    if input.layout() == layout {
        return true;
    }
    if input.pitches_differ_from_logical_dims() {
        return false;
    }
    matches!(
        (layout, input.layout()),
        (DataLayout::Bf, DataLayout::Bfyx) | (DataLayout::Fb, DataLayout::Fyxb)
    )
}

fn validate_fully_connected(params: &OperationParams, options: &OptionalParams) -> bool {
    kinds_match(params, options, KernelKind::FullyConnected)
        && params
            .as_fully_connected()
            .is_some_and(|fc| !fc.base().inputs.is_empty())
}

/// gws0 is the output's logical size.
pub fn fully_connected_default_dispatch(fc: &FullyConnectedParams) -> DispatchData {
    let gws0 = fc.base().output.logical_size();
    DispatchData::new(
        WorkGroups::new([gws0, 1, 1], [divisor_lws(gws0), 1, 1]),
        fp16_used(fc.base()),
    )
}

fn fully_connected_jit(fc: &FullyConnectedParams) -> JitConstants {
    let mut jit = make_weight_bias_params_jit(&fc.weight_bias);
    let batch = fc.base().output.batch().v.max(1);
    if let Some(input) = fc.base().inputs.first() {
        jit.add_constant("INPUT0_ELEMENTS_COUNT", input.logical_size() / batch);
    }
    jit
}

fn fp16_key() -> CapabilityKey {
    let mut k = CapabilityKey::new();
    k.enable_input_data_type(Datatype::F16)
        .enable_input_data_type(Datatype::F32)
        .enable_output_data_type(Datatype::F16)
        .enable_output_data_type(Datatype::F32)
        .enable_input_weights_type(WeightsType::F16)
        .enable_input_weights_type(WeightsType::F32);
    k
}

fn bf_key() -> CapabilityKey {
    let mut k = fp16_key();
    k.enable_input_layout(DataLayout::Bfyx)
        .enable_input_layout(DataLayout::Bf)
        .enable_output_layout(DataLayout::Bf)
        .enable_bias_per_feature()
        .enable_non_bias_term()
        .enable_tensor_offset()
        .enable_tensor_pitches()
        .enable_batching();
    k
}

struct FullyConnectedFlow<'a> {
    template: &'a str,
    /// `None` reads the caller's input as is.
    input_layout: Option<DataLayout>,
    weights_layouts: &'a [WeightsLayout],
}

fn fully_connected_kernels_data(
    variant: &dyn KernelVariant,
    flow: &FullyConnectedFlow<'_>,
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
    tune: AutoTune,
) -> KernelResult<Vec<KernelDescriptor>> {
    if !tune_in_range(variant, tune) || !variant.validate(params, options) {
        return Ok(Vec::new());
    }
    let Some(fc) = params.as_fully_connected() else {
        return Ok(Vec::new());
    };
    let mut weight_bias = fc.weight_bias.clone();

    let mut reorder_input = false;
    if let Some(layout) = flow.input_layout {
        if !supported_activation(fc.base().activation) {
            return Ok(Vec::new());
        }
        let Some(input) = weight_bias.base.inputs.first() else {
            return Ok(Vec::new());
        };
        if !input_is_proper(input, layout) {
            if !options.allow_reorder_input {
                return Ok(Vec::new());
            }
            let Some(flat) = input.transform_ignore_padding(layout) else {
                return Ok(Vec::new());
            };
            weight_bias.base.inputs[0] = flat;
            reorder_input = true;
        }
    }

    let updated = update_weights_params(&weight_bias, options, flow.weights_layouts, ctx)?;
    let Some(updated) = updated else {
        debug!(
            "{}: weights cannot reach {:?}",
            variant.name(),
            flow.weights_layouts
        );
        return Ok(Vec::new());
    };
    let has_bias = !updated.params.bias.is_empty();
    let new_params = FullyConnectedParams::new(updated.params);
    let new_params = OperationParams::FullyConnected(new_params);

    let arguments = argument_bindings(1, true, has_bias, false);
    let descriptor = build_descriptor(
        variant,
        flow.template,
        &new_params,
        options,
        ctx,
        tune,
        arguments,
    )?;
    let Some(mut descriptor) = descriptor else {
        return Ok(Vec::new());
    };
    descriptor.weights_reorder = updated.reorder;
    descriptor.reorder_input = reorder_input;
    Ok(vec![descriptor])
}

macro_rules! fully_connected_common {
    ($name:expr, $input_layout:expr, $weights:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn kind(&self) -> KernelKind {
            KernelKind::FullyConnected
        }

        fn tuned_kernels_data(
            &self,
            params: &OperationParams,
            options: &OptionalParams,
            ctx: &SelectionContext<'_>,
            tune: AutoTune,
        ) -> KernelResult<Vec<KernelDescriptor>> {
            let flow = FullyConnectedFlow {
                template: $name,
                input_layout: $input_layout,
                weights_layouts: $weights,
            };
            fully_connected_kernels_data(self, &flow, params, options, ctx, tune)
        }
    };
}

/// One work item per output element.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullyConnectedRef;

impl KernelVariant for FullyConnectedRef {
    fully_connected_common!(REF_NAME, None, &[WeightsLayout::Oiyx]);

    fn supported_key(&self) -> CapabilityKey {
        bf_key()
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_fully_connected(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let fc = params.as_fully_connected()?;
        let out = &fc.base().output;
        let gws = [out.feature().v, out.batch().v, 1];
        let groups = WorkGroups::with_optimal_local(gws);
        Some(DispatchData::new(groups, fp16_used(fc.base())))
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params
            .as_fully_connected()
            .map(fully_connected_jit)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FullyConnectedGemm;

impl KernelVariant for FullyConnectedGemm {
    fully_connected_common!(GEMM_NAME, None, &[WeightsLayout::Oiyx]);

    fn supported_key(&self) -> CapabilityKey {
        bf_key()
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_fully_connected(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let fc = params.as_fully_connected()?;
        let out = &fc.base().output;
        let gws = [GEMM_LOCAL_X, out.feature().v, out.batch().v];
        let groups = WorkGroups::new(gws, [GEMM_LOCAL_X, 1, 1]);
        let mut dispatch = DispatchData::new(groups, fp16_used(fc.base()));
        dispatch.priority = Priority::FORCE_PRIORITY_6;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        let Some(fc) = params.as_fully_connected() else {
            return JitConstants::default();
        };
        let Some(input) = fc.base().inputs.first() else {
            return JitConstants::default();
        };
        // One matrix line is one batch of the input.
        let line = input.batch().pitch;
        let mut jit = fully_connected_jit(fc);
        let precision = if input.dtype() == Datatype::F16 {
            "__fc_f16"
        } else {
            "__fc_f32"
        };
        let remainder = line % (GEMM_LOCAL_X * GEMM_VEC_SIZE);
        jit.add_constant(precision, "")
            .add_constant("LAST_INPUT_SIZE_REMAINDER", remainder)
            .add_constant("LAST_INPUT_SIZE_DIV_4", line % GEMM_VEC_SIZE);
        jit
    }
}

/// Chunked subgroup reads shared by the block variants.
fn chunk_jit(jit: &mut JitConstants, dispatch: &DispatchData) {
    let unit_byte_size = if dispatch.fp16_unit_used { 2 } else { 4 };
    let units_per_chunk = CHUNK_BYTE_SIZE / unit_byte_size;
    let sub_group = dispatch.lws()[0];
    jit.add_constant("SUB_GROUP_SIZE", sub_group)
        .add_constant("WORK_ITEMS_PER_BATCH", dispatch.gws()[1])
        .add_constant("UNIT_BYTE_SIZE", unit_byte_size)
        .add_constant("CHUNK_TYPE", CHUNK_TYPE)
        .add_constant("CHUNK_BYTE_SIZE", CHUNK_BYTE_SIZE)
        .add_constant("UNITS_PER_CHUNK", units_per_chunk)
        .add_constant("BYTES_PER_SG_READ", sub_group * CHUNK_BYTE_SIZE)
        .add_constant("UNITS_PER_SG_READ", sub_group * units_per_chunk);
}

/// Batch-one kernel over os_i_osv16 weights, sixteen responses per subgroup.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullyConnectedBsFBsv16B1;

impl KernelVariant for FullyConnectedBsFBsv16B1 {
    fully_connected_common!(
        BS_F_BSV16_B1_NAME,
        Some(DataLayout::Bf),
        &[WeightsLayout::OsIOsv16]
    );

    fn supported_key(&self) -> CapabilityKey {
        let mut k = fp16_key();
        k.enable_input_layout(DataLayout::Bf)
            .enable_input_layout(DataLayout::Bfyx)
            .enable_output_layout(DataLayout::Bf)
            .enable_bias_per_feature()
            .enable_non_bias_term()
            .enable_sub_group();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_fully_connected(params, options)
            && params
                .as_fully_connected()
                .is_some_and(|fc| fc.base().output.batch().v == 1)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let fc = params.as_fully_connected()?;
        let gws = [round_up(fc.base().output.feature().v, SUB_GROUP_SIZE), 1, 1];
        let mut dispatch = fully_connected_default_dispatch(fc);
        dispatch.work_groups = WorkGroups::new(gws, [SUB_GROUP_SIZE, 1, 1]);
        dispatch.priority = Priority::FORCE_PRIORITY_5;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(fc) = params.as_fully_connected() else {
            return JitConstants::default();
        };
        let responses_per_sg_exec = SUB_GROUP_SIZE;
        let mut jit = fully_connected_jit(fc);
        chunk_jit(&mut jit, dispatch);
        jit.add_constant("RESPONSES_PER_SG_EXEC", responses_per_sg_exec)
            .add_constant("IN_CHUNK_PREFETCH_SIZE", 2usize)
            .add_constant("FILTER_CHUNK_PREFETCH_SIZE", responses_per_sg_exec);
        jit
    }
}

/// Feature-major batched kernel; each work item covers eight batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullyConnectedFbIoBlock;

impl KernelVariant for FullyConnectedFbIoBlock {
    fully_connected_common!(FB_IO_BLOCK_NAME, Some(DataLayout::Fb), &[WeightsLayout::Io]);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = fp16_key();
        k.enable_input_layout(DataLayout::Fb)
            .enable_input_layout(DataLayout::Fyxb)
            .enable_output_layout(DataLayout::Fb)
            .enable_batching()
            .enable_bias_per_feature()
            .enable_non_bias_term()
            .enable_sub_group();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        if !validate_fully_connected(params, options) {
            return false;
        }
        params.as_fully_connected().is_some_and(|fc| {
            let out = &fc.base().output;
            let batch = out.batch().v;
            batch > 0 && batch % 8 == 0 && out.feature().v > 0
        })
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let fc = params.as_fully_connected()?;
        let out = &fc.base().output;
        let batch = out.batch().v;
        let gws0 = out.feature().v * batch / 8;
        let lws0 = if gws0 % SUB_GROUP_SIZE == 0 {
            SUB_GROUP_SIZE
        } else {
            8
        };
        let fp16_input = fc.base()
            .inputs
            .first()
            .is_some_and(|i| i.dtype() == Datatype::F16);

        let mut dispatch = fully_connected_default_dispatch(fc);
        dispatch.work_groups = WorkGroups::new([gws0, 1, 1], [lws0, 1, 1]);
        dispatch.priority = if fp16_input && batch >= 16 {
            Priority::FORCE_PRIORITY_3
        } else {
            Priority::FORCE_PRIORITY_5
        };
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(fc) = params.as_fully_connected() else {
            return JitConstants::default();
        };
        let response_size = fc.base().output.feature().v;
        let unit_byte_size = if dispatch.fp16_unit_used { 2 } else { 4 };
        let units_per_sg_read = dispatch.lws()[0] * (CHUNK_BYTE_SIZE / unit_byte_size);

        let mut jit = fully_connected_jit(fc);
        chunk_jit(&mut jit, dispatch);
        jit.add_constant("RG_COUNT", ceil_div(response_size, units_per_sg_read))
            .add_constant("LAST_RG_SIZE", response_size % units_per_sg_read);
        jit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PrimitiveDb;
    use crate::params::{BaseParams, EngineInfo, WeightBiasParams};
    use crate::selector::SelectorConfig;
    use crate::tensor::WeightsTensor;

    fn engine() -> EngineInfo {
        EngineInfo {
            sub_group: true,
            sub_group_short: true,
            fp16: true,
            fp64: false,
            compute_units: 24,
        }
    }

    fn fc(
        input: DataTensor,
        ofm: usize,
        batch: usize,
        out_layout: DataLayout,
    ) -> FullyConnectedParams {
        let dtype = input.dtype();
        let wtype = match dtype {
            Datatype::F16 => WeightsType::F16,
            _ => WeightsType::F32,
        };
        let ifm = input.logical_size() / batch;
        let extents = out_extents(out_layout, ofm, batch);
        let output = DataTensor::from_extents(&extents, dtype, out_layout);
        let weights = WeightsTensor::from_extents(&[1, 1, ifm, ofm], wtype, WeightsLayout::Oiyx);
        let base = BaseParams::new("fc", vec![input], output)
            .with_engine(engine());
        FullyConnectedParams::new(WeightBiasParams::new(base, weights, None))
    }

    fn out_extents(layout: DataLayout, ofm: usize, batch: usize) -> Vec<usize> {
        match layout {
            DataLayout::Fb => vec![batch, ofm],
            _ => vec![ofm, batch],
        }
    }

    #[test]
    fn default_dispatch_spans_output() {
        let input = DataTensor::from_extents(&[64, 3], Datatype::F32, DataLayout::Bf);
        let d = fully_connected_default_dispatch(&fc(input, 20, 3, DataLayout::Bf));
        assert_eq!(d.gws(), [60, 1, 1]);
        assert_eq!(d.lws(), [30, 1, 1]);
    }

    #[test]
    fn flattened_inputs_count_as_proper() {
        let bfyx = DataTensor::from_extents(&[4, 4, 8, 1], Datatype::F32, DataLayout::Bfyx);
        assert!(input_is_proper(&bfyx, DataLayout::Bf));
        assert!(!input_is_proper(&bfyx, DataLayout::Fb));

        let fyxb = DataTensor::from_extents(&[8, 4, 4, 16], Datatype::F16, DataLayout::Fyxb);
        assert!(input_is_proper(&fyxb, DataLayout::Fb));
    }

    #[test]
    fn gemm_overrides_the_reference() {
        let selector = selector().expect("fc selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::FullyConnected);

        let input = DataTensor::from_extents(&[4, 4, 8, 2], Datatype::F32, DataLayout::Bfyx);
        let params = OperationParams::FullyConnected(fc(input, 10, 2, DataLayout::Bf));
        let best = selector
            .get_best_kernels(&params, &options, &ctx)
            .expect("selection succeeds");
        assert_eq!(best[0].kernel_name, GEMM_NAME);
        let launch = best[0].primary().expect("launch");
        assert_eq!(launch.work_groups.global, [64, 10, 2]);
        assert!(launch.kernel.jit.contains("#define __fc_f32"));
        assert!(best[0].weights_reorder.is_none());
    }

    #[test]
    fn batch_one_prefers_subgroup_block_kernel() {
        let selector = selector().expect("fc selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::FullyConnected);

        let input = DataTensor::from_extents(&[64, 1], Datatype::F16, DataLayout::Bf);
        let params = OperationParams::FullyConnected(fc(input, 20, 1, DataLayout::Bf));
        let best = selector
            .get_best_kernels(&params, &options, &ctx)
            .expect("selection succeeds");
        // Without a weights-reorder selector the os_i_osv16 variant cannot run.
        assert_eq!(best[0].kernel_name, GEMM_NAME);

        let d = FullyConnectedBsFBsv16B1
            .set_default(&params, AutoTune::UseDefault)
            .expect("fc");
        assert_eq!(d.gws(), [32, 1, 1]);
        assert_eq!(d.lws(), [16, 1, 1]);
        let jit = FullyConnectedBsFBsv16B1.jit_constants(&params, &d);
        assert_eq!(jit.value("UNITS_PER_SG_READ").as_deref(), Some("32"));
    }

    #[test]
    fn fb_io_block_priority_tracks_batch() {
        let input = DataTensor::from_extents(&[16, 32], Datatype::F16, DataLayout::Fb);
        let params = OperationParams::FullyConnected(fc(input, 32, 16, DataLayout::Fb));
        let options = OptionalParams::new(KernelKind::FullyConnected);
        assert!(FullyConnectedFbIoBlock.validate(&params, &options));
        let d = FullyConnectedFbIoBlock
            .set_default(&params, AutoTune::UseDefault)
            .expect("fc");
        assert_eq!(d.gws(), [64, 1, 1]);
        assert_eq!(d.lws(), [16, 1, 1]);
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_3);

        let input = DataTensor::from_extents(&[8, 32], Datatype::F16, DataLayout::Fb);
        let params = OperationParams::FullyConnected(fc(input, 3, 8, DataLayout::Fb));
        let d = FullyConnectedFbIoBlock
            .set_default(&params, AutoTune::UseDefault)
            .expect("fc");
        assert_eq!(d.lws(), [8, 1, 1]);
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_5);

        let input = DataTensor::from_extents(&[12, 32], Datatype::F16, DataLayout::Fb);
        let params = OperationParams::FullyConnected(fc(input, 32, 12, DataLayout::Fb));
        assert!(!FullyConnectedFbIoBlock.validate(&params, &options));
    }

    #[test]
    fn padded_input_needs_reorder_permission() {
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);

        let mut input = DataTensor::from_extents(&[2, 2, 16, 1], Datatype::F16, DataLayout::Bfyx);
        let mut dims = input.dims().to_vec();
        dims[0].pad = crate::tensor::Pad::new(0, 1);
        dims[1].pitch = 3;
        dims[2].pitch = 6;
        dims[3].pitch = 96;
        input = DataTensor::from_dims(dims, Datatype::F16, DataLayout::Bfyx, 0, None);
        let mut params = fc(input, 16, 1, DataLayout::Bf);
        params.weight_bias.weights =
            WeightsTensor::from_extents(&[64, 16], WeightsType::F16, WeightsLayout::OsIOsv16);
        let params = OperationParams::FullyConnected(params);

        let mut options = OptionalParams::new(KernelKind::FullyConnected);
        let none = FullyConnectedBsFBsv16B1
            .kernels_data(&params, &options, &ctx)
            .expect("no error");
        assert!(none.is_empty());

        options.allow_reorder_input = true;
        let kd = FullyConnectedBsFBsv16B1
            .kernels_data(&params, &options, &ctx)
            .expect("no error");
        assert_eq!(kd.len(), 1);
        assert!(kd[0].reorder_input);
    }
}
