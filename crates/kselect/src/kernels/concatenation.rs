//! Concatenation: one launch per input, each writing at its offset along the axis.

use log::debug;

use crate::dispatch::{
    check_work_groups, divisor_lws, ArgumentBinding, ArgumentKind, DispatchData, KernelDescriptor,
    WorkGroups,
};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{kernel_launch, make_base_params_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{
    ActivationFunction, ConcatAxis, ConcatenationParams, KernelKind, OperationParams,
    OptionalParams,
};
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::Datatype;
use crate::variant::{tune_in_range, AutoTune, KernelVariant};

use super::{fp16_used, kinds_match};

pub const REF_NAME: &str = "concatenation_gpu_ref";

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Concatenation)
        .with(ConcatenationRef)
        .build()
}

fn validate_concatenation(params: &OperationParams, options: &OptionalParams) -> bool {
    if !kinds_match(params, options, KernelKind::Concatenation) {
        return false;
    }
    let Some(p) = params.as_concatenation() else {
        return false;
    };
    let Some(input) = p.base.inputs.first() else {
        return false;
    };
    p.base.activation == ActivationFunction::None
        && input.layout().channel_index(p.axis.channel()).is_some()
}

/// gws walks dims 1..4 of the first input; lws0 is the largest divisor up to 32.
pub fn concatenation_default_dispatch(p: &ConcatenationParams) -> Option<DispatchData> {
    let input = p.base.inputs.first()?;
    let dims = input.dims();
    let extent = |i: usize| dims.get(i).map_or(1, |d| d.v);
    let gws = [extent(1), extent(2), extent(3)];
    Some(DispatchData::new(
        WorkGroups::new(gws, [divisor_lws(gws[0]), 1, 1]),
        fp16_used(&p.base),
    ))
}

/// Running offset of each input along the axis.
pub fn axis_offsets(p: &ConcatenationParams) -> Vec<usize> {
    let channel = p.axis.channel();
    p.base
        .inputs
        .iter()
        .scan(0usize, |offset, input| {
            let start = *offset;
            *offset += input.channel(channel).v;
            Some(start)
        })
        .collect()
}

fn concatenation_jit(p: &ConcatenationParams) -> JitConstants {
    let mut jit = make_base_params_jit(&p.base);
    jit.add_constant(format!("CONCAT_{}", p.axis.as_str()), "");
    if let Some(input) = p.base.inputs.first() {
        if input.x().v == 1 && input.y().v == 1 {
            jit.add_constant("CHECK_FEATURES", 1usize);
        }
    }
    jit
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatenationRef;

impl KernelVariant for ConcatenationRef {
    fn name(&self) -> &'static str {
        REF_NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Concatenation
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32)
            .enable_all_input_layout()
            .enable_all_output_layout()
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_batching()
            .enable_concat_axis(ConcatAxis::X)
            .enable_concat_axis(ConcatAxis::Y)
            .enable_concat_axis(ConcatAxis::Feature)
            .enable_concat_axis(ConcatAxis::Batch)
            .enable_concat_kernel_per_input();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_concatenation(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let mut dispatch = concatenation_default_dispatch(params.as_concatenation()?)?;
        let groups = &mut dispatch.work_groups;
        // Serial first axis: widen along the second.
        if groups.local[0] == 1 && groups.global[1] != 1 {
            groups.local[1] = divisor_lws(groups.global[1]);
        }
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params
            .as_concatenation()
            .map(concatenation_jit)
            .unwrap_or_default()
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        if !tune_in_range(self, tune) || !self.validate(params, options) {
            return Ok(Vec::new());
        }
        let Some(p) = params.as_concatenation() else {
            return Ok(Vec::new());
        };

        let mut launches = Vec::with_capacity(p.base.inputs.len());
        let mut priority = None;
        for (index, (input, offset)) in p.base.inputs.iter().zip(axis_offsets(p)).enumerate() {
            let mut single = p.clone();
            single.base.inputs = vec![input.clone()];
            let single = OperationParams::Concatenation(single);

            let Some(dispatch) = self.set_default(&single, tune) else {
                return Ok(Vec::new());
            };
            if !check_work_groups(&dispatch.work_groups) {
                debug!(
                    "{REF_NAME}: input {index} work groups {:?} do not tile",
                    dispatch.work_groups
                );
                return Ok(Vec::new());
            }
            let mut jit = self.jit_constants(&single, &dispatch);
            jit.add_constant("INPUT_OFFSET_IN_CONCAT_AXIS", offset);
            let arguments = vec![
                ArgumentBinding::new(ArgumentKind::Input, index as u32),
                ArgumentBinding::new(ArgumentKind::Output, 0),
            ];
            let launch = kernel_launch(
                ctx.db,
                REF_NAME,
                params.layer_id(),
                options,
                &jit,
                &dispatch,
                arguments,
            )?;
            launches.push(launch);
            priority.get_or_insert(dispatch.priority);
        }

        let mut launches = launches.into_iter();
        let (Some(first), Some(priority)) = (launches.next(), priority) else {
            return Ok(Vec::new());
        };
        let mut descriptor = KernelDescriptor::new(first, priority);
        descriptor.kernels.extend(launches);
        descriptor.auto_tune = tune;
        Ok(vec![descriptor])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PrimitiveDb;
    use crate::params::BaseParams;
    use crate::selector::SelectorConfig;
    use crate::tensor::{DataLayout, DataTensor};

    fn concat(features: &[usize], axis: ConcatAxis) -> ConcatenationParams {
        let inputs: Vec<DataTensor> = features
            .iter()
            .map(|f| DataTensor::from_extents(&[8, 4, *f, 1], Datatype::F32, DataLayout::Bfyx))
            .collect();
        let total = features.iter().sum();
        let output = DataTensor::from_extents(&[8, 4, total, 1], Datatype::F32, DataLayout::Bfyx);
        ConcatenationParams::new(BaseParams::new("concat", inputs, output), axis)
    }

    #[test]
    fn offsets_accumulate_along_axis() {
        assert_eq!(
            axis_offsets(&concat(&[3, 5, 2], ConcatAxis::Feature)),
            vec![0, 3, 8]
        );
        assert_eq!(axis_offsets(&concat(&[3, 5], ConcatAxis::X)), vec![0, 8]);
    }

    #[test]
    fn one_launch_per_input() {
        let selector = selector().expect("concat selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::Concatenation);
        let params = OperationParams::Concatenation(concat(&[3, 5, 2], ConcatAxis::Feature));

        let best = selector
            .get_best_kernels(&params, &options, &ctx)
            .expect("selection succeeds");
        assert_eq!(best.len(), 1);
        let kernels = &best[0].kernels;
        assert_eq!(kernels.len(), 3);
        let (second, third) = (&kernels[1].kernel.jit, &kernels[2].kernel.jit);
        assert!(second.contains("#define INPUT_OFFSET_IN_CONCAT_AXIS 3"));
        assert!(third.contains("#define INPUT_OFFSET_IN_CONCAT_AXIS 8"));
        assert_eq!(
            kernels[2].arguments[0],
            ArgumentBinding::new(ArgumentKind::Input, 2)
        );
        assert_ne!(kernels[0].kernel.entry_point, kernels[1].kernel.entry_point);
        // dims 1..4 of an 8x4xFx1 input.
        assert_eq!(kernels[1].work_groups.global, [4, 5, 1]);
    }

    #[test]
    fn narrow_first_axis_widens_second() {
        let p = concat(&[7, 7], ConcatAxis::Feature);
        let mut single = p.clone();
        single.base.inputs.truncate(1);
        let narrow = DataTensor::from_extents(&[8, 1, 7, 1], Datatype::F32, DataLayout::Bfyx);
        single.base.inputs[0] = narrow;
        let single = OperationParams::Concatenation(single);
        let d = ConcatenationRef
            .set_default(&single, AutoTune::UseDefault)
            .expect("concat");
        assert_eq!(d.gws(), [1, 7, 1]);
        assert_eq!(d.lws(), [1, 7, 1]);
    }

    #[test]
    fn axis_must_exist_in_layout() {
        let options = OptionalParams::new(KernelKind::Concatenation);
        let t = DataTensor::from_extents(&[16, 2], Datatype::F32, DataLayout::Bf);
        let base = BaseParams::new("concat", vec![t.clone()], t);
        let p = ConcatenationParams::new(base, ConcatAxis::X);
        let params = OperationParams::Concatenation(p);
        assert!(!ConcatenationRef.validate(&params, &options));
    }
}
