//! Standalone activation variants.

use crate::dispatch::{
    argument_bindings, ArgumentBinding, ArgumentKind, DispatchData, KernelDescriptor, WorkGroups,
};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_base_params_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{ActivationParams, KernelKind, OperationParams, OptionalParams};
use crate::priority::Priority;
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::Datatype;
use crate::variant::{AutoTune, KernelVariant};

use super::{fp16_used, kinds_match, simple_kernels_data};

pub const REF_NAME: &str = "activation_gpu_ref";
pub const OPT_NAME: &str = "activation_gpu_opt";

/// Elements handled by one work item of the vectorized variant.
pub const NUM_COLS_WI: usize = 4;

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Activation)
        .with(ActivationRef)
        .with(ActivationOpt)
        .build()
}

fn validate_activation(params: &OperationParams, options: &OptionalParams) -> bool {
    if !kinds_match(params, options, KernelKind::Activation) {
        return false;
    }
    let Some(p) = params.as_activation() else {
        return false;
    };
    p.base.inputs.first().is_some_and(|input| {
        input.layout() == p.base.output.layout() && input.same_dims(&p.base.output)
    })
}

fn activation_jit(p: &ActivationParams) -> JitConstants {
    let mut jit = make_base_params_jit(&p.base);
    if p.params_as_input {
        jit.add_constant("PARAMETERIZED", "");
    }
    jit
}

fn activation_arguments(p: Option<&ActivationParams>) -> Vec<ArgumentBinding> {
    let mut args = argument_bindings(1, false, false, false);
    if p.is_some_and(|p| p.params_as_input) {
        args.push(ArgumentBinding::new(ArgumentKind::Slope, 0));
    }
    args
}

macro_rules! activation_common {
    ($name:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn kind(&self) -> KernelKind {
            KernelKind::Activation
        }

        fn tuned_kernels_data(
            &self,
            params: &OperationParams,
            options: &OptionalParams,
            ctx: &SelectionContext<'_>,
            tune: AutoTune,
        ) -> KernelResult<Vec<KernelDescriptor>> {
            let arguments = activation_arguments(params.as_activation());
            simple_kernels_data(self, $name, params, options, ctx, tune, arguments)
        }
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationRef;

impl KernelVariant for ActivationRef {
    activation_common!(REF_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32)
            .enable_activation_additional_params_as_input()
            .enable_all_input_layout()
            .enable_all_output_layout()
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_batching();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_activation(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_activation()?;
        let out = &p.base.output;
        let gws = [out.x().v, out.y().v, out.feature().v * out.batch().v];
        Some(DispatchData::new(
            WorkGroups::with_optimal_local(gws),
            out.dtype() == Datatype::F16,
        ))
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params
            .as_activation()
            .map(activation_jit)
            .unwrap_or_default()
    }
}

/// Four contiguous elements per work item over dense buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationOpt;

impl KernelVariant for ActivationOpt {
    activation_common!(OPT_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32)
            .enable_all_input_layout()
            .enable_all_output_layout()
            .enable_tensor_offset()
            .enable_batching();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        if !validate_activation(params, options) {
            return false;
        }
        let Some(p) = params.as_activation() else {
            return false;
        };
        let Some(input) = p.base.inputs.first() else {
            return false;
        };
        !input.pitches_differ_from_logical_dims()
            && !p.base.output.pitches_differ_from_logical_dims()
            && input.logical_size() % NUM_COLS_WI == 0
            && input.first_element_offset() % NUM_COLS_WI == 0
            && p.base.output.first_element_offset() % NUM_COLS_WI == 0
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_activation()?;
        let total = p.base.inputs.first()?.logical_size();
        let mut dispatch = DispatchData::new(
            WorkGroups::with_optimal_local([total / NUM_COLS_WI, 1, 1]),
            fp16_used(&p.base),
        );
        dispatch.priority = Priority::FORCE_PRIORITY_6;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_activation() else {
            return JitConstants::default();
        };
        let mut jit = activation_jit(p);
        jit.add_constant("NUM_COLS_WI", NUM_COLS_WI);
        jit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PrimitiveDb;
    use crate::params::{ActivationFunction, BaseParams, NonLinearParams};
    use crate::selector::SelectorConfig;
    use crate::tensor::{DataLayout, DataTensor};

    fn relu(extents: &[usize]) -> ActivationParams {
        let t = DataTensor::from_extents(extents, Datatype::F32, DataLayout::Bfyx);
        ActivationParams::new(
            BaseParams::new("relu", vec![t.clone()], t)
                .with_activation(ActivationFunction::Relu, NonLinearParams::default()),
        )
    }

    fn best(params: ActivationParams) -> KernelDescriptor {
        let selector = selector().expect("activation selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::Activation);
        selector
            .get_best_kernels(&OperationParams::Activation(params), &options, &ctx)
            .expect("selection succeeds")
            .remove(0)
    }

    #[test]
    fn vectorized_variant_needs_multiple_of_four() {
        let dense = best(relu(&[8, 8, 3, 1]));
        assert_eq!(dense.kernel_name, OPT_NAME);
        let launch = dense.primary().expect("launch");
        assert_eq!(launch.work_groups.global, [48, 1, 1]);
        assert!(launch.kernel.jit.contains("#define NUM_COLS_WI 4"));

        let ragged = best(relu(&[7, 3, 1, 1]));
        assert_eq!(ragged.kernel_name, REF_NAME);
        assert_eq!(
            ragged.primary().expect("launch").work_groups.global,
            [7, 3, 1]
        );
    }

    #[test]
    fn parameterized_slopes_bind_extra_buffer() {
        let mut p = relu(&[8, 8, 3, 1]);
        p.params_as_input = true;
        let kd = best(p);
        // The vectorized kernel cannot read per-feature slopes.
        assert_eq!(kd.kernel_name, REF_NAME);
        let args = &kd.primary().expect("launch").arguments;
        assert_eq!(args.last().map(|a| a.kind), Some(ArgumentKind::Slope));
        assert!(kd.kernels[0].kernel.jit.contains("#define PARAMETERIZED"));
    }

    #[test]
    fn mismatched_dims_are_rejected() {
        let input = DataTensor::from_extents(&[8, 8, 3, 1], Datatype::F32, DataLayout::Bfyx);
        let output = DataTensor::from_extents(&[4, 8, 3, 1], Datatype::F32, DataLayout::Bfyx);
        let p = ActivationParams::new(BaseParams::new("relu", vec![input], output));
        let options = OptionalParams::new(KernelKind::Activation);
        let params = OperationParams::Activation(p);
        assert!(!ActivationRef.validate(&params, &options));
    }
}
