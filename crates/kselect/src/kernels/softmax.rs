//! Softmax variants.

use crate::dispatch::{argument_bindings, DispatchData, KernelDescriptor, WorkGroups};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_base_params_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{
    ActivationFunction, KernelKind, OperationParams, OptionalParams, SoftmaxDim, SoftmaxParams,
};
use crate::priority::Priority;
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::{DataLayout, Datatype};
use crate::variant::{AutoTune, KernelVariant};

use super::{kinds_match, simple_kernels_data};

pub const REF_NAME: &str = "softmax_gpu_ref";
pub const BF_NAME: &str = "softmax_gpu_bf";

const MAX_LWS: usize = 32;

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::SoftMax)
        .with(SoftmaxRef)
        .with(SoftmaxItemsClassBf)
        .build()
}

/// 2d inputs always pass; 4d inputs must reduce to a single non-trivial axis.
pub fn validate_softmax(params: &OperationParams, options: &OptionalParams) -> bool {
    if !kinds_match(params, options, KernelKind::SoftMax) {
        return false;
    }
    let Some(p) = params.as_softmax() else {
        return false;
    };
    let Some(input) = p.base.inputs.first() else {
        return false;
    };
    if p.base.activation != ActivationFunction::None {
        return false;
    }
    if matches!(input.layout(), DataLayout::Bf | DataLayout::Fb) {
        return true;
    }
    let (x, y, f) = (input.x().v, input.y().v, input.feature().v);
    match p.dim {
        SoftmaxDim::X => y == 1 && f == 1,
        SoftmaxDim::Y => x == 1 && f == 1,
        SoftmaxDim::Feature => x == 1 && y == 1,
    }
}

/// Data-set geometry both variants report: one set per batch over the flattened features.
fn softmax_base_dispatch(p: &SoftmaxParams, work_groups: WorkGroups) -> DispatchData {
    let input = p.base.inputs.first().unwrap_or(&p.base.output);
    let mut dispatch = DispatchData::new(work_groups, input.dtype() == Datatype::F16);
    let unflattened = input.feature().v * input.x().v * input.y().v;
    let flat_features = input
        .flatten_feature_and_spatials()
        .map_or(unflattened, |t| t.feature().v);
    dispatch.blocks.data_set_size = flat_features;
    dispatch.blocks.data_sets_count = input.batch().v;
    dispatch
}

fn softmax_jit(p: &SoftmaxParams, dispatch: &DispatchData) -> JitConstants {
    let mut jit = make_base_params_jit(&p.base);
    jit.add_constant(format!("SOFTMAX_DIM_{}", p.dim.as_str()), "")
        .add_constant("ITEMS_NUM", dispatch.blocks.items_num)
        .add_constant("LWS", dispatch.lws()[0])
        .add_constant("GWS", dispatch.gws()[0])
        .add_constant("DATA_SETS_COUNT", dispatch.blocks.data_sets_count)
        .add_constant("DATA_SET_SIZE", dispatch.blocks.data_set_size);
    jit
}

macro_rules! softmax_common {
    ($name:expr) => {
        fn name(&self) -> &'static str {
            $name
        }

        fn kind(&self) -> KernelKind {
            KernelKind::SoftMax
        }

        fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
            validate_softmax(params, options)
        }

        fn tuned_kernels_data(
            &self,
            params: &OperationParams,
            options: &OptionalParams,
            ctx: &SelectionContext<'_>,
            tune: AutoTune,
        ) -> KernelResult<Vec<KernelDescriptor>> {
            simple_kernels_data(
                self,
                $name,
                params,
                options,
                ctx,
                tune,
                argument_bindings(1, false, false, false),
            )
        }
    };
}

/// One work item per softmax row along the chosen axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxRef;

impl KernelVariant for SoftmaxRef {
    softmax_common!(REF_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32);
        let layouts = [
            DataLayout::Bfyx,
            DataLayout::Yxfb,
            DataLayout::Bf,
            DataLayout::Fb,
        ];
        for layout in layouts {
            k.enable_input_layout(layout).enable_output_layout(layout);
        }
        k.enable_softmax_dim(SoftmaxDim::X)
            .enable_softmax_dim(SoftmaxDim::Y)
            .enable_softmax_dim(SoftmaxDim::Feature)
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_batching();
        k
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_softmax()?;
        let out = &p.base.output;
        let gws = match p.dim {
            SoftmaxDim::X => [out.y().v, out.feature().v, out.batch().v],
            SoftmaxDim::Y => [out.x().v, out.feature().v, out.batch().v],
            SoftmaxDim::Feature => [out.x().v, out.y().v, out.batch().v],
        };
        let groups = WorkGroups::with_optimal_local(gws);
        Some(softmax_base_dispatch(p, groups))
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_softmax() else {
            return JitConstants::default();
        };
        let (other0, other1, class, class_num) = match p.dim {
            SoftmaxDim::X => ("Y_PITCH", "FEATURE_PITCH", "X_PITCH", "SIZE_X"),
            SoftmaxDim::Y => ("X_PITCH", "FEATURE_PITCH", "Y_PITCH", "SIZE_Y"),
            SoftmaxDim::Feature => ("X_PITCH", "Y_PITCH", "FEATURE_PITCH", "FEATURE_NUM"),
        };
        let mut jit = softmax_jit(p, dispatch);
        jit.add_constant("INPUT0_OTHER0_PITCH", format!("INPUT0_{other0}"))
            .add_constant("INPUT0_OTHER1_PITCH", format!("INPUT0_{other1}"))
            .add_constant("INPUT0_CLASS_PITCH", format!("INPUT0_{class}"))
            .add_constant("INPUT0_CLASS_NUM", format!("INPUT0_{class_num}"))
            .add_constant("OUTPUT_OTHER0_PITCH", format!("OUTPUT_{other0}"))
            .add_constant("OUTPUT_OTHER1_PITCH", format!("OUTPUT_{other1}"))
            .add_constant("OUTPUT_CLASS_PITCH", format!("OUTPUT_{class}"));
        if p.base.output.dtype() == Datatype::F16 {
            jit.add_constant("ACCUMULATOR_TYPE", "half");
        }
        jit
    }
}

/// One work group per batch; each work item reduces `ITEMS_NUM` classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftmaxItemsClassBf;

impl KernelVariant for SoftmaxItemsClassBf {
    softmax_common!(BF_NAME);

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32)
            .enable_input_layout(DataLayout::Bf)
            .enable_output_layout(DataLayout::Bf)
            .enable_softmax_dim(SoftmaxDim::Feature)
            .enable_tensor_offset()
            .enable_batching();
        k
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_softmax()?;
        let input = p.base.inputs.first()?;
        let classes = input.feature().v;
        let lws0 = classes.clamp(1, MAX_LWS);
        let gws = [input.batch().v * lws0, 1, 1];

        let mut dispatch = softmax_base_dispatch(p, WorkGroups::new(gws, [lws0, 1, 1]));
        dispatch.blocks.items_num = classes / lws0;
        dispatch.blocks.leftovers = classes % lws0;
        dispatch.priority = Priority::FORCE_PRIORITY_8;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_softmax() else {
            return JitConstants::default();
        };
        let mut jit = softmax_jit(p, dispatch);
        if dispatch.blocks.leftovers > 0 {
            jit.add_constant("LEFTOVERS", dispatch.blocks.leftovers);
        }
        jit
    }
}
