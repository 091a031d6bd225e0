//! Data and weights reorders. The weights selector is what convolution and
//! fully connected recurse into when their weights arrive in the wrong layout.

use crate::dispatch::{
    argument_bindings, tensor_friendly_global, DispatchData, KernelDescriptor, WorkGroups,
};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_base_params_jit, make_tensor_friendly_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{KernelKind, OperationParams, OptionalParams, ReorderParams};
use crate::priority::Priority;
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::{round_up, DataLayout, DataTensor, Datatype, WeightsLayout, WeightsType};
use crate::variant::{AutoTune, KernelVariant};

use super::{fp16_used, kinds_match, simple_kernels_data};

pub const WEIGHTS_NAME: &str = "reorder_weights";
pub const DATA_REF_NAME: &str = "reorder_data_ref";
pub const DATA_FAST_B1_NAME: &str = "reorder_data_fast_b1";

/// Work items per group of the batch-1 copy.
const FAST_B1_LWS: usize = 32;

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Reorder)
        .with(ReorderDataRef)
        .with(ReorderDataFastB1)
        .build()
}

pub fn weights_selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::ReorderWeights)
        .with(ReorderWeights)
        .build()
}

pub fn weights_sub_group_size(layout: WeightsLayout) -> usize {
    match layout {
        WeightsLayout::OsIyxOsv16
        | WeightsLayout::OsIOsv16
        | WeightsLayout::OsIOsv16Ai8
        | WeightsLayout::IYxsOsYxsv2Osv16
        | WeightsLayout::IyXsOsXsv2Osv16Ao32 => 16,
        WeightsLayout::OsIOsv8Ai8 | WeightsLayout::IyXsOsXsv2Osv8Ao32 => 8,
        _ => 1,
    }
}

pub fn data_sub_group_size(layout: DataLayout) -> usize {
    match layout {
        DataLayout::BsFBsv16Af8 => 16,
        DataLayout::BsFBsv8Af8 => 8,
        _ => 1,
    }
}

fn data_reorder_key() -> CapabilityKey {
    let mut k = CapabilityKey::new();
    k.enable_input_data_type(Datatype::F16)
        .enable_input_data_type(Datatype::F32)
        .enable_output_data_type(Datatype::F16)
        .enable_output_data_type(Datatype::F32)
        .enable_different_types()
        .enable_all_input_layout()
        .enable_all_output_layout()
        .enable_tensor_offset()
        .enable_tensor_pitches()
        .enable_batching();
    k
}

fn data_reorder_jit(p: &ReorderParams) -> JitConstants {
    let mut jit = make_base_params_jit(&p.base);
    let sub_group = data_sub_group_size(p.base.output.layout());
    jit.add_constant("SUB_GROUP_SIZE", sub_group);
    jit
}

/// Same extent per logical channel, whatever the memory order.
fn same_logical_dims(a: &DataTensor, b: &DataTensor) -> bool {
    a.x().v == b.x().v
        && a.y().v == b.y().v
        && a.feature().v == b.feature().v
        && a.roi().v == b.roi().v
        && a.batch().v == b.batch().v
}

fn validate_reorder(params: &OperationParams, options: &OptionalParams) -> bool {
    kinds_match(params, options, KernelKind::Reorder)
        && params
            .as_reorder()
            .is_some_and(|p| p.base.inputs.len() == 1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderWeights;

impl KernelVariant for ReorderWeights {
    fn name(&self) -> &'static str {
        WEIGHTS_NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::ReorderWeights
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_weights_type(WeightsType::F16)
            .enable_input_weights_type(WeightsType::F32)
            .enable_output_weights_type(WeightsType::F16)
            .enable_output_weights_type(WeightsType::F32)
            .enable_all_weights_layout()
            .enable_different_types()
            .enable_tensor_offset()
            .enable_tensor_pitches();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        kinds_match(params, options, KernelKind::ReorderWeights)
            && params.as_reorder_weights().is_some()
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_reorder_weights()?;
        let out = &p.output;
        let gws = [out.ofm().v, out.ifm().v, out.x().v * out.y().v];
        Some(DispatchData::new(
            WorkGroups::with_optimal_local(gws),
            out.dtype() == WeightsType::F16,
        ))
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_reorder_weights() else {
            return JitConstants::default();
        };
        let mut jit = JitConstants::new();
        jit.add_weights("INPUT0", &p.input)
            .add_weights("OUTPUT", &p.output)
            .add_constant("SUB_GROUP_SIZE", weights_sub_group_size(p.output.layout()));
        jit
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
            WEIGHTS_NAME,
            params,
            options,
            ctx,
            tune,
            argument_bindings(1, false, false, false),
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderDataRef;

impl KernelVariant for ReorderDataRef {
    fn name(&self) -> &'static str {
        DATA_REF_NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Reorder
    }

    fn supported_key(&self) -> CapabilityKey {
        data_reorder_key()
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_reorder(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_reorder()?;
        let gws = tensor_friendly_global(&p.base.output);
        let groups = WorkGroups::with_optimal_local(gws);
        Some(DispatchData::new(groups, fp16_used(&p.base)))
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params
            .as_reorder()
            .map(data_reorder_jit)
            .unwrap_or_default()
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
            DATA_REF_NAME,
            params,
            options,
            ctx,
            tune,
            argument_bindings(1, false, false, false),
        )
    }
}

/// Flat copy over the logical element count.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderDataFastB1;

impl KernelVariant for ReorderDataFastB1 {
    fn name(&self) -> &'static str {
        DATA_FAST_B1_NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Reorder
    }

    fn supported_key(&self) -> CapabilityKey {
        data_reorder_key()
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        if !validate_reorder(params, options) {
            return false;
        }
        let Some(p) = params.as_reorder() else {
            return false;
        };
        p.base.inputs.first().is_some_and(|input| {
            same_logical_dims(input, &p.base.output) && !input.pitches_differ_from_logical_dims()
        })
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_reorder()?;
        let input = p.base.inputs.first()?;
        let gws = round_up(input.logical_size(), FAST_B1_LWS);
        let mut dispatch = DispatchData::new(
            WorkGroups::new([gws, 1, 1], [FAST_B1_LWS, 1, 1]),
            fp16_used(&p.base),
        );
        if input.batch().v == 1 && p.base.output.batch().v == 1 {
            dispatch.priority = Priority::FORCE_PRIORITY_6;
        }
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        let Some(p) = params.as_reorder() else {
            return JitConstants::default();
        };
        let mut jit = data_reorder_jit(p);
        if let Some(input) = p.base.inputs.first() {
            jit.merge(make_tensor_friendly_jit(input));
            jit.add_constant("ELEMENTS_COUNT", input.logical_size());
        }
        jit
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
            DATA_FAST_B1_NAME,
            params,
            options,
            ctx,
            tune,
            argument_bindings(1, false, false, false),
        )
    }
}
