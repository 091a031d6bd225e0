//! Weights layout checks and the recursive reorder they trigger.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::dispatch::KernelDescriptor;
use crate::error::KernelResult;
use crate::params::{
    KernelKind, OperationParams, OptionalParams, ReorderWeightsParams, WeightBiasParams,
};
use crate::selector::SelectionContext;
use crate::tensor::{Datatype, WeightsLayout, WeightsTensor, WeightsType};

/// Reorder that must run before the primary kernel to produce its weights buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsReorderSpec {
    pub kernel: Box<KernelDescriptor>,
    pub new_buffer_size: usize,
    pub dtype: WeightsType,
}

pub fn data_type_to_weights_type(dtype: Datatype) -> Option<WeightsType> {
    match dtype {
        Datatype::F16 => Some(WeightsType::F16),
        Datatype::F32 => Some(WeightsType::F32),
        _ => None,
    }
}

pub fn check_weights(
    tensor: &WeightsTensor,
    req_type: WeightsType,
    req_layouts: &[WeightsLayout],
) -> bool {
    if tensor.dtype() != req_type {
        return false;
    }
    let layout = tensor.layout();
    if req_layouts.contains(&layout) {
        return true;
    }
    if tensor.pitches_differ_from_logical_dims() {
        return false;
    }
    (layout == WeightsLayout::Iyxo && req_layouts.contains(&WeightsLayout::Io))
        || (layout == WeightsLayout::Oiyx && req_layouts.contains(&WeightsLayout::Oi))
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatedWeights {
    pub params: WeightBiasParams,
    pub reorder: Option<WeightsReorderSpec>,
}

/// Weight/bias params whose weights are in one of `layouts`, reordering through
/// the context's reorder-weights selector when needed. `Ok(None)` is a rejection.
pub fn update_weights_params(
    params: &WeightBiasParams,
    options: &OptionalParams,
    layouts: &[WeightsLayout],
    ctx: &SelectionContext<'_>,
) -> KernelResult<Option<UpdatedWeights>> {
    let Some(input) = params.base.inputs.first() else {
        return Ok(None);
    };
    let Some(dtype) = data_type_to_weights_type(input.dtype()) else {
        return Ok(None);
    };
    let Some(target_layout) = layouts.first().copied() else {
        return Ok(None);
    };

    if check_weights(&params.weights, dtype, layouts) {
        return Ok(Some(UpdatedWeights {
            params: params.clone(),
            reorder: None,
        }));
    }
    if !options.allow_weights_reorder {
        return Ok(None);
    }
    let Some(selector) = ctx.weights_reorder else {
        return Ok(None);
    };
    let Some(output) = params
        .weights
        .transform_ignore_padding(target_layout, dtype)
    else {
        return Ok(None);
    };

    let mut reorder = ReorderWeightsParams::new(
        format!("{}_reorder_", params.base.layer_id),
        params.weights.clone(),
        output.clone(),
    );
    reorder.engine = params.base.engine;
    let reorder_options = OptionalParams {
        meaningful_kernel_names: options.meaningful_kernel_names,
        ..OptionalParams::new(KernelKind::ReorderWeights)
    };
    let reorder_params = OperationParams::ReorderWeights(reorder);

    let Some(kernel) = selector
        .best_kernels(&reorder_params, &reorder_options, ctx)?
        .into_iter()
        .next()
    else {
        debug!(
            "no weights reorder from {} to {} for layer `{}`",
            params.weights.layout().as_str(),
            target_layout.as_str(),
            params.base.layer_id
        );
        return Ok(None);
    };

    let mut updated = params.clone();
    updated.weights = output.clone();
    Ok(Some(UpdatedWeights {
        params: updated,
        reorder: Some(WeightsReorderSpec {
            kernel: Box::new(kernel),
            new_buffer_size: output.physical_size_in_bytes(),
            dtype,
        }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_check_accepts_flat_equivalents() {
        let (f16, f32) = (WeightsType::F16, WeightsType::F32);
        let iyxo = WeightsTensor::from_extents(&[1, 1, 8, 4], f32, WeightsLayout::Iyxo);
        assert!(check_weights(&iyxo, f32, &[WeightsLayout::Io]));
        assert!(!check_weights(&iyxo, f16, &[WeightsLayout::Iyxo]));
        assert!(!check_weights(&iyxo, f32, &[WeightsLayout::Oi]));

        let oiyx = WeightsTensor::from_extents(&[3, 3, 8, 4], f16, WeightsLayout::Oiyx);
        assert!(check_weights(&oiyx, f16, &[WeightsLayout::Oiyx]));
        assert!(check_weights(&oiyx, f16, &[WeightsLayout::Oi]));
        assert!(!check_weights(&oiyx, f16, &[WeightsLayout::OsIyxOsv16]));
    }

    #[test]
    fn only_float_inputs_map_to_weights() {
        assert_eq!(
            data_type_to_weights_type(Datatype::F16),
            Some(WeightsType::F16)
        );
        assert_eq!(
            data_type_to_weights_type(Datatype::F32),
            Some(WeightsType::F32)
        );
        assert_eq!(data_type_to_weights_type(Datatype::Int32), None);
    }
}
