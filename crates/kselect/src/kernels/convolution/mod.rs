//! Convolution variants and the helpers they share.

pub mod dw_3x3_opt;
pub mod f16_1x1;
pub mod f16_depthwise;
pub mod gemm_like;
pub mod os_iyx_osv16;
pub mod reference;

use log::debug;

use crate::dispatch::{argument_bindings, divisor_lws, DispatchData, KernelDescriptor, WorkGroups};
use crate::error::{KernelResult, SelectorResult};
use crate::key::CapabilityKey;
use crate::params::{ConvolutionParams, KernelKind, OperationParams, OptionalParams};
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::{
    DataChannel, DataLayout, DataTensor, Datatype, Dim, Pad, WeightsLayout, WeightsType,
};
use crate::variant::{tune_in_range, AutoTune, KernelVariant};
use crate::weights::update_weights_params;

use super::{build_descriptor, fp16_used};

pub use dw_3x3_opt::ConvolutionBfyx3x3DwOpt;
pub use f16_1x1::ConvolutionBfyxF16Pointwise;
pub use f16_depthwise::ConvolutionBfyxF16Depthwise;
pub use gemm_like::ConvolutionBfyxGemmLike;
pub use os_iyx_osv16::ConvolutionBfyxOsIyxOsv16;
pub use reference::ConvolutionBfyxRef;

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Convolution)
        .with(ConvolutionBfyxRef)
        .with(ConvolutionBfyxGemmLike)
        .with(ConvolutionBfyxOsIyxOsv16::new())
        .with(ConvolutionBfyxF16Pointwise)
        .with(ConvolutionBfyxF16Depthwise)
        .with(ConvolutionBfyx3x3DwOpt::new())
        .build()
}

/// Key shared by the float bfyx variants.
pub(crate) fn bfyx_float_key() -> CapabilityKey {
    let mut k = CapabilityKey::new();
    k.enable_input_data_type(Datatype::F16)
        .enable_input_data_type(Datatype::F32)
        .enable_output_data_type(Datatype::F16)
        .enable_output_data_type(Datatype::F32)
        .enable_input_weights_type(WeightsType::F16)
        .enable_input_weights_type(WeightsType::F32)
        .enable_input_layout(DataLayout::Bfyx)
        .enable_output_layout(DataLayout::Bfyx)
        .enable_tensor_offset()
        .enable_tensor_pitches()
        .enable_bias_per_feature()
        .enable_non_bias_term()
        .enable_batching()
        .enable_split_support();
    k
}

/// Kind check plus weights-layout reachability.
pub fn validate_convolution(
    params: &OperationParams,
    options: &OptionalParams,
    weights_layouts: &[WeightsLayout],
) -> bool {
    let Some(conv) = params.as_convolution() else {
        return false;
    };
    if options.kind != KernelKind::Convolution || conv.base().inputs.is_empty() {
        return false;
    }
    if conv.stride.x == 0 || conv.stride.y == 0 || conv.dilation.x == 0 || conv.dilation.y == 0 {
        return false;
    }
    if conv.split == 0 || conv.filter.x == 0 || conv.filter.y == 0 {
        return false;
    }
    weights_layouts.contains(&conv.weights().layout()) || options.allow_weights_reorder
}

/// gws = {F·B, X, Y}; lws0 is the largest divisor of gws0 up to 32.
pub fn convolution_default_dispatch(conv: &ConvolutionParams) -> DispatchData {
    let out = &conv.base().output;
    let gws = [out.feature().v * out.batch().v, out.x().v, out.y().v];
    let lws = [divisor_lws(gws[0]), 1, 1];
    let mut dispatch = DispatchData::new(WorkGroups::new(gws, lws), fp16_used(conv.base()));
    dispatch.blocks.block_width = 1;
    dispatch.blocks.block_height = 1;
    dispatch.blocks.prefetch = 1;
    dispatch.blocks.input_block_array_size = 1;
    dispatch
}

fn required_extent(out: usize, stride: usize, filter: usize, dilation: usize) -> usize {
    out.saturating_sub(1) * stride + filter.saturating_sub(1) * dilation + 1
}

/// Dense bfyx tensor padded so every filter tap of every output lands in bounds.
pub fn convolution_padded_input(conv: &ConvolutionParams) -> Option<DataTensor> {
    let input = conv.base().inputs.first()?;
    let out = &conv.base().output;
    let limit_x = required_extent(out.x().v, conv.stride.x, conv.filter.x, conv.dilation.x);
    let limit_y = required_extent(out.y().v, conv.stride.y, conv.filter.y, conv.dilation.y);
    let x = input.x().v;
    let y = input.y().v;
    let pads = [
        Pad::new(conv.padding.x, limit_x.saturating_sub(x + conv.padding.x)),
        Pad::new(conv.padding.y, limit_y.saturating_sub(y + conv.padding.y)),
        Pad::default(),
        Pad::default(),
    ];
    let extents = [x, y, input.feature().v, input.batch().v];

    let mut pitch = 1usize;
    let mut dims = Vec::with_capacity(4);
    for (v, pad) in extents.iter().zip(pads) {
        let dim = Dim::new(*v, pitch, pad);
        pitch *= dim.logical_dim_padded();
        dims.push(dim);
    }
    let padded = DataTensor::from_dims(dims, input.dtype(), DataLayout::Bfyx, 0, None);
    Some(padded)
}

/// True when the input already carries at least the padding the filter window needs.
pub fn check_convolution_padded_input(conv: &ConvolutionParams) -> bool {
    let first = conv.base().inputs.first();
    let (Some(input), Some(required)) = (first, convolution_padded_input(conv)) else {
        return false;
    };
    let channels = [
        DataChannel::X,
        DataChannel::Y,
        DataChannel::Feature,
        DataChannel::Batch,
    ];
    channels.into_iter().all(|channel| {
        let have = input.channel(channel).pad;
        let need = required.channel(channel).pad;
        have.before >= need.before && have.after >= need.after
    })
}

pub fn convolution_check_input(conv: &ConvolutionParams, options: &OptionalParams) -> bool {
    options.allow_padding || options.allow_input_reordering || check_convolution_padded_input(conv)
}

/// Params with a padded input substituted when the caller's input is short of padding.
/// The flag tells the caller to reorder its input into the new tensor.
pub fn convolution_update_input_params(conv: &ConvolutionParams) -> (ConvolutionParams, bool) {
    if check_convolution_padded_input(conv) {
        return (conv.clone(), false);
    }
    match convolution_padded_input(conv) {
        Some(padded) => {
            let mut updated = conv.clone();
            updated.weight_bias.base.inputs[0] = padded;
            (updated, true)
        }
        None => (conv.clone(), false),
    }
}

pub(crate) struct ConvolutionFlow<'a> {
    pub template: &'a str,
    pub weights_layouts: &'a [WeightsLayout],
    pub reorder_input: bool,
}

/// Validate, rewrite input and weights, then build the single descriptor.
pub(crate) fn convolution_kernels_data(
    variant: &dyn KernelVariant,
    flow: &ConvolutionFlow<'_>,
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
    tune: AutoTune,
) -> KernelResult<Vec<KernelDescriptor>> {
    if !tune_in_range(variant, tune) || !variant.validate(params, options) {
        return Ok(Vec::new());
    }
    let Some(conv) = params.as_convolution() else {
        return Ok(Vec::new());
    };

    let (conv, reorder_input) = if flow.reorder_input {
        convolution_update_input_params(conv)
    } else {
        (conv.clone(), false)
    };
    let updated = update_weights_params(&conv.weight_bias, options, flow.weights_layouts, ctx)?;
    let Some(updated) = updated else {
        debug!(
            "{}: weights cannot reach {:?}",
            variant.name(),
            flow.weights_layouts
        );
        return Ok(Vec::new());
    };
    let has_bias = !updated.params.bias.is_empty();
    let new_params = OperationParams::Convolution(ConvolutionParams {
        weight_bias: updated.params,
        ..conv
    });

    let arguments = argument_bindings(1, true, has_bias, true);
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


#[cfg(test)]
mod tests {
    use super::test_support::conv;
    use super::*;
    use crate::params::Size2;

    #[test]
    fn default_dispatch_splits_feature_batch() {
        let c = conv(10, 10, 3, 48, 3, Datatype::F32);
        let d = convolution_default_dispatch(&c);
        assert_eq!(d.gws(), [48, 8, 8]);
        assert_eq!(d.lws(), [24, 1, 1]);
    }

    #[test]
    fn padded_input_covers_window() {
        let mut c = conv(8, 8, 4, 4, 3, Datatype::F32);
        c.padding = Size2::splat(1);
        let same = DataTensor::from_extents(&[8, 8, 4, 1], Datatype::F32, DataLayout::Bfyx);
        c.weight_bias.base.output = same;
        let padded = convolution_padded_input(&c).expect("input present");
        assert_eq!(padded.x().pad, Pad::new(1, 1));
        assert_eq!(padded.y().pad, Pad::new(1, 1));
        assert_eq!(padded.y().pitch, 10);
        assert_eq!(padded.feature().pitch, 100);
        assert!(!check_convolution_padded_input(&c));

        let (updated, reorder) = convolution_update_input_params(&c);
        assert!(reorder);
        assert!(check_convolution_padded_input(&updated));
    }

    #[test]
    fn valid_convolution_needs_no_padding() {
        let c = conv(8, 8, 4, 4, 3, Datatype::F32);
        assert!(check_convolution_padded_input(&c));
        let (_, reorder) = convolution_update_input_params(&c);
        assert!(!reorder);
    }
}
