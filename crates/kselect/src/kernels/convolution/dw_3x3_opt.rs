use crate::dispatch::{DispatchData, ExeMode, KernelDescriptor, WorkGroups};
use crate::error::KernelResult;
use crate::jit::{make_convolution_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::kernels::fp16_used;
use crate::params::{KernelKind, OperationParams, OptionalParams, Size2};
use crate::priority::Priority;
use crate::selector::SelectionContext;
use crate::tensor::{ceil_div, WeightsLayout};
use crate::variant::{tuned_option, AutoTune, AutoTuneOption, KernelVariant};

use super::{
    bfyx_float_key, convolution_check_input, convolution_kernels_data, validate_convolution,
    ConvolutionFlow,
};

pub const NAME: &str = "convolution_gpu_bfyx_3x3_dw_opt";

const WEIGHTS: &[WeightsLayout] = &[WeightsLayout::Oiyx];
const SIMD_SIZE: usize = 16;
const TILE_WIDTHS: [usize; 10] = [1, 2, 4, 5, 6, 8, 10, 12, 14, 16];
const TILE_HEIGHTS: [usize; 7] = [1, 2, 3, 4, 5, 6, 7];
const DEFAULT_TILE: (usize, usize) = (SIMD_SIZE - 2, 7);

/// Depthwise 3x3 convolution over input tiles held in registers.
#[derive(Debug, Clone)]
pub struct ConvolutionBfyx3x3DwOpt {
    options: Vec<AutoTuneOption>,
}

impl ConvolutionBfyx3x3DwOpt {
    pub fn new() -> Self {
        let options = TILE_WIDTHS
            .iter()
            .flat_map(|&tile_x| {
                TILE_HEIGHTS.iter().map(move |&tile_y| AutoTuneOption::Tile {
                    tile_x,
                    tile_y,
                    exe_mode: ExeMode::RoundRobin,
                })
            })
            .collect();
        Self { options }
    }
}

impl Default for ConvolutionBfyx3x3DwOpt {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelVariant for ConvolutionBfyx3x3DwOpt {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Convolution
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = bfyx_float_key();
        k.enable_sub_group()
            .enable_sub_group_short()
            .enable_depthwise_separable_opt();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        let Some(conv) = params.as_convolution() else {
            return false;
        };
        if !validate_convolution(params, options, WEIGHTS)
            || !convolution_check_input(conv, options)
        {
            return false;
        }
        let Some(input) = conv.base().inputs.first() else {
            return false;
        };
        conv.filter == Size2::splat(3)
            && conv.stride == Size2::splat(1)
            && conv.padding == Size2::splat(1)
            && input.feature().v == conv.split
            && !conv.base().output.pitches_differ_from_logical_dims()
    }

    fn set_default(&self, params: &OperationParams, tune: AutoTune) -> Option<DispatchData> {
        let conv = params.as_convolution()?;
        let input = conv.base().inputs.first()?;
        let (tile_x, tile_y, exe_mode) = match tuned_option(&self.options, tune) {
            Some(AutoTuneOption::Tile {
                tile_x,
                tile_y,
                exe_mode,
            }) => (tile_x, tile_y, exe_mode),
            Some(AutoTuneOption::Block { .. }) => return None,
            None => (DEFAULT_TILE.0, DEFAULT_TILE.1, ExeMode::RoundRobin),
        };

        let gws = [
            ceil_div(input.x().v, tile_x) * SIMD_SIZE,
            ceil_div(input.y().v, tile_y),
            input.feature().v * input.batch().v,
        ];
        let groups = WorkGroups::new(gws, [SIMD_SIZE, 1, 1]);
        let mut dispatch = DispatchData::new(groups, fp16_used(conv.base()));
        dispatch.priority = Priority::FORCE_PRIORITY_5;
        dispatch.exe_mode = exe_mode;
        dispatch.blocks.block_width = tile_x;
        dispatch.blocks.block_height = tile_y;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(conv) = params.as_convolution() else {
            return JitConstants::default();
        };
        let (tile_x, tile_y) = (dispatch.blocks.block_width, dispatch.blocks.block_height);
        let unit_bytes = if dispatch.fp16_unit_used { 2usize } else { 4 };
        let mut jit = make_convolution_jit(conv, dispatch);
        jit.add_constant("UNIT_BYTE_SIZE", unit_bytes)
            .add_constant("SUB_GROUP_SIZE", dispatch.lws()[0])
            .add_constant("TILE_HEIGHT", tile_y)
            .add_constant("TILE_WIDTH", tile_x)
            .add_constant("BLOCK_SIZE_X", tile_x + 2)
            .add_constant("BLOCK_SIZE_Y", tile_y + 2);
        jit
    }

    fn auto_tune_options(&self) -> usize {
        self.options.len()
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
            reorder_input: true,
        };
        convolution_kernels_data(self, &flow, params, options, ctx, tune)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::convolution::test_support::engine;
    use crate::params::{BaseParams, ConvolutionParams, WeightBiasParams};
    use crate::tensor::{DataLayout, DataTensor, Datatype, Dim, Pad, WeightsTensor, WeightsType};

    fn depthwise(features: usize) -> ConvolutionParams {
        // Caller-provided one-pixel border in x and y.
        let mut pitch = 1;
        let dims = [28, 28, features, 1]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let pad = if i < 2 {
                    Pad::new(1, 1)
                } else {
                    Pad::default()
                };
                let dim = Dim::new(*v, pitch, pad);
                pitch *= dim.logical_dim_padded();
                dim
            })
            .collect();
        let (dtype, layout) = (Datatype::F32, DataLayout::Bfyx);
        let input = DataTensor::from_dims(dims, dtype, layout, 0, None);
        let output = DataTensor::from_extents(&[28, 28, features, 1], dtype, layout);
        let filter = [3, 3, 1, features];
        let weights = WeightsTensor::from_extents(&filter, WeightsType::F32, WeightsLayout::Oiyx);
        let base = BaseParams::new("dw", vec![input], output)
            .with_engine(engine());
        let mut conv = ConvolutionParams::new(WeightBiasParams::new(base, weights, None));
        conv.padding = Size2::splat(1);
        conv.split = features;
        conv.depthwise_separable_opt = true;
        conv
    }

    #[test]
    fn accepts_padded_depthwise() {
        let options = OptionalParams::new(KernelKind::Convolution);
        let variant = ConvolutionBfyx3x3DwOpt::new();
        let params = OperationParams::Convolution(depthwise(32));
        assert!(variant.validate(&params, &options));

        let mut grouped = depthwise(32);
        grouped.split = 2;
        let params = OperationParams::Convolution(grouped);
        assert!(!variant.validate(&params, &options));
    }

    #[test]
    fn default_tile_is_fourteen_by_seven() {
        let variant = ConvolutionBfyx3x3DwOpt::new();
        assert_eq!(variant.auto_tune_options(), 70);
        let params = OperationParams::Convolution(depthwise(32));
        let d = variant
            .set_default(&params, AutoTune::UseDefault)
            .expect("conv");
        assert_eq!(d.gws(), [32, 4, 32]);
        assert_eq!(d.lws(), [16, 1, 1]);
        assert_eq!(d.priority, Priority::FORCE_PRIORITY_5);
        let jit = variant.jit_constants(&params, &d);
        assert_eq!(jit.value("BLOCK_SIZE_X").as_deref(), Some("16"));
        assert_eq!(jit.value("BLOCK_SIZE_Y").as_deref(), Some("9"));
    }

    #[test]
    fn tuned_tile_changes_grid() {
        let variant = ConvolutionBfyx3x3DwOpt::new();
        let params = OperationParams::Convolution(depthwise(8));
        // Option 0 is the 1x1 tile.
        let d = variant
            .set_default(&params, AutoTune::UseTunedOption(0))
            .expect("conv");
        assert_eq!(d.gws(), [28 * 16, 28, 8]);
        assert_eq!(d.blocks.block_width, 1);
    }
}
