use crate::dispatch::{DispatchData, ExeMode, KernelDescriptor, WorkGroups};
use crate::error::KernelResult;
use crate::jit::{make_convolution_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::kernels::fp16_used;
use crate::params::{ConvolutionParams, KernelKind, OperationParams, OptionalParams};
use crate::priority::Priority;
use crate::selector::SelectionContext;
use crate::tensor::{ceil_div, round_up, WeightsLayout};
use crate::variant::{tuned_option, AutoTune, AutoTuneOption, KernelVariant};

use super::{
    bfyx_float_key, convolution_check_input, convolution_kernels_data, validate_convolution,
    ConvolutionFlow,
};

pub const NAME: &str = "convolution_gpu_bfyx_os_iyx_osv16";

const WEIGHTS: &[WeightsLayout] = &[WeightsLayout::OsIyxOsv16];
const SUB_GROUP_SIZE: usize = 16;
const BLOCK_WIDTHS: [usize; 10] = [1, 2, 4, 5, 6, 8, 10, 12, 14, 16];
const BLOCK_HEIGHTS: [usize; 5] = [1, 2, 3, 4, 5];
const PREFETCHES: [usize; 8] = [1, 2, 3, 4, 5, 6, 8, 10];
const MAX_BLOCK_SIZE: usize = 60;

/// Sixteen output features per subgroup over a block of output pixels.
#[derive(Debug, Clone)]
pub struct ConvolutionBfyxOsIyxOsv16 {
    options: Vec<AutoTuneOption>,
}

impl ConvolutionBfyxOsIyxOsv16 {
    pub fn new() -> Self {
        let mut options = Vec::new();
        for block_width in BLOCK_WIDTHS {
            for block_height in BLOCK_HEIGHTS {
                for prefetch in PREFETCHES {
                    if block_width * block_height <= MAX_BLOCK_SIZE {
                        options.push(AutoTuneOption::Block {
                            block_width,
                            block_height,
                            prefetch,
                            exe_mode: ExeMode::RoundRobin,
                        });
                    }
                }
            }
        }
        Self { options }
    }

    pub fn tune_options(&self) -> &[AutoTuneOption] {
        &self.options
    }
}

impl Default for ConvolutionBfyxOsIyxOsv16 {
    fn default() -> Self {
        Self::new()
    }
}

/// (block width, block height, prefetch) when no tuning option is given.
fn default_blocks(conv: &ConvolutionParams) -> (usize, usize, usize) {
    let (stride, filter, dilation) = (conv.stride, conv.filter, conv.dilation);
    if stride.x == 1 && stride.y == 1 {
        let out_x = conv.base().output.x().v;
        if filter.x == 1 && filter.y == 1 {
            (16, 1, 4)
        } else if out_x + (filter.x - 1) * dilation.x < SUB_GROUP_SIZE {
            // One output row per work item keeps the whole row inside the subgroup.
            (out_x, 1, 4)
        } else if filter.x < 5 && filter.y < 5 {
            (SUB_GROUP_SIZE - filter.x + 1, 2, 4)
        } else {
            (4, 3, 4)
        }
    } else if stride.x == 2 && stride.y == 2 {
        (5, 4, 4)
    } else {
        (4, 3, 5)
    }
}

/// (input block array size, input block read width) for one output block.
pub fn input_block_dims(
    conv: &ConvolutionParams,
    block_width: usize,
    block_height: usize,
    fp16: bool,
) -> (usize, usize) {
    let (stride, filter, dilation) = (conv.stride, conv.filter, conv.dilation);
    let req_width = (block_width - 1) * stride.x + (filter.x - 1) * dilation.x + 1;
    let req_height = (block_height - 1) * stride.y + (filter.y - 1) * dilation.y + 1;
    let read_chunk = if fp16 {
        SUB_GROUP_SIZE
    } else {
        SUB_GROUP_SIZE / 2
    };
    let read_width = round_up(req_width, read_chunk).max(SUB_GROUP_SIZE);
    let array_size = ceil_div(req_height * read_width, SUB_GROUP_SIZE);
    (array_size, read_width)
}

impl KernelVariant for ConvolutionBfyxOsIyxOsv16 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Convolution
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = bfyx_float_key();
        k.enable_sub_group()
            .enable_bias_per_output()
            .enable_dilation();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        let Some(conv) = params.as_convolution() else {
            return false;
        };
        validate_convolution(params, options, WEIGHTS) && convolution_check_input(conv, options)
    }

    fn set_default(&self, params: &OperationParams, tune: AutoTune) -> Option<DispatchData> {
        let conv = params.as_convolution()?;
        let out = &conv.base().output;
        let fp16 = fp16_used(conv.base());

        let option = tuned_option(&self.options, tune);
        let (block_width, block_height, prefetch, exe_mode) = match option {
            Some(AutoTuneOption::Block {
                block_width,
                block_height,
                prefetch,
                exe_mode,
            }) => (block_width, block_height, prefetch, exe_mode),
            Some(AutoTuneOption::Tile { .. }) => return None,
            None => {
                let (w, h, p) = default_blocks(conv);
                (w, h, p, ExeMode::RoundRobin)
            }
        };
        if block_width == 0 || block_height == 0 {
            return None;
        }

        let of_threads_per_batch = round_up(out.feature().v, SUB_GROUP_SIZE);
        let (array_size, read_width) = input_block_dims(conv, block_width, block_height, fp16);
        let gws = [
            ceil_div(out.x().v, block_width),
            ceil_div(out.y().v, block_height),
            of_threads_per_batch * out.batch().v,
        ];

        let groups = WorkGroups::new(gws, [1, 1, SUB_GROUP_SIZE]);
        let mut dispatch = DispatchData::new(groups, fp16);
        dispatch.priority = Priority::FORCE_PRIORITY_3;
        dispatch.exe_mode = exe_mode;
        dispatch.blocks.block_width = block_width;
        dispatch.blocks.block_height = block_height;
        dispatch.blocks.prefetch = prefetch;
        dispatch.blocks.input_block_array_size = array_size;
        dispatch.blocks.input_block_width = read_width;
        dispatch.blocks.leftovers = of_threads_per_batch - out.feature().v;
        Some(dispatch)
    }

    fn jit_constants(&self, params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let Some(conv) = params.as_convolution() else {
            return JitConstants::default();
        };
        let blocks = &dispatch.blocks;
        let mut jit = make_convolution_jit(conv, dispatch);
        jit.add_constant("SUB_GROUP_SIZE", dispatch.lws()[2])
            .add_constant("OUTPUT_BLOCK_WIDTH", blocks.block_width)
            .add_constant("OUTPUT_BLOCK_HEIGHT", blocks.block_height)
            .add_constant("IN_BLOCK_ARRAY_SIZE", blocks.input_block_array_size)
            .add_constant("IN_BLOCK_WIDTH", blocks.input_block_width)
            .add_constant("PREFETCH", blocks.prefetch);
        if blocks.leftovers > 0 {
            jit.add_constant("LEFTOVERS", blocks.leftovers);
        }
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
    use crate::kernels::convolution::test_support::conv;
    use crate::params::Size2;
    use crate::tensor::Datatype;

    #[test]
    fn option_table_respects_block_cap() {
        let variant = ConvolutionBfyxOsIyxOsv16::new();
        let options = variant.tune_options();
        // 47 width/height pairs fit under the cap, times 8 prefetch depths.
        assert_eq!(options.len(), 47 * 8);
        let first = AutoTuneOption::Block {
            block_width: 1,
            block_height: 1,
            prefetch: 1,
            exe_mode: ExeMode::RoundRobin,
        };
        assert_eq!(options[0], first);
        let within_cap = |o: &AutoTuneOption| match o {
            AutoTuneOption::Block {
                block_width,
                block_height,
                ..
            } => block_width * block_height <= MAX_BLOCK_SIZE,
            AutoTuneOption::Tile { .. } => false,
        };
        assert!(options.iter().all(within_cap));
    }

    #[test]
    fn default_blocks_follow_filter_and_stride() {
        let one_by_one = conv(32, 32, 16, 16, 1, Datatype::F32);
        assert_eq!(default_blocks(&one_by_one), (16, 1, 4));

        let narrow = conv(10, 10, 16, 16, 3, Datatype::F32);
        assert_eq!(default_blocks(&narrow), (8, 1, 4));

        let wide = conv(40, 40, 16, 16, 3, Datatype::F32);
        assert_eq!(default_blocks(&wide), (14, 2, 4));

        let mut strided = conv(40, 40, 16, 16, 3, Datatype::F32);
        strided.stride = Size2::splat(2);
        assert_eq!(default_blocks(&strided), (5, 4, 4));
    }

    #[test]
    fn dispatch_rounds_features_to_subgroup() {
        let variant = ConvolutionBfyxOsIyxOsv16::new();
        let params = OperationParams::Convolution(conv(40, 40, 16, 20, 3, Datatype::F32));
        let d = variant
            .set_default(&params, AutoTune::UseDefault)
            .expect("conv");
        assert_eq!(d.gws(), [3, 19, 32]);
        assert_eq!(d.lws(), [1, 1, 16]);
        assert_eq!(d.blocks.leftovers, 12);
        // req width 16 -> 16, req height 4 -> 4·16/16.
        assert_eq!(
            (d.blocks.input_block_array_size, d.blocks.input_block_width),
            (4, 16)
        );

        let jit = variant.jit_constants(&params, &d);
        assert_eq!(jit.value("LEFTOVERS").as_deref(), Some("12"));
        assert_eq!(jit.value("OUTPUT_BLOCK_WIDTH").as_deref(), Some("14"));
    }

    #[test]
    fn tuned_option_overrides_blocks() {
        let variant = ConvolutionBfyxOsIyxOsv16::new();
        let params = OperationParams::Convolution(conv(40, 40, 16, 16, 3, Datatype::F32));
        let d = variant
            .set_default(&params, AutoTune::UseTunedOption(0))
            .expect("conv");
        assert_eq!(d.gws(), [38, 38, 16]);
        assert_eq!(d.blocks.leftovers, 0);
    }
}
