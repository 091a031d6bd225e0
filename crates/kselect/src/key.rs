//! Capability keys: the bit sets a variant advertises and a request requires.

use serde::{Deserialize, Serialize};

use crate::params::{
    ConcatAxis, EltwiseMode, LrnDivider, LrnMode, PoolDivider, PoolRemainder, PoolType, SoftmaxDim,
};
use crate::tensor::{DataLayout, Datatype, WeightsLayout, WeightsType};

mod restrict {
    pub const DIFFERENT_TYPES: u64 = 1 << 0;
    pub const TENSOR_OFFSET: u64 = 1 << 1;
    pub const TENSOR_PITCHES: u64 = 1 << 2;
    pub const BATCHING: u64 = 1 << 3;
    pub const BIAS_PER_FEATURE: u64 = 1 << 4;
    pub const BIAS_PER_OUTPUT: u64 = 1 << 5;
    pub const NON_BIAS: u64 = 1 << 6;
    pub const SPLIT: u64 = 1 << 7;
    pub const DILATION: u64 = 1 << 8;
    pub const DEPTHWISE_SEPARABLE: u64 = 1 << 9;
    pub const ACTIVATION_ADDITIONAL_PARAMS: u64 = 1 << 10;
    pub const CONCAT_KERNEL_PER_INPUT: u64 = 1 << 11;
}

mod dedicated {
    pub const POOL_TYPE: u32 = 0;
    pub const POOL_REMAINDER: u32 = 4;
    pub const POOL_DIVIDER: u32 = 8;
    pub const SOFTMAX_DIM: u32 = 12;
    pub const LRN_MODE: u32 = 16;
    pub const LRN_DIVIDER: u32 = 20;
    pub const CONCAT_AXIS: u32 = 24;
    pub const ELTWISE_MODE: u32 = 32;
}

mod machine {
    pub const SUB_GROUP: u32 = 1 << 0;
    pub const SUB_GROUP_SHORT: u32 = 1 << 1;
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct CapabilityKey {
    input_types: u32,
    output_types: u32,
    input_weights_types: u32,
    output_weights_types: u32,
    input_layouts: u32,
    output_layouts: u32,
    input_weights_layouts: u32,
    output_weights_layouts: u32,
    restrict: u64,
    dedicated: u64,
    machine: u32,
}

impl CapabilityKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_input_data_type(&mut self, dt: Datatype) -> &mut Self {
        self.input_types |= dt.bit();
        self
    }

    pub fn enable_output_data_type(&mut self, dt: Datatype) -> &mut Self {
        self.output_types |= dt.bit();
        self
    }

    pub fn enable_input_weights_type(&mut self, wt: WeightsType) -> &mut Self {
        self.input_weights_types |= wt.bit();
        self
    }

    pub fn enable_output_weights_type(&mut self, wt: WeightsType) -> &mut Self {
        self.output_weights_types |= wt.bit();
        self
    }

    pub fn enable_input_layout(&mut self, l: DataLayout) -> &mut Self {
        self.input_layouts |= l.bit();
        self
    }

    pub fn enable_all_input_layout(&mut self) -> &mut Self {
        for l in DataLayout::ALL {
            self.input_layouts |= l.bit();
        }
        self
    }

    pub fn enable_output_layout(&mut self, l: DataLayout) -> &mut Self {
        self.output_layouts |= l.bit();
        self
    }

    pub fn enable_all_output_layout(&mut self) -> &mut Self {
        for l in DataLayout::ALL {
            self.output_layouts |= l.bit();
        }
        self
    }

    pub fn enable_input_weights_layout(&mut self, l: WeightsLayout) -> &mut Self {
        self.input_weights_layouts |= l.bit();
        self
    }

    pub fn enable_output_weights_layout(&mut self, l: WeightsLayout) -> &mut Self {
        self.output_weights_layouts |= l.bit();
        self
    }

    pub fn enable_all_weights_layout(&mut self) -> &mut Self {
        for l in WeightsLayout::ALL {
            self.input_weights_layouts |= l.bit();
            self.output_weights_layouts |= l.bit();
        }
        self
    }

    pub fn enable_different_types(&mut self) -> &mut Self {
        self.restrict |= restrict::DIFFERENT_TYPES;
        self
    }

    pub fn enable_tensor_offset(&mut self) -> &mut Self {
        self.restrict |= restrict::TENSOR_OFFSET;
        self
    }

    pub fn enable_tensor_pitches(&mut self) -> &mut Self {
        self.restrict |= restrict::TENSOR_PITCHES;
        self
    }

    pub fn enable_batching(&mut self) -> &mut Self {
        self.restrict |= restrict::BATCHING;
        self
    }

    pub fn enable_bias_per_feature(&mut self) -> &mut Self {
        self.restrict |= restrict::BIAS_PER_FEATURE;
        self
    }

    pub fn enable_bias_per_output(&mut self) -> &mut Self {
        self.restrict |= restrict::BIAS_PER_OUTPUT;
        self
    }

    pub fn enable_non_bias_term(&mut self) -> &mut Self {
        self.restrict |= restrict::NON_BIAS;
        self
    }

    pub fn enable_split_support(&mut self) -> &mut Self {
        self.restrict |= restrict::SPLIT;
        self
    }

    pub fn enable_dilation(&mut self) -> &mut Self {
        self.restrict |= restrict::DILATION;
        self
    }

    pub fn enable_depthwise_separable_opt(&mut self) -> &mut Self {
        self.restrict |= restrict::DEPTHWISE_SEPARABLE;
        self
    }

    pub fn enable_activation_additional_params_as_input(&mut self) -> &mut Self {
        self.restrict |= restrict::ACTIVATION_ADDITIONAL_PARAMS;
        self
    }

    pub fn enable_concat_kernel_per_input(&mut self) -> &mut Self {
        self.restrict |= restrict::CONCAT_KERNEL_PER_INPUT;
        self
    }

    pub fn enable_sub_group(&mut self) -> &mut Self {
        self.machine |= machine::SUB_GROUP;
        self
    }

    pub fn enable_sub_group_short(&mut self) -> &mut Self {
        self.machine |= machine::SUB_GROUP_SHORT;
        self
    }

    pub fn enable_pool_type(&mut self, t: PoolType) -> &mut Self {
        self.dedicated(dedicated::POOL_TYPE, t as u32)
    }

    pub fn enable_pool_remainder(&mut self, r: PoolRemainder) -> &mut Self {
        self.dedicated(dedicated::POOL_REMAINDER, r as u32)
    }

    pub fn enable_pool_kernel_divider(&mut self, d: PoolDivider) -> &mut Self {
        self.dedicated(dedicated::POOL_DIVIDER, d as u32)
    }

    pub fn enable_softmax_dim(&mut self, d: SoftmaxDim) -> &mut Self {
        self.dedicated(dedicated::SOFTMAX_DIM, d as u32)
    }

    pub fn enable_lrn_mode(&mut self, m: LrnMode) -> &mut Self {
        self.dedicated(dedicated::LRN_MODE, m as u32)
    }

    pub fn enable_lrn_kernel_divider(&mut self, d: LrnDivider) -> &mut Self {
        self.dedicated(dedicated::LRN_DIVIDER, d as u32)
    }

    pub fn enable_concat_axis(&mut self, a: ConcatAxis) -> &mut Self {
        self.dedicated(dedicated::CONCAT_AXIS, a as u32)
    }

    pub fn enable_eltwise_mode(&mut self, m: EltwiseMode) -> &mut Self {
        self.dedicated(dedicated::ELTWISE_MODE, m as u32)
    }

    pub fn enable_all_eltwise_modes(&mut self) -> &mut Self {
        for m in EltwiseMode::ALL {
            self.enable_eltwise_mode(m);
        }
        self
    }

    fn dedicated(&mut self, base: u32, offset: u32) -> &mut Self {
        self.dedicated |= 1u64 << (base + offset);
        self
    }

    pub fn build(&self) -> Self {
        *self
    }

    pub fn merge(&self, other: &CapabilityKey) -> CapabilityKey {
        CapabilityKey {
            input_types: self.input_types | other.input_types,
            output_types: self.output_types | other.output_types,
            input_weights_types: self.input_weights_types | other.input_weights_types,
            output_weights_types: self.output_weights_types | other.output_weights_types,
            input_layouts: self.input_layouts | other.input_layouts,
            output_layouts: self.output_layouts | other.output_layouts,
            input_weights_layouts: self.input_weights_layouts | other.input_weights_layouts,
            output_weights_layouts: self.output_weights_layouts | other.output_weights_layouts,
            restrict: self.restrict | other.restrict,
            dedicated: self.dedicated | other.dedicated,
            machine: self.machine | other.machine,
        }
    }

    /// True when a variant advertising `self` can serve a request requiring `required`.
    pub fn support(&self, required: &CapabilityKey) -> bool {
        fn subset_u64(offered: u64, wanted: u64) -> bool {
            offered & wanted == wanted
        }
        fn subset(offered: u32, wanted: u32) -> bool {
            offered & wanted == wanted
        }
        fn overlap(offered: u32, wanted: u32) -> bool {
            offered & wanted != 0 || offered == wanted
        }

        subset_u64(self.restrict, required.restrict)
            && subset_u64(self.dedicated, required.dedicated)
            && subset(required.machine, self.machine)
            && subset(self.input_types, required.input_types)
            && subset(self.output_types, required.output_types)
            && subset(self.input_weights_types, required.input_weights_types)
            && subset(self.output_weights_types, required.output_weights_types)
            && overlap(self.input_layouts, required.input_layouts)
            && overlap(self.output_layouts, required.output_layouts)
            && overlap(self.input_weights_layouts, required.input_weights_layouts)
            && overlap(self.output_weights_layouts, required.output_weights_layouts)
    }
}
