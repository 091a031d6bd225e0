use serde::{Deserialize, Serialize};

use crate::key::CapabilityKey;
use crate::tensor::{DataChannel, WeightsTensor};

use super::{BaseParams, WeightBiasParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size2 {
    pub x: usize,
    pub y: usize,
}

impl Size2 {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub const fn splat(v: usize) -> Self {
        Self { x: v, y: v }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionParams {
    pub weight_bias: WeightBiasParams,
    pub filter: Size2,
    pub stride: Size2,
    pub dilation: Size2,
    pub padding: Size2,
    pub split: usize,
    pub depthwise_separable_opt: bool,
}

impl ConvolutionParams {
    /// Unit stride and dilation, no padding, no split. The filter is read off the weights.
    pub fn new(weight_bias: WeightBiasParams) -> Self {
        let filter = Size2::new(weight_bias.weights.x().v, weight_bias.weights.y().v);
        Self {
            weight_bias,
            filter,
            stride: Size2::splat(1),
            dilation: Size2::splat(1),
            padding: Size2::splat(0),
            split: 1,
            depthwise_separable_opt: false,
        }
    }

    pub fn base(&self) -> &BaseParams {
        &self.weight_bias.base
    }

    pub fn weights(&self) -> &WeightsTensor {
        &self.weight_bias.weights
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.weight_bias.key();
        if self.split > 1 {
            k.enable_split_support();
        }
        if self.dilation != Size2::splat(1) {
            k.enable_dilation();
        }
        if self.depthwise_separable_opt {
            k.enable_depthwise_separable_opt();
        }
        k
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolType {
    Max,
    Avg,
    MaxWithArgmax,
}

impl PoolType {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolType::Max => "MAX",
            PoolType::Avg => "AVG",
            PoolType::MaxWithArgmax => "MAX_WITH_ARGMAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolRemainder {
    Floor,
    Ceil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolDivider {
    Fixed,
    Dynamic,
    DynamicWithPadding,
}

impl PoolDivider {
    pub fn as_str(self) -> &'static str {
        match self {
            PoolDivider::Fixed => "FIXED",
            PoolDivider::Dynamic => "DYNAMIC",
            PoolDivider::DynamicWithPadding => "DYNAMIC_WITH_PADDING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingParams {
    pub base: BaseParams,
    pub pool_type: PoolType,
    pub remainder: PoolRemainder,
    pub divider: PoolDivider,
    pub pool_size: Size2,
    pub stride: Size2,
    pub padding: Size2,
}

impl PoolingParams {
    pub fn new(base: BaseParams, pool_type: PoolType, pool_size: Size2, stride: Size2) -> Self {
        Self {
            base,
            pool_type,
            remainder: PoolRemainder::Floor,
            divider: PoolDivider::Fixed,
            pool_size,
            stride,
            padding: Size2::splat(0),
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        k.enable_pool_type(self.pool_type)
            .enable_pool_remainder(self.remainder)
            .enable_pool_kernel_divider(self.divider);
        k
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedParams {
    pub weight_bias: WeightBiasParams,
}

impl FullyConnectedParams {
    pub fn new(weight_bias: WeightBiasParams) -> Self {
        Self { weight_bias }
    }

    pub fn base(&self) -> &BaseParams {
        &self.weight_bias.base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EltwiseMode {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
    Modulu,
    Sqrt,
    Rsqrt,
    Assign,
}

impl EltwiseMode {
    pub const ALL: [EltwiseMode; 11] = [
        EltwiseMode::Add,
        EltwiseMode::Sub,
        EltwiseMode::Mul,
        EltwiseMode::Div,
        EltwiseMode::Min,
        EltwiseMode::Max,
        EltwiseMode::Pow,
        EltwiseMode::Modulu,
        EltwiseMode::Sqrt,
        EltwiseMode::Rsqrt,
        EltwiseMode::Assign,
    ];

    pub fn arity(self) -> usize {
        match self {
            EltwiseMode::Sqrt | EltwiseMode::Rsqrt | EltwiseMode::Assign => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EltwiseInput {
    /// Index into `BaseParams::inputs`.
    Buffer(usize),
    Scalar(f32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EltwiseOperation {
    pub mode: EltwiseMode,
    pub inputs: Vec<EltwiseInput>,
}

impl EltwiseOperation {
    pub fn new(mode: EltwiseMode, inputs: Vec<EltwiseInput>) -> Self {
        Self { mode, inputs }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EltwiseParams {
    pub base: BaseParams,
    pub operations: Vec<EltwiseOperation>,
    pub layout_based: bool,
}

impl EltwiseParams {
    pub fn new(base: BaseParams, operations: Vec<EltwiseOperation>) -> Self {
        Self {
            base,
            operations,
            layout_based: false,
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        for op in &self.operations {
            k.enable_eltwise_mode(op.mode);
        }
        k
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SoftmaxDim {
    X,
    Y,
    Feature,
}

impl SoftmaxDim {
    pub fn as_str(self) -> &'static str {
        match self {
            SoftmaxDim::X => "X",
            SoftmaxDim::Y => "Y",
            SoftmaxDim::Feature => "FEATURE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxParams {
    pub base: BaseParams,
    pub dim: SoftmaxDim,
}

impl SoftmaxParams {
    pub fn new(base: BaseParams, dim: SoftmaxDim) -> Self {
        Self { base, dim }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        k.enable_softmax_dim(self.dim);
        k
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationParams {
    pub base: BaseParams,
    /// Slopes arrive as a second buffer instead of `activation_params`.
    pub params_as_input: bool,
}

impl ActivationParams {
    pub fn new(base: BaseParams) -> Self {
        Self {
            base,
            params_as_input: false,
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        if self.params_as_input {
            k.enable_activation_additional_params_as_input();
        }
        k
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConcatAxis {
    X,
    Y,
    Feature,
    Batch,
}

impl ConcatAxis {
    pub fn channel(self) -> DataChannel {
        match self {
            ConcatAxis::X => DataChannel::X,
            ConcatAxis::Y => DataChannel::Y,
            ConcatAxis::Feature => DataChannel::Feature,
            ConcatAxis::Batch => DataChannel::Batch,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConcatAxis::X => "X",
            ConcatAxis::Y => "Y",
            ConcatAxis::Feature => "FEATURE",
            ConcatAxis::Batch => "BATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcatenationParams {
    pub base: BaseParams,
    pub axis: ConcatAxis,
}

impl ConcatenationParams {
    pub fn new(base: BaseParams, axis: ConcatAxis) -> Self {
        Self { base, axis }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        k.enable_concat_axis(self.axis);
        if self.base.inputs.len() > 1 {
            k.enable_concat_kernel_per_input();
        }
        k
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LrnMode {
    AcrossChannel,
    WithinChannel,
}

impl LrnMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LrnMode::AcrossChannel => "ACROSS_CHANNEL",
            LrnMode::WithinChannel => "WITHIN_CHANNEL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LrnDivider {
    Fixed,
    Dynamic,
}

impl LrnDivider {
    pub fn as_str(self) -> &'static str {
        match self {
            LrnDivider::Fixed => "FIXED",
            LrnDivider::Dynamic => "DYNAMIC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrnParams {
    pub base: BaseParams,
    pub mode: LrnMode,
    pub divider: LrnDivider,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
    pub local_size: usize,
}

impl LrnParams {
    pub fn new(base: BaseParams, mode: LrnMode, local_size: usize) -> Self {
        Self {
            base,
            mode,
            divider: LrnDivider::Fixed,
            alpha: 1.0,
            beta: 0.75,
            k: 1.0,
            local_size,
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        k.enable_lrn_mode(self.mode)
            .enable_lrn_kernel_divider(self.divider);
        k
    }
}

/// Data layout or type conversion between two data tensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorderParams {
    pub base: BaseParams,
}

impl ReorderParams {
    pub fn new(base: BaseParams) -> Self {
        Self { base }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderWeightsParams {
    pub layer_id: String,
    pub input: WeightsTensor,
    pub output: WeightsTensor,
    pub engine: super::EngineInfo,
}

impl ReorderWeightsParams {
    pub fn new(layer_id: impl Into<String>, input: WeightsTensor, output: WeightsTensor) -> Self {
        Self {
            layer_id: layer_id.into(),
            input,
            output,
            engine: super::EngineInfo::default(),
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_weights_type(self.input.dtype())
            .enable_output_weights_type(self.output.dtype())
            .enable_input_weights_layout(self.input.layout())
            .enable_output_weights_layout(self.output.layout());
        if self.input.dtype() != self.output.dtype() {
            k.enable_different_types();
        }
        if self.input.pitches_differ_from_logical_dims()
            || self.output.pitches_differ_from_logical_dims()
        {
            k.enable_tensor_pitches();
        }
        if self.input.first_element_offset() != 0 || self.output.first_element_offset() != 0 {
            k.enable_tensor_offset();
        }
        k
    }
}
