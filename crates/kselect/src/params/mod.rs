//! Request parameters: the tensors and attributes a selector ranks variants against.

mod family;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::env;
use crate::hashing::fnv1a_hash;
use crate::key::CapabilityKey;
use crate::tensor::{DataLayout, DataTensor, WeightsTensor};

pub use family::{
    ActivationParams, ConcatAxis, ConcatenationParams, ConvolutionParams, EltwiseInput, EltwiseMode,
    EltwiseOperation, EltwiseParams, FullyConnectedParams, LrnDivider, LrnMode, LrnParams,
    PoolDivider, PoolRemainder, PoolType, PoolingParams, ReorderParams, ReorderWeightsParams, Size2,
    SoftmaxDim, SoftmaxParams,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    Convolution,
    Pooling,
    FullyConnected,
    Eltwise,
    SoftMax,
    Activation,
    Concatenation,
    Lrn,
    Reorder,
    ReorderWeights,
}

impl KernelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KernelKind::Convolution => "convolution",
            KernelKind::Pooling => "pooling",
            KernelKind::FullyConnected => "fully_connected",
            KernelKind::Eltwise => "eltwise",
            KernelKind::SoftMax => "softmax",
            KernelKind::Activation => "activation",
            KernelKind::Concatenation => "concatenation",
            KernelKind::Lrn => "lrn",
            KernelKind::Reorder => "reorder",
            KernelKind::ReorderWeights => "reorder_weights",
        }
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation fused at the end of a kernel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum ActivationFunction {
    #[default]
    None,
    Logistic,
    HyperbolicTan,
    Relu,
    ReluNegativeSlope,
    Clamp,
    Softrelu,
    Abs,
    Linear,
    Square,
    Sqrt,
}

impl ActivationFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationFunction::None => "NONE",
            ActivationFunction::Logistic => "LOGISTIC",
            ActivationFunction::HyperbolicTan => "HYPERBOLIC_TAN",
            ActivationFunction::Relu => "RELU",
            ActivationFunction::ReluNegativeSlope => "RELU_NEGATIVE_SLOPE",
            ActivationFunction::Clamp => "CLAMP",
            ActivationFunction::Softrelu => "SOFTRELU",
            ActivationFunction::Abs => "ABS",
            ActivationFunction::Linear => "LINEAR",
            ActivationFunction::Square => "SQUARE",
            ActivationFunction::Sqrt => "SQRT",
        }
    }

    /// Number of `m`/`n` parameters the function reads.
    pub fn additional_params(self) -> usize {
        match self {
            ActivationFunction::ReluNegativeSlope => 1,
            ActivationFunction::Clamp | ActivationFunction::Linear => 2,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NonLinearParams {
    pub m: f32,
    pub n: f32,
}

/// Device capabilities relevant to selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct EngineInfo {
    pub sub_group: bool,
    pub sub_group_short: bool,
    pub fp16: bool,
    pub fp64: bool,
    pub compute_units: u32,
}

impl EngineInfo {
    /// Compute units used by tuning heuristics. Unknown devices count as 24.
    pub fn effective_compute_units(&self) -> u32 {
        if self.compute_units == 0 {
            24
        } else {
            self.compute_units
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseParams {
    pub layer_id: String,
    pub inputs: Vec<DataTensor>,
    pub output: DataTensor,
    pub activation: ActivationFunction,
    pub activation_params: NonLinearParams,
    pub engine: EngineInfo,
}

impl BaseParams {
    pub fn new(layer_id: impl Into<String>, inputs: Vec<DataTensor>, output: DataTensor) -> Self {
        Self {
            layer_id: layer_id.into(),
            inputs,
            output,
            activation: ActivationFunction::None,
            activation_params: NonLinearParams::default(),
            engine: EngineInfo::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineInfo) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_activation(
        mut self,
        activation: ActivationFunction,
        params: NonLinearParams,
    ) -> Self {
        self.activation = activation;
        self.activation_params = params;
        self
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        if self.engine.sub_group {
            k.enable_sub_group();
        }
        if self.engine.sub_group_short {
            k.enable_sub_group_short();
        }

        let mut batching = false;
        let mut pitches = false;
        let mut offsets = false;
        let mut different_types = false;
        for input in &self.inputs {
            k.enable_input_data_type(input.dtype());
            k.enable_input_layout(input.layout());
            batching |= input.batch().v > 1;
            pitches |= input.pitches_differ_from_logical_dims();
            offsets |= input.first_element_offset() != 0;
            different_types |= input.dtype() != self.output.dtype();
        }
        k.enable_output_data_type(self.output.dtype());
        k.enable_output_layout(self.output.layout());

        if batching {
            k.enable_batching();
        }
        if pitches || self.output.pitches_differ_from_logical_dims() {
            k.enable_tensor_pitches();
        }
        if different_types {
            k.enable_different_types();
        }
        if offsets || self.output.first_element_offset() != 0 {
            k.enable_tensor_offset();
        }
        k
    }

    pub fn input(&self, index: usize) -> Option<&DataTensor> {
        self.inputs.get(index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightBiasParams {
    pub base: BaseParams,
    pub weights: WeightsTensor,
    pub bias: Vec<DataTensor>,
}

impl WeightBiasParams {
    pub fn new(base: BaseParams, weights: WeightsTensor, bias: Option<DataTensor>) -> Self {
        Self {
            base,
            weights,
            bias: bias.into_iter().collect(),
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = self.base.key();
        k.enable_input_weights_type(self.weights.dtype());
        match self.bias.first() {
            None => {
                k.enable_non_bias_term();
            }
            Some(bias) if matches!(bias.layout(), DataLayout::Bf | DataLayout::Fb) => {
                k.enable_bias_per_feature();
            }
            Some(bias) if bias.layout() == self.base.output.layout() => {
                k.enable_bias_per_output();
            }
            Some(_) => {}
        }
        k
    }
}

/// Per-request switches that widen or narrow what a variant may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionalParams {
    pub kind: KernelKind,
    pub input_layouts: Vec<DataLayout>,
    pub output_layouts: Vec<DataLayout>,
    pub meaningful_kernel_names: bool,
    pub allow_input_reordering: bool,
    pub allow_output_reordering: bool,
    pub allow_weights_reorder: bool,
    /// Convolution may assume the caller pads the input buffer.
    pub allow_padding: bool,
    /// Fully connected may flatten its input into the variant's layout.
    pub allow_reorder_input: bool,
}

impl OptionalParams {
    pub fn new(kind: KernelKind) -> Self {
        Self {
            kind,
            input_layouts: Vec::new(),
            output_layouts: Vec::new(),
            meaningful_kernel_names: env::meaningful_names_default(),
            allow_input_reordering: false,
            allow_output_reordering: false,
            allow_weights_reorder: true,
            allow_padding: false,
            allow_reorder_input: false,
        }
    }

    pub fn key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        for layout in &self.input_layouts {
            k.enable_input_layout(*layout);
        }
        for layout in &self.output_layouts {
            k.enable_output_layout(*layout);
        }
        if self.allow_input_reordering {
            k.enable_all_input_layout();
        }
        if self.allow_output_reordering {
            k.enable_all_output_layout();
        }
        k
    }
}

/// Tagged parameter bundle for one primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationParams {
    Convolution(ConvolutionParams),
    Pooling(PoolingParams),
    FullyConnected(FullyConnectedParams),
    Eltwise(EltwiseParams),
    SoftMax(SoftmaxParams),
    Activation(ActivationParams),
    Concatenation(ConcatenationParams),
    Lrn(LrnParams),
    Reorder(ReorderParams),
    ReorderWeights(ReorderWeightsParams),
}

impl OperationParams {
    pub fn kind(&self) -> KernelKind {
        match self {
            OperationParams::Convolution(_) => KernelKind::Convolution,
            OperationParams::Pooling(_) => KernelKind::Pooling,
            OperationParams::FullyConnected(_) => KernelKind::FullyConnected,
            OperationParams::Eltwise(_) => KernelKind::Eltwise,
            OperationParams::SoftMax(_) => KernelKind::SoftMax,
            OperationParams::Activation(_) => KernelKind::Activation,
            OperationParams::Concatenation(_) => KernelKind::Concatenation,
            OperationParams::Lrn(_) => KernelKind::Lrn,
            OperationParams::Reorder(_) => KernelKind::Reorder,
            OperationParams::ReorderWeights(_) => KernelKind::ReorderWeights,
        }
    }

    pub fn base(&self) -> Option<&BaseParams> {
        match self {
            OperationParams::Convolution(p) => Some(&p.weight_bias.base),
            OperationParams::Pooling(p) => Some(&p.base),
            OperationParams::FullyConnected(p) => Some(&p.weight_bias.base),
            OperationParams::Eltwise(p) => Some(&p.base),
            OperationParams::SoftMax(p) => Some(&p.base),
            OperationParams::Activation(p) => Some(&p.base),
            OperationParams::Concatenation(p) => Some(&p.base),
            OperationParams::Lrn(p) => Some(&p.base),
            OperationParams::Reorder(p) => Some(&p.base),
            OperationParams::ReorderWeights(_) => None,
        }
    }

    pub fn layer_id(&self) -> &str {
        match self {
            OperationParams::ReorderWeights(p) => &p.layer_id,
            other => other
                .base()
                .map(|b| b.layer_id.as_str())
                .unwrap_or_default(),
        }
    }

    pub fn weight_bias(&self) -> Option<&WeightBiasParams> {
        match self {
            OperationParams::Convolution(p) => Some(&p.weight_bias),
            OperationParams::FullyConnected(p) => Some(&p.weight_bias),
            _ => None,
        }
    }

    /// Copy with the weight/bias block replaced; `None` for families without weights.
    pub fn with_weight_bias(&self, weight_bias: WeightBiasParams) -> Option<OperationParams> {
        match self {
            OperationParams::Convolution(p) => {
                let conv = ConvolutionParams {
                    weight_bias,
                    ..p.clone()
                };
                Some(OperationParams::Convolution(conv))
            }
            OperationParams::FullyConnected(_) => {
                let fc = FullyConnectedParams { weight_bias };
                Some(OperationParams::FullyConnected(fc))
            }
            _ => None,
        }
    }

    pub fn key(&self) -> CapabilityKey {
        match self {
            OperationParams::Convolution(p) => p.key(),
            OperationParams::Pooling(p) => p.key(),
            OperationParams::FullyConnected(p) => p.weight_bias.key(),
            OperationParams::Eltwise(p) => p.key(),
            OperationParams::SoftMax(p) => p.key(),
            OperationParams::Activation(p) => p.key(),
            OperationParams::Concatenation(p) => p.key(),
            OperationParams::Lrn(p) => p.key(),
            OperationParams::Reorder(p) => p.base.key(),
            OperationParams::ReorderWeights(p) => p.key(),
        }
    }

    /// Stable signature of everything but the layer id, used to index tuning tables.
    pub fn tuning_key(&self) -> String {
        let mut anonymous = self.clone();
        anonymous.set_layer_id(String::new());
        let encoded = serde_json::to_string(&anonymous).unwrap_or_default();
        format!("{}:{:016x}", self.kind(), fnv1a_hash(encoded.as_bytes()))
    }

    fn set_layer_id(&mut self, layer_id: String) {
        match self {
            OperationParams::Convolution(p) => p.weight_bias.base.layer_id = layer_id,
            OperationParams::Pooling(p) => p.base.layer_id = layer_id,
            OperationParams::FullyConnected(p) => p.weight_bias.base.layer_id = layer_id,
            OperationParams::Eltwise(p) => p.base.layer_id = layer_id,
            OperationParams::SoftMax(p) => p.base.layer_id = layer_id,
            OperationParams::Activation(p) => p.base.layer_id = layer_id,
            OperationParams::Concatenation(p) => p.base.layer_id = layer_id,
            OperationParams::Lrn(p) => p.base.layer_id = layer_id,
            OperationParams::Reorder(p) => p.base.layer_id = layer_id,
            OperationParams::ReorderWeights(p) => p.layer_id = layer_id,
        }
    }

    pub fn as_convolution(&self) -> Option<&ConvolutionParams> {
        match self {
            OperationParams::Convolution(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_pooling(&self) -> Option<&PoolingParams> {
        match self {
            OperationParams::Pooling(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_fully_connected(&self) -> Option<&FullyConnectedParams> {
        match self {
            OperationParams::FullyConnected(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_eltwise(&self) -> Option<&EltwiseParams> {
        match self {
            OperationParams::Eltwise(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_softmax(&self) -> Option<&SoftmaxParams> {
        match self {
            OperationParams::SoftMax(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_activation(&self) -> Option<&ActivationParams> {
        match self {
            OperationParams::Activation(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_concatenation(&self) -> Option<&ConcatenationParams> {
        match self {
            OperationParams::Concatenation(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_lrn(&self) -> Option<&LrnParams> {
        match self {
            OperationParams::Lrn(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_reorder(&self) -> Option<&ReorderParams> {
        match self {
            OperationParams::Reorder(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_reorder_weights(&self) -> Option<&ReorderWeightsParams> {
        match self {
            OperationParams::ReorderWeights(p) => Some(p),
            _ => None,
        }
    }
}

macro_rules! impl_from_family {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for OperationParams {
                fn from(params: $ty) -> Self {
                    OperationParams::$variant(params)
                }
            }
        )*
    };
}

impl_from_family! {
    Convolution => ConvolutionParams,
    Pooling => PoolingParams,
    FullyConnected => FullyConnectedParams,
    Eltwise => EltwiseParams,
    SoftMax => SoftmaxParams,
    Activation => ActivationParams,
    Concatenation => ConcatenationParams,
    Lrn => LrnParams,
    Reorder => ReorderParams,
    ReorderWeights => ReorderWeightsParams,
}
