//! Compile-time constants injected ahead of a kernel template.

use std::fmt::Write as _;

use crate::db::PrimitiveDb;
use crate::dispatch::{
    ArgumentBinding, DispatchData, ExeMode, KernelLaunch, KernelString, DEFAULT_BUILD_FLAGS,
};
use crate::error::KernelResult;
use crate::hashing::{fnv1a_bytes, fnv1a_init};
use crate::params::{BaseParams, ConvolutionParams, OptionalParams, Size2, WeightBiasParams};
use crate::tensor::{
    DataChannel, DataLayout, DataTensor, Datatype, ElementType, TensorDesc, TensorLayout,
    WeightsLayout, WeightsTensor,
};

/// Padded length of the `_SIZES`/`_PITCHES` arrays.
pub const TENSOR_DIM_MAX: usize = 5;

/// Rendering of a scalar as kernel source text.
pub trait ToCode {
    fn to_code(&self) -> String;
}

macro_rules! integer_to_code {
    ($($ty:ty),*) => {
        $(
            impl ToCode for $ty {
                fn to_code(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

integer_to_code!(i32, i64, u32, u64, usize);

impl ToCode for bool {
    fn to_code(&self) -> String {
        if *self { "1" } else { "0" }.to_string()
    }
}

impl ToCode for f32 {
    fn to_code(&self) -> String {
        if self.is_infinite() {
            return if self.is_sign_negative() {
                "-INFINITY".to_string()
            } else {
                "INFINITY".to_string()
            };
        }
        format!("as_float(0x{:x})/*{:.6e}*/", self.to_bits(), self)
    }
}

impl ToCode for &str {
    fn to_code(&self) -> String {
        (*self).to_string()
    }
}

impl ToCode for String {
    fn to_code(&self) -> String {
        self.clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JitConstant {
    Simple { name: String, value: String },
    Data { name: String, tensor: DataTensor },
    Weights { name: String, tensor: WeightsTensor },
    Size { name: String, size: Size2 },
}

impl JitConstant {
    pub fn name(&self) -> &str {
        match self {
            JitConstant::Simple { name, .. }
            | JitConstant::Data { name, .. }
            | JitConstant::Weights { name, .. }
            | JitConstant::Size { name, .. } => name,
        }
    }

    pub fn definitions(&self) -> Vec<(String, String)> {
        match self {
            JitConstant::Simple { name, value } => vec![(name.clone(), value.clone())],
            JitConstant::Data { name, tensor } => data_tensor_definitions(name, tensor),
            JitConstant::Weights { name, tensor } => weights_tensor_definitions(name, tensor),
            JitConstant::Size { name, size } => vec![
                (format!("{name}_SIZE_X"), size.x.to_code()),
                (format!("{name}_SIZE_Y"), size.y.to_code()),
            ],
        }
    }
}

fn vector_string(values: impl Iterator<Item = usize>, fill: usize) -> String {
    let mut out = String::from("(size_t []){ ");
    let mut count = 0usize;
    for v in values {
        let _ = write!(out, "{v},");
        count += 1;
    }
    for _ in count..TENSOR_DIM_MAX {
        let _ = write!(out, "{fill},");
    }
    out.push_str(" } ");
    out
}

fn common_tensor_definitions<L: TensorLayout, T: ElementType>(
    name: &str,
    t: &TensorDesc<L, T>,
) -> Vec<(String, String)> {
    let cl_type = t.dtype().cl_type();
    let dims = t.dims();
    vec![
        (format!("{name}_TYPE"), cl_type.to_string()),
        (format!("{name}_OFFSET"), t.first_element_offset().to_code()),
        (format!("{name}_VIEW_OFFSET"), t.view_offset().to_code()),
        (format!("{name}_LENGTH"), t.logical_size().to_code()),
        (format!("{name}_DIMS"), dims.len().to_code()),
        (format!("{name}_SIMPLE"), t.simple_layout().to_code()),
        (format!("TO_{name}_TYPE"), format!("convert_{cl_type}")),
        (
            format!("{name}_LAYOUT_{}", t.layout().name().to_ascii_uppercase()),
            "1".to_string(),
        ),
        (format!("{name}_SIZE"), dims.len().to_code()),
        (
            format!("{name}_SIZES"),
            vector_string(dims.iter().map(|d| d.v), 1),
        ),
        (
            format!("{name}_PITCHES"),
            vector_string(dims.iter().map(|d| d.pitch), 1),
        ),
        (
            format!("{name}_PAD_BEFORE"),
            vector_string(dims.iter().map(|d| d.pad.before), 0),
        ),
        (
            format!("{name}_PAD_AFTER"),
            vector_string(dims.iter().map(|d| d.pad.after), 0),
        ),
    ]
}

fn data_tensor_definitions(name: &str, t: &DataTensor) -> Vec<(String, String)> {
    let (x, y, f, r, b) = (t.x(), t.y(), t.feature(), t.roi(), t.batch());
    let mut defs = vec![
        (format!("{name}_SIZE_X"), x.v.to_code()),
        (format!("{name}_SIZE_Y"), y.v.to_code()),
        (format!("{name}_FEATURE_NUM"), f.v.to_code()),
        (format!("{name}_ROI_NUM"), r.v.to_code()),
        (format!("{name}_BATCH_NUM"), b.v.to_code()),
        (format!("{name}_X_PITCH"), x.pitch.to_code()),
        (format!("{name}_Y_PITCH"), y.pitch.to_code()),
        (format!("{name}_FEATURE_PITCH"), f.pitch.to_code()),
        (format!("{name}_ROI_PITCH"), r.pitch.to_code()),
        (format!("{name}_BATCH_PITCH"), b.pitch.to_code()),
        (format!("{name}_PAD_BEFORE_SIZE_X"), x.pad.before.to_code()),
        (format!("{name}_PAD_BEFORE_SIZE_Y"), y.pad.before.to_code()),
        (
            format!("{name}_PAD_BEFORE_FEATURE_NUM"),
            f.pad.before.to_code(),
        ),
        (
            format!("{name}_PAD_BEFORE_BATCH_NUM"),
            b.pad.before.to_code(),
        ),
        (format!("{name}_PAD_AFTER_SIZE_X"), x.pad.after.to_code()),
        (format!("{name}_PAD_AFTER_SIZE_Y"), y.pad.after.to_code()),
        (
            format!("{name}_PAD_AFTER_FEATURE_NUM"),
            f.pad.after.to_code(),
        ),
        (format!("{name}_PAD_AFTER_BATCH_NUM"), b.pad.after.to_code()),
    ];
    defs.extend(common_tensor_definitions(name, t));
    defs
}

fn weights_tensor_definitions(name: &str, t: &WeightsTensor) -> Vec<(String, String)> {
    let (x, y, i, o) = (t.x(), t.y(), t.ifm(), t.ofm());
    let mut defs = vec![
        (format!("{name}_SIZE_X"), x.v.to_code()),
        (format!("{name}_SIZE_Y"), y.v.to_code()),
        (format!("{name}_IFM_NUM"), i.v.to_code()),
        (format!("{name}_OFM_NUM"), o.v.to_code()),
        (format!("{name}_X_PITCH"), x.pitch.to_code()),
        (format!("{name}_Y_PITCH"), y.pitch.to_code()),
        (format!("{name}_IFM_PITCH"), i.pitch.to_code()),
        (format!("{name}_OFM_PITCH"), o.pitch.to_code()),
    ];
    defs.extend(common_tensor_definitions(name, t));
    defs
}

/// Ordered constant set. Later additions render after earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JitConstants {
    constants: Vec<JitConstant>,
}

impl JitConstants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_constant(&mut self, name: impl Into<String>, value: impl ToCode) -> &mut Self {
        self.constants.push(JitConstant::Simple {
            name: name.into(),
            value: value.to_code(),
        });
        self
    }

    pub fn add_tensor(&mut self, name: impl Into<String>, tensor: &DataTensor) -> &mut Self {
        self.constants.push(JitConstant::Data {
            name: name.into(),
            tensor: tensor.clone(),
        });
        self
    }

    pub fn add_weights(&mut self, name: impl Into<String>, tensor: &WeightsTensor) -> &mut Self {
        self.constants.push(JitConstant::Weights {
            name: name.into(),
            tensor: tensor.clone(),
        });
        self
    }

    pub fn add_size(&mut self, name: impl Into<String>, size: Size2) -> &mut Self {
        self.constants.push(JitConstant::Size {
            name: name.into(),
            size,
        });
        self
    }

    pub fn merge(&mut self, other: JitConstants) -> &mut Self {
        self.constants.extend(other.constants);
        self
    }

    pub fn remove(&mut self, name: &str) {
        self.constants.retain(|c| c.name() != name);
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    pub fn definitions(&self) -> Vec<(String, String)> {
        self.constants
            .iter()
            .flat_map(JitConstant::definitions)
            .collect()
    }

    /// Rendered value of a definition, searching expanded tensor and size constants too.
    pub fn value(&self, name: &str) -> Option<String> {
        self.definitions()
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.value(name).is_some()
    }
}

pub fn make_base_params_jit(params: &BaseParams) -> JitConstants {
    let mut fp16_used = params.output.dtype() == Datatype::F16;
    let mut int8_used = params.output.dtype() == Datatype::Int8;
    for input in &params.inputs {
        fp16_used |= input.dtype() == Datatype::F16;
        int8_used |= input.dtype() == Datatype::Int8;
    }
    let unit_type = if int8_used {
        "char"
    } else if fp16_used {
        "half"
    } else {
        "float"
    };

    let activation = format!("ACTIVATION_FUNCTION_{}", params.activation.as_str());
    let mut jit = JitConstants::new();
    jit.add_tensor("OUTPUT", &params.output)
        .add_constant("FP64_SUPPORTED", params.engine.fp64)
        .add_constant("FP16_SUPPORTED", params.engine.fp16)
        .add_constant("FP16_UNIT_USED", fp16_used)
        .add_constant("INT8_UNIT_USED", int8_used)
        .add_constant("UNIT_TYPE", unit_type)
        .add_constant("NL_M", params.activation_params.m)
        .add_constant("NL_N", params.activation_params.n)
        .add_constant(activation, "");
    for (i, input) in params.inputs.iter().enumerate() {
        jit.add_tensor(format!("INPUT{i}"), input);
    }
    jit
}

pub fn make_weight_bias_params_jit(params: &WeightBiasParams) -> JitConstants {
    let mut jit = make_base_params_jit(&params.base);
    jit.add_weights("FILTER", &params.weights)
        .add_constant("BIAS_TERM", !params.bias.is_empty());
    if let Some(bias) = params.bias.first() {
        let same_dims = bias.same_dims(&params.base.output);
        jit.add_tensor("BIAS", bias)
            .add_constant("BIAS_PER_OUTPUT", same_dims)
            .add_constant("BIAS_PER_OFM", !same_dims);
    }
    jit
}

/// Positions of batch, feature and folded yx in `tensor_friendly_global`.
pub fn make_tensor_friendly_jit(tensor: &DataTensor) -> JitConstants {
    let layout = tensor.layout();
    let mut b = layout.channel_index(DataChannel::Batch).unwrap_or(0);
    let mut f = layout.channel_index(DataChannel::Feature).unwrap_or(0);
    let x = match layout.channel_index(DataChannel::X) {
        Some(x) => {
            if b > x {
                b -= 1;
            }
            if f > x {
                f -= 1;
            }
            x
        }
        None => 2,
    };
    let mut jit = JitConstants::new();
    jit.add_constant("GWS_BATCH", b)
        .add_constant("GWS_FEATURE", f)
        .add_constant("GWS_YX", x);
    jit
}

/// Convolution constants. Inputs must be non-empty; callers validate first.
pub fn make_convolution_jit(params: &ConvolutionParams, dispatch: &DispatchData) -> JitConstants {
    let mut jit = make_weight_bias_params_jit(&params.weight_bias);
    let base = &params.weight_bias.base;
    let input = base
        .inputs
        .first()
        .cloned()
        .unwrap_or_else(|| base.output.clone());
    let shift = params.padding.x * input.x().pitch + params.padding.y * input.y().pitch;
    let offset_with_padding = input.first_element_offset().saturating_sub(shift);

    jit.add_size("STRIDE", params.stride)
        .add_size("PADDING", params.padding)
        .add_size("DILATION", params.dilation)
        .add_constant("FILTER_ARRAY_NUM", params.split)
        .add_constant("INPUT0_OFFSET_WITH_PADDING", offset_with_padding)
        .add_constant("DEPTHWISE_SEPARABLE_OPT", params.depthwise_separable_opt)
        .add_constant("QUANTIZATION_TERM", false);

    let weights_layout = params.weight_bias.weights.layout();
    if input.layout() == DataLayout::Yxfb && weights_layout == WeightsLayout::Yxio {
        let lws0 = dispatch.lws()[0].max(1);
        let batches_per_wi = dispatch.blocks.batches_per_work_item.max(1);
        let batch = base.output.batch().v;
        jit.add_constant("LOCAL_WORK_GROUP_SIZE", lws0)
            .add_constant("OFM_PER_WORK_ITEM", dispatch.blocks.ofm_per_work_item)
            .add_constant("BATCHES_PER_WORK_ITEM", batches_per_wi)
            .add_constant(
                "LOCAL_WORK_GROUPS_PER_SINGLE_BATCHES_ELEMENTS",
                (batch / batches_per_wi / lws0).max(1),
            )
            .add_constant(
                "WORK_ITEMS_PER_SINGLE_BATCHES_ELEMENTS",
                batch / batches_per_wi,
            );
    }
    jit
}

/// Kernel entry symbol: the layer id or template name plus a digest of the constants.
pub fn entry_point(
    template_name: &str,
    layer_id: &str,
    options: &OptionalParams,
    constants: &JitConstants,
) -> String {
    let stem = if options.meaningful_kernel_names && !layer_id.is_empty() {
        layer_id
    } else {
        template_name
    };
    let mut hash = fnv1a_bytes(fnv1a_init(), template_name.as_bytes());
    for (name, value) in constants.definitions() {
        hash = fnv1a_bytes(hash, name.as_bytes());
        hash = fnv1a_bytes(hash, b"=");
        hash = fnv1a_bytes(hash, value.as_bytes());
        hash = fnv1a_bytes(hash, b"\n");
    }
    format!("{}_{hash:016x}", stem.replace('.', "_"))
}

pub fn create_jit(template_name: &str, constants: &JitConstants, entry_point: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "// {}", "=".repeat(76));
    let _ = writeln!(out, "// {template_name}");
    let _ = writeln!(out, "// {entry_point}");
    let _ = writeln!(out, "// {}", "=".repeat(76));
    let _ = writeln!(out, "#define KERNEL(name) __kernel void {entry_point}");
    let _ = writeln!(out, "#define FUNC(name) _##name##_{entry_point}");
    let _ = writeln!(out, "#define FUNC_CALL(name) _##name##_{entry_point}");
    for (name, value) in constants.definitions() {
        let _ = writeln!(out, "#define {name} {value}");
    }
    out
}

pub fn kernel_string(
    db: &PrimitiveDb,
    template_name: &str,
    jit: String,
    entry_point: String,
    exe_mode: ExeMode,
) -> KernelResult<KernelString> {
    let source = db.get_unique(template_name)?.to_string();
    let options = format!("{} {}", exe_mode.build_options(), DEFAULT_BUILD_FLAGS)
        .trim()
        .to_string();
    Ok(KernelString {
        source,
        jit,
        entry_point,
        options,
        batch_compilation: true,
    })
}

/// Entry point, rendered jit and db source assembled into one launch.
pub fn kernel_launch(
    db: &PrimitiveDb,
    template_name: &str,
    layer_id: &str,
    options: &OptionalParams,
    constants: &JitConstants,
    dispatch: &DispatchData,
    arguments: Vec<ArgumentBinding>,
) -> KernelResult<KernelLaunch> {
    let entry = entry_point(template_name, layer_id, options, constants);
    let jit = create_jit(template_name, constants, &entry);
    let kernel = kernel_string(db, template_name, jit, entry, dispatch.exe_mode)?;
    Ok(KernelLaunch {
        kernel,
        work_groups: dispatch.work_groups,
        arguments,
    })
}
