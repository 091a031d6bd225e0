//! Launch geometry, argument bindings and the descriptors handed back to callers.

use serde::{Deserialize, Serialize};

use crate::priority::Priority;
use crate::tensor::{DataChannel, DataTensor};
use crate::variant::AutoTune;
use crate::weights::WeightsReorderSpec;

const LWS_PREFERENCES: [usize; 17] = [
    256, 224, 192, 160, 128, 96, 64, 32, 16, 8, 7, 6, 5, 4, 3, 2, 1,
];
const MAX_WORK_GROUP_SIZE: usize = 256;

/// Local size that divides `global` in every dimension with a product of at most 256.
pub fn optimal_local_work_size(global: [usize; 3]) -> [usize; 3] {
    let mut local = [1usize; 3];
    let mut chosen = 1usize;
    for (i, g) in global.iter().enumerate() {
        let rest = MAX_WORK_GROUP_SIZE / chosen;
        let pick = LWS_PREFERENCES
            .iter()
            .copied()
            .find(|p| *p <= rest && *g != 0 && g % p == 0)
            .unwrap_or(1);
        local[i] = pick;
        chosen *= pick;
    }
    local
}

/// Largest `lws <= min(global, 32)` dividing `global`.
pub fn divisor_lws(global: usize) -> usize {
    let mut lws = global.clamp(1, 32);
    while lws > 1 && global % lws != 0 {
        lws -= 1;
    }
    lws
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkGroups {
    pub global: [usize; 3],
    pub local: [usize; 3],
}

impl WorkGroups {
    pub fn new(global: [usize; 3], local: [usize; 3]) -> Self {
        Self { global, local }
    }

    pub fn with_optimal_local(global: [usize; 3]) -> Self {
        Self {
            global,
            local: optimal_local_work_size(global),
        }
    }

    pub fn local_size(&self) -> usize {
        self.local.iter().product()
    }
}

impl Default for WorkGroups {
    fn default() -> Self {
        Self {
            global: [1; 3],
            local: [1; 3],
        }
    }
}

/// Every size nonzero and every local size divides its global size.
pub fn check_work_groups(groups: &WorkGroups) -> bool {
    groups
        .global
        .iter()
        .zip(groups.local.iter())
        .all(|(g, l)| *g != 0 && *l != 0 && g % l == 0)
}

/// Global sizes walking the tensor's own dim order, with Y folded into the dim before it.
/// Dims past the third fold into the last slot.
pub fn tensor_friendly_global(tensor: &DataTensor) -> [usize; 3] {
    let y = tensor.layout().channel_index(DataChannel::Y);
    let mut sizes: Vec<usize> = Vec::with_capacity(4);
    for (i, dim) in tensor.dims().iter().enumerate() {
        match sizes.last_mut() {
            Some(last) if y == Some(i) => *last *= dim.v,
            _ => sizes.push(dim.v),
        }
    }
    let mut global = [1usize; 3];
    for (i, v) in sizes.into_iter().enumerate() {
        global[i.min(2)] *= v;
    }
    global
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub enum ExeMode {
    #[default]
    RoundRobin,
    AgeBased,
}

impl ExeMode {
    pub fn build_options(self) -> &'static str {
        match self {
            ExeMode::RoundRobin => "",
            ExeMode::AgeBased => "-cl-no-subgroup-ifp",
        }
    }
}

pub const DEFAULT_BUILD_FLAGS: &str = "-cl-unsafe-math-optimizations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgumentKind {
    Input,
    Output,
    Weights,
    Bias,
    Split,
    Slope,
    Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgumentBinding {
    pub kind: ArgumentKind,
    pub index: u32,
}

impl ArgumentBinding {
    pub fn new(kind: ArgumentKind, index: u32) -> Self {
        Self { kind, index }
    }
}

/// Inputs, then output, then the optional weights, bias and split bindings.
pub fn argument_bindings(
    inputs: usize,
    weights: bool,
    bias: bool,
    split: bool,
) -> Vec<ArgumentBinding> {
    let mut args: Vec<ArgumentBinding> = (0..inputs)
        .map(|i| ArgumentBinding::new(ArgumentKind::Input, i as u32))
        .collect();
    args.push(ArgumentBinding::new(ArgumentKind::Output, 0));
    if weights {
        args.push(ArgumentBinding::new(ArgumentKind::Weights, 0));
    }
    if bias {
        args.push(ArgumentBinding::new(ArgumentKind::Bias, 0));
    }
    if split {
        args.push(ArgumentBinding::new(ArgumentKind::Split, 0));
    }
    args
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelString {
    pub source: String,
    pub jit: String,
    pub entry_point: String,
    pub options: String,
    pub batch_compilation: bool,
}

impl KernelString {
    /// Jit block followed by the template body, as handed to the device compiler.
    pub fn full_source(&self) -> String {
        let mut out = String::with_capacity(self.jit.len() + self.source.len());
        out.push_str(&self.jit);
        out.push_str(&self.source);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelLaunch {
    pub kernel: KernelString,
    pub work_groups: WorkGroups,
    pub arguments: Vec<ArgumentBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub kernels: Vec<KernelLaunch>,
    pub estimated_cost: Priority,
    pub weights_reorder: Option<WeightsReorderSpec>,
    pub reorder_input: bool,
    pub auto_tune: AutoTune,
    pub kernel_name: String,
    pub layer_id: String,
}

impl KernelDescriptor {
    pub fn new(launch: KernelLaunch, estimated_cost: Priority) -> Self {
        Self {
            kernels: vec![launch],
            estimated_cost,
            weights_reorder: None,
            reorder_input: false,
            auto_tune: AutoTune::UseDefault,
            kernel_name: String::new(),
            layer_id: String::new(),
        }
    }

    pub fn primary(&self) -> Option<&KernelLaunch> {
        self.kernels.first()
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct GemmConfig {
    pub m: usize,
    pub k: usize,
    pub n: usize,
    pub dx: usize,
    pub dy: usize,
}

/// Blocking parameters shared by the tiled variants. Unused fields stay zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct BlockConfig {
    pub block_width: usize,
    pub block_height: usize,
    pub prefetch: usize,
    pub input_block_array_size: usize,
    pub input_block_width: usize,
    pub leftovers: usize,
    pub ofm_per_work_item: usize,
    pub batches_per_work_item: usize,
    pub items_num: usize,
    pub data_sets_count: usize,
    pub data_set_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispatchData {
    pub work_groups: WorkGroups,
    pub fp16_unit_used: bool,
    pub priority: Priority,
    pub exe_mode: ExeMode,
    pub blocks: BlockConfig,
    pub gemm: Option<GemmConfig>,
}

impl DispatchData {
    pub fn new(work_groups: WorkGroups, fp16_unit_used: bool) -> Self {
        Self {
            work_groups,
            fp16_unit_used,
            priority: Priority::DONT_USE_IF_HAVE_SOMETHING_ELSE,
            exe_mode: ExeMode::RoundRobin,
            blocks: BlockConfig::default(),
            gemm: None,
        }
    }

    pub fn gws(&self) -> [usize; 3] {
        self.work_groups.global
    }

    pub fn lws(&self) -> [usize; 3] {
        self.work_groups.local
    }
}
