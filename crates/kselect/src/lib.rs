pub mod db;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod hashing;
pub mod jit;
pub mod kernels;
pub mod key;
pub mod params;
pub mod priority;
pub mod profiling;
pub mod selector;
pub mod tensor;
pub mod tuning;
pub mod variant;
pub mod weights;

pub use db::PrimitiveDb;
pub use dispatch::{DispatchData, KernelDescriptor, KernelLaunch, KernelString, WorkGroups};
pub use error::{KernelError, KernelResult, SelectorError, SelectorResult};
pub use kernels::{default_selectors, default_selectors_with};
pub use key::CapabilityKey;
pub use params::{KernelKind, OperationParams, OptionalParams};
pub use priority::Priority;
pub use selector::{KernelSelector, SelectionContext, SelectorConfig, SelectorSet};
pub use tensor::{DataLayout, DataTensor, Datatype, WeightsLayout, WeightsTensor, WeightsType};
pub use variant::{AutoTune, KernelVariant};
