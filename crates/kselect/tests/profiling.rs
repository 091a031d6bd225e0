#![cfg(feature = "profiler")]

use kselect::params::{ActivationFunction, ActivationParams, BaseParams, NonLinearParams};
use kselect::profiling;
use kselect::{
    default_selectors, DataLayout, DataTensor, Datatype, KernelKind, OperationParams,
    OptionalParams,
};

fn relu(dtype: Datatype) -> OperationParams {
    let t = DataTensor::from_extents(&[8, 4, 2, 1], dtype, DataLayout::Bfyx);
    let base = BaseParams::new("relu", vec![t.clone()], t)
        .with_activation(ActivationFunction::Relu, NonLinearParams::default());
    OperationParams::Activation(ActivationParams::new(base))
}

// One test per binary: counters are process-wide.
#[test]
fn selection_counts_candidates_and_failures() {
    let set = default_selectors().expect("default selectors");
    profiling::reset();

    let activation = OptionalParams::new(KernelKind::Activation);
    set.select(&relu(Datatype::F32), &activation)
        .expect("relu kernel");
    let candidates = profiling::count(profiling::SELECTOR_CANDIDATE);
    assert!(candidates >= 1, "no candidates counted");
    assert_eq!(profiling::count(profiling::SELECTOR_NO_ELIGIBLE), 0);

    let pooling = OptionalParams::new(KernelKind::Pooling);
    set.select(&relu(Datatype::F32), &pooling)
        .expect_err("wrong option kind");
    assert_eq!(profiling::count(profiling::SELECTOR_NO_ELIGIBLE), 1);

    profiling::reset();
    assert!(profiling::snapshot().is_empty());
}
