//! Built-in kernel variants, grouped by family.

pub mod activation;
pub mod concatenation;
pub mod convolution;
pub mod eltwise;
pub mod fully_connected;
pub mod lrn;
pub mod pooling;
pub mod reorder;
pub mod softmax;

use log::debug;

use crate::db::PrimitiveDb;
use crate::dispatch::{check_work_groups, ArgumentBinding, KernelDescriptor};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::kernel_launch;
use crate::params::{BaseParams, KernelKind, OperationParams, OptionalParams};
use crate::selector::{SelectionContext, SelectorConfig, SelectorSet};
use crate::variant::{tune_in_range, AutoTune, KernelVariant};

/// Template names a built-in variant may look up in the primitive db.
pub const BUILTIN_TEMPLATES: &[&str] = &[
    convolution::reference::NAME,
    convolution::gemm_like::TEMPLATE_FP16,
    convolution::gemm_like::TEMPLATE_FP32,
    convolution::os_iyx_osv16::NAME,
    convolution::f16_1x1::NAME,
    convolution::f16_depthwise::NAME,
    convolution::dw_3x3_opt::NAME,
    pooling::REF_NAME,
    pooling::AVERAGE_OPT_NAME,
    pooling::BLOCK_OPT_NAME,
    pooling::BLOCKED_NAME,
    fully_connected::REF_NAME,
    fully_connected::GEMM_NAME,
    fully_connected::BS_F_BSV16_B1_NAME,
    fully_connected::FB_IO_BLOCK_NAME,
    eltwise::REF_NAME,
    softmax::REF_NAME,
    softmax::BF_NAME,
    activation::REF_NAME,
    activation::OPT_NAME,
    concatenation::REF_NAME,
    lrn::REF_NAME,
    reorder::WEIGHTS_NAME,
    reorder::DATA_REF_NAME,
    reorder::DATA_FAST_B1_NAME,
];

/// Standard selectors, one per family, over the builtin db and an environment-free config.
pub fn default_selectors() -> SelectorResult<SelectorSet> {
    default_selectors_with(PrimitiveDb::builtin(), SelectorConfig::default())
}

pub fn default_selectors_with(
    db: PrimitiveDb,
    config: SelectorConfig,
) -> SelectorResult<SelectorSet> {
    let selectors = vec![
        convolution::selector()?,
        pooling::selector()?,
        fully_connected::selector()?,
        eltwise::selector()?,
        softmax::selector()?,
        activation::selector()?,
        concatenation::selector()?,
        lrn::selector()?,
        reorder::selector()?,
        reorder::weights_selector()?,
    ];
    Ok(SelectorSet::new(selectors, db, config))
}

pub(crate) fn kinds_match(
    params: &OperationParams,
    options: &OptionalParams,
    kind: KernelKind,
) -> bool {
    params.kind() == kind && options.kind == kind
}

pub(crate) fn fp16_used(base: &BaseParams) -> bool {
    use crate::tensor::Datatype;
    base.output.dtype() == Datatype::F16 || base.inputs.iter().any(|i| i.dtype() == Datatype::F16)
}

/// Inputs and output share dims and none of them carries pitches.
pub fn check_inputs_outputs_no_pitch_same_dims(base: &BaseParams) -> bool {
    let output_dense = !base.output.pitches_differ_from_logical_dims();
    output_dense
        && base
            .inputs
            .iter()
            .all(|i| i.same_dims(&base.output) && !i.pitches_differ_from_logical_dims())
}

/// Default dispatch, work-group check, jit and launch for already-adjusted params.
/// `None` is a rejection.
pub(crate) fn build_descriptor(
    variant: &dyn KernelVariant,
    template: &str,
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
    tune: AutoTune,
    arguments: Vec<ArgumentBinding>,
) -> KernelResult<Option<KernelDescriptor>> {
    let Some(dispatch) = variant.set_default(params, tune) else {
        return Ok(None);
    };
    if !check_work_groups(&dispatch.work_groups) {
        debug!(
            "{}: work groups {:?} do not tile",
            variant.name(),
            dispatch.work_groups
        );
        return Ok(None);
    }
    let jit = variant.jit_constants(params, &dispatch);
    let launch = kernel_launch(
        ctx.db,
        template,
        params.layer_id(),
        options,
        &jit,
        &dispatch,
        arguments,
    )?;
    let mut descriptor = KernelDescriptor::new(launch, dispatch.priority);
    descriptor.auto_tune = tune;
    Ok(Some(descriptor))
}

/// Validate-then-build flow for families without weights or input rewriting.
pub(crate) fn simple_kernels_data(
    variant: &dyn KernelVariant,
    template: &str,
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
    tune: AutoTune,
    arguments: Vec<ArgumentBinding>,
) -> KernelResult<Vec<KernelDescriptor>> {
    if !tune_in_range(variant, tune) || !variant.validate(params, options) {
        return Ok(Vec::new());
    }
    Ok(build_descriptor(variant, template, params, options, ctx, tune, arguments)?
        .into_iter()
        .collect())
}
