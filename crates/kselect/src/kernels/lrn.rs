//! Local response normalization.

use crate::dispatch::{argument_bindings, DispatchData, KernelDescriptor, WorkGroups};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_base_params_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{KernelKind, LrnDivider, LrnMode, LrnParams, OperationParams, OptionalParams};
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::{DataLayout, Datatype};
use crate::variant::{AutoTune, KernelVariant};

use super::{fp16_used, kinds_match, simple_kernels_data};

pub const REF_NAME: &str = "lrn_gpu_ref";

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Lrn)
        .with(LrnRef)
        .build()
}

/// Odd window size covering `local_size`.
pub fn round_norm_size(local_size: usize) -> usize {
    (local_size / 2) * 2 + 1
}

fn lrn_jit(p: &LrnParams) -> JitConstants {
    let round_norm = round_norm_size(p.local_size);
    let elements = match p.mode {
        LrnMode::AcrossChannel => round_norm,
        LrnMode::WithinChannel => round_norm * round_norm,
    };

    let mut jit = make_base_params_jit(&p.base);
    jit.add_constant("ROUND_NORM_SIZE", round_norm)
        .add_constant("ROUND_NORM_HALF_SIZE", round_norm / 2)
        .add_constant("NUM_ELEMENTS_DIV", 1.0f32 / elements as f32)
        .add_constant("ALPHA", p.alpha)
        .add_constant("BETA", p.beta)
        .add_constant("NORM_K", p.k);
    if p.mode == LrnMode::AcrossChannel {
        jit.add_constant("ACROSS_MAPS", "");
    }
    jit
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LrnRef;

impl KernelVariant for LrnRef {
    fn name(&self) -> &'static str {
        REF_NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Lrn
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32)
            .enable_input_layout(DataLayout::Bfyx)
            .enable_output_layout(DataLayout::Bfyx)
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_batching()
            .enable_lrn_mode(LrnMode::WithinChannel)
            .enable_lrn_mode(LrnMode::AcrossChannel)
            .enable_lrn_kernel_divider(LrnDivider::Fixed);
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        kinds_match(params, options, KernelKind::Lrn)
            && params.as_lrn().is_some_and(|p| !p.base.inputs.is_empty())
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_lrn()?;
        let out = &p.base.output;
        let gws = [out.x().v, out.y().v, out.feature().v * out.batch().v];
        let groups = WorkGroups::with_optimal_local(gws);
        Some(DispatchData::new(groups, fp16_used(&p.base)))
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params.as_lrn().map(lrn_jit).unwrap_or_default()
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        simple_kernels_data(
            self,
            REF_NAME,
            params,
            options,
            ctx,
            tune,
            argument_bindings(1, false, false, false),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PrimitiveDb;
    use crate::jit::ToCode;
    use crate::params::BaseParams;
    use crate::priority::Priority;
    use crate::selector::SelectorConfig;
    use crate::tensor::DataTensor;

    fn lrn(mode: LrnMode, local_size: usize, layout: DataLayout) -> OperationParams {
        let t = DataTensor::from_extents(&[13, 13, 96, 2], Datatype::F32, layout);
        let base = BaseParams::new("norm1", vec![t.clone()], t);
        OperationParams::Lrn(LrnParams::new(base, mode, local_size))
    }

    #[test]
    fn window_rounds_to_odd() {
        assert_eq!(round_norm_size(5), 5);
        assert_eq!(round_norm_size(4), 5);
        assert_eq!(round_norm_size(1), 1);
    }

    #[test]
    fn element_count_depends_on_mode() {
        let within_params = lrn(LrnMode::WithinChannel, 3, DataLayout::Bfyx);
        let d = LrnRef.set_default(&within_params, AutoTune::UseDefault);
        let d = d.expect("lrn dispatch");
        assert_eq!(d.gws(), [13, 13, 192]);

        let within = LrnRef.jit_constants(&within_params, &d);
        assert_eq!(
            within.value("NUM_ELEMENTS_DIV"),
            Some((1.0f32 / 9.0).to_code())
        );
        assert!(!within.contains("ACROSS_MAPS"));

        let across_params = lrn(LrnMode::AcrossChannel, 3, DataLayout::Bfyx);
        let across = LrnRef.jit_constants(&across_params, &d);
        assert_eq!(
            across.value("NUM_ELEMENTS_DIV"),
            Some((1.0f32 / 3.0).to_code())
        );
        assert_eq!(across.value("ROUND_NORM_HALF_SIZE").as_deref(), Some("1"));
        assert!(across.contains("ACROSS_MAPS"));
    }

    #[test]
    fn only_bfyx_is_served() {
        let selector = selector().expect("lrn selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::Lrn);

        let bfyx = lrn(LrnMode::AcrossChannel, 5, DataLayout::Bfyx);
        let best = selector
            .get_best_kernels(&bfyx, &options, &ctx)
            .expect("bfyx lrn");
        assert_eq!(
            best[0].estimated_cost,
            Priority::DONT_USE_IF_HAVE_SOMETHING_ELSE
        );

        let yxfb = lrn(LrnMode::AcrossChannel, 5, DataLayout::Yxfb);
        let yxfb = selector
            .get_best_kernels(&yxfb, &options, &ctx)
            .expect("selection runs");
        assert!(yxfb.is_empty());
    }
}
