use kselect::dispatch::argument_bindings;
use kselect::jit::{kernel_launch, JitConstants};
use kselect::params::{ActivationParams, BaseParams};
use kselect::tuning::TuningTable;
use kselect::variant::tune_in_range;
use kselect::{
    AutoTune, CapabilityKey, DataLayout, DataTensor, Datatype, DispatchData, KernelDescriptor,
    KernelError, KernelKind, KernelResult, KernelSelector, KernelVariant, OperationParams,
    OptionalParams, PrimitiveDb, Priority, SelectionContext, SelectorConfig, SelectorError,
    WorkGroups,
};

const TEMPLATE: &str = "fixed_cost";

/// Activation variant with a fixed cost and a configurable number of tuning options.
struct Fixed {
    name: &'static str,
    cost: Priority,
    accept: bool,
    options: usize,
}

impl Fixed {
    fn new(name: &'static str, cost: Priority) -> Self {
        Self {
            name,
            cost,
            accept: true,
            options: 0,
        }
    }

    fn rejecting(mut self) -> Self {
        self.accept = false;
        self
    }

    fn with_options(mut self, options: usize) -> Self {
        self.options = options;
        self
    }
}

impl KernelVariant for Fixed {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Activation
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F32)
            .enable_all_input_layout()
            .enable_all_output_layout()
            .enable_batching();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        self.accept
            && params.kind() == KernelKind::Activation
            && options.kind == KernelKind::Activation
    }

    fn set_default(&self, params: &OperationParams, tune: AutoTune) -> Option<DispatchData> {
        let out = &params.as_activation()?.base.output;
        let gws = [out.x().v, out.y().v, out.feature().v * out.batch().v];
        let mut dispatch = DispatchData::new(WorkGroups::with_optimal_local(gws), false);
        dispatch.priority = self.cost;
        if let AutoTune::UseTunedOption(index) = tune {
            dispatch.blocks.block_width = index + 1;
        }
        Some(dispatch)
    }

    fn jit_constants(&self, _params: &OperationParams, dispatch: &DispatchData) -> JitConstants {
        let mut jit = JitConstants::new();
        jit.add_constant("VARIANT", self.name)
            .add_constant("BLOCK_WIDTH", dispatch.blocks.block_width);
        jit
    }

    fn auto_tune_options(&self) -> usize {
        self.options
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        if !tune_in_range(self, tune) || !self.validate(params, options) {
            return Ok(Vec::new());
        }
        let Some(dispatch) = self.set_default(params, tune) else {
            return Ok(Vec::new());
        };
        let jit = self.jit_constants(params, &dispatch);
        let arguments = argument_bindings(1, false, false, false);
        let launch = kernel_launch(
            ctx.db,
            TEMPLATE,
            params.layer_id(),
            options,
            &jit,
            &dispatch,
            arguments,
        )?;
        let mut descriptor = KernelDescriptor::new(launch, dispatch.priority);
        descriptor.auto_tune = tune;
        Ok(vec![descriptor])
    }
}

fn db() -> PrimitiveDb {
    let mut db = PrimitiveDb::new();
    db.insert(
        TEMPLATE,
        "KERNEL(fixed_cost)(const __global float* input, __global float* output) {}\n",
    );
    db
}

fn relu(layer: &str) -> OperationParams {
    let t = DataTensor::from_extents(&[8, 4, 2, 1], Datatype::F32, DataLayout::Bfyx);
    let base = BaseParams::new(layer, vec![t.clone()], t);
    OperationParams::Activation(ActivationParams::new(base))
}

fn options() -> OptionalParams {
    OptionalParams {
        meaningful_kernel_names: false,
        ..OptionalParams::new(KernelKind::Activation)
    }
}

fn selector(variants: Vec<Fixed>) -> KernelSelector {
    let builder = KernelSelector::builder(KernelKind::Activation);
    variants
        .into_iter()
        .fold(builder, |b, v| b.with(v))
        .build()
        .expect("activation selector")
}

fn winner(selector: &KernelSelector, config: &SelectorConfig) -> String {
    let db = db();
    let ctx = SelectionContext::new(&db, config);
    selector
        .select(&relu("relu1"), &options(), &ctx)
        .expect("a kernel is selected")
        .kernel_name
}

#[test]
fn equal_cost_keeps_first_registered() {
    for parallel in [false, true] {
        let config = SelectorConfig {
            parallel,
            ..SelectorConfig::default()
        };
        let ab = selector(vec![
            Fixed::new("a", Priority::FORCE_PRIORITY_4),
            Fixed::new("b", Priority::FORCE_PRIORITY_4),
        ]);
        assert_eq!(winner(&ab, &config), "a", "parallel={parallel}");

        let ba = selector(vec![
            Fixed::new("b", Priority::FORCE_PRIORITY_4),
            Fixed::new("a", Priority::FORCE_PRIORITY_4),
        ]);
        assert_eq!(winner(&ba, &config), "b", "parallel={parallel}");
    }
}

#[test]
fn lowest_cost_wins_in_any_order() {
    for parallel in [false, true] {
        let config = SelectorConfig {
            parallel,
            ..SelectorConfig::default()
        };
        let cheap_last = selector(vec![
            Fixed::new("slow", Priority::DONT_USE_IF_HAVE_SOMETHING_ELSE),
            Fixed::new("mid", Priority::FORCE_PRIORITY_7),
            Fixed::new("fast", Priority::FORCE_PRIORITY_2),
        ]);
        assert_eq!(winner(&cheap_last, &config), "fast");

        let cheap_first = selector(vec![
            Fixed::new("fast", Priority::FORCE_PRIORITY_2),
            Fixed::new("mid", Priority::FORCE_PRIORITY_7),
        ]);
        assert_eq!(winner(&cheap_first, &config), "fast");
    }
}

#[test]
fn rejected_variants_do_not_compete() {
    let s = selector(vec![
        Fixed::new("cheap", Priority::FORCE_PRIORITY_1).rejecting(),
        Fixed::new("fallback", Priority::DONT_USE_IF_HAVE_SOMETHING_ELSE),
    ]);
    assert_eq!(winner(&s, &SelectorConfig::default()), "fallback");
}

#[test]
fn forced_and_denied_names_override_cost() {
    let s = selector(vec![
        Fixed::new("fast", Priority::FORCE_PRIORITY_1),
        Fixed::new("slow", Priority::FORCE_PRIORITY_9),
    ]);

    let forced = SelectorConfig {
        force_kernels: vec!["slow".to_string()],
        ..SelectorConfig::default()
    };
    assert_eq!(winner(&s, &forced), "slow");

    let denied = SelectorConfig {
        deny_kernels: vec!["fast".to_string()],
        ..SelectorConfig::default()
    };
    assert_eq!(winner(&s, &denied), "slow");

    let both = SelectorConfig {
        force_kernels: vec!["fast".to_string()],
        deny_kernels: vec!["fast".to_string()],
        ..SelectorConfig::default()
    };
    assert_eq!(winner(&s, &both), "slow", "deny outranks force");
}

#[test]
fn nothing_eligible_is_an_error() {
    let only = Fixed::new("only", Priority::FORCE_PRIORITY_1).rejecting();
    let s = selector(vec![only]);
    let db = db();
    let config = SelectorConfig::default();
    let ctx = SelectionContext::new(&db, &config);
    let best = s
        .get_best_kernels(&relu("relu1"), &options(), &ctx)
        .expect("no error");
    assert!(best.is_empty());
    match s.select(&relu("relu1"), &options(), &ctx) {
        Err(SelectorError::NoEligibleKernel { kind, layer_id }) => {
            assert_eq!(kind, KernelKind::Activation);
            assert_eq!(layer_id, "relu1");
        }
        other => panic!("expected no eligible kernel, got {other:?}"),
    }
}

#[test]
fn builder_rejects_foreign_variants() {
    let err = KernelSelector::builder(KernelKind::Pooling)
        .with(Fixed::new("a", Priority::FORCE_PRIORITY_1))
        .build()
        .err()
        .expect("activation variant in a pooling selector");
    assert!(
        matches!(
            err,
            SelectorError::KindMismatch {
                name: "a",
                variant: KernelKind::Activation,
                selector: KernelKind::Pooling
            }
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn auto_tune_lists_every_option_by_cost() {
    let s = selector(vec![
        Fixed::new("tuned", Priority::FORCE_PRIORITY_3)
            .with_options(3),
        Fixed::new("plain", Priority::FORCE_PRIORITY_5),
        Fixed::new("denied", Priority::FORCE_PRIORITY_1)
            .with_options(2),
        Fixed::new("cheap", Priority::FORCE_PRIORITY_2),
    ]);
    let db = db();
    let config = SelectorConfig {
        deny_kernels: vec!["denied".to_string()],
        ..SelectorConfig::default()
    };
    let ctx = SelectionContext::new(&db, &config);

    let all = s
        .get_kernels_for_auto_tune(&relu("relu1"), &options(), &ctx)
        .expect("auto tune candidates");
    let listed: Vec<(&str, AutoTune)> = all
        .iter()
        .map(|d| (d.kernel_name.as_str(), d.auto_tune))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("cheap", AutoTune::UseDefault),
            ("tuned", AutoTune::UseTunedOption(0)),
            ("tuned", AutoTune::UseTunedOption(1)),
            ("tuned", AutoTune::UseTunedOption(2)),
            ("tuned", AutoTune::UseDefault),
            ("plain", AutoTune::UseDefault),
        ]
    );
    assert!(all
        .windows(2)
        .all(|pair| pair[0].estimated_cost <= pair[1].estimated_cost));
    assert!(all.iter().all(|d| d.layer_id == "relu1"));
}

#[test]
fn tuned_kernels_follow_the_requested_option() {
    let tuned = Fixed::new("tuned", Priority::FORCE_PRIORITY_3)
        .with_options(2);
    let s = selector(vec![tuned]);
    let db = db();
    let config = SelectorConfig::default();
    let ctx = SelectionContext::new(&db, &config);
    let params = relu("relu1");

    let second = s
        .get_tuned_kernels(
            &params,
            &options(),
            &ctx,
            "tuned",
            AutoTune::UseTunedOption(1),
        )
        .expect("tuned kernel");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].auto_tune, AutoTune::UseTunedOption(1));
    let launch = second[0].primary().expect("launch");
    assert!(launch.kernel.jit.contains("#define BLOCK_WIDTH 2"));

    let past_end = s
        .get_tuned_kernels(
            &params,
            &options(),
            &ctx,
            "tuned",
            AutoTune::UseTunedOption(2),
        )
        .expect("out of range is a rejection");
    assert!(past_end.is_empty());

    let missing = AutoTune::UseDefault;
    match s.get_tuned_kernels(&params, &options(), &ctx, "missing", missing) {
        Err(SelectorError::UnknownVariant { name, .. }) => assert_eq!(name, "missing"),
        other => panic!("expected unknown variant, got {other:?}"),
    }
}

#[test]
fn tuning_table_overrides_ranking() {
    let s = selector(vec![
        Fixed::new("fast", Priority::FORCE_PRIORITY_1),
        Fixed::new("tuned", Priority::FORCE_PRIORITY_9)
            .with_options(2),
    ]);
    let params = relu("relu1");
    let mut table = TuningTable::new();
    table.insert(&params, "tuned", 1);
    let config = SelectorConfig {
        tuning: Some(table),
        ..SelectorConfig::default()
    };
    let db = db();
    let ctx = SelectionContext::new(&db, &config);

    let chosen = s.select(&params, &options(), &ctx).expect("tuned kernel");
    assert_eq!(chosen.kernel_name, "tuned");
    assert_eq!(chosen.auto_tune, AutoTune::UseTunedOption(1));

    // Same shape under another layer id hits the same entry.
    let renamed = s
        .select(&relu("relu2"), &options(), &ctx)
        .expect("tuned kernel");
    assert_eq!(renamed.kernel_name, "tuned");
    assert_eq!(renamed.layer_id, "relu2");

    let mut stale = TuningTable::new();
    stale.insert(&params, "removed_variant", 0);
    let config = SelectorConfig {
        tuning: Some(stale),
        ..SelectorConfig::default()
    };
    let ctx = SelectionContext::new(&db, &config);
    let ranked = s.select(&params, &options(), &ctx).expect("ranked kernel");
    assert_eq!(ranked.kernel_name, "fast", "stale names fall back");
}

#[test]
fn denied_tuned_entry_falls_back_to_ranking() {
    let s = selector(vec![
        Fixed::new("fast", Priority::FORCE_PRIORITY_1),
        Fixed::new("tuned", Priority::FORCE_PRIORITY_9)
            .with_options(2),
    ]);
    let params = relu("relu1");
    let mut table = TuningTable::new();
    table.insert(&params, "tuned", 1);
    let config = SelectorConfig {
        deny_kernels: vec!["tuned".to_string()],
        tuning: Some(table),
        ..SelectorConfig::default()
    };
    let db = db();
    let ctx = SelectionContext::new(&db, &config);

    let chosen = s.select(&params, &options(), &ctx).expect("ranked kernel");
    assert_eq!(chosen.kernel_name, "fast");
    assert_eq!(chosen.auto_tune, AutoTune::UseDefault);
}

#[test]
fn missing_template_is_a_kernel_error() {
    let s = selector(vec![Fixed::new("a", Priority::FORCE_PRIORITY_1)]);
    let empty = PrimitiveDb::new();
    let config = SelectorConfig::default();
    let ctx = SelectionContext::new(&empty, &config);
    match s.select(&relu("relu1"), &options(), &ctx) {
        Err(SelectorError::Kernel(KernelError::SourceNotFound { name })) => {
            assert_eq!(name, TEMPLATE)
        }
        other => panic!("expected a missing source, got {other:?}"),
    }
}
