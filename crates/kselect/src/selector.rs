//! Per-family registries that rank variant results and pick a winner.

use std::sync::Arc;

use log::{debug, warn};

use crate::db::PrimitiveDb;
use crate::dispatch::KernelDescriptor;
use crate::env;
use crate::error::{KernelResult, SelectorError, SelectorResult};
use crate::params::{KernelKind, OperationParams, OptionalParams};
use crate::profiling;
use crate::tuning::TuningTable;
use crate::variant::{AutoTune, KernelVariant};

#[derive(Debug, Clone, Default)]
pub struct SelectorConfig {
    pub force_kernels: Vec<String>,
    pub deny_kernels: Vec<String>,
    pub parallel: bool,
    pub tuning: Option<TuningTable>,
}

impl SelectorConfig {
    pub fn from_env() -> SelectorResult<Self> {
        let tuning = match env::var(env::TUNING_FILE_VAR) {
            Some(path) => Some(TuningTable::load(path)?),
            None => None,
        };
        Ok(Self {
            force_kernels: env::name_list(env::FORCE_KERNELS_VAR),
            deny_kernels: env::name_list(env::DENY_KERNELS_VAR),
            parallel: env::flag(env::PARALLEL_VALIDATE_VAR),
            tuning,
        })
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.deny_kernels.iter().any(|n| n == name)
    }

    /// Forced unless also denied.
    pub fn is_forced(&self, name: &str) -> bool {
        !self.is_denied(name) && self.force_kernels.iter().any(|n| n == name)
    }
}

/// Everything a variant may consult while building descriptors.
#[derive(Clone, Copy)]
pub struct SelectionContext<'a> {
    pub db: &'a PrimitiveDb,
    pub config: &'a SelectorConfig,
    /// Target of the weights-reorder recursion.
    pub weights_reorder: Option<&'a KernelSelector>,
}

impl<'a> SelectionContext<'a> {
    pub fn new(db: &'a PrimitiveDb, config: &'a SelectorConfig) -> Self {
        Self {
            db,
            config,
            weights_reorder: None,
        }
    }

    pub fn with_weights_reorder(mut self, selector: &'a KernelSelector) -> Self {
        self.weights_reorder = Some(selector);
        self
    }
}

pub struct KernelSelector {
    kind: KernelKind,
    variants: Vec<Arc<dyn KernelVariant>>,
}

pub struct SelectorBuilder {
    kind: KernelKind,
    variants: Vec<Arc<dyn KernelVariant>>,
}

impl SelectorBuilder {
    pub fn with<V: KernelVariant + 'static>(mut self, variant: V) -> Self {
        self.variants.push(Arc::new(variant));
        self
    }

    pub fn with_shared(mut self, variant: Arc<dyn KernelVariant>) -> Self {
        self.variants.push(variant);
        self
    }

    pub fn build(self) -> SelectorResult<KernelSelector> {
        if let Some(wrong) = self.variants.iter().find(|v| v.kind() != self.kind) {
            return Err(SelectorError::KindMismatch {
                name: wrong.name(),
                variant: wrong.kind(),
                selector: self.kind,
            });
        }
        Ok(KernelSelector {
            kind: self.kind,
            variants: self.variants,
        })
    }
}

impl KernelSelector {
    pub fn builder(kind: KernelKind) -> SelectorBuilder {
        SelectorBuilder {
            kind,
            variants: Vec::new(),
        }
    }

    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    pub fn variants(&self) -> &[Arc<dyn KernelVariant>] {
        &self.variants
    }

    pub fn variant_names(&self) -> Vec<&'static str> {
        self.variants.iter().map(|v| v.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&Arc<dyn KernelVariant>> {
        self.variants.iter().find(|v| v.name() == name)
    }

    fn kinds_match(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        params.kind() == self.kind && options.kind == self.kind
    }

    pub fn get_best_kernels(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> SelectorResult<Vec<KernelDescriptor>> {
        Ok(self.best_kernels(params, options, ctx)?)
    }

    pub(crate) fn best_kernels(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        if !self.kinds_match(params, options) {
            return Ok(Vec::new());
        }

        if let Some(tuned) = self.offline_tuned(params, options, ctx)? {
            return Ok(tuned);
        }

        let require = params.key().merge(&options.key());
        let candidates: Vec<&Arc<dyn KernelVariant>> = self
            .variants
            .iter()
            .filter(|v| {
                if ctx.config.is_denied(v.name()) {
                    warn!("skipping denied kernel {}", v.name());
                    return false;
                }
                let supported = v.supported_key().support(&require);
                if !supported {
                    debug!("{}: capability key does not cover the request", v.name());
                }
                supported
            })
            .collect();

        let mut best: Option<(&'static str, KernelDescriptor)> = None;
        let mut consider = |variant: &Arc<dyn KernelVariant>,
                            result: KernelResult<Vec<KernelDescriptor>>|
         -> KernelResult<bool> {
            profiling::cache_event(profiling::SELECTOR_CANDIDATE);
            let Some(first) = result?.into_iter().next() else {
                debug!("{}: rejected", variant.name());
                return Ok(false);
            };
            if ctx.config.is_forced(variant.name()) {
                warn!("forcing kernel {}", variant.name());
                best = Some((variant.name(), first));
                return Ok(true);
            }
            debug!(
                "{}: accepted at cost {}",
                variant.name(),
                first.estimated_cost
            );
            let better = best
                .as_ref()
                .map(|(_, current)| first.estimated_cost.is_better_than(current.estimated_cost))
                .unwrap_or(true);
            if better {
                best = Some((variant.name(), first));
            }
            Ok(false)
        };

        if ctx.config.parallel {
            let results = evaluate_all(&candidates, params, options, ctx);
            for (variant, result) in candidates.iter().zip(results) {
                if consider(*variant, result)? {
                    break;
                }
            }
        } else {
            for variant in &candidates {
                if consider(*variant, variant.kernels_data(params, options, ctx))? {
                    break;
                }
            }
        }

        Ok(match best {
            Some((name, mut descriptor)) => {
                debug!("{} kernel for `{}`: {name}", self.kind, params.layer_id());
                descriptor.kernel_name = name.to_string();
                descriptor.layer_id = params.layer_id().to_string();
                vec![descriptor]
            }
            None => Vec::new(),
        })
    }

    fn offline_tuned(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> KernelResult<Option<Vec<KernelDescriptor>>> {
        let Some(entry) = ctx.config.tuning.as_ref().and_then(|t| t.lookup(params)) else {
            return Ok(None);
        };
        let Some(variant) = self.find(&entry.kernel_name) else {
            warn!(
                "tuning table names unknown {} kernel {}",
                self.kind, entry.kernel_name
            );
            return Ok(None);
        };
        if ctx.config.is_denied(variant.name()) {
            warn!(
                "tuning table names denied {} kernel {}",
                self.kind, entry.kernel_name
            );
            return Ok(None);
        }
        let kernels = variant.tuned_kernels_data(
            params,
            options,
            ctx,
            AutoTune::UseTunedOption(entry.index),
        )?;
        if kernels.is_empty() {
            return Ok(None);
        }
        Ok(Some(stamp(kernels, variant.name(), params.layer_id())))
    }

    pub fn get_tuned_kernels(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        kernel_name: &str,
        tune: AutoTune,
    ) -> SelectorResult<Vec<KernelDescriptor>> {
        let variant = self
            .find(kernel_name)
            .ok_or_else(|| SelectorError::UnknownVariant {
                kind: self.kind,
                name: kernel_name.to_string(),
            })?;
        if !self.kinds_match(params, options) {
            return Ok(Vec::new());
        }
        let kernels = variant.tuned_kernels_data(params, options, ctx, tune)?;
        Ok(stamp(kernels, variant.name(), params.layer_id()))
    }

    pub fn get_kernels_for_auto_tune(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> SelectorResult<Vec<KernelDescriptor>> {
        if !self.kinds_match(params, options) {
            return Ok(Vec::new());
        }
        let require = params.key().merge(&options.key());
        let mut out = Vec::new();
        for variant in &self.variants {
            if ctx.config.is_denied(variant.name()) || !variant.supported_key().support(&require) {
                continue;
            }
            let kernels = variant.kernels_data_for_auto_tune(params, options, ctx)?;
            out.extend(stamp(kernels, variant.name(), params.layer_id()));
        }
        // Stable, so equal costs keep registration and option order.
        out.sort_by(|a, b| {
            let (a, b) = (a.estimated_cost.value(), b.estimated_cost.value());
            a.total_cmp(&b)
        });
        Ok(out)
    }

    pub fn select(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
    ) -> SelectorResult<KernelDescriptor> {
        self.get_best_kernels(params, options, ctx)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                profiling::cache_event(profiling::SELECTOR_NO_ELIGIBLE);
                SelectorError::NoEligibleKernel {
                    kind: params.kind(),
                    layer_id: params.layer_id().to_string(),
                }
            })
    }
}

/// Every candidate's result, in registration order.
#[cfg(feature = "parallel")]
fn evaluate_all(
    candidates: &[&Arc<dyn KernelVariant>],
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
) -> Vec<KernelResult<Vec<KernelDescriptor>>> {
    use rayon::prelude::*;
    candidates
        .par_iter()
        .map(|v| v.kernels_data(params, options, ctx))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn evaluate_all(
    candidates: &[&Arc<dyn KernelVariant>],
    params: &OperationParams,
    options: &OptionalParams,
    ctx: &SelectionContext<'_>,
) -> Vec<KernelResult<Vec<KernelDescriptor>>> {
    candidates
        .iter()
        .map(|v| v.kernels_data(params, options, ctx))
        .collect()
}

fn stamp(mut kernels: Vec<KernelDescriptor>, name: &str, layer_id: &str) -> Vec<KernelDescriptor> {
    for kernel in &mut kernels {
        kernel.kernel_name = name.to_string();
        kernel.layer_id = layer_id.to_string();
    }
    kernels
}

/// One selector per family, the source db and the selection config.
pub struct SelectorSet {
    selectors: Vec<KernelSelector>,
    db: PrimitiveDb,
    config: SelectorConfig,
}

impl SelectorSet {
    pub fn new(selectors: Vec<KernelSelector>, db: PrimitiveDb, config: SelectorConfig) -> Self {
        Self {
            selectors,
            db,
            config,
        }
    }

    pub fn get(&self, kind: KernelKind) -> Option<&KernelSelector> {
        self.selectors.iter().find(|s| s.kind() == kind)
    }

    pub fn selectors(&self) -> &[KernelSelector] {
        &self.selectors
    }

    pub fn db(&self) -> &PrimitiveDb {
        &self.db
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SelectorConfig) {
        self.config = config;
    }

    pub fn context(&self) -> SelectionContext<'_> {
        let ctx = SelectionContext::new(&self.db, &self.config);
        match self.get(KernelKind::ReorderWeights) {
            Some(reorder) => ctx.with_weights_reorder(reorder),
            None => ctx,
        }
    }

    fn selector_for(&self, params: &OperationParams) -> Option<&KernelSelector> {
        self.get(params.kind())
    }

    pub fn get_best_kernels(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
    ) -> SelectorResult<Vec<KernelDescriptor>> {
        match self.selector_for(params) {
            Some(selector) => selector.get_best_kernels(params, options, &self.context()),
            None => Ok(Vec::new()),
        }
    }

    pub fn get_kernels_for_auto_tune(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
    ) -> SelectorResult<Vec<KernelDescriptor>> {
        match self.selector_for(params) {
            Some(selector) => {
                let ctx = self.context();
                selector.get_kernels_for_auto_tune(params, options, &ctx)
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn get_tuned_kernels(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        kernel_name: &str,
        tune: AutoTune,
    ) -> SelectorResult<Vec<KernelDescriptor>> {
        match self.selector_for(params) {
            Some(selector) => {
                let ctx = self.context();
                selector.get_tuned_kernels(params, options, &ctx, kernel_name, tune)
            }
            None => Err(SelectorError::UnknownVariant {
                kind: params.kind(),
                name: kernel_name.to_string(),
            }),
        }
    }

    pub fn select(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
    ) -> SelectorResult<KernelDescriptor> {
        match self.selector_for(params) {
            Some(selector) => selector.select(params, options, &self.context()),
            None => Err(SelectorError::NoEligibleKernel {
                kind: params.kind(),
                layer_id: params.layer_id().to_string(),
            }),
        }
    }
}
