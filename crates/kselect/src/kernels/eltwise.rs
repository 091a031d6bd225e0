//! Element-wise expression chains.

use crate::dispatch::{
    argument_bindings, tensor_friendly_global, DispatchData, KernelDescriptor, WorkGroups,
};
use crate::error::{KernelResult, SelectorResult};
use crate::jit::{make_base_params_jit, make_tensor_friendly_jit, JitConstants};
use crate::key::CapabilityKey;
use crate::params::{
    EltwiseInput, EltwiseMode, EltwiseParams, KernelKind, OperationParams, OptionalParams,
};
use crate::selector::{KernelSelector, SelectionContext};
use crate::tensor::Datatype;
use crate::variant::{AutoTune, KernelVariant};

use super::{check_inputs_outputs_no_pitch_same_dims, fp16_used, kinds_match, simple_kernels_data};

pub const REF_NAME: &str = "eltwise_gpu_ref";

const CAST: &str = "(UNIT_TYPE)";

pub fn selector() -> SelectorResult<KernelSelector> {
    KernelSelector::builder(KernelKind::Eltwise)
        .with(EltwiseRef)
        .build()
}

/// Operation arity, operand indices and non-empty inputs and operations.
pub fn validate_eltwise(params: &OperationParams, options: &OptionalParams) -> bool {
    if !kinds_match(params, options, KernelKind::Eltwise) {
        return false;
    }
    let Some(p) = params.as_eltwise() else {
        return false;
    };
    if p.base.inputs.is_empty() || p.operations.is_empty() {
        return false;
    }
    p.operations.iter().all(|op| {
        op.inputs.len() == op.mode.arity()
            && op.inputs.iter().all(|input| match input {
                EltwiseInput::Buffer(index) => *index < p.base.inputs.len(),
                EltwiseInput::Scalar(_) => true,
            })
    })
}

fn operation_expression(mode: EltwiseMode, a: &str, b: &str) -> String {
    match mode {
        EltwiseMode::Add => format!("{a} + {b}"),
        EltwiseMode::Sub => format!("{a} - {b}"),
        EltwiseMode::Mul => format!("{a} * {b}"),
        EltwiseMode::Div => format!("{a} / {b}"),
        EltwiseMode::Modulu => format!("{a} % {b}"),
        EltwiseMode::Min => format!("{CAST}fmin({a}, {b})"),
        EltwiseMode::Max => format!("{CAST}fmax({a}, {b})"),
        EltwiseMode::Pow => format!("{CAST}pow({a}, {b})"),
        EltwiseMode::Sqrt => format!("{CAST}sqrt({a})"),
        EltwiseMode::Rsqrt => format!("{CAST}1/sqrt({a})"),
        EltwiseMode::Assign => a.to_string(),
    }
}

pub fn eltwise_jit(params: &EltwiseParams) -> JitConstants {
    let mut jit = make_base_params_jit(&params.base);

    let decls: String = params
        .base
        .inputs
        .iter()
        .enumerate()
        .map(|(i, input)| format!("const __global {}* input{i}, ", input.dtype().cl_type()))
        .collect();
    let no_pitch = check_inputs_outputs_no_pitch_same_dims(&params.base);
    jit.add_constant("INPUTS_DECLS", decls)
        .add_constant("INPUTS_COUNT", params.base.inputs.len())
        .add_constant("ELTWISE_LAYOUT_BASED", params.layout_based)
        .add_constant("ELTWISE_NO_PITCH_SAME_DIMS", no_pitch);

    let mut do_eltwise = String::new();
    for (op_index, op) in params.operations.iter().enumerate() {
        for (input_index, input) in op.inputs.iter().enumerate() {
            let name = format!("INPUT_{op_index}_{input_index}");
            match input {
                EltwiseInput::Scalar(value) => {
                    jit.add_constant(name, *value);
                }
                EltwiseInput::Buffer(buffer) => {
                    jit.add_constant(name, format!("input{buffer}[GET_INDEX(INPUT, {buffer})]"));
                }
            }
        }
        let a = format!("{CAST}INPUT_{op_index}_0");
        let b = format!("{CAST}INPUT_{op_index}_1");
        let op_name = format!("OPERATION{op_index}");
        let expression = operation_expression(op.mode, &a, &b);
        jit.add_constant(
            op_name.as_str(),
            format!("UNIT_TYPE tmp{op_index} = {expression}"),
        );
        do_eltwise.push_str(&format!("\\\n\t{op_name};"));
    }
    let last = params.operations.len().saturating_sub(1);
    do_eltwise.push_str(&format!("\\\n\tres = tmp{last};"));
    jit.add_constant("DO_ELTWISE", do_eltwise);

    if params.layout_based {
        if let Some(input) = params.base.inputs.first() {
            jit.merge(make_tensor_friendly_jit(input));
        }
    }
    jit
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EltwiseRef;

impl KernelVariant for EltwiseRef {
    fn name(&self) -> &'static str {
        REF_NAME
    }

    fn kind(&self) -> KernelKind {
        KernelKind::Eltwise
    }

    fn supported_key(&self) -> CapabilityKey {
        let mut k = CapabilityKey::new();
        k.enable_input_data_type(Datatype::F16)
            .enable_input_data_type(Datatype::F32)
            .enable_output_data_type(Datatype::F16)
            .enable_output_data_type(Datatype::F32)
            .enable_all_input_layout()
            .enable_all_output_layout()
            .enable_tensor_offset()
            .enable_tensor_pitches()
            .enable_batching()
            .enable_all_eltwise_modes();
        k
    }

    fn validate(&self, params: &OperationParams, options: &OptionalParams) -> bool {
        validate_eltwise(params, options)
    }

    fn set_default(&self, params: &OperationParams, _tune: AutoTune) -> Option<DispatchData> {
        let p = params.as_eltwise()?;
        let out = &p.base.output;
        let gws = match p.base.inputs.first() {
            Some(input) if p.layout_based => tensor_friendly_global(input),
            _ => [out.x().v, out.y().v, out.feature().v * out.batch().v],
        };
        let groups = WorkGroups::with_optimal_local(gws);
        Some(DispatchData::new(groups, fp16_used(&p.base)))
    }

    fn jit_constants(&self, params: &OperationParams, _dispatch: &DispatchData) -> JitConstants {
        params.as_eltwise().map(eltwise_jit).unwrap_or_default()
    }

    fn tuned_kernels_data(
        &self,
        params: &OperationParams,
        options: &OptionalParams,
        ctx: &SelectionContext<'_>,
        tune: AutoTune,
    ) -> KernelResult<Vec<KernelDescriptor>> {
        let inputs = params.as_eltwise().map_or(0, |p| p.base.inputs.len());
        simple_kernels_data(
            self,
            REF_NAME,
            params,
            options,
            ctx,
            tune,
            argument_bindings(inputs, false, false, false),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PrimitiveDb;
    use crate::dispatch::ArgumentKind;
    use crate::params::EltwiseInput::{Buffer, Scalar};
    use crate::params::{BaseParams, EltwiseOperation};
    use crate::selector::SelectorConfig;
    use crate::tensor::{DataLayout, DataTensor};

    fn sum(operations: Vec<EltwiseOperation>) -> EltwiseParams {
        let t = DataTensor::from_extents(&[6, 4, 3, 2], Datatype::F32, DataLayout::Bfyx);
        let base = BaseParams::new("sum", vec![t.clone(), t.clone()], t);
        EltwiseParams::new(base, operations)
    }

    fn add() -> EltwiseOperation {
        EltwiseOperation::new(EltwiseMode::Add, vec![Buffer(0), Buffer(1)])
    }

    #[test]
    fn arity_and_indices_are_checked() {
        let options = OptionalParams::new(KernelKind::Eltwise);
        let eltwise = |operations| OperationParams::Eltwise(sum(operations));
        assert!(validate_eltwise(&eltwise(vec![add()]), &options));

        let short = EltwiseOperation::new(EltwiseMode::Add, vec![Buffer(0)]);
        assert!(!validate_eltwise(&eltwise(vec![short]), &options));

        let out_of_range = EltwiseOperation::new(EltwiseMode::Sqrt, vec![Buffer(2)]);
        assert!(!validate_eltwise(&eltwise(vec![out_of_range]), &options));

        assert!(!validate_eltwise(&eltwise(Vec::new()), &options));
    }

    #[test]
    fn chain_renders_every_operation() {
        let ops = vec![
            EltwiseOperation::new(EltwiseMode::Mul, vec![Buffer(0), Scalar(2.0)]),
            EltwiseOperation::new(EltwiseMode::Max, vec![Buffer(1), Buffer(0)]),
        ];
        let jit = eltwise_jit(&sum(ops));
        assert_eq!(jit.value("INPUTS_COUNT").as_deref(), Some("2"));
        assert_eq!(
            jit.value("OPERATION0").as_deref(),
            Some("UNIT_TYPE tmp0 = (UNIT_TYPE)INPUT_0_0 * (UNIT_TYPE)INPUT_0_1")
        );
        assert_eq!(
            jit.value("OPERATION1").as_deref(),
            Some("UNIT_TYPE tmp1 = (UNIT_TYPE)fmax((UNIT_TYPE)INPUT_1_0, (UNIT_TYPE)INPUT_1_1)")
        );
        assert_eq!(
            jit.value("INPUT_1_0").as_deref(),
            Some("input1[GET_INDEX(INPUT, 1)]")
        );
        let chain = jit.value("DO_ELTWISE").expect("chain");
        assert!(chain.ends_with("res = tmp1;"), "{chain}");
    }

    #[test]
    fn reference_binds_every_input() {
        let selector = selector().expect("eltwise selector");
        let db = PrimitiveDb::builtin();
        let config = SelectorConfig::default();
        let ctx = SelectionContext::new(&db, &config);
        let options = OptionalParams::new(KernelKind::Eltwise);
        let params = OperationParams::Eltwise(sum(vec![add()]));

        let best = selector
            .get_best_kernels(&params, &options, &ctx)
            .expect("selection succeeds");
        let launch = best[0].primary().expect("launch");
        assert_eq!(launch.work_groups.global, [6, 4, 6]);
        let inputs = launch
            .arguments
            .iter()
            .filter(|a| a.kind == ArgumentKind::Input)
            .count();
        assert_eq!(inputs, 2);
    }

    #[test]
    fn layout_based_uses_friendly_sizes() {
        let mut p = sum(vec![add()]);
        p.layout_based = true;
        let params = OperationParams::Eltwise(p);
        let d = EltwiseRef
            .set_default(&params, AutoTune::UseDefault)
            .expect("eltwise");
        assert_eq!(d.gws(), [24, 3, 2]);
        let jit = EltwiseRef.jit_constants(&params, &d);
        assert_eq!(jit.value("GWS_YX").as_deref(), Some("0"));
        assert_eq!(jit.value("GWS_FEATURE").as_deref(), Some("1"));
    }
}
