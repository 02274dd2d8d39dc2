//! Plain mode
//!
//! Map, configure, bind, fill, invoke. The first failure is returned
//! unchanged; nothing is retried.

use crate::config::HarnessConfig;
use crate::error::{HarnessError, StructuralViolation};
use crate::ops::{OP_COUNT, register_ops};
use micro_engine::{
    ArenaAllocator, DataType, EngineError, Interpreter, Model, OpResolver, SCHEMA_VERSION,
    SimpleArenaAllocator,
};
use serde::Serialize;
use tracing::{debug, error, info};

/// Outcome of a plain run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Successful invocations
    pub invocations: u32,
    /// Dims of output 0, empty when nothing was invoked
    pub output_dims: Vec<i32>,
    /// Values of output 0, empty when nothing was invoked
    pub output: Vec<i8>,
}

/// A bound graph that can be run
pub trait Invoke {
    fn invoke(&mut self) -> Result<(), EngineError>;
}

impl<A: ArenaAllocator> Invoke for Interpreter<'_, A> {
    fn invoke(&mut self) -> Result<(), EngineError> {
        Interpreter::invoke(self)
    }
}

/// Invoke `iterations` times, stopping at the first failure.
///
/// Returns the number of invocations; fewer than one iteration invokes
/// nothing.
pub fn invoke_iterations<I: Invoke + ?Sized>(
    graph: &mut I,
    iterations: i32,
) -> Result<u32, HarnessError> {
    let iterations = iterations.max(0) as u32;
    for iteration in 0..iterations {
        graph.invoke().map_err(|source| {
            error!("Invoke failed on iteration {}: {}", iteration, source);
            HarnessError::InvocationFailed { iteration, source }
        })?;
    }
    Ok(iterations)
}

/// Reject a model whose header does not carry the supported schema version
pub fn check_version(model: &Model<'_>) -> Result<(), StructuralViolation> {
    let found = model.version();
    if found != SCHEMA_VERSION {
        return Err(StructuralViolation::SchemaVersionMismatch {
            found,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Write the fill constants into the data and state inputs.
///
/// Both inputs must be int8. Input 0 must be `[1, 1, K]`; its K elements
/// get `input_fill`. Input 1 must have rank 2 or more; the first `dims[1]`
/// elements get `state_fill`.
pub fn fill_inputs<A: ArenaAllocator>(
    interpreter: &mut Interpreter<'_, A>,
    config: &HarnessConfig,
) -> Result<(), HarnessError> {
    let mut data = interpreter
        .input_mut(0)
        .ok_or(StructuralViolation::MissingTensor {
            role: "input",
            index: 0,
        })?;
    let dims = data.dims();
    if data.dtype() != DataType::Int8 {
        return Err(StructuralViolation::UnexpectedShape {
            index: 0,
            dims: dims.to_vec(),
            expected: "int8 elements",
        }
        .into());
    }
    if dims.len() != 3 || dims[0] != 1 || dims[1] != 1 {
        return Err(StructuralViolation::UnexpectedShape {
            index: 0,
            dims: dims.to_vec(),
            expected: "[1, 1, K]",
        }
        .into());
    }
    let k = dims[2].max(0) as usize;
    data.fill_i8(k, config.input_fill);

    let mut state = interpreter
        .input_mut(1)
        .ok_or(StructuralViolation::MissingTensor {
            role: "input",
            index: 1,
        })?;
    if state.dtype() != DataType::Int8 {
        return Err(StructuralViolation::UnexpectedShape {
            index: 1,
            dims: state.dims().to_vec(),
            expected: "int8 elements",
        }
        .into());
    }
    if state.rank() < 2 {
        return Err(StructuralViolation::UnexpectedShape {
            index: 1,
            dims: state.dims().to_vec(),
            expected: "rank 2 or more",
        }
        .into());
    }
    let n = state.dims()[1].max(0) as usize;
    state.fill_i8(n, config.state_fill);

    debug!("Filled {} data and {} state elements", k, n);
    Ok(())
}

/// Run the model in `model_bytes` over `arena`.
///
/// With `iterations == 1` output 0 is logged; larger counts only invoke.
pub fn run_model(
    arena: &mut [u8],
    model_bytes: &[u8],
    iterations: i32,
    config: &HarnessConfig,
) -> Result<RunReport, HarnessError> {
    let model = Model::map(model_bytes);
    check_version(&model)?;

    let mut resolver = OpResolver::<OP_COUNT>::new();
    register_ops(&mut resolver)?;

    let mut interpreter = Interpreter::new(model, &resolver, SimpleArenaAllocator::new(arena));
    interpreter.allocate_tensors().map_err(|e| {
        error!("Failed to allocate tensors, arena is probably too small: {}", e);
        HarnessError::AllocationFailed(e)
    })?;
    debug!("Arena in use: {} bytes", interpreter.arena_used_bytes());

    fill_inputs(&mut interpreter, config)?;

    let invocations = invoke_iterations(&mut interpreter, iterations)?;
    if invocations == 0 {
        return Ok(RunReport {
            invocations,
            output_dims: Vec::new(),
            output: Vec::new(),
        });
    }

    let output = interpreter
        .output(0)
        .ok_or(StructuralViolation::MissingTensor {
            role: "output",
            index: 0,
        })?;
    let report = RunReport {
        invocations,
        output_dims: output.dims().to_vec(),
        output: output.i8_values(),
    };

    if iterations == 1 {
        let shown = match config.output_preview {
            0 => report.output.len(),
            n => n.min(report.output.len()),
        };
        let values: Vec<String> = report.output[..shown].iter().map(|v| v.to_string()).collect();
        info!("output: {}", values.join(", "));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_data::EXAMPLE_MODEL;
    use crate::RUN_ARENA_SIZE;
    use micro_engine::{BuiltinOperator, ModelBuilder, QuantParams};
    use proptest::prelude::*;

    /// Succeeds until `fail_at`, counting every call
    struct Scripted {
        calls: u32,
        fail_at: Option<u32>,
    }

    impl Invoke for Scripted {
        fn invoke(&mut self) -> Result<(), EngineError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_at == Some(call) {
                return Err(EngineError::KernelFailure {
                    node: 0,
                    op: BuiltinOperator::Add,
                    reason: "scripted".to_string(),
                });
            }
            Ok(())
        }
    }

    fn arena() -> Vec<u8> {
        vec![0u8; RUN_ARENA_SIZE]
    }

    #[test]
    fn test_single_shot_output_shape() {
        let mut arena = arena();
        let report = run_model(&mut arena, EXAMPLE_MODEL, 1, &HarnessConfig::default()).unwrap();
        assert_eq!(report.invocations, 1);
        assert_eq!(report.output_dims, vec![1, 3]);
        assert_eq!(report.output.len(), 3);
    }

    #[test]
    fn test_iterated_run_counts_invocations() {
        let mut arena = arena();
        let report = run_model(&mut arena, EXAMPLE_MODEL, 5, &HarnessConfig::default()).unwrap();
        assert_eq!(report.invocations, 5);
    }

    #[test]
    fn test_non_positive_iterations_invoke_nothing() {
        let mut arena = arena();
        for iterations in [0, -3] {
            let report =
                run_model(&mut arena, EXAMPLE_MODEL, iterations, &HarnessConfig::default())
                    .unwrap();
            assert_eq!(report.invocations, 0);
            assert!(report.output.is_empty());
        }
    }

    #[test]
    fn test_repeated_runs_agree() {
        let mut arena = arena();
        let config = HarnessConfig::default();
        let first = run_model(&mut arena, EXAMPLE_MODEL, 1, &config).unwrap();
        let second = run_model(&mut arena, EXAMPLE_MODEL, 1, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_small_arena_fails_allocation() {
        let mut arena = vec![0u8; 1_000];
        let err = run_model(&mut arena, EXAMPLE_MODEL, 1, &HarnessConfig::default()).unwrap_err();
        assert!(matches!(err, HarnessError::AllocationFailed(_)));
        assert!(!err.is_unrecoverable());
    }

    #[test]
    fn test_version_mismatch_touches_nothing() {
        let bytes = micro_engine::example_lstm_model()
            .to_bytes(SCHEMA_VERSION + 1)
            .unwrap();
        let mut arena = vec![0xAAu8; RUN_ARENA_SIZE];
        let err = run_model(&mut arena, &bytes, 1, &HarnessConfig::default()).unwrap_err();
        assert!(err.is_unrecoverable());
        assert!(matches!(
            err,
            HarnessError::Unrecoverable(StructuralViolation::SchemaVersionMismatch { .. })
        ));
        assert!(arena.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_fill_lands_in_declared_spans() {
        let q = Some(QuantParams::default());
        let mut b = ModelBuilder::new("fill");
        let data = b.tensor("data", DataType::Int8, &[1, 1, 5], q);
        let state = b.tensor("state", DataType::Int8, &[1, 4, 2], q);
        b.inputs(&[data, state]);
        b.outputs(&[data]);
        let bytes = b.build(SCHEMA_VERSION).unwrap();

        let mut resolver = OpResolver::<OP_COUNT>::new();
        register_ops(&mut resolver).unwrap();
        let mut arena = arena();
        let mut interpreter =
            Interpreter::new(Model::map(&bytes), &resolver, SimpleArenaAllocator::new(&mut arena));
        interpreter.allocate_tensors().unwrap();
        fill_inputs(&mut interpreter, &HarnessConfig::default()).unwrap();

        assert_eq!(interpreter.input(0).unwrap().i8_values(), vec![3; 5]);
        assert_eq!(
            interpreter.input(1).unwrap().i8_values(),
            vec![1, 1, 1, 1, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_wrong_data_rank_is_unrecoverable() {
        let q = Some(QuantParams::default());
        let mut b = ModelBuilder::new("rank");
        let data = b.tensor("data", DataType::Int8, &[1, 40], q);
        let state = b.tensor("state", DataType::Int8, &[1, 80], q);
        b.inputs(&[data, state]);
        b.outputs(&[data]);
        let bytes = b.build(SCHEMA_VERSION).unwrap();

        let mut arena = arena();
        let err = run_model(&mut arena, &bytes, 1, &HarnessConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Unrecoverable(StructuralViolation::UnexpectedShape { index: 0, .. })
        ));
    }

    #[test]
    fn test_missing_state_input_is_unrecoverable() {
        let q = Some(QuantParams::default());
        let mut b = ModelBuilder::new("one input");
        let data = b.tensor("data", DataType::Int8, &[1, 1, 4], q);
        b.inputs(&[data]);
        b.outputs(&[data]);
        let bytes = b.build(SCHEMA_VERSION).unwrap();

        let mut arena = arena();
        let err = run_model(&mut arena, &bytes, 1, &HarnessConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Unrecoverable(StructuralViolation::MissingTensor { index: 1, .. })
        ));
    }

    #[test]
    fn test_int32_state_input_is_unrecoverable() {
        let q = Some(QuantParams::default());
        let mut b = ModelBuilder::new("int32 state");
        let data = b.tensor("data", DataType::Int8, &[1, 1, 4], q);
        let state = b.tensor("state", DataType::Int32, &[1, 8], None);
        b.inputs(&[data, state]);
        b.outputs(&[data]);
        let bytes = b.build(SCHEMA_VERSION).unwrap();

        let mut arena = arena();
        let err = run_model(&mut arena, &bytes, 1, &HarnessConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::Unrecoverable(StructuralViolation::UnexpectedShape { index: 1, .. })
        ));
    }

    #[test]
    fn test_unsizable_tensor_fails_allocation() {
        let q = Some(QuantParams::default());
        let mut b = ModelBuilder::new("huge");
        let data = b.tensor("data", DataType::Int8, &[1, 1, 4], q);
        let state = b.tensor("state", DataType::Int8, &[1, 4], q);
        b.tensor("unused", DataType::Int8, &[65536, 65536, 65536, 65536], q);
        b.inputs(&[data, state]);
        b.outputs(&[data]);
        let bytes = b.build(SCHEMA_VERSION).unwrap();

        let mut arena = arena();
        let err = run_model(&mut arena, &bytes, 1, &HarnessConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::AllocationFailed(EngineError::InvalidGraph(_))
        ));
        assert!(!err.is_unrecoverable());
    }

    #[test]
    fn test_first_failure_stops_the_loop() {
        let mut graph = Scripted {
            calls: 0,
            fail_at: Some(3),
        };
        let err = invoke_iterations(&mut graph, 10).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::InvocationFailed { iteration: 3, .. }
        ));
        assert_eq!(graph.calls, 4);
    }

    proptest! {
        #[test]
        fn prop_invokes_exactly_n_times(n in 0i32..200) {
            let mut graph = Scripted { calls: 0, fail_at: None };
            prop_assert_eq!(invoke_iterations(&mut graph, n).unwrap(), n as u32);
            prop_assert_eq!(graph.calls, n as u32);
        }
    }
}
