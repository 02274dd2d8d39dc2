//! Profiling mode
//!
//! One invocation over a recording allocator with a profiler attached.
//! Produces a per-operator latency table and a per-allocation memory
//! report, both logged and returned.

use crate::error::{HarnessError, StructuralViolation};
use crate::ops::{OP_COUNT, register_ops};
use crate::run::check_version;
use micro_engine::{
    AllocationReport, Interpreter, LatencyReport, MicroProfiler, Model, OpResolver,
    RecordingAllocator, ResourceVariables,
};
use serde::Serialize;
use timing_bridge::TickSource;
use tracing::{error, info};

/// Resource variable slots reserved for the model
pub const RESOURCE_VARIABLE_COUNT: usize = 24;

/// Graph inputs the profiled model must declare
const EXPECTED_INPUTS: usize = 2;

/// Latency and memory for one profiled invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileReport {
    pub latency: LatencyReport,
    pub memory: AllocationReport,
}

/// Profile one invocation of `model_bytes` over `arena`, timed by `clock`
pub fn profile_memory_and_latency<C: TickSource>(
    arena: &mut [u8],
    model_bytes: &[u8],
    clock: C,
) -> Result<ProfileReport, HarnessError> {
    let model = Model::map(model_bytes);
    check_version(&model)?;

    let mut resolver = OpResolver::<OP_COUNT>::new();
    register_ops(&mut resolver)?;

    let mut allocator = RecordingAllocator::new(arena);
    let variables = ResourceVariables::create(&mut allocator, RESOURCE_VARIABLE_COUNT)
        .map_err(|e| {
            error!("Failed to reserve resource variables: {}", e);
            HarnessError::AllocationFailed(e)
        })?;

    let mut profiler = MicroProfiler::new(clock);
    let allocator = {
        let mut interpreter = Interpreter::new(model, &resolver, allocator)
            .with_resource_variables(variables)
            .with_profiler(&mut profiler);
        interpreter.allocate_tensors().map_err(|e| {
            error!("Failed to allocate tensors, arena is probably too small: {}", e);
            HarnessError::AllocationFailed(e)
        })?;

        let found = interpreter.inputs_size();
        if found != EXPECTED_INPUTS {
            return Err(StructuralViolation::UnexpectedInputCount {
                found,
                expected: EXPECTED_INPUTS,
            }
            .into());
        }

        interpreter.invoke().map_err(|source| {
            error!("Invoke failed: {}", source);
            HarnessError::InvocationFailed {
                iteration: 0,
                source,
            }
        })?;
        interpreter.into_allocator()
    };

    info!("Profiled {} operator events", profiler.num_events());
    profiler.log();
    profiler.log_ticks_per_tag_csv();
    allocator.print_allocations();

    Ok(ProfileReport {
        latency: profiler.ticks_per_tag(),
        memory: allocator.report(),
    })
}
