//! Graph interpreter
//!
//! Binds a mapped model to an operator registry and an arena allocator,
//! then evaluates nodes in order. Tensor storage is planned once, in
//! [`Interpreter::allocate_tensors`]; every later call reuses it.

use crate::allocator::{AllocationTag, ArenaAllocator};
use crate::kernels::{self, Inputs, Node};
use crate::model::{Model, ModelDef};
use crate::profiler::Profiler;
use crate::resolver::OpLookup;
use crate::resource::ResourceVariables;
use crate::tensor::{BoundTensor, Storage, TensorView, TensorViewMut};
use crate::EngineError;
use tracing::{debug, error};

/// Arena bytes accounted per tensor descriptor
const TENSOR_METADATA_BYTES: usize = 32;
/// Arena bytes accounted per quantized tensor
const QUANTIZATION_BYTES: usize = 12;
/// Arena bytes accounted per node and its registration
const NODE_BYTES: usize = 48;
/// Alignment of tensor storage
const TENSOR_ALIGN: usize = 16;

/// Bound graph state, built by `allocate_tensors`
struct Graph {
    tensors: Vec<BoundTensor>,
    nodes: Vec<Node>,
    buffers: Vec<Vec<u8>>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
}

/// Executes one model over one arena
pub struct Interpreter<'a, A: ArenaAllocator> {
    model: Model<'a>,
    resolver: &'a dyn OpLookup,
    allocator: A,
    profiler: Option<&'a mut dyn Profiler>,
    resource_variables: Option<ResourceVariables>,
    graph: Option<Graph>,
    invocations: u32,
}

impl<'a, A: ArenaAllocator> Interpreter<'a, A> {
    /// Create an interpreter. Nothing is decoded or allocated yet.
    pub fn new(model: Model<'a>, resolver: &'a dyn OpLookup, allocator: A) -> Self {
        Self {
            model,
            resolver,
            allocator,
            profiler: None,
            resource_variables: None,
            graph: None,
            invocations: 0,
        }
    }

    /// Attach a resource variable table created from the same arena
    pub fn with_resource_variables(mut self, variables: ResourceVariables) -> Self {
        self.resource_variables = Some(variables);
        self
    }

    /// Wrap every node evaluation in a profiler event
    pub fn with_profiler(mut self, profiler: &'a mut dyn Profiler) -> Self {
        self.profiler = Some(profiler);
        self
    }

    /// Decode the model, check it against the registry and plan all tensors.
    ///
    /// Calling it again after success does nothing.
    pub fn allocate_tensors(&mut self) -> Result<(), EngineError> {
        if self.graph.is_some() {
            return Ok(());
        }

        let def = self.model.decode()?;
        validate(&def)?;
        for op in def.operator_kinds() {
            if !self.resolver.find(op) {
                error!("Didn't find op for builtin opcode '{}'", op);
                return Err(EngineError::UnregisteredOperator(op));
            }
        }

        let mut tensors: Vec<BoundTensor> = def.tensors.iter().map(BoundTensor::from_def).collect();
        let nodes: Vec<Node> = def
            .operators
            .iter()
            .map(|op| Node {
                op: op.op,
                inputs: op
                    .inputs
                    .iter()
                    .map(|&i| if i < 0 { None } else { Some(i as usize) })
                    .collect(),
                outputs: op.outputs.iter().map(|&o| o as usize).collect(),
                options: op.options.clone(),
            })
            .collect();

        self.allocator.allocate_persistent(
            tensors.len() * TENSOR_METADATA_BYTES,
            8,
            AllocationTag::TensorMetadata,
        )?;
        let quantized = def.tensors.iter().filter(|t| t.quant.is_some()).count();
        if quantized > 0 {
            self.allocator.allocate_persistent(
                quantized * QUANTIZATION_BYTES,
                4,
                AllocationTag::QuantizationData,
            )?;
        }
        self.allocator.allocate_persistent(
            nodes.len() * NODE_BYTES,
            8,
            AllocationTag::NodeAndRegistration,
        )?;

        for (i, node) in nodes.iter().enumerate() {
            let op_data = kernels::prepare(node, &tensors).map_err(|reason| {
                error!("Node {} ({}) failed to prepare: {}", i, node.op, reason);
                EngineError::InvalidGraph(format!("node {} ({}): {}", i, node.op, reason))
            })?;
            if op_data > 0 {
                self.allocator
                    .allocate_persistent(op_data, 4, AllocationTag::OpData)?;
            }
        }

        for tensor in tensors.iter_mut() {
            if tensor.storage == Storage::Unallocated {
                let region = self.allocator.allocate_head(
                    tensor.byte_size(),
                    TENSOR_ALIGN,
                    AllocationTag::TensorData,
                )?;
                self.allocator.arena_mut()[region.offset..region.end()].fill(0);
                tensor.storage = Storage::Arena(region);
            }
        }

        debug!(
            "Allocated {} tensors and {} nodes, {} of {} arena bytes in use",
            tensors.len(),
            nodes.len(),
            self.allocator.used_bytes(),
            self.allocator.capacity()
        );

        self.graph = Some(Graph {
            tensors,
            nodes,
            buffers: def.buffers,
            inputs: def.inputs.iter().map(|&i| i as usize).collect(),
            outputs: def.outputs.iter().map(|&o| o as usize).collect(),
        });
        Ok(())
    }

    /// Evaluate every node once, in order
    pub fn invoke(&mut self) -> Result<(), EngineError> {
        let graph = self.graph.as_ref().ok_or(EngineError::TensorsNotAllocated)?;
        let arena = self.allocator.arena_mut();

        for (i, node) in graph.nodes.iter().enumerate() {
            let handle = self
                .profiler
                .as_deref_mut()
                .map(|p| p.begin_event(node.op.as_str()));
            let result = eval_node(node, &graph.tensors, &graph.buffers, arena);
            if let (Some(profiler), Some(handle)) = (self.profiler.as_deref_mut(), handle) {
                profiler.end_event(handle);
            }
            result.map_err(|reason| {
                error!("Node {} ({}) failed to invoke: {}", i, node.op, reason);
                EngineError::KernelFailure {
                    node: i,
                    op: node.op,
                    reason,
                }
            })?;
        }

        self.invocations += 1;
        Ok(())
    }

    /// Number of graph inputs, 0 before allocation
    pub fn inputs_size(&self) -> usize {
        self.graph.as_ref().map_or(0, |g| g.inputs.len())
    }

    /// Number of graph outputs, 0 before allocation
    pub fn outputs_size(&self) -> usize {
        self.graph.as_ref().map_or(0, |g| g.outputs.len())
    }

    /// Graph input `i`
    pub fn input(&self, i: usize) -> Option<TensorView<'_>> {
        let graph = self.graph.as_ref()?;
        self.view(*graph.inputs.get(i)?)
    }

    /// Graph input `i`, writable
    pub fn input_mut(&mut self, i: usize) -> Option<TensorViewMut<'_>> {
        let graph = self.graph.as_ref()?;
        let tensor = graph.tensors.get(*graph.inputs.get(i)?)?;
        let Storage::Arena(region) = tensor.storage else {
            return None;
        };
        let data = self.allocator.arena_mut().get_mut(region.offset..region.end())?;
        Some(TensorViewMut::new(tensor, data))
    }

    /// Graph output `i`
    pub fn output(&self, i: usize) -> Option<TensorView<'_>> {
        let graph = self.graph.as_ref()?;
        self.view(*graph.outputs.get(i)?)
    }

    /// Successful invocations so far
    pub fn invocation_count(&self) -> u32 {
        self.invocations
    }

    /// Arena bytes in use, padding included
    pub fn arena_used_bytes(&self) -> usize {
        self.allocator.used_bytes()
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Give the allocator back, ending the interpreter
    pub fn into_allocator(self) -> A {
        self.allocator
    }

    pub fn resource_variables(&self) -> Option<&ResourceVariables> {
        self.resource_variables.as_ref()
    }

    /// Copy `data` into resource variable `id`
    pub fn assign_variable(&mut self, id: usize, data: &[u8]) -> Result<(), EngineError> {
        let variables = self
            .resource_variables
            .as_mut()
            .ok_or_else(|| EngineError::ResourceVariable("no resource variables".to_string()))?;
        variables.assign(&mut self.allocator, id, data)
    }

    /// Contents of resource variable `id`
    pub fn read_variable(&self, id: usize) -> Result<&[u8], EngineError> {
        let variables = self
            .resource_variables
            .as_ref()
            .ok_or_else(|| EngineError::ResourceVariable("no resource variables".to_string()))?;
        variables.read(self.allocator.arena(), id)
    }

    /// Zero all resource variables
    pub fn reset_variables(&mut self) {
        if let Some(variables) = &self.resource_variables {
            variables.reset_all(self.allocator.arena_mut());
        }
    }

    fn view(&self, index: usize) -> Option<TensorView<'_>> {
        let graph = self.graph.as_ref()?;
        let tensor = graph.tensors.get(index)?;
        let data = match tensor.storage {
            Storage::Constant(b) => graph.buffers.get(b)?.as_slice(),
            Storage::Arena(region) => self.allocator.arena().get(region.offset..region.end())?,
            Storage::Unallocated => return None,
        };
        Some(TensorView::new(tensor, data))
    }
}

/// Evaluate each output of `node`, splitting the arena around it
fn eval_node(
    node: &Node,
    tensors: &[BoundTensor],
    buffers: &[Vec<u8>],
    arena: &mut [u8],
) -> Result<(), String> {
    for (k, &t) in node.outputs.iter().enumerate() {
        let Storage::Arena(region) = tensors[t].storage else {
            return Err(format!("output '{}' is not writable", tensors[t].name));
        };
        let (lo, rest) = arena.split_at_mut(region.offset);
        let (out, hi) = rest.split_at_mut(region.len);
        let inputs = Inputs {
            lo,
            hi,
            hi_base: region.end(),
            buffers,
        };
        kernels::eval(node, tensors, &inputs, k, out)?;
    }
    Ok(())
}

/// Structural checks that do not depend on operator semantics
fn validate(def: &ModelDef) -> Result<(), EngineError> {
    let invalid = |msg: String| Err(EngineError::InvalidGraph(msg));
    let count = def.tensors.len();

    if def.buffers.first().is_some_and(|b| !b.is_empty()) {
        return invalid("buffer 0 must be empty".to_string());
    }
    for (i, t) in def.tensors.iter().enumerate() {
        if t.shape.iter().any(|&d| d < 0) {
            return invalid(format!("tensor {} '{}' has negative dims {:?}", i, t.name, t.shape));
        }
        match t.checked_byte_size() {
            Some(bytes) if bytes <= isize::MAX as usize => {}
            _ => {
                return invalid(format!(
                    "tensor {} '{}' is too large: {:?}",
                    i, t.name, t.shape
                ));
            }
        }
        if t.buffer > 0 {
            let Some(buffer) = def.buffers.get(t.buffer as usize) else {
                return invalid(format!(
                    "tensor {} '{}' refers to missing buffer {}",
                    i, t.name, t.buffer
                ));
            };
            if buffer.len() != t.byte_size() {
                return invalid(format!(
                    "tensor {} '{}' needs {} bytes, buffer {} has {}",
                    i,
                    t.name,
                    t.byte_size(),
                    t.buffer,
                    buffer.len()
                ));
            }
        }
    }
    for (n, op) in def.operators.iter().enumerate() {
        if let Some(&i) = op.inputs.iter().find(|&&i| i >= count as i32 || i < -1) {
            return invalid(format!("node {} input {} out of range", n, i));
        }
        for &o in &op.outputs {
            match def.tensors.get(o as usize) {
                None => return invalid(format!("node {} output {} out of range", n, o)),
                Some(t) if t.buffer > 0 => {
                    return invalid(format!("node {} writes constant tensor '{}'", n, t.name));
                }
                Some(_) => {}
            }
        }
    }
    for &i in def.inputs.iter().chain(&def.outputs) {
        if i as usize >= count {
            return invalid(format!("graph io tensor {} out of range", i));
        }
    }
    Ok(())
}
