//! Backend abstraction.
//!
//! A [`Backend`] bundles a config, an initializer-generator factory and a
//! stage-generator factory. Backends live for the whole process; each
//! compilation asks them for a fresh [`BackendContext`] holding generators
//! and a tensor builder of its own.

pub(crate) mod builder;
pub mod cpu;
pub mod gpu;
pub mod registry;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::codegen::plan::ExecutionBuilder;
use crate::error::ForgeResult;
use crate::graph::{
    ConstData, Conv2DParam, FullyConnectedParam, Layout, Node, OpKind, OperandIndex, OperandSet,
    Operation, Shape, TypeInfo,
};
use crate::kernel;

pub use registry::BackendRegistry;

/// Logical shape and element type of a tensor to create.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub shape: Shape,
    pub type_info: TypeInfo,
}

impl TensorInfo {
    pub fn new(shape: Shape, type_info: TypeInfo) -> Self {
        Self { shape, type_info }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }
}

/// Shape constraints recorded by the planner, keyed by operand.
pub type ShapeConstraints = BTreeMap<OperandIndex, TensorInfo>;

/// A backend-native tensor.
///
/// Elements are held as `f32` storage words in the backend's storage order
/// (see [`DataType::decode`]): quantized operands keep their unsigned 8-bit
/// codes and 32-bit integers their bit pattern.
pub trait Tensor: fmt::Debug + Send + Sync {
    fn info(&self) -> &TensorInfo;

    /// Storage order of rank 4 data.
    fn layout(&self) -> Layout;

    fn backend(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    /// Copy out in storage order, waiting for pending device work first.
    fn read(&self) -> ForgeResult<Vec<f32>>;

    /// Replace the contents, given in storage order.
    fn write(&self, data: &[f32]) -> ForgeResult<()>;

    /// Copy out in the model's logical (NHWC) order.
    fn read_logical(&self) -> ForgeResult<Vec<f32>> {
        let data = self.read()?;
        Ok(kernel::convert(&data, self.info().shape.dims(), self.layout(), Layout::Nhwc))
    }

    /// Replace the contents, given in logical (NHWC) order.
    fn write_logical(&self, data: &[f32]) -> ForgeResult<()> {
        let data = kernel::convert(data, self.info().shape.dims(), Layout::Nhwc, self.layout());
        self.write(&data)
    }
}

/// Instrumentation counters of one tensor builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TensorBuilderStats {
    pub mark_calls: usize,
    pub marked: usize,
    pub prepare_calls: usize,
    pub allocate_calls: usize,
    pub tensors_allocated: usize,
    /// Builder-owned tensors not tied to an operand.
    pub scratch_allocated: usize,
    /// Every byte reserved, scratch included.
    pub bytes_allocated: usize,
}

impl fmt::Display for TensorBuilderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "marked={} tensors={} scratch={} bytes={} (mark calls={}, prepare={}, allocate={})",
            self.marked,
            self.tensors_allocated,
            self.scratch_allocated,
            self.bytes_allocated,
            self.mark_calls,
            self.prepare_calls,
            self.allocate_calls
        )
    }
}

/// Per-backend allocation authority.
///
/// `mark` any number of operands, `prepare` once with the planner's shape
/// constraints, `allocate` once, then look tensors up with `at`.
pub trait TensorBuilder: Send + Sync {
    fn backend(&self) -> &str;

    fn mark(&mut self, index: OperandIndex) -> ForgeResult<()>;

    fn prepare(&mut self, constraints: &ShapeConstraints) -> ForgeResult<()>;

    fn allocate(&mut self) -> ForgeResult<()>;

    fn at(&self, index: OperandIndex) -> ForgeResult<Arc<dyn Tensor>>;

    /// Allocate a tensor that backs no operand, such as a stage's
    /// intermediate buffer. It lives as long as the builder and is counted
    /// in `stats`. Only valid after `allocate`.
    fn scratch(&mut self, info: TensorInfo) -> ForgeResult<Arc<dyn Tensor>>;

    /// Operands owned by this builder, in index order.
    fn marked(&self) -> Vec<OperandIndex>;

    /// Wait for every pending device command touching this builder's tensors.
    fn synchronize(&self) -> ForgeResult<()>;

    fn stats(&self) -> TensorBuilderStats;
}

/// Fills one backend tensor with constant data. Runs once, after allocation.
pub trait Initializer: fmt::Debug + Send + Sync {
    fn initialize(&self, tensor: &dyn Tensor) -> ForgeResult<()>;
}

/// Copies constant data in logical order; the tensor handles its layout.
#[derive(Debug, Clone)]
pub struct CopyInitializer {
    pub data: ConstData,
    pub type_info: TypeInfo,
}

impl Initializer for CopyInitializer {
    fn initialize(&self, tensor: &dyn Tensor) -> ForgeResult<()> {
        tensor.write_logical(&self.data.words(self.type_info.dtype))
    }
}

/// Produces initializers for constant operands with a role.
///
/// Weight roles default to a plain copy; backends that store weights in a
/// different order override them.
pub trait InitializerGenerator: Send + Sync {
    fn conv2d_kernel(&self, node: &Node<Conv2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Initializer>> {
        self.constant(node.input(Conv2DParam::KERNEL), operands)
    }

    fn conv2d_bias(&self, node: &Node<Conv2DParam>, operands: &OperandSet) -> ForgeResult<Box<dyn Initializer>> {
        self.constant(node.input(Conv2DParam::BIAS), operands)
    }

    fn fully_connected_weight(
        &self,
        node: &Node<FullyConnectedParam>,
        operands: &OperandSet,
    ) -> ForgeResult<Box<dyn Initializer>> {
        self.constant(node.input(FullyConnectedParam::WEIGHT), operands)
    }

    fn fully_connected_bias(
        &self,
        node: &Node<FullyConnectedParam>,
        operands: &OperandSet,
    ) -> ForgeResult<Box<dyn Initializer>> {
        self.constant(node.input(FullyConnectedParam::BIAS), operands)
    }

    /// Constant without a role, e.g. a constant addend.
    fn constant(&self, index: OperandIndex, operands: &OperandSet) -> ForgeResult<Box<dyn Initializer>> {
        let operand = operands.at(index)?;
        let data = operand
            .data()
            .cloned()
            .ok_or(crate::error::GraphError::NotAConstant(index))?;
        Ok(Box::new(CopyInitializer {
            data,
            type_info: operand.type_info,
        }))
    }
}

/// A planned operation waiting for live tensors.
///
/// Stages are plain configuration values captured at planning time.
/// `apply` resolves their operand indices and appends runnables.
pub trait Stage: fmt::Debug + Send {
    fn apply(&self, builder: &mut ExecutionBuilder<'_>) -> ForgeResult<()>;
}

/// Turns operations into stages.
///
/// Implementations match every [`Operation`] variant. A backend that cannot
/// run a kind says so through [`BackendConfig::supports`], so resolution
/// never hands it such an operation.
pub trait StageGenerator: Send + Sync {
    fn backend(&self) -> &str;

    fn generate(&self, operation: &Operation, operands: &OperandSet) -> ForgeResult<Box<dyn Stage>>;
}

/// Static properties and the one-time initialization hook of a backend.
pub trait BackendConfig: Send + Sync {
    /// Called once per process before the first context is created.
    fn initialize(&self) -> ForgeResult<()>;

    /// Preferred storage order of rank 4 operands.
    fn layout(&self) -> Layout;

    /// Kinds this backend has stages for.
    fn supports(&self, kind: OpKind) -> bool;
}

pub type InitializerGenFactory = Arc<dyn Fn() -> Box<dyn InitializerGenerator> + Send + Sync>;

/// Builds a stage generator together with the tensor builder it is bound to.
pub type StageGenFactory =
    Arc<dyn Fn() -> ForgeResult<(Box<dyn StageGenerator>, Box<dyn TensorBuilder>)> + Send + Sync>;

pub struct Backend {
    id: String,
    config: Arc<dyn BackendConfig>,
    initializer_gen_factory: InitializerGenFactory,
    stage_gen_factory: StageGenFactory,
    initialized: OnceCell<()>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("id", &self.id)
            .field("layout", &self.config.layout())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl Backend {
    pub fn new(
        id: impl Into<String>,
        config: Arc<dyn BackendConfig>,
        initializer_gen_factory: InitializerGenFactory,
        stage_gen_factory: StageGenFactory,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            initializer_gen_factory,
            stage_gen_factory,
            initialized: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &dyn BackendConfig {
        self.config.as_ref()
    }

    /// Run `config.initialize()` once; later calls are no-ops.
    ///
    /// A failed initialization is retried on the next call.
    pub fn initialize(&self) -> ForgeResult<()> {
        self.initialized.get_or_try_init(|| {
            tracing::debug!(backend = %self.id, "initializing backend");
            self.config.initialize()
        })?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get().is_some()
    }

    /// Fresh generators and tensor builder for one compilation.
    pub fn new_context(self: &Arc<Self>) -> ForgeResult<BackendContext> {
        self.initialize()?;
        let (stage_gen, tensor_builder) = (self.stage_gen_factory)()?;
        Ok(BackendContext {
            backend: Arc::clone(self),
            initializer_gen: (self.initializer_gen_factory)(),
            stage_gen,
            tensor_builder,
        })
    }
}

/// Per-compilation state of one backend.
pub struct BackendContext {
    pub backend: Arc<Backend>,
    pub initializer_gen: Box<dyn InitializerGenerator>,
    pub stage_gen: Box<dyn StageGenerator>,
    pub tensor_builder: Box<dyn TensorBuilder>,
}

impl BackendContext {
    pub fn id(&self) -> &str {
        self.backend.id()
    }
}

impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendContext")
            .field("backend", &self.backend.id())
            .field("tensors", &self.tensor_builder.stats())
            .finish()
    }
}
