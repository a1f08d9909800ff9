use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use nnforge::backend::BackendRegistry;
use nnforge::codegen::{compile, BackendPolicy, Plan};
use nnforge::config::RuntimeConfig;
use nnforge::exec::Execution;
use nnforge::graph::{
    ConcatParam, ConstData, Conv2DParam, DataType, FullyConnectedParam, IoIndex, Model, Node, OpKind,
    OperandIndex, Operation, Pool2DParam, ReshapeParam, Shape, SoftmaxParam, TypeInfo,
};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "nnforge-cli", version)]
#[command(about = "Compile and run built-in demo graphs on the nnforge backends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered backends
    Backends,
    /// Compile a demo graph and print its plan
    Plan {
        #[arg(value_enum)]
        demo: Demo,
        #[command(flatten)]
        placement: Placement,
    },
    /// Compile and run a demo graph on a ramp input
    Run {
        #[arg(value_enum)]
        demo: Demo,
        #[command(flatten)]
        placement: Placement,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
struct Placement {
    /// Backend for every operation (same as OP_BACKEND_ALLOPS)
    #[arg(long)]
    backend: Option<String>,
    /// Per-operation override, e.g. SOFTMAX=cpu
    #[arg(long = "op", value_name = "NNAPI_NAME=BACKEND")]
    overrides: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Demo {
    /// conv 3x3 SAME + relu, max pool, reshape, fully connected, softmax
    Classifier,
    /// two [1,2,3,2] feature maps concatenated along channels
    Concat,
}

#[derive(Debug, Serialize)]
struct RunReport {
    demo: String,
    backends: Vec<String>,
    runnables: usize,
    output_shape: Vec<usize>,
    output: Vec<f32>,
}

fn main() -> anyhow::Result<()> {
    nnforge::logging::init_logging_default();
    let cli = Cli::parse();
    let config = RuntimeConfig::from_env()?;
    let registry = BackendRegistry::with_default_backends(&config)?;

    match cli.command {
        Commands::Backends => {
            for id in registry.ids() {
                let backend = registry.lookup(id)?;
                let kinds: Vec<&str> = OpKind::ALL
                    .iter()
                    .filter(|kind| backend.config().supports(**kind))
                    .map(|kind| kind.name())
                    .collect();
                println!("{:<4} layout={} ops={}", id, backend.config().layout(), kinds.join(","));
            }
        }
        Commands::Plan { demo, placement } => {
            let policy = placement.policy(&config)?;
            let plan = compile(demo.model()?, &registry, &policy)?;
            for (position, runnable) in plan.runnables().iter().enumerate() {
                println!("{:>3}  {}", position, runnable.name());
            }
            for (backend, stats) in plan.stats() {
                println!("{}: {}", backend, stats);
            }
        }
        Commands::Run {
            demo,
            placement,
            json,
        } => {
            let policy = placement.policy(&config)?;
            let plan = Arc::new(compile(demo.model()?, &registry, &policy)?);
            let (shape, output) = run_ramp(&plan)?;
            let report = RunReport {
                demo: format!("{:?}", demo).to_lowercase(),
                backends: plan.backends().iter().map(|b| b.to_string()).collect(),
                runnables: plan.runnables().len(),
                output_shape: shape,
                output,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{} on {:?}: {} runnables", report.demo, report.backends, report.runnables);
                println!("output {:?} = {:?}", report.output_shape, report.output);
            }
        }
    }
    Ok(())
}

impl Placement {
    fn policy(&self, config: &RuntimeConfig) -> anyhow::Result<BackendPolicy> {
        let pairs = self
            .overrides
            .iter()
            .map(|pair| {
                pair.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .with_context(|| format!("override {:?} is not NNAPI_NAME=BACKEND", pair))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut policy = if pairs.is_empty() {
            BackendPolicy::from_env()
        } else {
            BackendPolicy::from_pairs(pairs)
        };
        policy = policy.with_default_backend(config.default_backend.clone());
        if let Some(backend) = &self.backend {
            policy = policy.with_all_ops(backend.clone());
        }
        Ok(policy)
    }
}

/// Feed `0.1, 0.2, ...` into every input and return the first output.
fn run_ramp(plan: &Arc<Plan>) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
    let model = plan.model();
    let inputs: Vec<Vec<u8>> = model
        .inputs()
        .iter()
        .map(|index| -> nnforge::ForgeResult<Vec<u8>> {
            let count = model.operands().shape(*index)?.num_elements();
            Ok((0..count)
                .flat_map(|i| ((i + 1) as f32 * 0.1).to_le_bytes())
                .collect())
        })
        .collect::<nnforge::ForgeResult<_>>()?;
    let output_index = *model.outputs().first().context("demo graph has no output")?;
    let output_shape = model.operands().shape(output_index)?.dims().to_vec();
    let mut output = vec![0u8; output_shape.iter().product::<usize>() * 4];

    {
        let mut execution = Execution::new(Arc::clone(plan));
        for (i, bytes) in inputs.iter().enumerate() {
            execution.set_input(IoIndex::from(i), bytes)?;
        }
        execution.set_output(IoIndex(0), &mut output)?;
        execution.run()?;
    }

    let values = output
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((output_shape, values))
}

impl Demo {
    fn model(self) -> anyhow::Result<Model> {
        let mut model = Model::new();
        match self {
            Demo::Classifier => classifier(&mut model)?,
            Demo::Concat => concat(&mut model)?,
        }
        model.finish_building()?;
        Ok(model)
    }
}

fn tensor(model: &mut Model, dims: &[usize]) -> nnforge::ForgeResult<OperandIndex> {
    model.add_operand(Shape::new(dims.to_vec()), TypeInfo::new(DataType::Float32))
}

fn constant(model: &mut Model, dims: &[usize], values: &[f32]) -> nnforge::ForgeResult<OperandIndex> {
    let index = tensor(model, dims)?;
    model.set_operand_value(index, ConstData::from_f32(values))?;
    Ok(index)
}

fn scalar_i32(model: &mut Model, value: i32) -> nnforge::ForgeResult<OperandIndex> {
    let index = model.add_operand(Shape::scalar(), TypeInfo::new(DataType::ScalarInt32))?;
    model.set_operand_value(index, ConstData::from_i32(&[value]))?;
    Ok(index)
}

fn classifier(model: &mut Model) -> anyhow::Result<()> {
    const SAME: i32 = 1;
    const VALID: i32 = 2;
    const RELU: i32 = 1;

    let input = tensor(model, &[1, 3, 3, 1])?;
    let kernel = constant(model, &[1, 3, 3, 1], &[0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0])?;
    let bias = constant(model, &[1], &[0.5])?;
    let conv_out = tensor(model, &[1, 3, 3, 1])?;
    let conv = Conv2DParam {
        padding: scalar_i32(model, SAME)?,
        hstride: scalar_i32(model, 1)?,
        vstride: scalar_i32(model, 1)?,
        activation: scalar_i32(model, RELU)?,
    };
    model.add_operation(Operation::Conv2D(Node::new(vec![input, kernel, bias], vec![conv_out], conv)))?;

    let pooled = tensor(model, &[1, 2, 2, 1])?;
    let pool = Pool2DParam {
        padding: scalar_i32(model, VALID)?,
        hstride: scalar_i32(model, 1)?,
        vstride: scalar_i32(model, 1)?,
        kw: scalar_i32(model, 2)?,
        kh: scalar_i32(model, 2)?,
        activation: scalar_i32(model, 0)?,
    };
    model.add_operation(Operation::MaxPool2D(Node::new(vec![conv_out], vec![pooled], pool)))?;

    let flat = tensor(model, &[1, 4])?;
    let reshape = ReshapeParam { shape: None };
    model.add_operation(Operation::Reshape(Node::new(vec![pooled], vec![flat], reshape)))?;

    let weights = constant(
        model,
        &[3, 4],
        &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.25, 0.25, 0.25, 0.25],
    )?;
    let fc_bias = constant(model, &[3], &[0.0, 0.1, 0.2])?;
    let logits = tensor(model, &[1, 3])?;
    let fc = FullyConnectedParam {
        activation: scalar_i32(model, 0)?,
    };
    model.add_operation(Operation::FullyConnected(Node::new(
        vec![flat, weights, fc_bias],
        vec![logits],
        fc,
    )))?;

    let probabilities = tensor(model, &[1, 3])?;
    let beta = model.add_operand(Shape::scalar(), TypeInfo::new(DataType::ScalarFloat32))?;
    model.set_operand_value(beta, ConstData::from_f32(&[1.0]))?;
    let softmax = SoftmaxParam { beta };
    model.add_operation(Operation::Softmax(Node::new(vec![logits], vec![probabilities], softmax)))?;

    model.add_input(input)?;
    model.add_output(probabilities)?;
    Ok(())
}

fn concat(model: &mut Model) -> anyhow::Result<()> {
    let lhs = tensor(model, &[1, 2, 3, 2])?;
    let rhs = tensor(model, &[1, 2, 3, 2])?;
    let output = tensor(model, &[1, 2, 3, 4])?;
    let axis = scalar_i32(model, 3)?;
    model.add_operation(Operation::Concat(Node::new(
        vec![lhs, rhs],
        vec![output],
        ConcatParam { axis },
    )))?;
    model.add_input(lhs)?;
    model.add_input(rhs)?;
    model.add_output(output)?;
    Ok(())
}
