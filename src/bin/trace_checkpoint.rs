//! Trace the checkpointing pipeline on a text IR file.
//!
//! Prints the function after unzip and after checkpointing, the resulting
//! store/recompute/invert partition and the pass statistics. With `--eval`
//! the function is also run before and after the passes.

use adhoist::autodiff::{CheckpointClassifier, DefaultCheckpointPolicy, DiffUnzipPass};
use adhoist::core::{CheckpointConfig, CheckpointSession, CostModel};
use adhoist::ir::{parser, Evaluator, Function};
use bumpalo::Bump;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "trace_checkpoint")]
#[command(about = "Unzip and checkpoint a function, printing every stage", long_about = None)]
struct Args {
    /// Input text IR file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Function to process (defaults to the first one)
    #[arg(short, long)]
    function: Option<String>,

    /// Maximum cost of a recomputed value
    #[arg(long, default_value_t = CostModel::DEFAULT_RECOMPUTE_BUDGET)]
    recompute_budget: u32,

    /// Cost of storing a value
    #[arg(long, default_value_t = CostModel::DEFAULT_STORE_COST)]
    store_cost: u32,

    /// Arguments to evaluate the function with, before and after
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    eval: Option<Vec<f64>>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn select_function(mut funcs: Vec<Function>, name: Option<&str>) -> Result<Function, String> {
    match name {
        Some(name) => funcs
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| format!("no function named {}", name)),
        None if funcs.is_empty() => Err("input contains no functions".to_string()),
        None => Ok(funcs.remove(0)),
    }
}

fn run(args: &Args) -> Result<(), String> {
    let text = fs::read_to_string(&args.input)
        .map_err(|e| format!("cannot read {}: {}", args.input.display(), e))?;
    let funcs = parser::parse_module(&text)?;
    let mut func = select_function(funcs, args.function.as_deref())?;

    let config = CheckpointConfig {
        cost_model: CostModel::new(args.recompute_budget, args.store_cost),
        ..CheckpointConfig::default()
    };

    let before = match &args.eval {
        Some(inputs) => Some(
            Evaluator::new(&func)
                .with_step_limit(config.eval_step_limit)
                .run(inputs)
                .map_err(|e| e.to_string())?,
        ),
        None => None,
    };

    let arena = Bump::new();
    let session = CheckpointSession::new(&arena);

    let split = DiffUnzipPass::new(&session)
        .unzip_diff_insts(&mut func)
        .map_err(|e| e.to_string())?;
    println!("=== After unzip ===");
    print!("{}", func);

    let mut classifier = CheckpointClassifier::new(DefaultCheckpointPolicy::new(&session, config.cost_model.clone()));
    let hoisted = classifier
        .process_func(&mut func, &split, &session)
        .map_err(|e| e.to_string())?;
    println!("\n=== After checkpointing ===");
    print!("{}", func);

    println!("\n=== Partition ===");
    println!("{}", hoisted.describe(&func));

    if let (Some(inputs), Some(before)) = (&args.eval, before) {
        let after = Evaluator::new(&func)
            .with_step_limit(config.eval_step_limit)
            .run(inputs)
            .map_err(|e| e.to_string())?;
        println!("\n=== Evaluation ===");
        println!("before: {}", before);
        println!("after:  {}", after);
        if before.to_bits() != after.to_bits() {
            log::warn!("results differ");
        }
    }

    println!("\n{}", session.stats());
    Ok(())
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}
