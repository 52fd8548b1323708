#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use celer::data::load_matrix;
use celer::{
    ConvergenceWarning, CscMatrix, Design, GroupSpec, ProblemKind, SolverConfig, alpha_max_for,
    compute_multitask_path, compute_path,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Options shared by every command that sets up a problem.
#[derive(Args)]
pub struct ProblemArgs {
    /// CSV file with a header row; one column per feature
    #[arg(value_name = "DESIGN_CSV")]
    pub design: PathBuf,

    /// CSV file with a header row; one column per task
    #[arg(value_name = "TARGET_CSV")]
    pub target: PathBuf,

    /// lasso, logreg, grouplasso or multitasklasso
    #[arg(long)]
    pub problem: String,

    /// Uniform group size (group lasso)
    #[arg(long, value_name = "SIZE", conflicts_with = "group_sizes")]
    pub groups: Option<usize>,

    /// Comma-separated list of contiguous group sizes (group lasso)
    #[arg(long, value_name = "SIZES", value_delimiter = ',')]
    pub group_sizes: Option<Vec<usize>>,

    /// Store the design in compressed sparse column form before solving
    #[arg(long)]
    pub sparse: bool,

    /// Constrain lasso coefficients to be non-negative
    #[arg(long)]
    pub positive: bool,
}

#[derive(Args)]
pub struct PathArgs {
    #[command(flatten)]
    pub problem: ProblemArgs,

    /// TOML file with solver settings; flags below take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub eps: Option<f64>,

    #[arg(long)]
    pub n_alphas: Option<usize>,

    #[arg(long)]
    pub tol: Option<f64>,

    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Use the prox-Newton inner solver (logreg only)
    #[arg(long)]
    pub newton: bool,

    /// Rebuild working sets from the non-zero blocks at every iteration
    #[arg(long)]
    pub prune: bool,

    /// Where to write the TOML report
    #[arg(long, value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "celer",
    about = "Sparse GLM regularization paths with working sets and dual extrapolation",
    long_about = "Computes lasso, group lasso, multitask lasso and sparse logistic regression \
                 paths with a working-set coordinate descent solver certified by duality gaps."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Solve a full regularization path
    #[command(about = "Compute a regularization path (outputs: TOML report)")]
    Path(PathArgs),

    /// Print the smallest penalty with an all-zero solution
    #[command(about = "Print alpha_max for a dataset")]
    AlphaMax(ProblemArgs),
}

#[derive(Serialize)]
struct PathReport {
    problem: String,
    n_samples: usize,
    n_features: usize,
    n_tasks: usize,
    alphas: Vec<f64>,
    gaps: Vec<f64>,
    n_iters: Vec<usize>,
    /// One entry per penalty value; multitask rows are flattened feature-major.
    coefs: Vec<Vec<f64>>,
    warnings: Vec<ConvergenceWarning>,
}

struct LoadedProblem {
    kind: ProblemKind,
    groups: Option<GroupSpec>,
    design: Design<f64>,
    targets: Array2<f64>,
}

fn group_spec(args: &ProblemArgs) -> Option<GroupSpec> {
    match (&args.groups, &args.group_sizes) {
        (Some(size), _) => Some(GroupSpec::Size(*size)),
        (None, Some(sizes)) => Some(GroupSpec::Sizes(sizes.clone())),
        (None, None) => None,
    }
}

fn load_problem(args: &ProblemArgs) -> CliResult<LoadedProblem> {
    let kind: ProblemKind = args.problem.parse()?;
    let design_table = load_matrix(&args.design)?;
    let target_table = load_matrix(&args.target)?;
    let x = design_table.values;
    let targets = target_table.values;
    if targets.nrows() != x.nrows() {
        return Err(format!(
            "Design has {} rows but targets have {}.",
            x.nrows(),
            targets.nrows()
        )
        .into());
    }
    if kind != ProblemKind::MultiTaskLasso && targets.ncols() != 1 {
        return Err(format!(
            "{kind} expects a single target column, found {}. Use --problem multitasklasso for matrix targets.",
            targets.ncols()
        )
        .into());
    }
    println!(
        "Loaded {} samples, {} features and {} target column(s).",
        x.nrows(),
        x.ncols(),
        targets.ncols()
    );
    let design = if args.sparse {
        let csc = CscMatrix::from_dense(x.view());
        println!(
            "Sparse storage: {} stored entries ({:.1}% dense).",
            csc.nnz(),
            100.0 * csc.nnz() as f64 / (x.len().max(1)) as f64
        );
        Design::sparse(csc)
    } else {
        Design::dense(x)
    };
    Ok(LoadedProblem {
        kind,
        groups: group_spec(args),
        design,
        targets,
    })
}

fn build_config(args: &PathArgs) -> CliResult<SolverConfig> {
    let mut config = match &args.config {
        Some(path) => SolverConfig::from_toml_file(path)?,
        None => SolverConfig::default(),
    };
    if let Some(eps) = args.eps {
        config.eps = eps;
    }
    if let Some(n_alphas) = args.n_alphas {
        config.n_alphas = n_alphas;
    }
    if let Some(tol) = args.tol {
        config.tol = tol;
    }
    if let Some(max_iter) = args.max_iter {
        config.max_iter = max_iter;
    }
    config.positive |= args.problem.positive;
    config.use_newton |= args.newton;
    config.prune |= args.prune;
    config.validate()?;
    Ok(config)
}

fn run_path(args: PathArgs) -> CliResult<()> {
    let config = build_config(&args)?;
    let loaded = load_problem(&args.problem)?;
    let n_samples = loaded.design.n_samples();
    let n_features = loaded.design.n_features();
    let n_tasks = loaded.targets.ncols();

    let report = if loaded.kind == ProblemKind::MultiTaskLasso {
        let path = compute_multitask_path(&loaded.design, loaded.targets.view(), None, &config)?;
        let coefs = (0..path.alphas.len())
            .map(|k| {
                let mut row = Vec::with_capacity(n_features * n_tasks);
                for j in 0..n_features {
                    for t in 0..n_tasks {
                        row.push(path.coefs[[t, j, k]]);
                    }
                }
                row
            })
            .collect();
        PathReport {
            problem: loaded.kind.to_string(),
            n_samples,
            n_features,
            n_tasks,
            alphas: path.alphas.to_vec(),
            gaps: path.gaps.to_vec(),
            n_iters: path.n_iters,
            coefs,
            warnings: path.warnings,
        }
    } else {
        let y = loaded.targets.column(0);
        let path = compute_path(
            &loaded.design,
            y,
            loaded.kind,
            loaded.groups.as_ref(),
            None,
            &config,
        )?;
        PathReport {
            problem: loaded.kind.to_string(),
            n_samples,
            n_features,
            n_tasks,
            alphas: path.alphas.to_vec(),
            gaps: path.gaps.to_vec(),
            n_iters: path.n_iters,
            coefs: path.coefs.columns().into_iter().map(|c| c.to_vec()).collect(),
            warnings: path.warnings,
        }
    };

    if !report.warnings.is_empty() {
        println!(
            "{} of {} penalty values did not reach tol = {:e}.",
            report.warnings.len(),
            report.alphas.len(),
            config.tol
        );
    }
    write_report(&args.output, &report)?;
    println!(
        "Wrote {} penalty values to {}.",
        report.alphas.len(),
        args.output.display()
    );
    Ok(())
}

fn write_report(path: &Path, report: &PathReport) -> CliResult<()> {
    let text = toml::to_string_pretty(report)?;
    fs::write(path, text)?;
    Ok(())
}

fn run_alpha_max(args: ProblemArgs) -> CliResult<()> {
    let loaded = load_problem(&args)?;
    let n_tasks = loaded.targets.ncols();
    // Task-major flattening, as the solver expects.
    let y: Array1<f64> = loaded.targets.t().iter().copied().collect();
    let value = alpha_max_for(
        &loaded.design,
        y.view(),
        loaded.kind,
        loaded.groups.as_ref(),
        n_tasks,
        args.positive,
    )?;
    println!("alpha_max = {value:.10e}");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Path(args)) => run_path(args),
        Some(Commands::AlphaMax(args)) => run_alpha_max(args),
        None => {
            Cli::command().print_help().expect("print help");
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
