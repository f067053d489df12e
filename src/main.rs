use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use stratbench::{
    commands::{backtest, files, presets, read_inputs, results, run_stdin},
    config::EngineSettings,
    context::{AppContext, RunnerSelection},
    parameters::ParameterSource,
    strategy::DEFAULT_TEMPLATE_ID,
    EngineError,
};

#[derive(Parser)]
#[command(name = "stratbench")]
#[command(about = "Preset storage and EMA crossover backtests")]
struct Cli {
    /// Root of per-scope preset documents (overrides STRATEGIES_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    strategies_dir: Option<PathBuf>,
    /// Root of file-keyed preset documents (overrides PRESETS_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    presets_dir: Option<PathBuf>,
    /// Results location (overrides RESULTS_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    results_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Parameter bag as inline JSON
    #[arg(long)]
    inputs: Option<String>,
    /// Parameter bag read from a JSON file
    #[arg(long, value_name = "PATH")]
    inputs_file: Option<PathBuf>,
}

impl InputArgs {
    fn read(&self) -> Result<Option<serde_json::Value>> {
        read_inputs(self.inputs.as_deref(), self.inputs_file.as_deref())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage presets of a strategy scope
    Presets {
        #[command(subcommand)]
        action: PresetsAction,
    },
    /// Manage file-keyed presets
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },
    /// Resolve parameters and run a backtest
    Backtest {
        /// Strategy scope whose presets supply the parameters
        #[arg(long)]
        scope: String,
        /// Preset to run (defaults to the active preset of the scope)
        #[arg(long, conflicts_with_all = ["inputs", "inputs_file"])]
        preset: Option<String>,
        #[command(flatten)]
        inputs: InputArgs,
        /// Strategy template
        #[arg(long, default_value = DEFAULT_TEMPLATE_ID)]
        strategy: String,
        /// Market data snapshot used instead of the exchange (passed on as
        /// `--data-file` to a process runner)
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = RunnerKind::InProcess)]
        runner: RunnerKind,
        /// Program launched by the process runner
        #[arg(long, required_if_eq("runner", "process"))]
        program: Option<PathBuf>,
        /// Arguments passed to the program
        #[arg(long = "program-arg", value_name = "ARG")]
        program_args: Vec<String>,
    },
    /// Run as a strategy unit: parameters on stdin, results to RESULTS_DIR
    RunStdin {
        #[arg(long, default_value = DEFAULT_TEMPLATE_ID)]
        strategy: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Print the latest results documents
    Results {
        #[command(subcommand)]
        document: ResultsDocument,
    },
}

#[derive(Subcommand)]
enum PresetsAction {
    List {
        #[arg(long)]
        scope: String,
    },
    Load {
        #[arg(long)]
        scope: String,
        #[arg(long)]
        name: String,
    },
    Active {
        #[arg(long)]
        scope: String,
    },
    Save {
        #[arg(long)]
        scope: String,
        #[arg(long)]
        name: String,
        #[command(flatten)]
        inputs: InputArgs,
    },
    Delete {
        #[arg(long)]
        scope: String,
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum FilesAction {
    Tree,
    Load {
        #[arg(long)]
        path: String,
    },
    Save {
        #[arg(long)]
        path: String,
        #[command(flatten)]
        inputs: InputArgs,
    },
    Delete {
        #[arg(long)]
        path: String,
    },
}

#[derive(Subcommand)]
enum ResultsDocument {
    Equity,
    Trades,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RunnerKind {
    InProcess,
    Process,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<EngineError>() {
                Some(engine_error) => {
                    let report = engine_error.report();
                    match serde_json::to_string(&report) {
                        Ok(rendered) => eprintln!("{}", rendered),
                        Err(_) => eprintln!("{}", engine_error),
                    }
                }
                None => error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = EngineSettings::from_env()?;
    if let Some(dir) = cli.strategies_dir {
        settings.strategies_dir = dir;
    }
    if let Some(dir) = cli.presets_dir {
        settings.presets_dir = dir;
    }
    if let Some(dir) = cli.results_dir {
        settings.results_dir = dir;
    }
    let app = AppContext::initialize(settings);

    match cli.command {
        Commands::Presets { action } => match action {
            PresetsAction::List { scope } => presets::list(&app, &scope),
            PresetsAction::Load { scope, name } => presets::load(&app, &scope, &name),
            PresetsAction::Active { scope } => presets::active(&app, &scope),
            PresetsAction::Save {
                scope,
                name,
                inputs,
            } => presets::save(&app, &scope, &name, inputs.read()?),
            PresetsAction::Delete { scope, name } => presets::delete(&app, &scope, &name),
        },
        Commands::Files { action } => match action {
            FilesAction::Tree => files::tree(&app),
            FilesAction::Load { path } => files::load(&app, &path),
            FilesAction::Save { path, inputs } => files::save(&app, &path, inputs.read()?),
            FilesAction::Delete { path } => files::delete(&app, &path),
        },
        Commands::Backtest {
            scope,
            preset,
            inputs,
            strategy,
            data_file,
            runner,
            program,
            program_args,
        } => {
            let source = match (preset, inputs.read()?) {
                (Some(name), _) => ParameterSource::Preset(name),
                (None, Some(bag)) => ParameterSource::Inline(bag),
                (None, None) => ParameterSource::ActivePreset,
            };
            let selection = match (runner, program) {
                (RunnerKind::Process, Some(program)) => {
                    RunnerSelection::process(program, program_args, data_file)
                }
                (RunnerKind::Process, None) => {
                    return Err(anyhow::anyhow!("--program is required with --runner process"))
                }
                (RunnerKind::InProcess, _) => RunnerSelection::InProcess { data_file },
            };
            info!("Backtesting {} for scope `{}`", strategy, scope);
            backtest::run(&app, &scope, source, &strategy, selection).await
        }
        Commands::RunStdin {
            strategy,
            data_file,
        } => run_stdin::run(&app, &strategy, data_file.as_deref()).await,
        Commands::Results { document } => match document {
            ResultsDocument::Equity => results::equity(&app),
            ResultsDocument::Trades => results::trades(&app),
        },
    }
}
