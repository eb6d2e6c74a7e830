//! Paralexe CLI
//!
//! Entry point for the `paralexe` command-line tool.

use clap::{ArgAction, Parser, Subcommand};
use paralexe::config::EffectiveConfig;
use paralexe::signal;
use paralexe::{logging, ArgValue, JobFile, Manager, Scheduler};
use std::path::{Path, PathBuf};
use std::process;

/// Exit code for output errors
const EXIT_FAILED: i32 = 1;
/// Exit code for configuration, job-file and usage errors
const EXIT_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "paralexe")]
#[command(about = "Run command templates in parallel, step by step", version)]
struct Cli {
    /// Path to config file (default: ./paralexe.toml when present)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Worker threads per step
    #[arg(long, short = 'j', global = true)]
    threads: Option<usize>,

    /// Per-command timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every step of a job file
    Run {
        /// Job file (TOML)
        jobfile: PathBuf,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Print each worker's captured output
        #[arg(long)]
        show_output: bool,
    },

    /// Print the commands a job file would run, without running them
    Plan {
        /// Job file (TOML)
        jobfile: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Run a single step given on the command line
    Exec {
        /// Command template, e.g. "gzip -k *[file]"
        #[arg(long)]
        cmd: String,

        /// Placeholder argument: NAME=VALUE or NAME=V1,V2,...
        #[arg(long = "arg", value_name = "NAME=VALUES")]
        args: Vec<String>,

        /// Per-worker metadata: NAME=VALUE or NAME=V1,V2,...
        #[arg(long = "meta", value_name = "NAME=VALUES")]
        meta: Vec<String>,

        /// Step label
        #[arg(long)]
        label: Option<String>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Print each worker's captured output
        #[arg(long)]
        show_output: bool,
    },

    /// Print the effective configuration with its sources
    Config,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let overrides = cli_overrides(cli.threads, cli.timeout);
    let config = match EffectiveConfig::load(cli.config.as_deref(), overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(EXIT_CONFIG);
        }
    };

    match cli.command {
        Commands::Run {
            jobfile,
            json,
            show_output,
        } => run_jobfile(&config, &jobfile, json, show_output),
        Commands::Plan { jobfile, json } => run_plan(&config, &jobfile, json),
        Commands::Exec {
            cmd,
            args,
            meta,
            label,
            json,
            show_output,
        } => run_exec(&config, cmd, &args, &meta, label.as_deref(), json, show_output),
        Commands::Config => run_config(&config),
    }
}

fn cli_overrides(threads: Option<usize>, timeout: Option<u64>) -> Option<serde_json::Value> {
    let mut overrides = serde_json::Map::new();
    if let Some(threads) = threads {
        overrides.insert("threads".to_string(), threads.into());
    }
    if let Some(timeout) = timeout {
        overrides.insert("timeout_seconds".to_string(), timeout.into());
    }
    if overrides.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(overrides))
    }
}

fn load_jobfile(path: &Path) -> JobFile {
    match JobFile::from_path(path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error loading job file: {}", e);
            process::exit(EXIT_CONFIG);
        }
    }
}

fn decorator(config: &EffectiveConfig) -> paralexe::Decorator {
    match config.settings().decorator() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(EXIT_CONFIG);
        }
    }
}

fn run_jobfile(config: &EffectiveConfig, path: &Path, json: bool, show_output: bool) {
    let file = load_jobfile(path);
    let settings = config.settings();

    let mut scheduler = Scheduler::with_config(settings.scheduler_config());
    if let Err(e) = file.schedule(&mut scheduler, &decorator(config), &settings.backend) {
        eprintln!("Error in job file {}: {}", path.display(), e);
        process::exit(EXIT_CONFIG);
    }

    submit_and_report(scheduler, json, show_output);
}

fn run_plan(config: &EffectiveConfig, path: &Path, json: bool) {
    let file = load_jobfile(path);
    let plan = match file.plan(&decorator(config), &config.settings().backend) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error in job file {}: {}", path.display(), e);
            process::exit(EXIT_CONFIG);
        }
    };

    if json {
        let output: Vec<serde_json::Value> = plan
            .iter()
            .map(|step| {
                serde_json::json!({
                    "index": step.index,
                    "label": step.label,
                    "priority": step.priority,
                    "commands": step.commands,
                })
            })
            .collect();
        print_json(&output);
    } else {
        for step in &plan {
            let name = step.label.clone().unwrap_or_else(|| format!("step {}", step.index));
            match step.priority {
                Some(priority) => println!("{} (priority {}):", name, priority),
                None => println!("{}:", name),
            }
            for command in &step.commands {
                println!("  {}", command);
            }
        }
    }
}

fn run_exec(
    config: &EffectiveConfig,
    cmd: String,
    args: &[String],
    meta: &[String],
    label: Option<&str>,
    json: bool,
    show_output: bool,
) {
    let settings = config.settings();
    let decorator = decorator(config);

    let mut manager = Manager::new(cmd);
    manager.set_backend(settings.backend.clone());
    let mut configure = || -> Result<(), String> {
        manager
            .set_decorator(decorator.prefix.as_str(), decorator.suffix.as_str())
            .map_err(|e| e.to_string())?;
        for arg in args {
            let (name, value) = parse_assignment(arg)?;
            manager.set_arg(name, value).map_err(|e| e.to_string())?;
        }
        for entry in meta {
            let (name, value) = parse_assignment(entry)?;
            manager.set_meta(name, value).map_err(|e| e.to_string())?;
        }
        Ok(())
    };
    if let Err(e) = configure() {
        eprintln!("Error: {}", e);
        process::exit(EXIT_CONFIG);
    }

    let mut scheduler = Scheduler::with_config(settings.scheduler_config());
    if let Err(e) = manager.schedule(&mut scheduler, None, label) {
        eprintln!("Error: {}", e);
        process::exit(EXIT_CONFIG);
    }

    submit_and_report(scheduler, json, show_output);
}

/// Parse `NAME=VALUE` (scalar) or `NAME=V1,V2,...` (one value per worker).
fn parse_assignment(input: &str) -> Result<(String, ArgValue), String> {
    let (name, value) = input
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", input))?;
    if name.is_empty() {
        return Err(format!("missing name in {:?}", input));
    }

    let value = if value.contains(',') {
        ArgValue::list(value.split(','))
    } else {
        ArgValue::Scalar(value.to_string())
    };
    Ok((name.to_string(), value))
}

fn submit_and_report(mut scheduler: Scheduler, json: bool, show_output: bool) {
    if let Err(e) = signal::install(scheduler.cancel_token()) {
        tracing::warn!(error = %e, "Could not install signal handler");
    }

    scheduler.submit();
    let summary = scheduler.summary();

    if show_output {
        for step in scheduler.steps() {
            for report in step.reports() {
                println!("[{} #{}] $ {}", step.display_name(), report.id, report.command);
                for line in report.stdout.iter().flatten() {
                    println!("{}", line);
                }
                for line in report.stderr.iter().flatten() {
                    eprintln!("{}", line);
                }
                if let Some(ref error) = report.error {
                    eprintln!("[{} #{}] error: {}", step.display_name(), report.id, error);
                }
            }
        }
    }

    if json {
        match summary.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(EXIT_FAILED);
            }
        }
    } else {
        print!("{}", summary);
    }

    // 0 when every step succeeded, 1 on failure, 80 when cancelled
    process::exit(summary.exit_code());
}

fn run_config(config: &EffectiveConfig) {
    match config.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(EXIT_FAILED);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(EXIT_FAILED);
        }
    }
}
