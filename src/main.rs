use anyhow::{Context, Result};
use azfacts::config::Config;
use azfacts::facts::envelope::Envelope;
use azfacts::facts::{run_module, RunOptions};
use azfacts::resource::{get_registry, get_resource};
use clap::{Parser, ValueEnum};
use serde_json::{Map, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment filter that overrides the log level
const LOG_ENV: &str = "AZFACTS_LOG";

/// Read-only Azure resource facts
#[derive(Parser, Debug)]
#[command(name = "azfacts", version = azfacts::VERSION, about, long_about = None)]
struct Args {
    /// File holding the module arguments (stdin when absent)
    args_file: Option<PathBuf>,

    /// Fact module to run (defaults to the executable name)
    #[arg(short, long)]
    module: Option<String>,

    /// Print the module catalog as JSON and exit
    #[arg(long)]
    list: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Pre-acquired bearer token for the management API (or AZURE_ACCESS_TOKEN)
    #[arg(long)]
    access_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> Option<&'static str> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some("error"),
            LogLevel::Warn => Some("warn"),
            LogLevel::Info => Some("info"),
            LogLevel::Debug => Some("debug"),
            LogLevel::Trace => Some("trace"),
        }
    }

    /// CLI level, or the config file's when the CLI was left at `off`
    fn effective(self, config: &Config) -> Self {
        if self != LogLevel::Off {
            return self;
        }
        config
            .log_level
            .as_deref()
            .and_then(|l| LogLevel::from_str(l, true).ok())
            .unwrap_or(self)
    }
}

/// Log to a file only: stdout carries the envelope
fn setup_logging(level: LogLevel, log_path: &Path) -> Option<WorkerGuard> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(level.as_directive()?),
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("azfacts {} started with log level: {:?}", azfacts::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

/// Module name implied by the executable, for symlinked installs
/// (`azure_rm_load_balancer_info` -> `load_balancer`)
fn module_from_program(program: &str) -> Option<String> {
    let stem = Path::new(program).file_stem()?.to_str()?;
    let name = stem.strip_prefix("azure_rm_").unwrap_or(stem);
    let name = name
        .strip_suffix("_info")
        .or_else(|| name.strip_suffix("_facts"))
        .unwrap_or(name);
    get_resource(name).ok()?.map(|d| d.module_name.clone())
}

/// Parse an argument bag, JSON first and YAML as a fallback
fn parse_args(content: &str) -> Result<Value> {
    if content.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(json_err) => serde_yaml::from_str(content)
            .with_context(|| format!("Module arguments are neither JSON ({}) nor YAML", json_err))?,
    };

    // New-style wrapper used when arguments arrive on stdin
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("ANSIBLE_MODULE_ARGS") => {
            Ok(map.remove("ANSIBLE_MODULE_ARGS").unwrap_or_default())
        }
        other => Ok(other),
    }
}

fn read_args(path: Option<&Path>) -> Result<Value> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read arguments from {}", path.display()))?,
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read arguments from stdin")?;
            content
        }
    };
    parse_args(&content)
}

async fn run(args: &Args, config: &Config) -> Result<Envelope> {
    let module = match &args.module {
        Some(module) => module.clone(),
        None => std::env::args()
            .next()
            .and_then(|program| module_from_program(&program))
            .context(
                "No fact module given. Pass --module NAME or invoke through a module-named link",
            )?,
    };

    let raw_args = read_args(args.args_file.as_deref())?;
    tracing::debug!("Running module {}", module);

    let options = RunOptions {
        access_token: args.access_token.clone(),
        default_profile: config.effective_profile(),
        default_cloud: config.cloud_environment.clone(),
    };
    Ok(run_module(&module, &raw_args, &options).await)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = Config::load();

    let level = args.log_level.effective(&config);
    let _log_guard = setup_logging(level, &config.effective_log_file());

    if args.list {
        return match get_registry() {
            Ok(catalog) => {
                println!("{}", catalog.summary());
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("{}", Envelope::failure(format!("{:#}", e)).to_json());
                ExitCode::FAILURE
            }
        };
    }

    let envelope = run(&args, &config).await.unwrap_or_else(|e| {
        tracing::error!("{:#}", e);
        Envelope::failure(format!("{:#}", e))
    });

    println!("{}", envelope.to_json());

    if envelope.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
