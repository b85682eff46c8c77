use clap::{Parser, ValueEnum};
use serde::Serialize;
use stagehand_core::{
    register_storyboard_api, FsScriptSource, Group, HostConfig, LuaAdapter, RhaiAdapter,
    ScriptFailure, ScriptRuntime, ScriptSource, ScriptValue,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project directory containing the storyboard scripts
    #[arg(value_name = "PROJECT")]
    project: PathBuf,

    /// Output path for the captured document
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Asset root that asset_path() resolves against (defaults to PROJECT)
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Metadata fields exposed to scripts, as NAME=VALUE
    #[arg(long = "meta", value_name = "NAME=VALUE")]
    metadata: Vec<String>,

    /// Log level
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "error"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Trace => write!(f, "trace"),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
enum LogFormat {
    Pretty,
    Json,
}

/// On-disk shape of a finished pass: groups in render order plus whatever
/// went wrong.
#[derive(Serialize)]
struct Report<'a> {
    groups: Vec<&'a Group>,
    failures: &'a [ScriptFailure],
}

fn main() {
    let cli = Cli::parse();

    // Initialize Logging
    let filter = EnvFilter::builder()
        .with_default_directive(cli.log_level.to_string().parse().unwrap())
        .from_env_lossy();

    let subscriber_builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match cli.log_format {
        LogFormat::Json => {
            subscriber_builder.json().init();
        }
        LogFormat::Pretty => {
            subscriber_builder.pretty().init();
        }
    }

    let project = cli.project;
    let output = cli
        .output
        .unwrap_or_else(|| project.join("storyboard.json"));
    let asset_root = cli.assets.unwrap_or_else(|| project.clone());

    let metadata = match parse_metadata(&cli.metadata) {
        Ok(metadata) => metadata,
        Err(message) => {
            error!("{message}");
            std::process::exit(2);
        }
    };

    info!("Project: {:?}", project);
    info!("Output: {:?}", output);

    let source: Arc<dyn ScriptSource> = Arc::new(FsScriptSource::new(&project));
    let mut runtime = ScriptRuntime::new();
    runtime.register_adapter(Box::new(LuaAdapter::new(Arc::clone(&source))));
    runtime.register_adapter(Box::new(RhaiAdapter::new(Arc::clone(&source))));
    #[cfg(feature = "python")]
    runtime.register_adapter(Box::new(stagehand_core::PythonAdapter::new(Arc::clone(
        &source,
    ))));

    let context = runtime.context().clone();
    let config = HostConfig {
        asset_root,
        metadata,
    };
    if let Err(e) = register_storyboard_api(runtime.bindings_mut(), &context, &config) {
        error!("Host API registration failed: {}", e);
        std::process::exit(2);
    }

    match runtime.reload(source.as_ref()) {
        Ok(count) => info!("Compiled {} scripts", count),
        Err(e) => {
            error!("Failed to scan {:?}: {:#}", project, e);
            std::process::exit(2);
        }
    }

    let result = runtime.run();
    for failure in &result.failures {
        error!(
            script = failure.script.as_str(),
            path = %failure.path.display(),
            "{}",
            failure.message
        );
    }

    let report = Report {
        groups: result.document.ordered_groups().collect(),
        failures: &result.failures,
    };
    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize the document: {}", e);
            std::process::exit(2);
        }
    };
    if let Err(e) = std::fs::write(&output, json) {
        error!("Failed to write {:?}: {}", output, e);
        std::process::exit(2);
    }

    info!(
        elements = result.document.element_count(),
        failures = result.failures.len(),
        "Capture complete."
    );
    if !result.failures.is_empty() {
        std::process::exit(1);
    }
}

fn parse_metadata(entries: &[String]) -> Result<Vec<(String, ScriptValue)>, String> {
    let mut metadata = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some((name, value)) = entry.split_once('=') else {
            return Err(format!("metadata '{entry}' is not NAME=VALUE"));
        };
        let value = if let Ok(int) = value.parse::<i64>() {
            ScriptValue::Int(int)
        } else if let Ok(float) = value.parse::<f64>() {
            ScriptValue::Float(float)
        } else {
            ScriptValue::Str(value.to_string())
        };
        metadata.push((name.to_string(), value));
    }
    Ok(metadata)
}
