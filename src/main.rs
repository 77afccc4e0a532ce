use cell_debugger::DebuggerConfig;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cell_debugger")]
#[command(about = "DAP bridge for debugging incrementally compiled notebook cells", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the debug adapter on the STDIO control channel
    Serve {
        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Set log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Log output format
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Kernel process to attach to (defaults to the parent process)
        #[arg(long)]
        pid: Option<u32>,

        /// Path to the lldb-dap executable
        #[arg(long)]
        lldb_dap: Option<String>,
    },
}

fn init_tracing(verbose: bool, log_level: &str, format: LogFormat) {
    let level = if verbose { "debug" } else { log_level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the control channel
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            verbose,
            log_level,
            log_format,
            config,
            pid,
            lldb_dap,
        } => {
            init_tracing(verbose, &log_level, log_format);

            let mut config = match config {
                Some(path) => DebuggerConfig::load_from_path(path)?,
                None => DebuggerConfig::default(),
            };
            if pid.is_some() {
                config.engine.pid = pid;
            }
            if let Some(program) = lldb_dap {
                config.engine.program = program;
            }
            config.attach_to_parent_by_default()?;
            config.normalize()?;

            cell_debugger::serve(config).await?;
        }
    }

    Ok(())
}
