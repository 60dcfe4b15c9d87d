//! Tether CLI - evaluate notebook cells across remote targets.

mod devices;
mod logging;
mod run;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tether_core::{
    DeviceStore, ExecConnector, JsonConfigStore, Kernel, KernelOptions, MemoryRegistry,
    SubprocessHost, TetherDirs,
};

use crate::logging::ReloadLogControl;
use crate::sink::StdSink;

/// Overrides the state directory (default `~/.tether`).
const HOME_ENV: &str = "TETHER_HOME";

/// Overrides the command that runs host-native code.
const INTERPRETER_ENV: &str = "TETHER_HOST_INTERPRETER";

/// Notebook key used when a cell does not come from a file.
const EVAL_SESSION: &str = "eval";

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Notebook kernel that fans cells out across remote targets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Per-execution timeout on a target, in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Command that runs host-native code (%%host sections)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Notebook key for persisted state (default device, working directory)
    #[arg(long, global = true)]
    session: Option<String>,

    /// Suppress target output
    #[arg(long, global = true)]
    silent: bool,

    /// Disable ANSI styles
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate files, each as one cell
    Run {
        /// Cell files, evaluated in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Evaluate one cell
    Eval {
        /// Cell source; read from stdin when omitted
        code: Option<String>,
    },

    /// List registered devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register a device
    Register {
        /// Device url, e.g. exec:///bin/sh
        url: String,

        /// Device name (default derived from the url)
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove a registered device
    Unregister {
        /// Device name, uid or url
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_control = Arc::new(logging::init(cli.verbose));

    let home = std::env::var_os(HOME_ENV).map(PathBuf::from);
    let dirs = TetherDirs::resolve(home.as_deref())?;
    let registry = MemoryRegistry::new()
        .with_connector(Arc::new(ExecConnector::new()))
        .with_store(DeviceStore::new(&dirs.devices_file))?;

    match &cli.command {
        Commands::Run { files } => {
            let session = session_key(&cli, files.first().map(PathBuf::as_path));
            let kernel = build_kernel(&cli, &dirs, registry, &session, log_control)?;
            run::files(kernel, files, cli.silent).await?;
        }
        Commands::Eval { code } => {
            let session = session_key(&cli, None);
            let kernel = build_kernel(&cli, &dirs, registry, &session, log_control)?;
            run::eval(kernel, code.clone(), cli.silent).await?;
        }
        Commands::Devices { json } => devices::list(&registry, *json)?,
        Commands::Register { url, name } => devices::register(&registry, url, name.as_deref())?,
        Commands::Unregister { name } => devices::unregister(&registry, name)?,
    }

    Ok(())
}

/// Records are keyed by `--session`, else the canonical path of the first
/// file, else a shared key for inline cells.
fn session_key(cli: &Cli, file: Option<&Path>) -> String {
    if let Some(session) = &cli.session {
        return session.clone();
    }
    match file {
        Some(path) => std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string(),
        None => EVAL_SESSION.to_string(),
    }
}

fn build_kernel(
    cli: &Cli,
    dirs: &TetherDirs,
    registry: MemoryRegistry,
    session: &str,
    log_control: Arc<ReloadLogControl>,
) -> anyhow::Result<Kernel> {
    let mut options = KernelOptions {
        timeout: cli.timeout.map(Duration::from_secs),
        color: !cli.no_color && StdSink::color_supported(),
        ..KernelOptions::default()
    };
    if let Some(interpreter) = cli
        .host
        .clone()
        .or_else(|| std::env::var(INTERPRETER_ENV).ok())
    {
        options.interpreter = interpreter;
    }
    tracing::debug!(%session, interpreter = %options.interpreter, "starting kernel");

    let host = SubprocessHost::from_options(&options)?;
    let kernel = Kernel::builder(Arc::new(registry), Arc::new(StdSink))
        .host(Box::new(host))
        .config_store(Box::new(JsonConfigStore::new(&dirs.connect_rc_file, session)))
        .log_control(log_control)
        .options(options)
        .build()?;
    Ok(kernel)
}
