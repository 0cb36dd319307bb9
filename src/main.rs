use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gstaudit_agent::config::{default_config, load_config, ConfigLoader, LoggingConfig};
use gstaudit_agent::discovery::{InstanceRegistry, StaticTypeTree, TypeHierarchyWalker};
use gstaudit_agent::rpc::{listen, Agent};
use gstaudit_agent::{Address, SimulatedHost, TypeId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gstaudit-agent", version, about = "Heap discovery for GStreamer processes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan another process for instances of the given type ids
    Scan {
        #[arg(long)]
        pid: u32,

        /// Type id (GType value) to look for; hex with 0x or decimal
        #[arg(long = "type-id", required = true, value_parser = parse_type_id)]
        type_ids: Vec<TypeId>,

        #[arg(long, default_value = "gstaudit.toml")]
        config: PathBuf,
    },
    /// Serve the controller protocol against a simulated GStreamer process
    Serve {
        #[arg(long, default_value = "gstaudit.toml")]
        config: PathBuf,
    },
    /// Print or write the default configuration
    Config {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_type_id(value: &str) -> Result<TypeId, String> {
    value
        .parse::<Address>()
        .map(|a| TypeId(a.as_usize() as u64))
        .map_err(|e| e.to_string())
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn scan(pid: u32, type_ids: &[TypeId], config_path: &Path) -> Result<()> {
    use gstaudit_agent::host::{MemoryHost, ProcessMemory};

    let config = load_config(config_path)?;
    init_logging(&config.logging)?;

    let host = ProcessMemory::attach(pid)
        .with_context(|| format!("Cannot attach to pid {pid}"))?
        .with_pointer_size(config.discovery.profile.pointer_size);
    let modules = host.modules()?;
    if !modules.iter().any(|m| m.name.starts_with("libgstreamer-1.0")) {
        warn!(pid, "libgstreamer-1.0 is not loaded in the target");
    }
    info!(pid, modules = modules.len(), types = type_ids.len(), "Scanning");

    let options = config.scanner.scan_options(host.pointer_size());
    let walker = TypeHierarchyWalker::new(&host, options, &config.discovery.profile);
    // no type system to ask for children: each id is walked on its own
    let tree = StaticTypeTree::new();
    let mut registry = InstanceRegistry::new();
    for type_id in type_ids {
        walker.walk_and_discover(*type_id, &tree, &mut registry, |_| {});
    }

    println!("{}", serde_json::to_string_pretty(&registry.enumerate())?);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn scan(_pid: u32, _type_ids: &[TypeId], _config_path: &Path) -> Result<()> {
    anyhow::bail!("scanning another process is only supported on Linux")
}

fn serve_dry_run(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    init_logging(&config.logging)?;

    let host = Arc::new(SimulatedHost::dry_run(&config.discovery));
    let server = config.server.clone();
    let (agent, events) = Agent::new(host, config);
    info!(host = %server.host, port = server.port, "Starting dry-run agent");

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    runtime.block_on(listen(&server, agent, events))?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scan { pid, type_ids, config } => scan(pid, &type_ids, &config),
        Command::Serve { config } => serve_dry_run(&config),
        Command::Config { output } => {
            let config = default_config();
            match output {
                Some(path) => {
                    ConfigLoader::new(&path).save(&config)?;
                    eprintln!("Wrote default configuration to {}", path.display());
                }
                None => print!("{}", toml::to_string_pretty(&config)?),
            }
            Ok(())
        }
    }
}
