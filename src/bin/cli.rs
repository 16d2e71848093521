//! cnav CLI - C symbol indexing daemon and its query client.
//!
//! Usage:
//!   cnav daemon [ROOTS..]          # Index and watch, serve queries
//!   cnav symbol <FILE:LINE:COL>    # Symbol at a position
//!   cnav lookup <USR>              # Symbol by USR
//!   cnav includers <HEADER>        # Files including a header
//!   cnav status                    # Indexer progress
//!   cnav ping                      # Is the daemon alive
//!   cnav shutdown                  # Stop the daemon

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cnav::config::Config;
use cnav::daemon::{is_daemon_running, run_daemon, send_request, Request, Response};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cnav")]
#[command(about = "cnav - incremental C symbol index", long_about = None)]
struct Cli {
    /// Project root (locates the default socket and config file)
    #[arg(short, long, default_value = ".", global = true)]
    root: PathBuf,

    /// Daemon socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Config file (default: <root>/.cnav/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexing daemon in the foreground
    Daemon {
        /// Directories to index (default: --root)
        roots: Vec<PathBuf>,

        /// Parser workers (default: one per core)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds between index flushes
        #[arg(long)]
        flush_interval: Option<u64>,

        /// Index image path
        #[arg(long)]
        db: Option<PathBuf>,

        /// System include directory; repeat for several
        #[arg(long = "system-include")]
        system_include: Vec<PathBuf>,

        /// Index once at startup without watching for changes
        #[arg(long)]
        no_watch: bool,
    },

    /// Show the symbol declared or used at FILE:LINE:COL
    Symbol {
        /// Position, e.g. src/main.c:12:5
        position: String,
    },

    /// Show a symbol by USR
    Lookup { usr: String },

    /// List files that include a header
    Includers { header: PathBuf },

    /// Show indexer progress and database counts
    Status,

    /// Check whether the daemon is running
    Ping,

    /// Stop the daemon
    Shutdown,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.root, cli.config.as_deref())?;
    if config.roots == Config::default().roots {
        config.roots = vec![cli.root.clone()];
    }
    if let Some(socket) = cli.socket {
        config.socket_path = Some(socket);
    }

    let request = match cli.command {
        Commands::Daemon {
            roots,
            workers,
            flush_interval,
            db,
            system_include,
            no_watch,
        } => {
            if !roots.is_empty() {
                config.roots = roots;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            if let Some(secs) = flush_interval {
                config.flush_interval_secs = secs;
            }
            if db.is_some() {
                config.db_path = db;
            }
            if !system_include.is_empty() {
                config.system_include_dirs = system_include;
            }
            if no_watch {
                config.watch = false;
            }
            config.validate()?;
            return daemon(config);
        }
        Commands::Symbol { position } => {
            let (file, line, column) = parse_position(&position)?;
            Request::Symbol { file, line, column }
        }
        Commands::Lookup { usr } => Request::Lookup { usr },
        Commands::Includers { header } => Request::Includers { header },
        Commands::Status => Request::Status,
        Commands::Ping => Request::Ping,
        Commands::Shutdown => Request::Shutdown,
    };

    query(&config, &request)
}

fn load_config(root: &Path, explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let default = Config::default_file(root);
    if default.exists() {
        return Config::load(&default).with_context(|| format!("loading {}", default.display()));
    }
    Ok(Config::default())
}

fn daemon(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_daemon(config))
}

fn query(config: &Config, request: &Request) -> Result<()> {
    let socket = config.socket_path();
    if !socket.exists() && !is_daemon_running(&config.pid_path()) {
        bail!("no daemon running (socket {} not found)", socket.display());
    }

    match send_request(&socket, request)? {
        Response::Ok { data } => println!("{}", serde_json::to_string_pretty(&data)?),
        Response::Error { message } => bail!(message),
        Response::Pong => println!("pong"),
        Response::Goodbye => println!("daemon stopping"),
    }
    Ok(())
}

/// Split `FILE:LINE:COL`, taking line and column from the right so that
/// file names containing `:` survive.
fn parse_position(position: &str) -> Result<(PathBuf, u32, u32)> {
    let mut parts = position.rsplitn(3, ':');
    let column = parts.next();
    let line = parts.next();
    let file = parts.next();
    match (file, line, column) {
        (Some(file), Some(line), Some(column)) if !file.is_empty() => Ok((
            PathBuf::from(file),
            line.parse().with_context(|| format!("bad line in {}", position))?,
            column.parse().with_context(|| format!("bad column in {}", position))?,
        )),
        _ => bail!("expected FILE:LINE:COL, got {}", position),
    }
}
