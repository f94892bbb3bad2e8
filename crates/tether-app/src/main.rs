mod config;
mod host;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tether_db::settings;
use tether_pty::{DroppedFile, PtySpawner, ScpUploader, SessionRegistry, TransferService};

/// A terminal onto a remote shell that survives network drops.
///
/// Press Ctrl-] to close the session.
#[derive(Parser, Debug)]
#[command(name = "tether", author, version, about, long_about = None)]
struct Args {
    /// Remote host, as passed to ssh. Saved as the default for later runs.
    host: Option<String>,

    /// Settings database (default: ~/.tether/tether.db)
    #[arg(long, env = "TETHER_DB")]
    db: Option<PathBuf>,

    /// Persist a setting, e.g. --set reconnect_backoff_ms=2000. Exits
    /// afterwards unless a host is also given.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Print every setting and exit
    #[arg(long)]
    list_settings: bool,

    /// Upload a file once connected and paste its remote path
    #[arg(long = "upload", value_name = "FILE")]
    upload: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up the global ~/.tether directory.
    let tether_home = home_dir()
        .ok_or("could not determine home directory")?
        .join(".tether");
    std::fs::create_dir_all(&tether_home)?;
    init_logging(&tether_home)?;

    // Open (or create) the settings database and seed defaults on first launch.
    let db_path = args.db.clone().unwrap_or_else(|| tether_home.join("tether.db"));
    let db = tether_db::open(&db_path)?;
    config::seed_defaults(&db)?;

    if let Some(host) = &args.host {
        settings::set(&db, config::SETTING_SSH_HOST, host)?;
    }
    for assignment in &args.set {
        config::apply_assignment(&db, assignment)?;
    }

    if args.list_settings {
        for setting in settings::list(&db)? {
            println!("{}", config::describe(&setting));
        }
        return Ok(());
    }
    if !args.set.is_empty() && args.host.is_none() {
        return Ok(());
    }

    let config = config::load(&db)?;
    if config.ssh.host.is_empty() {
        return Err("no host configured: run `tether <host>` or `tether --set ssh_host=<host>`".into());
    }
    let uploads = read_uploads(&args.upload)?;

    log::info!(
        "tether starting: host={} backoff={:?} db={}",
        config.ssh.host,
        config.tuning.reconnect_backoff,
        db_path.display()
    );

    let spawner = Arc::new(PtySpawner::ssh(&config.ssh));
    let uploader = Arc::new(ScpUploader::new(&config.ssh, &config.transfer));
    let transfer = TransferService::new(uploader, config.transfer.staging_dir.clone());
    let registry = Arc::new(SessionRegistry::new(spawner, config.tuning).with_transfer(transfer));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(host::run(registry, uploads))?;

    log::info!("tether exiting");
    Ok(())
}

/// Log to `~/.tether/tether.log`; the terminal itself belongs to the session.
fn init_logging(tether_home: &Path) -> std::io::Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(tether_home.join("tether.log"))?;

    env_logger::Builder::from_env(env_logger::Env::default().filter_or("TETHER_LOG", "info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .init();
    Ok(())
}

fn read_uploads(paths: &[PathBuf]) -> Result<Vec<DroppedFile>, Box<dyn std::error::Error>> {
    paths
        .iter()
        .map(|path| -> Result<DroppedFile, Box<dyn std::error::Error>> {
            let data = std::fs::read(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            Ok(DroppedFile { name, data })
        })
        .collect()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
