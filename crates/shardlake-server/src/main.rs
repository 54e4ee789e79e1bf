//! shardlake server binary.
//!
//! Opens (or creates) a metadata journal, replays it, and serves the
//! resulting metastore over a Unix domain socket.

use std::path::PathBuf;

use shardlake_core::config::MetastoreConfig;
use shardlake_server::ShardlakeServer;
use shardlake_server::server::open_metastore;
use tracing::info;

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shardlake")
}

struct Args {
    journal: PathBuf,
    socket: PathBuf,
    config: Option<PathBuf>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut journal_path: Option<PathBuf> = None;
    let mut socket_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let slot = match flag {
            "--journal" => &mut journal_path,
            "--socket" => &mut socket_path,
            "--config" => &mut config_path,
            other => usage(&format!("unknown argument: {other}")),
        };
        i += 1;
        match args.get(i) {
            Some(value) => *slot = Some(PathBuf::from(value)),
            None => usage(&format!("{flag} needs a value")),
        }
        i += 1;
    }

    let data_dir = default_data_dir();
    Args {
        journal: journal_path.unwrap_or_else(|| data_dir.join("meta.journal")),
        socket: socket_path.unwrap_or_else(|| data_dir.join("server.sock")),
        config: config_path,
    }
}

fn usage(error: &str) -> ! {
    eprintln!("{error}");
    eprintln!("usage: shardlake-server [--journal PATH] [--socket PATH] [--config PATH]");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    let config = match &args.config {
        Some(path) => MetastoreConfig::from_json_file(path)?,
        None => MetastoreConfig::default(),
    };

    if let Some(parent) = args.journal.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = args.socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!(
        journal = %args.journal.display(),
        socket = %args.socket.display(),
        sync = ?config.journal_sync,
        "starting"
    );

    let (metastore, stats) = open_metastore(&args.journal, config)?;
    info!(
        records = stats.applied,
        tables = stats.tables_created.saturating_sub(stats.tables_dropped),
        pending_shards = metastore.shard_deleter().pending_count(),
        "catalog recovered"
    );

    let server = ShardlakeServer::new(metastore, args.socket);
    server.run().await?;

    Ok(())
}
