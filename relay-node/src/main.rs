// Relayer p2p node: load config and identity, bootstrap the host, serve until shutdown.

mod config;
mod logger;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use relay_p2p::{create_host, load_keypair, save_keypair, Host, Keypair, SecureStream};
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: relay-node [--config <path>] [--generate-key <path>] [--version]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    generate_key: Option<PathBuf>,
    version: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--version" | "-V" => out.version = true,
            "--config" | "-c" => {
                let p = it.next().context("--config needs a path")?;
                out.config = Some(PathBuf::from(p));
            }
            "--generate-key" => {
                let p = it.next().context("--generate-key needs a path")?;
                out.generate_key = Some(PathBuf::from(p));
            }
            other => anyhow::bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.version {
        println!("relay-node {}", VERSION);
        return Ok(());
    }
    if let Some(path) = &args.generate_key {
        let kp = Keypair::generate_ed25519();
        save_keypair(path, &kp)
            .with_context(|| format!("writing key to {}", path.display()))?;
        println!("{}", kp.public().to_peer_id());
        return Ok(());
    }

    let cfg = config::load(args.config.as_deref())?;
    logger::init(&cfg.log_level)?;
    cfg.p2p.validate().context("invalid p2p config")?;

    let identity = match &cfg.key_path {
        Some(p) => Some(
            load_keypair(p).with_context(|| format!("loading identity key {}", p.display()))?,
        ),
        None => {
            warn!("no key_path configured");
            None
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let host = Arc::new(create_host(identity, &cfg.p2p).await?);
        tokio::spawn(serve_inbound(host.clone()));
        shutdown_signal().await?;
        info!(peer_id = %host.id(), "shutting down");
        Ok::<_, anyhow::Error>(())
    })
}

/// Log inbound peers and drain their messages; message handling lives above this node.
async fn serve_inbound(host: Arc<Host>) {
    while let Some(stream) = host.accept().await {
        info!(peer_id = %stream.remote_peer(), remote = %stream.remote_addr(), "peer connected");
        tokio::spawn(drain(stream));
    }
}

async fn drain(mut stream: SecureStream) {
    let peer = stream.remote_peer();
    loop {
        match stream.recv().await {
            Ok(msg) => debug!(peer_id = %peer, len = msg.len(), "message received"),
            Err(e) if e.is_closed() => {
                info!(peer_id = %peer, "peer disconnected");
                break;
            }
            Err(e) => {
                warn!(peer_id = %peer, error = %e, "connection error");
                break;
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
