use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use booster::api::{self, StaticInfo};
use booster::core::source::{Balancer, Dialer, Listener, SourceStore, StickyPolicy};
use booster::proxy::{self, Proto};

// Filled in during release builds.
const VERSION: &str = env!("CARGO_PKG_VERSION");
const COMMIT: Option<&str> = option_env!("BOOSTER_COMMIT");
const BUILD_TIME: Option<&str> = option_env!("BOOSTER_BUILD_TIME");

#[derive(Debug, Parser)]
#[command(
    name = "booster",
    about = "A local proxy that aggregates bandwidth across multiple network egress interfaces"
)]
struct Args {
    /// Proxy server listening port.
    #[arg(long, default_value_t = 1080)]
    proxy_port: u16,

    /// Proxy protocol spoken to clients. Available protocols: http, socks5.
    #[arg(long, default_value = "socks5")]
    proto: Proto,

    /// API server listening port.
    #[arg(long, default_value_t = 8080)]
    api_port: u16,

    /// Interface table poll interval in milliseconds.
    #[arg(long, default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Pin every target to the first source that served it.
    #[arg(long)]
    sticky: bool,

    /// Print also debug messages.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    booster::logging::init_logging(args.verbose);

    let version = VERSION;
    let commit = COMMIT.unwrap_or("N/A");
    let build_time = BUILD_TIME.unwrap_or("N/A");
    tracing::info!(
        target = "app",
        version,
        commit,
        build_time,
        "booster starting"
    );

    let store = Arc::new(SourceStore::new());
    let balancer = Arc::new(Balancer::new(store.clone()));
    let dialer = Arc::new(Dialer::new(balancer));
    let listener = Arc::new(Listener::with_poll_interval(
        store.clone(),
        Duration::from_millis(args.poll_interval_ms),
    ));

    if args.sticky {
        store.add_policy(Arc::new(StickyPolicy::new("cli", dialer.history_lookup())));
    }

    let info = StaticInfo {
        version: version.to_string(),
        commit: commit.to_string(),
        build_time: build_time.to_string(),
        proxy_port: args.proxy_port,
        proxy_proto: args.proto.as_str().to_string(),
    };

    let token = CancellationToken::new();

    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target = "app", "shutdown signal received");
            signal_token.cancel();
        }
    });

    let mut listener_task = {
        let listener = listener.clone();
        let token = token.clone();
        tokio::spawn(async move { listener.run(token).await })
    };
    let mut proxy_task = {
        let dialer = dialer.clone();
        let token = token.clone();
        tokio::spawn(async move { proxy::serve(args.proto, args.proxy_port, dialer, token).await })
    };
    let mut api_task = {
        let store = store.clone();
        let dialer = dialer.clone();
        let token = token.clone();
        tokio::spawn(
            async move { api::serve(args.api_port, store, dialer, info, token).await },
        )
    };

    // A task finishing before cancellation takes the process down; the
    // token tears the others down on the way out.
    let early = tokio::select! {
        r = &mut listener_task => Some(flatten(r, "listener")),
        r = &mut proxy_task => Some(flatten(r, "proxy server")),
        r = &mut api_task => Some(flatten(r, "api server")),
        _ = token.cancelled() => None,
    };
    if let Some(result) = early {
        token.cancel();
        result?;
        anyhow::bail!("task exited unexpectedly");
    }

    // Cancelled: let every task run its teardown (the listener closes
    // the interfaces it installed) before exiting.
    let (l, p, a) = tokio::join!(listener_task, proxy_task, api_task);
    flatten(l, "listener")?;
    flatten(p, "proxy server")?;
    flatten(a, "api server")?;

    tracing::info!(target = "app", "booster stopped");
    Ok(())
}

fn flatten(
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
    what: &str,
) -> Result<()> {
    joined
        .with_context(|| format!("{what} task panicked"))?
        .with_context(|| format!("{what} failed"))
}
