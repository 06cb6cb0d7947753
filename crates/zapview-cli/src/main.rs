mod printer;
mod tracing_setup;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use zapview_core::config::{parse_color_mode, parse_relay_list};
use zapview_core::coordinator::CoordinatorServices;
use zapview_core::{ChannelDisplay, CoreConfig, SubscriptionCoordinator, ViewConfig, ViewId};

use crate::printer::Printer;

#[derive(Parser)]
#[command(name = "zapview")]
#[command(about = "Follow the zaps of a nostr note, article or profile")]
struct Cli {
    /// note, nevent, naddr, npub or nprofile identifier
    identifier: String,

    /// Comma separated relay URLs to read zaps from
    #[arg(long, short = 'r')]
    relays: String,

    /// Path to a JSON file with pipeline tunables
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Older pages to load after the initial load
    #[arg(long, short = 'p', default_value_t = 0)]
    pages: usize,

    /// Seconds to keep following live zaps before exiting
    #[arg(long, short = 'f', default_value_t = 3)]
    follow: u64,

    /// Number of zaps to print per list update
    #[arg(long)]
    max_visible: Option<usize>,

    /// Highlight large zaps ("true" or "false")
    #[arg(long)]
    color: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = tracing_setup::init_tracing() {
        eprintln!("Warning: {:#}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let core_config = load_core_config(cli.config.as_deref())?;

    let mut view_config = ViewConfig::new(cli.identifier.as_str(), parse_relay_list(&cli.relays))?
        .with_color_mode(parse_color_mode(cli.color.as_deref()));
    if let Some(max_visible) = cli.max_visible {
        view_config = view_config.with_max_visible(max_visible);
    }

    let (display, mut updates) = ChannelDisplay::new();
    let color_mode = view_config.color_mode();
    let printer = tokio::spawn(async move {
        let mut printer = Printer::new(color_mode);
        while let Some(update) = updates.recv().await {
            for line in printer.render(&update) {
                println!("{line}");
            }
        }
    });

    let services = CoordinatorServices::nostr(&core_config);
    let coordinator = SubscriptionCoordinator::new(core_config, services, Arc::new(display));
    let view_id = ViewId::generate();

    let load = coordinator.initialize(view_config, view_id.clone()).await?;
    info!(event_count = load.event_count, pagination_armed = load.pagination_armed, "initial load done");

    for page in 0..cli.pages {
        if !coordinator.is_pagination_armed(&view_id) {
            break;
        }
        let loaded = coordinator.load_more(&view_id).await;
        info!(page, loaded, "loaded older zaps");
    }

    if cli.follow > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cli.follow)) => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    coordinator.close(&view_id);
    coordinator.shutdown().await;
    drop(coordinator);

    // Background lookups may still hold the display; give the printer a moment
    if tokio::time::timeout(Duration::from_millis(500), printer).await.is_err() {
        warn!("printer did not drain before exit");
    }
    Ok(())
}

/// `--config` if given, else `<config dir>/zapview/config.json` when present,
/// else defaults
fn load_core_config(path: Option<&Path>) -> anyhow::Result<CoreConfig> {
    if let Some(path) = path {
        return CoreConfig::load(path);
    }
    match dirs::config_dir().map(|dir| dir.join("zapview").join("config.json")) {
        Some(path) if path.exists() => CoreConfig::load(&path),
        _ => Ok(CoreConfig::default()),
    }
}
