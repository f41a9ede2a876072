use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use feed_core::{
    FeedConfig, FeedParams, FetchCoordinator, FetchOutcome, HttpTransport, JsonPageStore,
    PagedFeedCache,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    Remote,
    Local,
    LocalOrRemote,
    RemoteOrLocal,
    LocalThenRemote,
}

#[derive(Debug, Parser)]
#[command(name = "feedcache", version, about = "Page through a feed endpoint with a local cache")]
struct Args {
    /// Endpoint path relative to the configured base url
    endpoint: String,

    /// Page size (defaults to the configured limit)
    #[arg(long)]
    limit: Option<usize>,

    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,

    /// Extra query parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Config file (defaults to ~/.config/feedcache/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Strategy::LocalThenRemote)]
    strategy: Strategy,

    #[arg(long)]
    as_activities: bool,

    /// Do not write remote pages to the local store
    #[arg(long)]
    no_sync: bool,

    /// Print entities as JSON
    #[arg(long)]
    json: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FeedConfig::from_file(path),
        None => FeedConfig::load(),
    };
    let transport = HttpTransport::from_config(&config)?;
    let store = JsonPageStore::load_from(FeedConfig::config_dir().join("pages.json"))
        .await
        .with_max_per_key(config.max_entities_per_key);
    let coordinator = FetchCoordinator::new(Arc::new(transport)).with_local_store(Arc::new(store));
    let cache = PagedFeedCache::new(coordinator);

    let params: FeedParams = args
        .params
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.as_str())))
        .collect();
    cache
        .set_endpoint(&args.endpoint)
        .set_params(params)
        .set_limit(args.limit.unwrap_or(config.default_limit))
        .set_as_activities(args.as_activities);
    if args.no_sync {
        cache.no_sync();
    }

    let outcome = match args.strategy {
        Strategy::Remote => cache.fetch(false, true).await,
        Strategy::Local => cache.fetch(true, true).await,
        Strategy::LocalOrRemote => cache.fetch_local_or_remote(false).await,
        Strategy::RemoteOrLocal => cache.fetch_remote_or_local(false).await,
        Strategy::LocalThenRemote => cache.fetch_local_then_remote(false).await,
    };
    log_outcome(1, outcome);

    for page in 2..=args.pages {
        if !cache.has_more() {
            info!("no further pages");
            break;
        }
        log_outcome(page, cache.load_more().await);
    }

    let entities = cache.entities();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&entities)?);
    } else {
        for entity in &entities {
            let owner = entity.owner_guid.as_deref().unwrap_or("-");
            let marker = if entity.boosted { " [boost]" } else { "" };
            println!("{:>4}  {}  owner={}{}", entity.position, entity.urn, owner, marker);
        }
    }

    if cache.error_loading() {
        return Err(format!("failed to load {}", args.endpoint).into());
    }
    Ok(())
}

fn log_outcome(page: usize, outcome: FetchOutcome) {
    match outcome {
        FetchOutcome::Applied { count } => info!(page, count, "page loaded"),
        FetchOutcome::Failed => warn!(page, "page failed to load"),
        other => info!(page, outcome = ?other, "page not applied"),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
