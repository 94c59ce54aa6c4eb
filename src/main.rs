use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use thumbcache::application::CacheSettingsService;
use thumbcache::infrastructure::{AppConfig, CliArgs, Command, ImageCacheService, StorageManager};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new().unwrap_or_else(|_| {
        StorageManager::with_dir(std::env::temp_dir().join(thumbcache::NAME))
    });
    let mut config = storage
        .load_config(args.config.as_deref())
        .wrap_err("Failed to load config file")?;
    config.merge_with_args(args);
    Ok(config)
}

async fn run(command: Command, cache: Arc<ImageCacheService>) -> Result<()> {
    let settings = CacheSettingsService::new(cache.clone());

    match command {
        Command::Fetch { urls } => {
            let loads = urls.iter().map(|url| {
                let cache = cache.clone();
                async move { (url, cache.load(url).await) }
            });
            for (url, image) in futures_util::future::join_all(loads).await {
                match image {
                    Some(img) => println!(
                        "{url}\t{}x{}\t{} bytes",
                        img.width(),
                        img.height(),
                        img.encoded_size()
                    ),
                    None => println!("{url}\tunavailable"),
                }
            }
        }
        Command::Preload { urls } => {
            cache.preload(urls.as_slice());
            let loads = urls.iter().map(|url| cache.load(url));
            let cached = futures_util::future::join_all(loads)
                .await
                .into_iter()
                .filter(Option::is_some)
                .count();
            println!("Cached {cached}/{} images", urls.len());
            println!("Cache size: {}", settings.cache_size_label().await);
        }
        Command::Size => {
            println!("Cache size: {}", settings.cache_size_label().await);
        }
        Command::Clear => {
            println!("Cache size: {}", settings.clear_cache().await);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = thumbcache::VERSION, "Starting {}", thumbcache::NAME);

    let cache = Arc::new(ImageCacheService::new(&config.cache)?);
    let result = run(args.command, cache.clone()).await;
    cache.shutdown();

    result
}
