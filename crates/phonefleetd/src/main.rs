mod wiring;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use phonefleet_config::FleetConfig;
use phonefleet_controlplane::{
    FileDeviceRepository, Scheduler, StatusSyncService, SyncOutcome, TokenRefreshService,
};
use phonefleet_provider::{ProviderRegistry, RateLimiter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phonefleetd")]
#[command(about = "クラウドフォン / 実機フリートのコントロールプレーン", long_about = None)]
#[command(version)]
struct Cli {
    /// 設定ファイル (省略時は PHONEFLEET_CONFIG とカレントディレクトリから検索)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// デバッグログを有効化
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 状態同期とトークン更新のループを起動
    Run,
    /// 1台のデバイス状態を今すぐ同期
    Sync {
        /// デバイスID
        device_id: String,
    },
    /// 1台のデバイスの接続情報を今すぐ更新
    RefreshToken {
        /// デバイスID
        device_id: String,
    },
    /// 設定済みのプロバイダを表示
    Providers,
    /// バージョン情報を表示
    Version,
}

struct Services {
    registry: Arc<ProviderRegistry>,
    status_sync: Arc<StatusSyncService>,
    token_refresh: Arc<TokenRefreshService>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Version => {
            println!("phonefleetd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Providers => {
            let config = load_config(cli.config.as_deref())?;
            let registry = wiring::build_registry(&config, Arc::new(RateLimiter::new()))?;
            print_providers(&config, &registry);
            Ok(())
        }
        Commands::Run => {
            let config = load_config(cli.config.as_deref())?;
            let services = build_services(&config).await?;
            run(&config, services).await
        }
        Commands::Sync { device_id } => {
            let config = load_config(cli.config.as_deref())?;
            let services = build_services(&config).await?;
            let outcome = services.status_sync.sync_device_status(&device_id).await?;
            match outcome {
                SyncOutcome::Updated { from, to } => println!(
                    "{} {}: {} → {}",
                    "✓".green(),
                    device_id.cyan(),
                    from,
                    to.to_string().green()
                ),
                SyncOutcome::Unchanged(status) => {
                    println!("{} {}: {} (変更なし)", "✓".green(), device_id.cyan(), status)
                }
            }
            Ok(())
        }
        Commands::RefreshToken { device_id } => {
            let config = load_config(cli.config.as_deref())?;
            let services = build_services(&config).await?;
            let info = services
                .token_refresh
                .refresh_device_token(&device_id)
                .await?;
            println!("{} {} の接続情報を更新しました", "✓".green(), device_id.cyan());
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    // -v は RUST_LOG より優先
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(explicit: Option<&std::path::Path>) -> Result<FleetConfig> {
    let (path, config) = match explicit {
        Some(path) => (path.to_path_buf(), phonefleet_config::load_config(path)?),
        None => phonefleet_config::load()?,
    };
    tracing::info!(
        path = %path.display(),
        providers = config.providers.len(),
        "Configuration loaded"
    );
    Ok(config)
}

async fn build_services(config: &FleetConfig) -> Result<Services> {
    let registry = Arc::new(wiring::build_registry(
        config,
        Arc::new(RateLimiter::new()),
    )?);
    let repository = Arc::new(
        FileDeviceRepository::open(&config.store)
            .await
            .with_context(|| format!("デバイスストアを開けません: {}", config.store.display()))?,
    );

    let status_sync = Arc::new(
        StatusSyncService::new(registry.clone(), repository.clone())
            .with_concurrency(config.sync.concurrency),
    );
    let token_refresh = Arc::new(
        TokenRefreshService::new(registry.clone(), repository)
            .with_concurrency(config.sync.concurrency),
    );

    Ok(Services {
        registry,
        status_sync,
        token_refresh,
    })
}

async fn run(config: &FleetConfig, services: Services) -> Result<()> {
    let scheduler_config = wiring::scheduler_config(config, &services.registry);
    tracing::info!(
        providers = ?services.registry.types(),
        status_interval_secs = scheduler_config.status_interval.as_secs(),
        "Starting phonefleetd"
    );
    for (provider, interval) in &scheduler_config.refresh_intervals {
        tracing::info!(
            provider = %provider,
            interval_secs = interval.as_secs(),
            "Token refresh scheduled"
        );
    }

    let mut scheduler = Scheduler::new(
        services.status_sync,
        services.token_refresh,
        scheduler_config,
    );
    scheduler.start()?;

    wait_for_shutdown().await?;
    tracing::info!("Shutdown signal received, stopping loops");
    scheduler.shutdown().await;
    tracing::info!("phonefleetd stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

fn print_providers(config: &FleetConfig, registry: &ProviderRegistry) {
    println!("{}", "Providers".bold());
    let providers = registry.list();
    for provider in &providers {
        let provider_type = provider.provider_type();
        let refresh = config
            .provider(provider_type)
            .and_then(|s| s.token_refresh_interval())
            .or_else(|| phonefleet_controlplane::default_refresh_interval(provider_type));
        let kind = if provider_type.is_cloud() { "cloud" } else { "local" };
        match refresh {
            Some(interval) => println!(
                "  {} {} ({}, token refresh {}s)",
                "●".green(),
                provider_type.to_string().cyan(),
                kind,
                interval.as_secs()
            ),
            None => println!(
                "  {} {} ({})",
                "●".green(),
                provider_type.to_string().cyan(),
                kind
            ),
        }
    }
    if providers.is_empty() {
        println!("  {}", "(プロバイダが設定されていません)".dimmed());
    }
    println!(
        "\n{} {}",
        "store:".dimmed(),
        config.store.display().to_string().dimmed()
    );
}

