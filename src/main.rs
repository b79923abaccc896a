use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nof1_tracker::application::{CycleRunner, RunnerSettings, SeasonManager};
use nof1_tracker::cli::{self, Command};
use nof1_tracker::config::TrackerConfig;
use nof1_tracker::infrastructure::HttpPageSource;
use nof1_tracker::persistence::{init_database_with, DataPersistence, DatabaseConfig};
use nof1_tracker::rate_limit::create_rate_limiter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match cli::parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, cli::HELP);
            std::process::exit(2);
        }
    };
    if args.command == Command::Help {
        println!("{}", cli::HELP);
        return Ok(());
    }

    dotenvy::dotenv().ok();

    let default_directive = if args.verbose {
        "nof1_tracker=debug"
    } else {
        "nof1_tracker=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = TrackerConfig::from_env();
    if let Some(max_models) = args.max_models {
        config.max_models = max_models;
    }

    // Store unreachable at startup is fatal
    let db_config = DatabaseConfig::from_env();
    let pool = init_database_with(&db_config).await.map_err(|e| {
        error!("Cannot open store at {}: {}", db_config.url, e);
        e
    })?;

    let seasons = Arc::new(SeasonManager::new(
        pool.clone(),
        config.season_initial_capital,
    ));
    let persistence = Arc::new(DataPersistence::new(pool));

    match args.command {
        Command::SeasonShow => {
            match seasons.active().await? {
                Some(season) => println!(
                    "Active season {} since {} (initial capital {:.2})",
                    season.label,
                    season.start_date.to_rfc3339(),
                    season.initial_capital
                ),
                None => println!("No active season"),
            }
            for season in seasons.list().await? {
                if !season.is_active() {
                    println!(
                        "  {} {} ({} .. {})",
                        season.label,
                        season.status,
                        season.start_date.to_rfc3339(),
                        season
                            .end_date
                            .map(|d| d.to_rfc3339())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }
        Command::SeasonTransition { label } => {
            let transition = seasons.transition(&label).await?;
            match transition.completed {
                Some(previous) => println!(
                    "Season {} completed; season {} is now active",
                    previous.label, transition.active.label
                ),
                None => println!("Season {} is now active", transition.active.label),
            }
        }
        Command::Once | Command::Continuous => {
            let limiter = create_rate_limiter(config.rate_limiter())?;
            let source = Arc::new(HttpPageSource::from_config(&config)?);
            let runner = Arc::new(CycleRunner::new(
                source,
                limiter,
                persistence.clone(),
                seasons.clone(),
                RunnerSettings::from(&config),
            ));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            });

            if args.command == Command::Continuous {
                let every = args.interval.unwrap_or_else(|| config.refresh_interval());
                runner.run_continuous(every, shutdown_rx).await;
            } else {
                match runner.run_once(shutdown_rx).await {
                    Ok(result) if result.is_success() => {}
                    Ok(result) => warn!("Cycle finished with status {}", result.status),
                    Err(e) => error!("Cycle failed: {}", e),
                }
            }
        }
        Command::Help => {}
    }

    persistence.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
