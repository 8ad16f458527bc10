#[cfg(feature = "multi-thread")]
use ipgeo::config::ConfigThreads;
use ipgeo::config::{parse_config, Config};
use ipgeo::geo::GeoDb;
use ipgeo::service::{serve, IpGeoService};

use hyper::server::conn::AddrIncoming;
use std::sync::Arc;
use std::time::Duration;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            (Err(error), _) | (_, Err(error)) => {
                log::error!("cannot listen for termination signals, falling back to ctrl-c: {error}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    log::info!("shutdown signal received, stopping server");
}

async fn async_main(config: Config) -> anyhow::Result<()> {
    let host = config.host;
    let shutdown_timeout: Duration = config.shutdown_timeout.into();

    simple_logger::init_with_level(config.log_level)?;

    let geo_db: Arc<GeoDb> = Arc::new(config.geodb.build());
    if let Err(error) = geo_db.start().await {
        log::error!("{error}");
        return Err(error.into());
    }

    let ipgeo_service = Arc::new(IpGeoService::from_config(&config, Arc::clone(&geo_db)));

    let incoming = AddrIncoming::bind(&host)?;
    log::info!("listening on {}", incoming.local_addr());

    if let Err(e) = serve(incoming, ipgeo_service, shutdown_signal(), shutdown_timeout).await {
        log::error!("server error: {}", e);
    }

    if tokio::time::timeout(shutdown_timeout, geo_db.stop())
        .await
        .is_err()
    {
        log::warn!(
            "database updates did not stop within {}s",
            shutdown_timeout.as_secs()
        );
    }
    log::info!("server stopped");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ipgeo.toml".to_owned());

    let config = parse_config(&config_path)?;

    #[cfg(feature = "multi-thread")]
    let mut runtime_builder = match config.threads {
        ConfigThreads::Custom(threads) => match threads.into() {
            1 => tokio::runtime::Builder::new_current_thread(),
            threads => {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                builder.worker_threads(threads);
                builder
            }
        },
        ConfigThreads::Cores => tokio::runtime::Builder::new_multi_thread(),
    };
    #[cfg(not(feature = "multi-thread"))]
    let mut runtime_builder = tokio::runtime::Builder::new_current_thread();
    let runtime = runtime_builder.enable_all().build()?;

    runtime.block_on(async_main(config))
}
