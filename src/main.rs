use assessment_backend::{
    config::{get_config, init_config},
    database::pool::{create_pool, run_migrations},
    routes,
    services::notification_service::NotificationService,
    AppState,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();
    init_config()?;
    let config = get_config();

    let pool = create_pool().await?;
    run_migrations(&pool).await?;

    let app_state = AppState::new(pool.clone());

    match &config.notification_webhook_url {
        Some(url) => {
            let notif = NotificationService::new(pool.clone(), url.clone());
            info!(target_url = %url, "starting notification delivery worker");
            tokio::spawn(async move {
                loop {
                    match notif.run_once().await {
                        Ok(true) => {}
                        Ok(false) => {
                            tokio::time::sleep(Duration::from_millis(1000)).await;
                        }
                        Err(e) => {
                            tracing::error!(error = ?e, "Notification worker error");
                            tokio::time::sleep(Duration::from_secs(2)).await;
                        }
                    }
                }
            });
        }
        None => info!("NOTIFICATION_WEBHOOK_URL not set; events will only be logged"),
    }

    let app = routes::app(app_state);

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
