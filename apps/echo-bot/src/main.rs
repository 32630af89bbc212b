use std::sync::Arc;

use anyhow::Result;
use axum::serve;
use bot_builder::CloudAdapter;
use bot_builder::storage::storage_from_env;
use bot_telemetry::{TelemetryConfig, TracingTelemetryClient, init_telemetry, shutdown_telemetry};
use echo_bot::{AppState, EchoBot, EchoBotConfig, build_router};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env("echo-bot", env!("CARGO_PKG_VERSION")))?;

    let config = EchoBotConfig::from_env()?;
    let storage = storage_from_env().await?;

    let mut adapter = CloudAdapter::from_env();
    adapter.core_mut().set_on_turn_error(|ctx, err| {
        Box::pin(async move {
            error!(error = %format!("{err:#}"), "unhandled turn error");
            ctx.send_text("The bot encountered an error or bug.", None, None)
                .await?;
            Ok(())
        })
    });
    let bot = EchoBot::new(storage).with_telemetry_client(Arc::new(TracingTelemetryClient::new()));
    let router = build_router(AppState {
        adapter: Arc::new(adapter),
        bot: Arc::new(bot),
    });

    let listener = TcpListener::bind(config.addr).await?;
    info!("echo-bot listening on {}", config.addr);

    serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown_telemetry();
    Ok(())
}
