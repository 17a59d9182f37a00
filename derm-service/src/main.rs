use derm_service::{LogFormat, ServiceConfig, create_app, create_app_state};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

const DEFAULT_LOG_FILTER: &str = "derm_service=debug,derm_flow=debug,tower_http=debug";

/// Install the global subscriber; `RUST_LOG` overrides the default filter.
fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let output = match format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(config.log_format);

    let app_state = match create_app_state(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize services: {}", e);
            std::process::exit(1);
        }
    };

    let app = create_app(app_state, config.max_upload_bytes);
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("DermNet Assistant starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Start a session: POST http://{}/sessions", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
