use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use gatewaysim::config::Config;
use gatewaysim::gateway::hub::Hub;
use gatewaysim::state::AppState;
use gatewaysim::voice::transport::VoiceServer;

/// Gateway protocol simulator with a raw voice transport.
#[derive(Debug, Parser)]
#[command(name = "gatewaysim", version)]
struct Cli {
    /// HTTP and gateway port (overrides PORT)
    #[arg(long)]
    port: Option<u16>,
    /// Voice transport port (overrides GATEWAYSIM_VOICE_PORT)
    #[arg(long)]
    voice_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatewaysim=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(voice_port) = cli.voice_port {
        config.voice_port = voice_port;
        if std::env::var("GATEWAYSIM_VOICE_ENDPOINT").is_err() {
            config.gateway.voice_endpoint = format!("localhost:{voice_port}");
        }
    }
    print_banner(&config);

    let shutdown = CancellationToken::new();
    let (hub, hub_task) = Hub::spawn(
        config.gateway.heartbeat_interval.as_millis() as u64,
        shutdown.clone(),
    );
    let state = AppState::new(hub, config.gateway.clone());

    let voice = VoiceServer::bind(
        ("0.0.0.0", config.voice_port),
        state.clone(),
        config.voice_read_timeout,
    )
    .await
    .expect("failed to bind voice transport");
    let voice_port = voice
        .local_addr()
        .expect("failed to get voice address")
        .port();
    let voice_task = tokio::spawn(voice.run(shutdown.clone()));

    let app = gatewaysim::routes::router(state);

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("failed to bind");

    let actual_port = listener
        .local_addr()
        .expect("failed to get local address")
        .port();
    eprintln!("  \x1b[32m→ gateway on 0.0.0.0:{actual_port}, voice on 0.0.0.0:{voice_port}\x1b[0m");
    eprintln!();

    let token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested");
        token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .expect("server error");

    let _ = voice_task.await;
    let _ = hub_task.await;
    tracing::info!("gatewaysim stopped");
}

fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");

    eprintln!();
    eprintln!("  \x1b[1;36mgatewaysim\x1b[0m \x1b[2mv{version}\x1b[0m");
    eprintln!();
    eprintln!("  \x1b[2mport\x1b[0m         {}", config.port);
    eprintln!("  \x1b[2mvoice port\x1b[0m   {}", config.voice_port);
    eprintln!("  \x1b[2mvoice\x1b[0m        {}", config.gateway.voice_endpoint);
    eprintln!(
        "  \x1b[2mheartbeat\x1b[0m    {}ms (timeout {}s)",
        config.gateway.heartbeat_interval.as_millis(),
        config.gateway.heartbeat_timeout.as_secs()
    );
    eprintln!();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
