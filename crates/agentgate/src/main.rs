//! agentgate - Entry Point
//!
//! OAuth 2.1 authorization/resource server for tool-calling agents.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use agentgate::{AuthServer, Config, IdentityProvider, ProviderKind};

#[derive(Parser, Debug)]
#[command(name = "agentgate")]
#[command(about = "OAuth 2.1 authorization server for tool-calling agents")]
#[command(version)]
struct Cli {
    /// HTTP server port
    #[arg(long, default_value = "8100", env = "PORT")]
    port: u16,

    /// Delegated identity provider (google or github)
    #[arg(long, default_value = "google", env = "AGENTGATE_PROVIDER")]
    provider: String,

    /// OAuth client id registered at the identity provider
    #[arg(long, env = "AGENTGATE_PROVIDER_CLIENT_ID")]
    provider_client_id: String,

    /// OAuth client secret registered at the identity provider
    #[arg(long, env = "AGENTGATE_PROVIDER_CLIENT_SECRET")]
    provider_client_secret: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    let config = Config::from_env()?;
    let kind = ProviderKind::parse(&cli.provider)
        .ok_or_else(|| anyhow::anyhow!("unsupported provider: {}", cli.provider))?;
    let idp = IdentityProvider::new(
        kind,
        cli.provider_client_id,
        cli.provider_client_secret,
        config.connect_timeout,
        config.upstream_timeout,
    )?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        issuer = %config.base_url,
        provider = kind.as_str(),
        lenient_registration = config.lenient_registration,
        "starting agentgate"
    );

    AuthServer::new(config, idp)?.run(cli.port).await
}
