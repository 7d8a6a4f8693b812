use std::{path::PathBuf, time::Duration};

use clap::Parser;
use crauth::{Clock, ComputeResourceAuthenticator, ComputeResourceConfig, System, TokenStatus};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The file containing the compute resource's identity token
    #[clap(short = 'f', long, env = "CR_TOKEN_FILENAME")]
    identity_token_file: Option<PathBuf>,

    /// The base URL of the instance metadata service
    #[clap(short, long, env = "INSTANCE_METADATA_SERVICE_URL")]
    metadata_service_url: Option<String>,

    /// The name of the trusted profile to request tokens for
    #[clap(short = 'n', long, env = "IAM_PROFILE_NAME")]
    profile_name: Option<String>,

    /// The ID of the trusted profile to request tokens for
    #[clap(short = 'i', long, env = "IAM_PROFILE_ID")]
    profile_id: Option<String>,

    /// The base URL of the token exchange service
    #[clap(short, long, env = "AUTH_URL")]
    url: Option<String>,

    /// The client ID used to authenticate to the token exchange service
    #[clap(short, long, env = "CLIENT_ID")]
    client_id: Option<String>,

    /// The client secret used to authenticate to the token exchange service
    #[clap(short = 's', long, env = "CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// How often to ask for a token, in seconds
    #[clap(long, default_value_t = 5)]
    interval: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let mut config = ComputeResourceConfig::new();
    if let Some(path) = opts.identity_token_file {
        config = config.with_identity_token_file(path);
    }
    if let Some(url) = opts.metadata_service_url {
        config = config.with_metadata_service_url(url);
    }
    if let Some(name) = opts.profile_name {
        config = config.with_profile_name(name);
    }
    if let Some(id) = opts.profile_id {
        config = config.with_profile_id(id);
    }
    if let Some(url) = opts.url {
        config = config.with_url(url);
    }
    if let Some(client_id) = opts.client_id {
        config = config.with_client_id(client_id);
    }
    if let Some(client_secret) = opts.client_secret {
        config = config.with_client_secret(client_secret);
    }

    let authenticator = ComputeResourceAuthenticator::new(config)?;

    let token = authenticator.get_token().await?;
    tracing::info!(token = format_args!("{:#?}", token), "first access token");

    let mut interval = time::interval(Duration::from_secs(opts.interval));
    loop {
        interval.tick().await;

        if let Err(error) = authenticator.get_token().await {
            tracing::error!(
                error = &error as &dyn std::error::Error,
                "unable to obtain access token"
            );
            continue;
        }

        let Some(token) = authenticator.token_data() else {
            continue;
        };

        let status = token.token_status_with_clock(&System);
        let now = System.now();
        match status {
            TokenStatus::Fresh => {
                tracing::debug!(
                    ?status,
                    until_refresh = token.until_refresh_at(now).0,
                    until_expired = token.until_expired_at(now).0,
                    refreshing = authenticator.is_refreshing(),
                    "pulled token"
                )
            }
            TokenStatus::NeedsRefresh => {
                tracing::warn!(
                    ?status,
                    until_expired = token.until_expired_at(now).0,
                    refreshing = authenticator.is_refreshing(),
                    "pulled token"
                )
            }
            TokenStatus::Expired => {
                tracing::error!(?status, "pulled token")
            }
        }
    }
}
