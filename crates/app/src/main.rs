mod applications;
mod auth;
mod companies;
mod dispatch;
mod documents;
mod problem;
mod reminders;
mod roles;
mod router;
mod stages;
mod telemetry;
#[cfg(test)]
mod testutil;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use jobtrail_blobstore::{BlobStore, BlobStoreConfig};
use jobtrail_mailer::MailClient;
use jobtrail_storage::Database;
use jobtrail_util::{load_env_file, AppConfig};

use auth::TokenService;
use dispatch::ReminderDispatcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    match &config.mail {
        Some(mail) => {
            let relay_url = Url::parse(&mail.relay_url)?;
            let notifier = Arc::new(MailClient::new(
                relay_url,
                mail.api_key.clone(),
                mail.sender.clone(),
                Client::new(),
            ));
            let interval = Duration::from_secs(config.dispatch_interval_secs);
            ReminderDispatcher::new(database.clone(), notifier)
                .with_interval(interval)
                .spawn();
            info!(
                stage = "dispatch",
                interval_secs = config.dispatch_interval_secs,
                "reminder dispatcher started"
            );
        }
        None => {
            warn!(stage = "dispatch", "mail relay not configured; reminder emails disabled");
        }
    }

    let blob = config.blob.as_ref().map(|blob| {
        Arc::new(BlobStore::new(BlobStoreConfig {
            bucket: blob.bucket.clone(),
            region: blob.region.clone(),
            access_key_id: blob.access_key_id.clone(),
            secret_access_key: blob.secret_access_key.clone(),
        }))
    });
    if blob.is_none() {
        warn!(stage = "app", "object storage not configured; document presigning disabled");
    }

    let tokens = TokenService::new(config.token_secret.as_bytes());
    let state = router::AppState::new(metrics, database, tokens, blob);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
