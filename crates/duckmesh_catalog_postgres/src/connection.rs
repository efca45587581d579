//! Connection setup, grounded on `postgres/src/connection.rs`: rustls with
//! the platform's native root certificates, and a background task driving
//! the connection that logs and exits on error rather than panicking the
//! caller's task.
use std::sync::Arc;

use tokio_postgres::Config;

pub async fn connect(config: &Config) -> anyhow::Result<tokio_postgres::Client> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = config
        .connect(tls)
        .await
        .map_err(|e| anyhow::Error::new(e).context("connecting to catalog postgres"))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("catalog postgres connection error: {e:#}");
        }
    });

    Ok(client)
}

pub fn config_from_url(url: &str) -> anyhow::Result<Config> {
    url.parse::<Config>()
        .map_err(|e| anyhow::Error::new(e).context("invalid catalog postgres url"))
}

pub type SharedClient = Arc<tokio_postgres::Client>;
