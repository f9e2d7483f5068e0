use envconfig::Envconfig;
use kube::Client;
use oprc_addon::{config::AddonOperatorConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube's rustls client needs a process-wide provider
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = AddonOperatorConfig::init_from_env()?.apply_profile_defaults();
    info!(?cfg, "Starting addon operator");

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
