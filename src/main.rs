use std::net::SocketAddr;

use anyhow::Context;
use ip_firewall::utils::init_logging;
use ip_firewall::{Firewall, Settings};
use metrics_exporter_prometheus::PrometheusBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    tracing::info!("Starting IP firewall...");

    let settings = Settings::load().context("loading configuration")?;
    tracing::info!(
        cache = ?settings.storage.cache,
        persistence = ?settings.storage.persistence,
        "Configuration loaded successfully"
    );

    if settings.metrics.enabled {
        let listen: SocketAddr = settings
            .metrics
            .listen
            .parse()
            .with_context(|| format!("invalid metrics address {}", settings.metrics.listen))?;
        PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()
            .context("installing prometheus exporter")?;
        tracing::info!(listen = %listen, "Prometheus exporter listening");
    }

    let firewall = Firewall::from_settings(settings).await?;

    let entries = firewall.list_all().await?;
    println!("{} list entries", entries.len());
    for entry in &entries {
        let list = if entry.whitelisted { "whitelist" } else { "blacklist" };
        match &entry.origin {
            Some(origin) => println!("  {:<40} {:<9} {:?} ({})", entry.address, list, entry.source, origin),
            None => println!("  {:<40} {:<9} {:?}", entry.address, list, entry.source),
        }
    }

    for address in std::env::args().skip(1) {
        if !Firewall::is_ip_address(&address) {
            tracing::warn!(address = %address, "not an IP address, classifying as given");
        }

        let classification = firewall.classify(&address).await?;
        println!("{} is {}", address, classification);
    }

    Ok(())
}
