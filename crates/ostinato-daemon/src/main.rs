//! ostinato-daemon: a single ring endpoint per process.
//!
//! Wires the overlay engine to the real network: loads configuration and
//! ring credentials, binds the TLS listener, and runs the three long-lived
//! tasks (listener, stabilizer, discovery) until ctrl-c.

mod config;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use ostinato_ring::handle::RingHandle;
use ostinato_ring::messenger::TlsMessenger;
use ostinato_ring::node::RingNode;
use ostinato_ring::service;
use ostinato_transport::keystore::RingCredentials;
use ostinato_transport::tls::RingListener;
use ostinato_types::NodeRef;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                format!("ostinato={}", config.advanced.log_level)
                    .parse()
                    .context("parsing log level")?,
            ),
        )
        .init();

    info!("ostinato daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    // Fatal startup errors: unusable credentials or an unbindable listener
    // abort the process. Everything after this point is best-effort.
    let creds = RingCredentials::load_or_generate(&config.credentials_dir())
        .context("loading ring credentials")?;

    let bind_ip: IpAddr = config
        .network
        .bind_ip
        .parse()
        .with_context(|| format!("invalid bind_ip {:?}", config.network.bind_ip))?;
    let auto_ref = NodeRef::from_endpoint(bind_ip, config.network.port, config.network.id_bitlen);
    info!(node = %auto_ref, "ring identity derived");

    let listener = RingListener::bind(SocketAddr::new(bind_ip, config.network.port), &creds)
        .await
        .context("binding ring listener")?;

    let messenger = TlsMessenger::new().context("building TLS messenger")?;
    let node = Arc::new(
        RingNode::new(auto_ref, config.blob_dir(), messenger).context("creating ring node")?,
    );
    RingHandle::install(Arc::clone(&node)).context("installing process-wide handle")?;

    let mut serve_task = tokio::spawn(service::serve(Arc::clone(&node), listener));
    let mut stabilizer_task = tokio::spawn(service::run_stabilizer(Arc::clone(&node)));

    let group: Ipv4Addr = config
        .discovery
        .group
        .parse()
        .with_context(|| format!("invalid multicast group {:?}", config.discovery.group))?;
    if config.discovery.enabled {
        let discovery_node = Arc::clone(&node);
        let discovery_port = config.discovery.port;
        tokio::spawn(async move {
            if let Err(e) = service::run_discovery(discovery_node, group, discovery_port).await {
                error!(error = %e, "discovery listener stopped");
            }
        });
    }

    // Membership bootstrap: explicit seed wins; otherwise announce on the
    // LAN and let an existing ring adopt us.
    match config.seed_addr()? {
        Some(seed) => {
            if let Err(e) = node.request_join(seed).await {
                warn!(%seed, error = %e, "could not join via seed");
            }
        }
        None if config.discovery.enabled => {
            if let Err(e) = node.discover(group, config.discovery.port).await {
                warn!(error = %e, "discovery announcement failed");
            }
        }
        None => info!("no seed configured and discovery disabled, starting alone"),
    }

    // Both service tasks loop forever; an exit means the node is no longer
    // functioning and must be observed, not swallowed.
    tokio::select! {
        result = &mut serve_task => {
            error!(?result, "ring listener task exited unexpectedly");
        }
        result = &mut stabilizer_task => {
            error!(?result, "stabilizer task exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    info!("daemon stopped");
    Ok(())
}
