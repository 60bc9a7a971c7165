//! Wait primitives for cluster and network conditions

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::health::HealthChecker;
use crate::release::ResourceManager;
use zarf_core::{ClusterWait, NetworkProtocol, NetworkWait};

/// Default timeout for wait actions
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

const NETWORK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wait for a cluster object to meet its condition (default "exists")
pub async fn wait_cluster(
    resources: &ResourceManager,
    wait: &ClusterWait,
    timeout: Duration,
) -> Result<()> {
    let condition = wait.condition.as_deref().unwrap_or("exists");
    HealthChecker::new()
        .wait_for(
            resources,
            &wait.kind,
            &wait.name,
            wait.namespace.as_deref(),
            condition,
            timeout,
        )
        .await
}

/// Wait for a network endpoint: a TCP connect, or an HTTP(S) GET returning
/// the expected status code
pub async fn wait_network(wait: &NetworkWait, timeout: Duration) -> Result<()> {
    let what = format!("{:?} {}", wait.protocol, wait.address).to_lowercase();
    let deadline = tokio::time::Instant::now() + timeout;
    let client = reqwest::Client::new();

    loop {
        let ready = match wait.protocol {
            NetworkProtocol::Tcp => TcpStream::connect(&wait.address).await.is_ok(),
            NetworkProtocol::Http | NetworkProtocol::Https => {
                let scheme = match wait.protocol {
                    NetworkProtocol::Https => "https",
                    _ => "http",
                };
                let url = format!("{scheme}://{}", wait.address);
                match client.get(&url).send().await {
                    Ok(response) => match wait.code {
                        Some(code) => response.status().as_u16() == code,
                        None => response.status().is_success(),
                    },
                    Err(_) => false,
                }
            }
        };
        if ready {
            return Ok(());
        }
        debug!(target = %what, "endpoint not ready");
        if tokio::time::Instant::now() + NETWORK_POLL_INTERVAL > deadline {
            return Err(KubeError::WaitTimeout {
                what,
                seconds: timeout.as_secs(),
            });
        }
        tokio::time::sleep(NETWORK_POLL_INTERVAL).await;
    }
}
