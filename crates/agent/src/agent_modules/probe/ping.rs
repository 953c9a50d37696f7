use async_trait::async_trait;
use lookout_common::MonitorTarget;
use rand::random;
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};

use super::{Probe, ProbeError};

const PAYLOAD: [u8; 56] = [0; 56];

/// ICMP echo to every host in `items`.
///
/// Needs raw or unprivileged ICMP sockets; where the host denies them the
/// socket error is reported as a failed probe.
pub struct PingProbe;

impl PingProbe {
    async fn resolve(host: &str) -> Result<IpAddr, ProbeError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| ProbeError::Connect {
                target: host.to_string(),
                source,
            })?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| ProbeError::Resolve {
                target: host.to_string(),
            })
    }

    async fn ping(host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        let addr = Self::resolve(host).await?;
        let config = match addr {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).map_err(|source| ProbeError::Connect {
            target: host.to_string(),
            source,
        })?;

        let mut pinger = client.pinger(addr, PingIdentifier(random())).await;
        pinger.timeout(timeout);
        let (_reply, rtt) = pinger
            .ping(PingSequence(0), &PAYLOAD)
            .await
            .map_err(|source| ProbeError::Ping {
                target: host.to_string(),
                source,
            })?;
        Ok(rtt)
    }
}

#[async_trait]
impl Probe for PingProbe {
    async fn probe(&self, target: &MonitorTarget, timeout: Duration) -> Result<String, ProbeError> {
        let mut details = Vec::with_capacity(target.items.len());
        for host in &target.items {
            let rtt = Self::ping(host, timeout).await?;
            details.push(format!("{host} replied in {}ms", rtt.as_millis()));
        }
        Ok(details.join("; "))
    }
}
