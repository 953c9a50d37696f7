use async_trait::async_trait;
use lookout_common::MonitorTarget;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

use super::{Probe, ProbeError};

/// TCP reachability: every `host:port` item must accept a connection.
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self, target: &MonitorTarget, _timeout: Duration) -> Result<String, ProbeError> {
        let mut details = Vec::with_capacity(target.items.len());

        for address in &target.items {
            let start_time = Instant::now();
            let _stream = TcpStream::connect(address.as_str())
                .await
                .map_err(|source| ProbeError::Connect {
                    target: address.clone(),
                    source,
                })?;
            let response_time_ms = start_time.elapsed().as_millis();
            details.push(format!("{address} connected in {response_time_ms}ms"));
        }

        Ok(details.join("; "))
    }
}
