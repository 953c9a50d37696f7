use async_trait::async_trait;
use lookout_common::MonitorTarget;
use std::time::{Duration, Instant};

use super::{Probe, ProbeError};

/// HTTP(S) reachability: every URL must answer with a 2xx status.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(crate::version::user_agent())
            .build()
            .map_err(ProbeError::Client)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &MonitorTarget, timeout: Duration) -> Result<String, ProbeError> {
        let mut details = Vec::with_capacity(target.items.len());

        for url in &target.items {
            let start_time = Instant::now();
            let response = self
                .client
                .get(url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        ProbeError::Timeout
                    } else {
                        ProbeError::Http {
                            target: url.clone(),
                            source: e,
                        }
                    }
                })?;
            let response_time_ms = start_time.elapsed().as_millis();

            let status = response.status();
            if !status.is_success() {
                return Err(ProbeError::Status {
                    target: url.clone(),
                    status,
                });
            }
            details.push(format!("{url} {status} in {response_time_ms}ms"));
        }

        Ok(details.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves `status_line` to every connection until the test ends.
    async fn serve(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{addr}/health")
    }

    #[tokio::test]
    async fn test_2xx_is_success_with_latency() {
        let url = serve("200 OK").await;
        let probe = HttpProbe::new().unwrap();

        let detail = probe
            .probe(&MonitorTarget::items([url.clone()]), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(detail.starts_with(&format!("{url} 200 OK in ")));
        assert!(detail.ends_with("ms"));
    }

    #[tokio::test]
    async fn test_non_2xx_is_failure() {
        let url = serve("503 Service Unavailable").await;
        let probe = HttpProbe::new().unwrap();

        let err = probe
            .probe(&MonitorTarget::items([url]), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, ProbeError::Status { status, .. } if status.as_u16() == 503));
    }

    #[tokio::test]
    async fn test_refused_connection_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new().unwrap();
        let err = probe
            .probe(
                &MonitorTarget::items([format!("http://{addr}/")]),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProbeError::Http { .. }));
    }
}
