//! Internet sync channel: `POST {endpoint}/sync` with a JSON body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::error::{Error, Result};
use crate::model::Channel;

use super::{SyncChannel, SyncPayload, SyncResponse};

/// Syncs through an HTTP endpoint.
///
/// Any non-2xx status, transport error or timeout is a failed attempt. An
/// empty success body means "no updates".
#[derive(Debug, Clone)]
pub struct InternetChannel {
    client: Client,
    url: String,
    timeout: Duration,
}

impl InternetChannel {
    /// Create a channel for `endpoint` (a base URL without the `/sync` path).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/sync", endpoint.trim_end_matches('/')),
            timeout,
        })
    }

    /// The full request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SyncChannel for InternetChannel {
    fn channel(&self) -> Channel {
        Channel::Internet
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(&self, payload: &SyncPayload) -> Result<SyncResponse> {
        let response = self.client.post(&self.url).json(payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SyncStatus {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        trace!(status = status.as_u16(), bytes = bytes.len(), "Sync response");
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(SyncResponse::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::trip_config::Role;

    /// One scripted HTTP reply.
    struct Reply {
        status: u16,
        body: &'static str,
    }

    /// Serve `replies` in order, one connection each; records request bodies.
    async fn serve(replies: Vec<Reply>) -> (String, Arc<Mutex<Vec<(String, String)>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);

        tokio::spawn(async move {
            for reply in replies {
                let (mut socket, _) = listener.accept().await.unwrap();
                let (request_line, body) = read_request(&mut socket).await;
                recorded.lock().unwrap().push((request_line, body));

                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reply.status,
                    reply.body.len(),
                    reply.body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{addr}"), seen)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> (String, String) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);

        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let request_line = head.lines().next().unwrap_or_default().to_string();
        let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
        (request_line, body)
    }

    fn payload() -> SyncPayload {
        SyncPayload {
            trip_id: "trip-42".to_string(),
            role: Role::Passenger,
            position: None,
            speed: None,
            group_members: Vec::new(),
            feedback_reports: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_url_joins_sync_path() {
        let channel = InternetChannel::new("http://example.com/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(channel.url(), "http://example.com/api/sync");
        assert_eq!(channel.channel(), Channel::Internet);
    }

    #[tokio::test]
    async fn test_posts_payload_and_parses_response() {
        let body = r#"{"groupMembers":[{"id":"m1","name":"Ana","lastKnownPosition":null}],"feedbackReports":[]}"#;
        let (endpoint, seen) = serve(vec![Reply { status: 200, body }]).await;
        let channel = InternetChannel::new(&endpoint, Duration::from_secs(5)).unwrap();

        let response = channel.exchange(&payload()).await.unwrap();
        assert_eq!(response.group_members.len(), 1);
        assert_eq!(response.group_members[0].id, "m1");

        let requests = seen.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].0.starts_with("POST /sync"));
        let sent: serde_json::Value = serde_json::from_str(&requests[0].1).unwrap();
        assert_eq!(sent["tripId"], "trip-42");
    }

    #[tokio::test]
    async fn test_server_error_then_success() {
        let (endpoint, seen) = serve(vec![
            Reply {
                status: 500,
                body: "",
            },
            Reply {
                status: 200,
                body: "",
            },
        ])
        .await;
        let channel = InternetChannel::new(&endpoint, Duration::from_secs(5)).unwrap();

        let err = channel.exchange(&payload()).await.unwrap_err();
        assert!(matches!(err, Error::SyncStatus { status: 500 }));
        assert!(err.is_sync_failure());

        let response = channel.exchange(&payload()).await.unwrap();
        assert_eq!(response, SyncResponse::default());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_connection_refused_is_sync_failure() {
        // Bind and drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = InternetChannel::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let err = channel.exchange(&payload()).await.unwrap_err();
        assert!(err.is_sync_failure());
    }

    #[tokio::test]
    async fn test_malformed_body_fails() {
        let (endpoint, _seen) = serve(vec![Reply {
            status: 200,
            body: "not json",
        }])
        .await;
        let channel = InternetChannel::new(&endpoint, Duration::from_secs(5)).unwrap();
        assert!(channel.exchange(&payload()).await.is_err());
    }
}
