//! Remote queue client
//!
//! `GET {server}/poll` lists pending messages, `POST {server}/confirm/{id}` retires one.
//! Both carry the shared token in the `X-Token` header.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::messages::{PendingMessage, PollResponse};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

pub const TOKEN_HEADER: &str = "X-Token";

/// Longest response body kept in a protocol error
const ERROR_BODY_LIMIT: usize = 200;

/// Source of pending messages and sink for acknowledgements
#[async_trait]
pub trait Queue: Send + Sync {
    /// Fetch the current batch of pending messages. An empty batch is not an error.
    async fn fetch(&self) -> Result<Vec<PendingMessage>>;

    /// Tell the queue `id` was delivered so it can be retired.
    async fn acknowledge(&self, id: &str) -> Result<()>;
}

/// HTTP implementation of [`Queue`]
pub struct QueueClient {
    base: Url,
    token: String,
    client: reqwest::Client,
}

impl QueueClient {
    pub fn new(config: &Config) -> Result<Self> {
        let base = Url::parse(&config.server_address)
            .map_err(|e| Error::Config(format!("server_address: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "server_address is not a base URL: {}",
                config.server_address
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            base,
            token: config.auth_token.clone(),
            client,
        })
    }

    /// `{server}/poll`
    pub fn poll_url(&self) -> Url {
        self.endpoint(&["poll"])
    }

    /// `{server}/confirm/{id}` with `id` percent-encoded as one path segment
    pub fn confirm_url(&self, id: &str) -> Url {
        self.endpoint(&["confirm", id])
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in new(), so this always succeeds
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl Queue for QueueClient {
    async fn fetch(&self) -> Result<Vec<PendingMessage>> {
        let resp = self
            .client
            .get(self.poll_url())
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        let status = resp.status();
        check_auth(status)?;
        let body = resp.text().await?;

        if status != StatusCode::OK {
            return Err(Error::Protocol {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let parsed: PollResponse = serde_json::from_str(&body).map_err(|e| Error::Protocol {
            status: status.as_u16(),
            body: format!("malformed payload ({}): {}", e, truncate(&body)),
        })?;

        debug!("Fetched {} pending messages", parsed.messages.len());
        Ok(parsed.messages)
    }

    async fn acknowledge(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.confirm_url(id))
            .header(TOKEN_HEADER, &self.token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = resp.status();
        check_auth(status)?;
        if !status.is_success() {
            return Err(Error::Protocol {
                status: status.as_u16(),
                body: truncate(&resp.text().await.unwrap_or_default()),
            });
        }

        debug!("Acknowledged {}", id);
        Ok(())
    }
}

fn check_auth(status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::Auth {
            status: status.as_u16(),
        });
    }
    Ok(())
}

fn truncate(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &str) -> QueueClient {
        QueueClient::new(&Config::for_test(server)).unwrap()
    }

    #[test]
    fn test_poll_url() {
        assert_eq!(
            client("http://10.0.0.2:5000").poll_url().as_str(),
            "http://10.0.0.2:5000/poll"
        );
    }

    #[test]
    fn test_urls_keep_base_path() {
        let c = client("https://example.com/relay/");
        assert_eq!(c.poll_url().as_str(), "https://example.com/relay/poll");
        assert_eq!(
            c.confirm_url("abc").as_str(),
            "https://example.com/relay/confirm/abc"
        );
    }

    #[test]
    fn test_confirm_url_encodes_id() {
        let c = client("http://localhost:5000");
        assert_eq!(
            c.confirm_url("a/b c").as_str(),
            "http://localhost:5000/confirm/a%2Fb%20c"
        );
    }

    #[test]
    fn test_new_rejects_garbage_address() {
        assert!(matches!(
            QueueClient::new(&Config::for_test("not a url")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_check_auth() {
        assert!(matches!(
            check_auth(StatusCode::UNAUTHORIZED),
            Err(Error::Auth { status: 401 })
        ));
        assert!(check_auth(StatusCode::OK).is_ok());
        assert!(check_auth(StatusCode::NOT_FOUND).is_ok());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate(&"x".repeat(500)).len(), ERROR_BODY_LIMIT);
        assert_eq!(truncate("short"), "short");
    }
}
