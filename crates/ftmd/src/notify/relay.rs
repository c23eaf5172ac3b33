//! HTTP client for the push relay server.

use std::time::Duration;

use ftm_protocol::relay::{NOTIFY_PATH, SUBSCRIBE_PATH};
use ftm_protocol::{NotifyRequest, NotifyResponse, PushSubscription};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::NotifyError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts subscriptions and broadcast requests to the relay.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: Client,
    base_url: String,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `POST /api/subscribe`. Succeeds on 201 (or any 2xx).
    pub async fn subscribe(&self, subscription: &PushSubscription) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(self.url(SUBSCRIBE_PATH))
            .json(subscription)
            .send()
            .await
            .map_err(|e| NotifyError::PushSubscriptionFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::PushSubscriptionFailed(format!("HTTP {status}")));
        }
        if status != StatusCode::CREATED {
            debug!(status = %status, "Relay accepted subscription with unexpected status");
        }
        Ok(())
    }

    /// `POST /api/notify`, fanning `message` out to every subscription.
    pub async fn notify(&self, message: &str) -> Result<NotifyResponse, NotifyError> {
        let resp = self
            .client
            .post(self.url(NOTIFY_PATH))
            .json(&NotifyRequest {
                message: message.to_string(),
            })
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = resp.status();
        let body: NotifyResponse = resp.json().await.unwrap_or_else(|e| {
            warn!(error = %e, "Relay returned an unreadable body");
            NotifyResponse::default()
        });

        if status.is_success() {
            Ok(body)
        } else {
            Err(NotifyError::Delivery(
                body.error.unwrap_or_else(|| format!("HTTP {status}")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_created() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/subscribe")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "endpoint": "https://push.example/1",
                "keys": {"p256dh": "pk", "auth": "au"}
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let client = RelayClient::new(server.url()).unwrap();
        let sub = PushSubscription::new("https://push.example/1", "pk", "au");
        client.subscribe(&sub).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_subscribe_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/subscribe")
            .with_status(500)
            .create_async()
            .await;

        let client = RelayClient::new(server.url()).unwrap();
        let sub = PushSubscription::new("https://push.example/1", "pk", "au");
        assert!(matches!(
            client.subscribe(&sub).await,
            Err(NotifyError::PushSubscriptionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_notify_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/notify")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "message": "Your 16h fast is complete!"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Notifications sent successfully"}"#)
            .create_async()
            .await;

        let client = RelayClient::new(format!("{}/", server.url())).unwrap();
        let resp = client.notify("Your 16h fast is complete!").await.unwrap();
        assert_eq!(resp.message.as_deref(), Some("Notifications sent successfully"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_notify_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/notify")
            .with_status(500)
            .with_body(r#"{"error":"Failed to send notifications"}"#)
            .create_async()
            .await;

        let client = RelayClient::new(server.url()).unwrap();
        match client.notify("hi").await {
            Err(NotifyError::Delivery(reason)) => {
                assert_eq!(reason, "Failed to send notifications")
            }
            other => panic!("expected delivery error, got {other:?}"),
        }
    }
}
