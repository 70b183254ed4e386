//! Signed result callbacks to the application.

use jsonwebtoken::{encode, get_current_timestamp, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use scribe_models::{CallbackStatus, QueueName, WebhookPayload};

use crate::config::WebhookConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_webhook;

/// Claims carried by the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookClaims {
    pub status: CallbackStatus,
    pub queue: String,
    pub job_id: String,
    pub iat: u64,
    pub exp: u64,
}

/// Posts job outcomes to `{APP_BASE_URL}{queue webhook path}`.
#[derive(Clone)]
pub struct WebhookClient {
    http: Client,
    config: WebhookConfig,
}

impl WebhookClient {
    pub fn new(config: WebhookConfig) -> WorkerResult<Self> {
        Url::parse(&config.app_base_url)
            .map_err(|e| WorkerError::config_error(format!("APP_BASE_URL: {e}")))?;
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn endpoint(&self, queue: QueueName) -> String {
        format!(
            "{}{}",
            self.config.app_base_url.trim_end_matches('/'),
            queue.webhook_path()
        )
    }

    /// HS256 token valid for the configured TTL.
    pub fn sign(&self, queue: QueueName, payload: &WebhookPayload) -> WorkerResult<String> {
        let iat = get_current_timestamp();
        let claims = WebhookClaims {
            status: payload.status,
            queue: queue.as_str().to_string(),
            job_id: payload.job_id.to_string(),
            iat,
            exp: iat + self.config.token_ttl.as_secs(),
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )?)
    }

    pub async fn send(&self, queue: QueueName, payload: &WebhookPayload) -> WorkerResult<()> {
        let token = self.sign(queue, payload)?;
        let url = self.endpoint(queue);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await;

        let result = match response {
            Ok(response) if response.status().is_success() => {
                info!(
                    job_id = %payload.job_id,
                    queue = %queue,
                    status = response.status().as_u16(),
                    "Webhook delivered"
                );
                Ok(())
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(WorkerError::webhook_failed(format!("{url} returned {status}: {body}")))
            }
            Err(e) => Err(WorkerError::webhook_failed(format!("{url}: {e}"))),
        };

        record_webhook(queue.as_str(), result.is_ok());
        if let Err(e) = &result {
            warn!(job_id = %payload.job_id, queue = %queue, "{}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
    use scribe_models::JobId;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> WebhookClient {
        WebhookClient::new(WebhookConfig::new(base, "test-secret")).unwrap()
    }

    #[test]
    fn token_expires_after_five_minutes() {
        let client = client("http://app");
        let payload = WebhookPayload::failed(JobId::from_string("9"), None, "boom");
        let token = client.sign(QueueName::AudioVideoConversion, &payload).unwrap();

        let decoded = decode::<WebhookClaims>(
            &token,
            &DecodingKey::from_secret(b"test-secret"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 300);
        assert_eq!(decoded.claims.status, CallbackStatus::Failed);
        assert_eq!(decoded.claims.job_id, "9");
    }

    #[test]
    fn endpoint_joins_queue_path() {
        assert_eq!(
            client("http://app/").endpoint(QueueName::YoutubeIngestion),
            "http://app/api/webhook/youtube-worker"
        );
    }

    #[test]
    fn rejects_relative_base_url() {
        let err = WebhookClient::new(WebhookConfig::new("app.example.com", "s")).err();
        assert!(matches!(err, Some(WorkerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn posts_signed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/webhook/conversion-worker"))
            .and(header_exists("authorization"))
            .and(body_partial_json(serde_json::json!({ "jobId": "3", "status": "completed" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let payload = WebhookPayload::completed(
            JobId::from_string("3"),
            Some("f-1".into()),
            serde_json::json!({ "status": "SUCCESS" }),
        );
        client(&server.uri())
            .send(QueueName::AudioVideoConversion, &payload)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let payload = WebhookPayload::failed(JobId::from_string("4"), None, "x");
        let err = client(&server.uri())
            .send(QueueName::LlmMarking, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::WebhookFailed(_)));
    }
}
