use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::error::ProvisionError;
use super::types::{
    BroadcastSnippet, BroadcastStatus, Cdn, ErrorEnvelope, LiveBroadcast, LiveBroadcastRequest,
    LiveStream, LiveStreamRequest, Snippet,
};
use crate::config::YouTubeConfig;
use crate::provision::{Endpoint, EndpointProvisioner};

/// Delay between provisioning and the broadcast's scheduled start.
const START_DELAY_SECS: i64 = 5;
const BROADCAST_HOURS: i64 = 2;

/// Creates a bound liveStream/liveBroadcast pair per job.
pub struct YouTubeClient {
    access_token: String,
    client: Client,
    base_url: String,
    privacy_status: String,
    resolution: String,
}

impl YouTubeClient {
    pub fn new(config: &YouTubeConfig) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            access_token: config.access_token.clone(),
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            privacy_status: config.privacy_status.clone(),
            resolution: config.resolution.clone(),
        })
    }

    pub async fn create_stream(&self, title: &str) -> Result<LiveStream, ProvisionError> {
        let req = LiveStreamRequest {
            snippet: Snippet {
                title: format!("Stream for {title}"),
                description: String::new(),
            },
            cdn: Cdn {
                format: Some(self.resolution.clone()),
                ingestion_type: "rtmp".into(),
                ingestion_info: None,
            },
        };
        self.post("liveStreams", &[("part", "snippet,cdn")], Some(&req))
            .await
    }

    pub async fn create_broadcast(&self, title: &str) -> Result<LiveBroadcast, ProvisionError> {
        let now = Utc::now();
        let req = LiveBroadcastRequest {
            snippet: BroadcastSnippet {
                title: title.to_string(),
                description: String::new(),
                scheduled_start_time: now + chrono::Duration::seconds(START_DELAY_SECS),
                scheduled_end_time: now + chrono::Duration::hours(BROADCAST_HOURS),
            },
            status: BroadcastStatus {
                privacy_status: self.privacy_status.clone(),
            },
        };
        self.post(
            "liveBroadcasts",
            &[("part", "snippet,status,contentDetails")],
            Some(&req),
        )
        .await
    }

    pub async fn bind(
        &self,
        broadcast_id: &str,
        stream_id: &str,
    ) -> Result<LiveBroadcast, ProvisionError> {
        self.post::<(), _>(
            "liveBroadcasts/bind",
            &[
                ("part", "id,contentDetails"),
                ("id", broadcast_id),
                ("streamId", stream_id),
            ],
            None,
        )
        .await
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<R, ProvisionError> {
        let url = format!("{}/{}", self.base_url, resource);
        debug!("POST {}", url);

        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(query);
        request = match body {
            Some(body) => request.json(body),
            None => request.header(reqwest::header::CONTENT_LENGTH, "0"),
        };
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ProvisionError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<R>().await?)
    }
}

#[async_trait]
impl EndpointProvisioner for YouTubeClient {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn provision(&self, title: &str) -> Result<Endpoint, ProvisionError> {
        let stream = self.create_stream(title).await?;
        // Checked before the broadcast exists so a bad stream leaves nothing scheduled.
        let destination_uri = stream.ingest_uri().ok_or(ProvisionError::MissingIngestion)?;

        let broadcast = self.create_broadcast(title).await?;
        self.bind(&broadcast.id, &stream.id).await?;
        info!(
            broadcast_id = %broadcast.id,
            stream_id = %stream.id,
            "Provisioned YouTube broadcast"
        );

        Ok(Endpoint {
            destination_uri,
            external_id: broadcast.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> YouTubeClient {
        YouTubeClient::new(&YouTubeConfig {
            access_token: "tok".into(),
            api_base: server.uri(),
            privacy_status: "unlisted".into(),
            resolution: "720p".into(),
        })
        .unwrap()
    }

    fn stream_body() -> serde_json::Value {
        json!({
            "id": "stream-1",
            "cdn": {
                "ingestionType": "rtmp",
                "ingestionInfo": {
                    "ingestionAddress": "rtmp://a.rtmp.youtube.com/live2",
                    "streamName": "key-123"
                }
            }
        })
    }

    #[tokio::test]
    async fn provision_creates_binds_and_returns_destination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/liveStreams"))
            .and(query_param("part", "snippet,cdn"))
            .and(header("authorization", "Bearer tok"))
            .and(body_partial_json(json!({
                "snippet": {"title": "Stream for Demo"},
                "cdn": {"ingestionType": "rtmp", "format": "720p"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(stream_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts"))
            .and(body_partial_json(json!({
                "snippet": {"title": "Demo"},
                "status": {"privacyStatus": "unlisted"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "bc-9"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts/bind"))
            .and(query_param("id", "bc-9"))
            .and(query_param("streamId", "stream-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "bc-9"})))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = client(&server).provision("Demo").await.unwrap();
        assert_eq!(
            endpoint.destination_uri,
            "rtmp://a.rtmp.youtube.com/live2/key-123"
        );
        assert_eq!(endpoint.external_id, "bc-9");
    }

    #[tokio::test]
    async fn missing_ingestion_stops_before_broadcast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/liveStreams"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "s", "cdn": {"ingestionType": "rtmp"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/liveBroadcasts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b"})))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server).provision("Demo").await.unwrap_err();
        assert!(matches!(err, ProvisionError::MissingIngestion));
    }

    #[tokio::test]
    async fn api_error_carries_google_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": 401, "message": "Invalid Credentials"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).provision("Demo").await.unwrap_err();
        match err {
            ProvisionError::ApiError { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Credentials");
            }
            other => panic!("Expected ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_error_body_is_kept_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
            .mount(&server)
            .await;

        let err = client(&server).create_stream("x").await.unwrap_err();
        assert_eq!(err.to_string(), "API error (status 503): backend down");
    }
}
