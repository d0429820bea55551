//! Source accessibility probing and request validation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{RelayError, Result};

/// Reports whether a source URI can currently be fetched.
#[async_trait]
pub trait SourceProber: Send + Sync {
    async fn probe(&self, uri: &str, timeout: Duration) -> bool;
}

/// Probes with a HEAD request, falling back to a one-byte ranged GET for
/// servers that reject HEAD.
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn is_reachable(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

#[async_trait]
impl SourceProber for HttpProber {
    async fn probe(&self, uri: &str, timeout: Duration) -> bool {
        let head = self.client.head(uri).timeout(timeout).send().await;
        match head {
            Ok(resp) if is_reachable(resp.status()) => true,
            Ok(resp) if resp.status() == StatusCode::METHOD_NOT_ALLOWED => {
                let ranged = self
                    .client
                    .get(uri)
                    .header(header::RANGE, "bytes=0-0")
                    .timeout(timeout)
                    .send()
                    .await;
                matches!(ranged, Ok(resp) if is_reachable(resp.status()))
            }
            Ok(resp) => {
                debug!("Probe of {} returned {}", uri, resp.status());
                false
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", uri, e);
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Unreachable,
    Malformed,
}

/// A requested source that will not be relayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejected {
    pub uri: String,
    pub reason: RejectReason,
}

/// Outcome of validating a start request's source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validated {
    /// Reachable sources, in requested order.
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejected>,
}

fn is_well_formed(uri: &str) -> bool {
    Url::parse(uri)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Filter `raw` down to the reachable sources, preserving order.
///
/// Entries are trimmed and empty ones dropped. Fails with
/// [`RelayError::NoValidSources`] when nothing is left to relay.
pub async fn validate_sources(
    prober: &dyn SourceProber,
    raw: &[String],
    timeout: Duration,
) -> Result<Validated> {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for uri in raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !is_well_formed(uri) {
            rejected.push(Rejected {
                uri: uri.to_string(),
                reason: RejectReason::Malformed,
            });
            continue;
        }

        if prober.probe(uri, timeout).await {
            accepted.push(uri.to_string());
        } else {
            info!("Source unreachable, skipping: {}", uri);
            rejected.push(Rejected {
                uri: uri.to_string(),
                reason: RejectReason::Unreachable,
            });
        }
    }

    if accepted.is_empty() {
        return Err(RelayError::NoValidSources { rejected });
    }

    Ok(Validated { accepted, rejected })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Prober that answers from a fixed set of reachable URIs.
    pub(crate) struct StaticProber {
        reachable: HashSet<String>,
    }

    impl StaticProber {
        pub(crate) fn new<I: IntoIterator<Item = S>, S: Into<String>>(reachable: I) -> Self {
            Self {
                reachable: reachable.into_iter().map(Into::into).collect(),
            }
        }
    }

    #[async_trait]
    impl SourceProber for StaticProber {
        async fn probe(&self, uri: &str, _timeout: Duration) -> bool {
            self.reachable.contains(uri)
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn keeps_order_and_reports_rejections() {
        let prober = StaticProber::new(["https://a.test/1.mp4", "https://a.test/3.mp4"]);
        let raw = strings(&[
            "  https://a.test/1.mp4 ",
            "",
            "https://a.test/2.mp4",
            "not a url",
            "https://a.test/3.mp4",
        ]);

        let validated = validate_sources(&prober, &raw, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(validated.accepted, ["https://a.test/1.mp4", "https://a.test/3.mp4"]);
        assert_eq!(
            validated.rejected,
            vec![
                Rejected {
                    uri: "https://a.test/2.mp4".into(),
                    reason: RejectReason::Unreachable
                },
                Rejected {
                    uri: "not a url".into(),
                    reason: RejectReason::Malformed
                },
            ]
        );
    }

    #[tokio::test]
    async fn all_unreachable_is_no_valid_sources() {
        let prober = StaticProber::new(Vec::<String>::new());
        let raw = strings(&["https://a.test/1.mp4", "ftp://a.test/2.mp4", "   "]);

        let err = validate_sources(&prober, &raw, Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            RelayError::NoValidSources { rejected } => assert_eq!(rejected.len(), 2),
            other => panic!("expected NoValidSources, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_request_is_no_valid_sources() {
        let prober = StaticProber::new(["https://a.test/1.mp4"]);
        let result = validate_sources(&prober, &[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RelayError::NoValidSources { .. })));
    }

    #[tokio::test]
    async fn http_prober_accepts_head_ok() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/ok.mp4"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let prober = HttpProber::new(Client::new());
        assert!(prober.probe(&format!("{}/ok.mp4", server.uri()), Duration::from_secs(2)).await);
        assert!(!prober.probe(&format!("{}/missing.mp4", server.uri()), Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn http_prober_falls_back_to_ranged_get() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/nohead.mp4"))
            .respond_with(ResponseTemplate::new(405))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/nohead.mp4"))
            .and(header_eq("range", "bytes=0-0"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8]))
            .mount(&server)
            .await;

        let prober = HttpProber::new(Client::new());
        assert!(prober.probe(&format!("{}/nohead.mp4", server.uri()), Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn http_prober_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let prober = HttpProber::new(Client::new());
        assert!(!prober.probe(&format!("{}/slow.mp4", server.uri()), Duration::from_millis(100)).await);
    }
}
