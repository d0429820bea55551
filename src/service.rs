//! Start, cancel and status operations shared by the HTTP server and the CLI.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::fallback::FallbackPolicy;
use crate::orchestrator::JobSequencer;
use crate::probe::{HttpProber, Rejected, SourceProber, validate_sources};
use crate::provision::{Provisioners, mask_destination};
use crate::registry::JobRegistry;
use crate::relay::{FfmpegEngine, RelayEngine, RelayRunner};
use crate::staging::StagingManager;
use crate::state_machine::{Job, JobSnapshot};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Provisioner name; the configured default when absent.
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationInfo {
    pub name: String,
    pub external_id: String,
    /// Ingest URI with the stream key masked.
    pub ingest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub job_id: String,
    pub destination: DestinationInfo,
    pub accepted: Vec<String>,
    pub rejected: Vec<Rejected>,
}

pub struct RelayService {
    prober: Arc<dyn SourceProber>,
    provisioners: Provisioners,
    sequencer: Arc<JobSequencer>,
    registry: Arc<JobRegistry>,
    probe_timeout: Duration,
    job_deadline: Option<Duration>,
    interrupt_grace: Duration,
}

impl RelayService {
    /// Service backed by HTTP probing, the ffmpeg engine and the configured
    /// destinations. Removes scratch left over from a previous run.
    pub async fn from_config(config: &RelayConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let engine = FfmpegEngine::new(config.ffmpeg_bin.clone(), config.diagnostics_limit);
        match engine.detect_version() {
            Some(version) => info!("Using {}", version),
            None => warn!("Could not run '{}'; relay attempts will fail", config.ffmpeg_bin),
        }

        let service = Self::new(
            config,
            Arc::new(HttpProber::new(client)),
            Arc::new(engine),
            Provisioners::from_config(config)?,
        )?;
        if let Err(e) = service.sequencer.staging.purge_stale().await {
            warn!("Failed to purge stale scratch directories: {}", e);
        }
        Ok(service)
    }

    pub fn new(
        config: &RelayConfig,
        prober: Arc<dyn SourceProber>,
        engine: Arc<dyn RelayEngine>,
        provisioners: Provisioners,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let registry = Arc::new(JobRegistry::new(config.retain_finished()));
        let policy = FallbackPolicy::new(config.profiles.clone());
        debug!("Up to {} relay attempts per source", policy.max_attempts());
        let sequencer = Arc::new(JobSequencer {
            staging: Arc::new(StagingManager::new(
                config.scratch_dir.clone(),
                client,
                config.download_timeout(),
                config.max_download_bytes,
            )),
            runner: Arc::new(RelayRunner::new(
                engine,
                config.interrupt_grace(),
                config.diagnostics_limit,
            )),
            policy,
            registry: registry.clone(),
            attempt_timeout: config.attempt_timeout(),
        });

        Ok(Self {
            prober,
            provisioners,
            sequencer,
            registry,
            probe_timeout: config.probe_timeout(),
            job_deadline: config.job_deadline(),
            interrupt_grace: config.interrupt_grace(),
        })
    }

    /// Snapshots of jobs that have not reached a terminal state.
    pub fn active(&self) -> Vec<JobSnapshot> {
        self.registry.list_active()
    }

    pub fn destinations(&self) -> Vec<&str> {
        self.provisioners.names()
    }

    /// Validate, provision and admit a job. Returns once the job is admitted;
    /// relaying continues in the background.
    pub async fn start(&self, request: StartRequest) -> Result<StartResponse> {
        let validated =
            validate_sources(self.prober.as_ref(), &request.sources, self.probe_timeout).await?;

        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(default_title);
        let provisioner = self.provisioners.resolve(request.destination.as_deref())?;
        let endpoint = provisioner.provision(&title).await?;

        let deadline = self
            .job_deadline
            .and_then(|d| chrono::Duration::from_std(d).ok());
        let job = Job::new(
            title,
            validated.accepted.clone(),
            endpoint.destination_uri.clone(),
            endpoint.external_id.clone(),
            deadline,
        );
        let job_id = job.id.clone();
        let cancel = CancellationToken::new();
        // A fixed endpoint takes one feed at a time.
        self.registry
            .create(JobSnapshot::from_job(&job), cancel.clone())?;

        let sequencer = self.sequencer.clone();
        tokio::spawn(async move {
            sequencer.run(job, cancel).await;
        });

        info!(
            job_id = %job_id,
            destination = provisioner.name(),
            accepted = validated.accepted.len(),
            rejected = validated.rejected.len(),
            "Job admitted"
        );

        Ok(StartResponse {
            job_id,
            destination: DestinationInfo {
                name: provisioner.name().to_string(),
                external_id: endpoint.external_id,
                ingest: mask_destination(&endpoint.destination_uri),
            },
            accepted: validated.accepted,
            rejected: validated.rejected,
        })
    }

    /// Cancel one job, or every live job when `job_id` is `None`.
    pub fn cancel(&self, job_id: Option<&str>) -> Result<usize> {
        match job_id {
            Some(id) => Ok(usize::from(self.registry.cancel(id)?)),
            None => Ok(self.registry.cancel_all()),
        }
    }

    /// Snapshot of one job, or of every retained job when `job_id` is `None`.
    pub fn status(&self, job_id: Option<&str>) -> Result<Vec<JobSnapshot>> {
        match job_id {
            Some(id) => Ok(vec![self.registry.get(id)?]),
            None => Ok(self.registry.list_all()),
        }
    }

    /// Cancel everything and wait for the sequencers to clean up.
    ///
    /// Returns `false` if some job was still live when the wait gave up.
    pub async fn shutdown(&self) -> bool {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            info!("Shutting down, cancelled {} job(s)", cancelled);
        }
        let limit = self.interrupt_grace * 2 + Duration::from_secs(1);
        let idle = self.registry.wait_idle(limit).await;
        if !idle {
            warn!("Jobs still running after {:?}", limit);
        }
        idle
    }
}

fn default_title() -> String {
    format!(
        "Auto stream {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::probe::RejectReason;
    use crate::probe::tests::StaticProber;
    use crate::provision::{Endpoint, EndpointProvisioner, StaticEndpoint};
    use crate::relay::runner::tests::{MockEngine, Script};
    use crate::state_machine::{State, Termination};
    use crate::youtube::ProvisionError;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingProvisioner;

    #[async_trait]
    impl EndpointProvisioner for FailingProvisioner {
        fn name(&self) -> &str {
            "youtube"
        }

        async fn provision(&self, _title: &str) -> std::result::Result<Endpoint, ProvisionError> {
            Err(ProvisionError::ApiError {
                status: 403,
                message: "quotaExceeded".into(),
            })
        }
    }

    /// Hands every job its own broadcast, like the YouTube provisioner.
    #[derive(Default)]
    struct PerJobProvisioner {
        issued: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EndpointProvisioner for PerJobProvisioner {
        fn name(&self) -> &str {
            "youtube"
        }

        async fn provision(&self, _title: &str) -> std::result::Result<Endpoint, ProvisionError> {
            let n = self.issued.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Endpoint {
                destination_uri: format!("rtmp://a.rtmp.test/live2/key-{n}"),
                external_id: format!("broadcast-{n}"),
            })
        }
    }

    struct Fixture {
        tmp: TempDir,
        server: MockServer,
        engine: Arc<MockEngine>,
        service: RelayService,
    }

    impl Fixture {
        fn uri(&self, name: &str) -> String {
            format!("{}/{}", self.server.uri(), name)
        }

        fn request(&self, names: &[&str]) -> StartRequest {
            StartRequest {
                sources: names.iter().map(|n| self.uri(n)).collect(),
                title: Some("Demo".into()),
                destination: None,
            }
        }

        async fn wait_terminal(&self, job_id: &str) -> JobSnapshot {
            let poll = async {
                loop {
                    let snapshot = self.service.status(Some(job_id)).unwrap().remove(0);
                    if snapshot.is_terminal() {
                        return snapshot;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            };
            tokio::time::timeout(Duration::from_secs(5), poll).await.unwrap()
        }
    }

    async fn fixture(
        reachable: &[&str],
        scripts: Vec<Script>,
        provisioner: Arc<dyn EndpointProvisioner>,
    ) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"media".to_vec()))
            .mount(&server)
            .await;

        let config = RelayConfig {
            scratch_dir: tmp.path().to_path_buf(),
            interrupt_grace_secs: 1,
            ..RelayConfig::default()
        };
        let prober = StaticProber::new(reachable.iter().map(|n| format!("{}/{}", server.uri(), n)));
        let engine = Arc::new(MockEngine::with_scripts(scripts));
        let service = RelayService::new(
            &config,
            Arc::new(prober),
            engine.clone(),
            Provisioners::new([provisioner], None),
        )
        .unwrap();

        Fixture {
            tmp,
            server,
            engine,
            service,
        }
    }

    fn rtmp() -> Arc<dyn EndpointProvisioner> {
        Arc::new(StaticEndpoint::new("rtmp://live.test/app/secret-key"))
    }

    #[tokio::test]
    async fn start_admits_job_and_relays_in_background() {
        let f = fixture(&["a.mp4", "b.mp4"], vec![], rtmp()).await;
        let request = f.request(&["a.mp4", "dead.mp4", "b.mp4"]);

        let response = f.service.start(request).await.unwrap();
        assert_eq!(response.accepted, [f.uri("a.mp4"), f.uri("b.mp4")]);
        assert_eq!(
            response.rejected,
            [Rejected {
                uri: f.uri("dead.mp4"),
                reason: RejectReason::Unreachable
            }]
        );
        assert_eq!(response.destination.name, "rtmp");
        assert_eq!(response.destination.ingest, "rtmp://live.test/app/****");

        let snapshot = f.wait_terminal(&response.job_id).await;
        assert_eq!(
            snapshot.state,
            State::Terminated {
                how: Termination::Completed
            }
        );
        assert_eq!(snapshot.successes, 2);
        assert_eq!(snapshot.title, "Demo");
        assert_eq!(f.engine.start_count(), 2);
        assert!(!f.tmp.path().join(&response.job_id).exists());
    }

    #[tokio::test]
    async fn unreachable_source_is_dropped_and_job_completes() {
        let f = fixture(&["a.mp4"], vec![Script::Succeed], rtmp()).await;
        let response = f.service.start(f.request(&["a.mp4", "dead.mp4"])).await.unwrap();
        assert_eq!(response.accepted, [f.uri("a.mp4")]);

        let snapshot = f.wait_terminal(&response.job_id).await;
        assert_eq!(
            snapshot.state,
            State::Terminated {
                how: Termination::Completed
            }
        );
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.source_count, 1);
        assert_eq!(snapshot.current_source_index, 1);
    }

    #[tokio::test]
    async fn fixed_endpoint_takes_one_live_job() {
        let f = fixture(&["a.mp4", "b.mp4"], vec![Script::Hang], rtmp()).await;
        let first = f.service.start(f.request(&["a.mp4"])).await.unwrap();

        let err = f.service.start(f.request(&["b.mp4"])).await.unwrap_err();
        match err {
            RelayError::DestinationBusy { destination, job_id } => {
                assert_eq!(destination, "rtmp");
                assert_eq!(job_id, first.job_id);
            }
            other => panic!("Expected DestinationBusy, got {other:?}"),
        }
        assert_eq!(f.service.status(None).unwrap().len(), 1);

        f.service.cancel(Some(&first.job_id)).unwrap();
        f.wait_terminal(&first.job_id).await;
        let second = f.service.start(f.request(&["b.mp4"])).await.unwrap();
        f.wait_terminal(&second.job_id).await;
    }

    #[tokio::test]
    async fn no_valid_sources_creates_no_job() {
        let f = fixture(&[], vec![], rtmp()).await;
        let err = f
            .service
            .start(f.request(&["a.mp4", "b.mp4"]))
            .await
            .unwrap_err();

        match err {
            RelayError::NoValidSources { rejected } => assert_eq!(rejected.len(), 2),
            other => panic!("Expected NoValidSources, got {other:?}"),
        }
        assert!(f.service.status(None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn provisioning_failure_is_surfaced_and_creates_no_job() {
        let f = fixture(&["a.mp4"], vec![], Arc::new(FailingProvisioner)).await;
        let err = f.service.start(f.request(&["a.mp4"])).await.unwrap_err();

        assert!(matches!(err, RelayError::EndpointProvisionFailed(ref m) if m.contains("quotaExceeded")));
        assert!(f.service.status(None).unwrap().is_empty());
        assert_eq!(f.engine.start_count(), 0);
    }

    #[tokio::test]
    async fn unknown_destination_is_a_provisioning_error() {
        let f = fixture(&["a.mp4"], vec![], rtmp()).await;
        let mut request = f.request(&["a.mp4"]);
        request.destination = Some("twitch".into());

        let err = f.service.start(request).await.unwrap_err();
        assert!(matches!(err, RelayError::EndpointProvisionFailed(_)));
    }

    #[tokio::test]
    async fn missing_title_gets_default() {
        let f = fixture(&["a.mp4"], vec![], rtmp()).await;
        let mut request = f.request(&["a.mp4"]);
        request.title = Some("   ".into());

        let response = f.service.start(request).await.unwrap();
        let snapshot = f.wait_terminal(&response.job_id).await;
        assert!(snapshot.title.starts_with("Auto stream "));
    }

    #[tokio::test]
    async fn cancel_and_status_of_unknown_job_are_not_found() {
        let f = fixture(&[], vec![], rtmp()).await;
        assert!(matches!(f.service.cancel(Some("nope")), Err(RelayError::JobNotFound(_))));
        assert!(matches!(f.service.status(Some("nope")), Err(RelayError::JobNotFound(_))));
        assert_eq!(f.service.cancel(None).unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_stops_running_job() {
        let f = fixture(&["a.mp4"], vec![Script::Hang], rtmp()).await;
        let response = f.service.start(f.request(&["a.mp4"])).await.unwrap();
        while f.engine.live.load(std::sync::atomic::Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(f.service.cancel(Some(&response.job_id)).unwrap(), 1);
        let snapshot = f.wait_terminal(&response.job_id).await;
        assert_eq!(
            snapshot.state,
            State::Terminated {
                how: Termination::Cancelled
            }
        );
        // A second cancel of a finished job is a no-op.
        assert_eq!(f.service.cancel(Some(&response.job_id)).unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_all_and_waits_for_cleanup() {
        let f = fixture(
            &["a.mp4", "b.mp4"],
            vec![Script::Hang, Script::Hang],
            Arc::new(PerJobProvisioner::default()),
        )
        .await;
        let first = f.service.start(f.request(&["a.mp4"])).await.unwrap();
        let second = f.service.start(f.request(&["b.mp4"])).await.unwrap();
        while f.engine.live.load(std::sync::atomic::Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(f.service.shutdown().await);
        for id in [&first.job_id, &second.job_id] {
            assert!(f.service.status(Some(id)).unwrap()[0].is_terminal());
            assert!(!f.tmp.path().join(id).exists());
        }
        assert_eq!(f.engine.live.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn start_request_accepts_minimal_json() {
        let req: StartRequest = serde_json::from_str(r#"{"sources": ["https://a/1.mp4"]}"#).unwrap();
        assert_eq!(req.sources.len(), 1);
        assert!(req.title.is_none());
        assert!(req.destination.is_none());
    }
}
