//! Destinations a job can relay to.
//!
//! A provisioner turns a title into one ingest URI. The URI carries the stream
//! key and never leaves the process unmasked.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::RelayConfig;
use crate::youtube::{ProvisionError, YouTubeClient};

/// A provisioned destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full ingest URI, stream key included.
    pub destination_uri: String,
    /// Provider-side id shown in status output.
    pub external_id: String,
}

#[async_trait]
pub trait EndpointProvisioner: Send + Sync {
    /// Name used to select this provisioner in a start request.
    fn name(&self) -> &str;

    async fn provision(&self, title: &str) -> Result<Endpoint, ProvisionError>;
}

/// A fixed RTMP URL. Feeds one live job at a time.
pub struct StaticEndpoint {
    uri: String,
}

impl StaticEndpoint {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl EndpointProvisioner for StaticEndpoint {
    fn name(&self) -> &str {
        "rtmp"
    }

    async fn provision(&self, _title: &str) -> Result<Endpoint, ProvisionError> {
        Ok(Endpoint {
            destination_uri: self.uri.clone(),
            external_id: self.name().to_string(),
        })
    }
}

/// The provisioners available to this process, by name.
pub struct Provisioners {
    by_name: HashMap<String, Arc<dyn EndpointProvisioner>>,
    default: Option<String>,
}

impl Provisioners {
    pub fn new(
        provisioners: impl IntoIterator<Item = Arc<dyn EndpointProvisioner>>,
        default: Option<String>,
    ) -> Self {
        let by_name: HashMap<_, _> = provisioners
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();
        // Without an explicit default, prefer a provider-backed destination.
        let default = default.or_else(|| {
            ["youtube", "rtmp"]
                .into_iter()
                .find(|name| by_name.contains_key(*name))
                .map(str::to_string)
        });
        Self { by_name, default }
    }

    /// Build from the `rtmp_url` and `[youtube]` settings.
    pub fn from_config(config: &RelayConfig) -> Result<Self, ProvisionError> {
        let mut all: Vec<Arc<dyn EndpointProvisioner>> = Vec::new();
        if let Some(ref url) = config.rtmp_url {
            all.push(Arc::new(StaticEndpoint::new(url.clone())));
        }
        if let Some(ref youtube) = config.youtube
            && !youtube.access_token.is_empty()
        {
            all.push(Arc::new(YouTubeClient::new(youtube)?));
        }
        Ok(Self::new(all, config.default_destination.clone()))
    }

    /// The provisioner named `hint`, or the default one.
    pub fn resolve(&self, hint: Option<&str>) -> Result<Arc<dyn EndpointProvisioner>, ProvisionError> {
        let name = hint
            .or(self.default.as_deref())
            .ok_or_else(|| ProvisionError::NotConfigured("default".into()))?;
        debug!("Using destination {}", name);
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::NotConfigured(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// `destination` with its last path segment (the stream key) replaced.
pub fn mask_destination(destination: &str) -> String {
    match destination.rsplit_once('/') {
        Some((base, key)) if !key.is_empty() && !base.ends_with('/') => format!("{base}/****"),
        _ => destination.to_string(),
    }
}

/// Replace every occurrence of `destination` in `text` with its masked form.
pub fn mask_stream_key(text: &str, destination: &str) -> String {
    if destination.is_empty() {
        return text.to_string();
    }
    text.replace(destination, &mask_destination(destination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YouTubeConfig;

    #[test]
    fn masks_last_segment() {
        assert_eq!(
            mask_destination("rtmp://a.rtmp.youtube.com/live2/abcd-1234"),
            "rtmp://a.rtmp.youtube.com/live2/****"
        );
        assert_eq!(mask_destination("rtmp://host"), "rtmp://host");
        assert_eq!(mask_destination("rtmp://host/app/"), "rtmp://host/app/");
    }

    #[test]
    fn masks_key_inside_command_line() {
        let dest = "rtmp://live.test/app/secret";
        let cmd = format!("ffmpeg -re -i in.media -f flv {dest}");
        let masked = mask_stream_key(&cmd, dest);
        assert!(!masked.contains("secret"));
        assert!(masked.ends_with("rtmp://live.test/app/****"));
        assert_eq!(mask_stream_key("abc", ""), "abc");
    }

    #[tokio::test]
    async fn static_endpoint_returns_configured_url() {
        let endpoint = StaticEndpoint::new("rtmp://x/app/key")
            .provision("anything")
            .await
            .unwrap();
        assert_eq!(endpoint.destination_uri, "rtmp://x/app/key");
        assert_eq!(endpoint.external_id, "rtmp");
    }

    #[test]
    fn resolve_by_hint_and_default() {
        let provisioners = Provisioners::new(
            [Arc::new(StaticEndpoint::new("rtmp://x/a/k")) as Arc<dyn EndpointProvisioner>],
            None,
        );
        assert_eq!(provisioners.resolve(None).unwrap().name(), "rtmp");
        assert_eq!(provisioners.resolve(Some("rtmp")).unwrap().name(), "rtmp");
        assert!(matches!(
            provisioners.resolve(Some("youtube")),
            Err(ProvisionError::NotConfigured(name)) if name == "youtube"
        ));
    }

    #[test]
    fn empty_set_has_no_default() {
        let provisioners = Provisioners::new([], None);
        assert!(matches!(
            provisioners.resolve(None),
            Err(ProvisionError::NotConfigured(_))
        ));
    }

    #[test]
    fn from_config_prefers_youtube_when_token_present() {
        let mut config = RelayConfig::default();
        config.rtmp_url = Some("rtmp://x/a/k".into());
        config.youtube = Some(YouTubeConfig {
            access_token: "tok".into(),
            api_base: "http://127.0.0.1:1".into(),
            privacy_status: "public".into(),
            resolution: "1080p".into(),
        });

        let provisioners = Provisioners::from_config(&config).unwrap();
        assert_eq!(provisioners.names(), ["rtmp", "youtube"]);
        assert_eq!(provisioners.resolve(None).unwrap().name(), "youtube");
    }

    #[test]
    fn from_config_skips_youtube_without_token() {
        let mut config = RelayConfig::default();
        config.youtube = Some(YouTubeConfig {
            access_token: String::new(),
            api_base: "http://127.0.0.1:1".into(),
            privacy_status: "public".into(),
            resolution: "1080p".into(),
        });
        let provisioners = Provisioners::from_config(&config).unwrap();
        assert!(provisioners.names().is_empty());
    }
}
