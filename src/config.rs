//! Configuração do streamrelay carregada a partir de `streamrelay.toml`.
//!
//! A struct [`RelayConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! Variáveis de ambiente (`FFMPEG_BIN`, `YOUTUBE_RTMP_URL`, `YOUTUBE_ACCESS_TOKEN`,
//! `FFMPEG_MAX_RUNTIME_MS`, `PORT`) têm precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::relay::RelayProfile;

/// Arquivo procurado no diretório atual quando `--config` não é informado.
pub const DEFAULT_CONFIG_FILE: &str = "streamrelay.toml";

/// Configuração de nível superior carregada de `streamrelay.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Binário do ffmpeg usado como motor de relay.
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,

    /// Endereço em que o serviço HTTP escuta.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Diretório raiz das áreas de trabalho de cada job.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Tempo máximo de uma verificação de acessibilidade, em segundos.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Tempo máximo do download de uma fonte, em segundos.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Tamanho máximo aceito para uma fonte, em bytes.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,

    /// Tempo máximo de uma tentativa de relay. Ausente = sem limite.
    #[serde(default)]
    pub attempt_timeout_secs: Option<u64>,

    /// Prazo entre o SIGINT e o kill forçado do subprocesso.
    #[serde(default = "default_interrupt_grace_secs")]
    pub interrupt_grace_secs: u64,

    /// Prazo total de um job. Ausente = sem limite.
    #[serde(default)]
    pub job_deadline_secs: Option<u64>,

    /// Por quanto tempo um job terminado continua consultável.
    #[serde(default = "default_retain_finished_secs")]
    pub retain_finished_secs: u64,

    /// Limite de bytes do diagnóstico guardado de uma falha do motor.
    #[serde(default = "default_diagnostics_limit")]
    pub diagnostics_limit: usize,

    /// URL RTMP fixa (destino "rtmp").
    #[serde(default)]
    pub rtmp_url: Option<String>,

    /// Destino usado quando a requisição não indica nenhum.
    #[serde(default)]
    pub default_destination: Option<String>,

    /// Provisionamento via YouTube Live (destino "youtube").
    #[serde(default)]
    pub youtube: Option<YouTubeConfig>,

    /// Perfis de qualidade, na ordem em que são tentados.
    #[serde(default = "crate::relay::default_profiles")]
    pub profiles: Vec<RelayProfile>,
}

/// Parâmetros da API do YouTube Live.
#[derive(Debug, Clone, Deserialize)]
pub struct YouTubeConfig {
    /// Token OAuth de acesso. A renovação é responsabilidade de quem o fornece.
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_youtube_api_base")]
    pub api_base: String,

    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,

    #[serde(default = "default_resolution")]
    pub resolution: String,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("streamrelay")
}

fn default_probe_timeout_secs() -> u64 {
    8
}

fn default_download_timeout_secs() -> u64 {
    30
}

// 4 GiB.
fn default_max_download_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}

fn default_interrupt_grace_secs() -> u64 {
    5
}

fn default_retain_finished_secs() -> u64 {
    60
}

fn default_diagnostics_limit() -> usize {
    4096
}

fn default_youtube_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_privacy_status() -> String {
    "public".to_string()
}

fn default_resolution() -> String {
    "1080p".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            listen: default_listen(),
            scratch_dir: default_scratch_dir(),
            probe_timeout_secs: default_probe_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            max_download_bytes: default_max_download_bytes(),
            attempt_timeout_secs: None,
            interrupt_grace_secs: default_interrupt_grace_secs(),
            job_deadline_secs: None,
            retain_finished_secs: default_retain_finished_secs(),
            diagnostics_limit: default_diagnostics_limit(),
            rtmp_url: None,
            default_destination: None,
            youtube: None,
            profiles: crate::relay::default_profiles(),
        }
    }
}

impl RelayConfig {
    /// Carrega a configuração do caminho informado, aplicando as variáveis de ambiente.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<RelayConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Sobrescreve campos com as variáveis de ambiente não vazias.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(bin) = var("FFMPEG_BIN") {
            self.ffmpeg_bin = bin;
        }
        if let Some(url) = var("YOUTUBE_RTMP_URL") {
            self.rtmp_url = Some(url);
        }
        if let Some(token) = var("YOUTUBE_ACCESS_TOKEN") {
            match self.youtube.as_mut() {
                Some(yt) => yt.access_token = token,
                None => {
                    self.youtube = Some(YouTubeConfig {
                        access_token: token,
                        api_base: default_youtube_api_base(),
                        privacy_status: default_privacy_status(),
                        resolution: default_resolution(),
                    })
                }
            }
        }
        // 0 desativa o limite.
        if let Some(ms) = var("FFMPEG_MAX_RUNTIME_MS").and_then(|v| v.parse::<u64>().ok()) {
            self.attempt_timeout_secs = (ms > 0).then(|| ms.div_ceil(1000));
        }
        if let Some(port) = var("PORT").and_then(|v| v.parse::<u16>().ok()) {
            let host = self
                .listen
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.listen = format!("{host}:{port}");
        }
    }

    /// Rejeita combinações que impediriam qualquer job de progredir.
    pub fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            return Err(RelayError::Config("at least one relay profile is required".into()));
        }
        if self.ffmpeg_bin.trim().is_empty() {
            return Err(RelayError::Config("ffmpeg_bin must not be empty".into()));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// 0 significa sem limite, como `FFMPEG_MAX_RUNTIME_MS=0`.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_secs(self.interrupt_grace_secs)
    }

    pub fn job_deadline(&self) -> Option<Duration> {
        self.job_deadline_secs
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn retain_finished(&self) -> Duration {
        Duration::from_secs(self.retain_finished_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_values() {
        let config = RelayConfig::default();
        assert_eq!(config.ffmpeg_bin, "ffmpeg");
        assert_eq!(config.probe_timeout_secs, 8);
        assert_eq!(config.download_timeout_secs, 30);
        assert_eq!(config.interrupt_grace_secs, 5);
        assert_eq!(config.profiles.len(), 2);
        assert!(config.attempt_timeout().is_none());
        assert!(config.youtube.is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            rtmp_url = "rtmp://a.rtmp.youtube.com/live2/key"
            attempt_timeout_secs = 600

            [youtube]
            access_token = "ya29.test"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.rtmp_url.as_deref(), Some("rtmp://a.rtmp.youtube.com/live2/key"));
        assert_eq!(config.attempt_timeout(), Some(Duration::from_secs(600)));
        let yt = config.youtube.unwrap();
        assert_eq!(yt.access_token, "ya29.test");
        assert_eq!(yt.privacy_status, "public");
        assert_eq!(config.download_timeout_secs, 30);
    }

    #[test]
    fn deserialize_custom_profiles() {
        let toml_str = r#"
            [[profiles]]
            name = "only"
            video_codec = "libx264"
            video_bitrate = "1000k"
        "#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].name, "only");
        assert_eq!(config.profiles[0].audio_codec, "aac");
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FFMPEG_BIN", "/opt/ffmpeg"),
            ("YOUTUBE_RTMP_URL", "rtmp://example/live"),
            ("FFMPEG_MAX_RUNTIME_MS", "1500"),
            ("PORT", "9000"),
            ("YOUTUBE_ACCESS_TOKEN", ""),
        ]);
        let mut config = RelayConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.ffmpeg_bin, "/opt/ffmpeg");
        assert_eq!(config.rtmp_url.as_deref(), Some("rtmp://example/live"));
        assert_eq!(config.attempt_timeout_secs, Some(2));
        assert_eq!(config.listen, "0.0.0.0:9000");
        // Valor vazio é ignorado.
        assert!(config.youtube.is_none());
    }

    #[test]
    fn zero_in_toml_means_no_limit() {
        let config: RelayConfig = toml::from_str(
            r#"
            attempt_timeout_secs = 0
            job_deadline_secs = 0
            "#,
        )
        .unwrap();
        assert!(config.attempt_timeout().is_none());
        assert!(config.job_deadline().is_none());
    }

    #[test]
    fn zero_runtime_disables_attempt_timeout() {
        let mut config = RelayConfig {
            attempt_timeout_secs: Some(10),
            ..Default::default()
        };
        config.apply_env(|k| (k == "FFMPEG_MAX_RUNTIME_MS").then(|| "0".to_string()));
        assert!(config.attempt_timeout_secs.is_none());
    }

    #[test]
    fn empty_profiles_rejected() {
        let config = RelayConfig {
            profiles: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RelayConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.retain_finished_secs, 60);
    }
}
