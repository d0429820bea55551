//! Tipos de dados para os recursos `liveStreams` e `liveBroadcasts` da
//! YouTube Data API v3.
//!
//! Os campos usam `camelCase` no JSON, conforme a API. Só os campos que o
//! provisionamento lê ou escreve estão modelados.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Corpo de `liveStreams.insert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStreamRequest {
    pub snippet: Snippet,
    pub cdn: Cdn,
}

/// Título e descrição, comuns a streams e broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Configuração de ingestão de um liveStream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cdn {
    /// Resolução anunciada (ex.: "1080p").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Protocolo de ingestão; sempre "rtmp" aqui.
    pub ingestion_type: String,
    /// Preenchido pela API na resposta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingestion_info: Option<IngestionInfo>,
}

/// Endereço RTMP base e chave do stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionInfo {
    pub ingestion_address: String,
    pub stream_name: String,
}

/// Resposta de `liveStreams.insert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStream {
    pub id: String,
    pub cdn: Option<Cdn>,
}

impl LiveStream {
    /// URI completo de ingestão (`<ingestionAddress>/<streamName>`), se presente.
    pub fn ingest_uri(&self) -> Option<String> {
        let info = self.cdn.as_ref()?.ingestion_info.as_ref()?;
        if info.ingestion_address.is_empty() || info.stream_name.is_empty() {
            return None;
        }
        Some(format!(
            "{}/{}",
            info.ingestion_address.trim_end_matches('/'),
            info.stream_name
        ))
    }
}

/// Corpo de `liveBroadcasts.insert`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveBroadcastRequest {
    pub snippet: BroadcastSnippet,
    pub status: BroadcastStatus,
}

/// Snippet de um broadcast agendado.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
}

/// Visibilidade do broadcast ("public", "unlisted" ou "private").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastStatus {
    pub privacy_status: String,
}

/// Resposta de `liveBroadcasts.insert` e `liveBroadcasts.bind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveBroadcast {
    pub id: String,
}

/// Envelope de erro da API do Google.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
