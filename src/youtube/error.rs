//! Tipos de erro para o provisionamento de destinos.
//!
//! Define [`ProvisionError`] com variantes para erros da API, respostas sem
//! dados de ingestão e erros de rede.

use thiserror::Error;

/// Erros que podem ocorrer ao obter um destino de transmissão.
///
/// - [`ApiError`](ProvisionError::ApiError): a API retornou um status HTTP de erro
/// - [`MissingIngestion`](ProvisionError::MissingIngestion): o stream criado não traz endereço nem chave
/// - [`NetworkError`](ProvisionError::NetworkError): falha na camada de rede
/// - [`NotConfigured`](ProvisionError::NotConfigured): o destino pedido não existe na configuração
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Erro retornado pela API (ex.: 401 token expirado, 403 quota excedida).
    /// Contém o código de status HTTP e o corpo da resposta.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// O liveStream foi criado mas `cdn.ingestionInfo` veio vazio.
    #[error("live stream has no ingestion address")]
    MissingIngestion,

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Nenhum provisionador registrado com esse nome.
    #[error("destination '{0}' is not configured")]
    NotConfigured(String),
}
