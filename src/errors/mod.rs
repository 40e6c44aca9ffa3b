//! # Módulo de Erros do Motor
//!
//! Define a taxonomia de erros que atravessam as fronteiras do motor de
//! execução. Erros que acontecem DENTRO de um step (falha de transporte,
//! handler com ação ERROR, verificação que estourou timeout) não aparecem
//! aqui: eles são capturados e reportados como parte do resultado do step,
//! e a execução da suíte continua.
//!
//! ## O que vira `EngineError`:
//!
//! - Recurso inexistente (suíte, step, ambiente, schedule)
//! - Entrada inválida (dependência circular, chave duplicada)
//! - Expressão cron que não parseia
//! - Conector sem driver registrado ou que falhou na chamada
//! - Cancelamento de uma execução pelo chamador

use thiserror::Error;

/// Erros do motor que são devolvidos ao chamador.
///
/// Cada variante carrega contexto suficiente para a mensagem ser útil
/// sem precisar de um stack trace.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Recurso referenciado não existe.
    ///
    /// `kind` é o tipo do recurso ("suite", "step", "environment",
    /// "schedule", "connector") e `name` identifica a instância.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Entrada rejeitada antes de qualquer execução.
    ///
    /// Exemplos: dependência circular ao salvar um step, variável de
    /// ambiente com chave duplicada, dependência apontando para outra
    /// suíte.
    #[error("{0}")]
    Validation(String),

    /// Expressão cron inválida.
    #[error("invalid cron expression '{expression}': {detail}")]
    CronParse { expression: String, detail: String },

    /// Falha na chamada a um conector de infraestrutura.
    ///
    /// Inclui timeout da query, driver ausente e erro do próprio backend.
    #[error("connector '{connector}' failed: {detail}")]
    Connector { connector: String, detail: String },

    /// Execução cancelada pelo chamador.
    #[error("run cancelled: {0}")]
    Cancelled(String),
}

impl EngineError {
    /// Atalho para erros de validação.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Atalho para erros de conector.
    pub fn connector(connector: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Connector {
            connector: connector.into(),
            detail: detail.into(),
        }
    }
}
