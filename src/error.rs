//! Errores del motor de reproducción.
//!
//! Sólo `ConnectionError` y `QueueError` llegan al llamador. `PipelineError` y
//! `SinkError` se convierten en un aviso al canal y en un avance automático de la
//! cola; nunca detienen la sesión.

use std::fmt;
use std::time::Duration;

/// Etapa del pipeline que produjo el fallo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Resolver,
    Transcoder,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Resolver => f.write_str("resolver"),
            PipelineStage::Transcoder => f.write_str("transcoder"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("voice connection not ready after {0:?}")]
    Timeout(Duration),

    #[error("could not join voice channel: {0}")]
    Join(String),

    #[error("session already connected")]
    AlreadyConnected,

    #[error("session destroyed")]
    Destroyed,
}

#[derive(thiserror::Error, Debug)]
#[error("{stage} failed{}: {diagnostic}", exit_suffix(.exit_code))]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub exit_code: Option<i32>,
    pub diagnostic: String,
}

fn exit_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" (exit code {c})")).unwrap_or_default()
}

impl PipelineError {
    pub fn new(stage: PipelineStage, exit_code: Option<i32>, diagnostic: impl Into<String>) -> Self {
        Self {
            stage,
            exit_code,
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("sink rejected stream: {0}")]
    Rejected(String),

    #[error("sink control failed: {0}")]
    Control(String),
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("session {0} is not registered")]
    Missing(u64),

    #[error("session {0} must be destroyed before removal")]
    StillActive(u64),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("nothing is playing")]
    NothingPlaying,

    #[error("session is not connected")]
    NotConnected,

    #[error("session destroyed")]
    Destroyed,
}

/// Fallos al convertir lo que escribió el usuario en una pista
#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("Could not get Spotify track info.")]
    Spotify(#[source] anyhow::Error),

    #[error("Could not find anything for that query.")]
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_mentions_stage_and_exit_code() {
        let err = PipelineError::new(PipelineStage::Resolver, Some(1), "ERROR: Video unavailable");
        assert_eq!(
            err.to_string(),
            "resolver failed (exit code 1): ERROR: Video unavailable"
        );

        let err = PipelineError::new(PipelineStage::Transcoder, None, "no audio after 20s");
        assert_eq!(err.to_string(), "transcoder failed: no audio after 20s");
    }
}
