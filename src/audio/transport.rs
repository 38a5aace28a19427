//! Contratos con la capa de voz.
//!
//! La sesión sólo conoce estos traits; el adaptador de songbird vive en
//! `bot::voice`. Los eventos vuelven a la sesión por su buzón, etiquetados con la
//! generación de la pista para poder descartar los que llegan tarde.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::pipeline::AudioStream;
use crate::error::{ConnectionError, SinkError};

/// Cómo terminó una pista según el sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Finished,
    Errored(String),
}

/// Eventos asíncronos que entran al buzón de la sesión
#[derive(Debug)]
pub(crate) enum SessionEvent {
    TrackEnded { generation: u64, outcome: TrackOutcome },
    Disconnected,
    Reconnected,
    GraceExpired { epoch: u64 },
}

/// Canal por el que el sink informa el final de una pista concreta
#[derive(Debug, Clone)]
pub struct TrackEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl TrackEvents {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// La pista terminó de forma natural (o fue detenida)
    pub fn idle(&self) {
        self.emit(TrackOutcome::Finished);
    }

    /// La pista abortó en el dispositivo de salida
    pub fn errored(&self, reason: impl Into<String>) {
        self.emit(TrackOutcome::Errored(reason.into()));
    }

    fn emit(&self, outcome: TrackOutcome) {
        let event = SessionEvent::TrackEnded {
            generation: self.generation,
            outcome,
        };
        if self.tx.send(event).is_err() {
            debug!("Sesión cerrada, evento de pista {} descartado", self.generation);
        }
    }
}

/// Canal por el que el transporte informa cambios de conexión
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ConnectionEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }

    pub fn disconnected(&self) {
        let _ = self.tx.send(SessionEvent::Disconnected);
    }

    /// El transporte volvió a señalizar o reconectó
    pub fn reconnected(&self) {
        let _ = self.tx.send(SessionEvent::Reconnected);
    }
}

/// Dispositivo de salida ligado a una conexión
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play(&self, stream: AudioStream, events: TrackEvents) -> Result<(), SinkError>;
    async fn pause(&self) -> Result<(), SinkError>;
    async fn unpause(&self) -> Result<(), SinkError>;
    /// Detiene la pista actual; el sink puede seguir emitiendo `idle` para ella
    async fn stop(&self) -> Result<(), SinkError>;
}

/// Conexión de voz establecida
#[async_trait]
pub trait Connection: Send + Sync {
    /// Enlaza la salida de audio de la sesión a la conexión
    fn subscribe(&self) -> Arc<dyn AudioSink>;
    async fn disconnect(&self);
}

/// Forma de unirse a un canal de voz
#[async_trait]
pub trait Transport: Send + Sync {
    /// Se une y espera al estado listo. El límite de tiempo lo aplica la sesión.
    async fn connect(&self, events: ConnectionEvents) -> Result<Arc<dyn Connection>, ConnectionError>;

    /// Deshace un intento de conexión fallido o abandonado
    async fn abort(&self);
}
