use std::collections::VecDeque;
use tracing::{debug, info};

use super::track::TrackDescriptor;

/// Cola FIFO de una sesión: pistas pendientes y la pista actual.
///
/// No conoce conexiones ni procesos; la sesión decide cuándo avanzar.
#[derive(Debug, Default)]
pub struct MusicQueue {
    items: VecDeque<TrackDescriptor>,
    current: Option<TrackDescriptor>,
}

impl MusicQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola
    pub fn add_track(&mut self, track: TrackDescriptor) -> usize {
        info!("➕ Agregado a la cola: {}", track.title());
        self.items.push_back(track);
        self.items.len()
    }

    /// Promueve la cabeza de la cola a pista actual (FIFO estricto).
    ///
    /// La pista anterior se descarta; no hay historial ni repetición.
    pub fn advance(&mut self) -> Option<&TrackDescriptor> {
        self.current = self.items.pop_front();
        match &self.current {
            Some(track) => info!("➡️ Siguiente en cola (FIFO): {}", track.title()),
            None => info!("📭 Cola vacía, no hay siguiente track"),
        }
        self.current.as_ref()
    }

    /// Limpia pendientes y actual
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        self.current = None;
        debug!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        cleared
    }

    pub fn current(&self) -> Option<&TrackDescriptor> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TrackDescriptor> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.current.is_none()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            pending: self.items.iter().cloned().collect(),
        }
    }
}

/// Copia inmutable del estado de la cola para listados
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub current: Option<TrackDescriptor>,
    pub pending: Vec<TrackDescriptor>,
}

impl QueueSnapshot {
    pub fn pending_titles(&self) -> Vec<&str> {
        self.pending.iter().map(TrackDescriptor::title).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }
}
