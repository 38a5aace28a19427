use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::{
    pipeline::PipelineBuilder,
    session::{SessionConfig, SessionKey, SessionQueue},
};
use crate::error::RegistryError;

/// Mapa de sesiones vivas, una por guild.
///
/// La creación pasa por la entrada de `DashMap`, que bloquea el shard de la
/// clave: dos `get` concurrentes para la misma guild devuelven la misma sesión.
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, SessionQueue>,
    config: SessionConfig,
    builder: Arc<dyn PipelineBuilder>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, builder: Arc<dyn PipelineBuilder>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            builder,
        }
    }

    /// Devuelve la sesión de la guild o crea una en `Idle`.
    ///
    /// Una sesión destruida que siga registrada se reemplaza por una nueva.
    pub fn get(&self, key: SessionKey) -> SessionQueue {
        match self.sessions.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_destroyed() {
                    debug!("♻️ Reemplazando sesión destruida de guild {}", key);
                    let fresh = self.spawn(key);
                    entry.insert(fresh.clone());
                    fresh
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => entry.insert(self.spawn(key)).value().clone(),
        }
    }

    /// Sesión existente y no destruida, sin crear ninguna
    pub fn get_existing(&self, key: SessionKey) -> Option<SessionQueue> {
        self.sessions
            .get(&key)
            .map(|s| s.value().clone())
            .filter(|s| !s.is_destroyed())
    }

    /// Quita la sesión del mapa. Hay que llamar a `destroy()` antes.
    pub fn remove(&self, key: SessionKey) -> Result<SessionQueue, RegistryError> {
        if let Some((_, session)) = self.sessions.remove_if(&key, |_, s| s.is_destroyed()) {
            info!("🗑️ Sesión de guild {} eliminada del registro", key);
            return Ok(session);
        }

        if self.sessions.contains_key(&key) {
            Err(RegistryError::StillActive(key))
        } else {
            Err(RegistryError::Missing(key))
        }
    }

    /// Destruye y elimina en un paso; no falla si la guild no tenía sesión
    pub async fn shutdown(&self, key: SessionKey) {
        let Some(session) = self.sessions.get(&key).map(|s| s.value().clone()) else {
            return;
        };
        session.destroy().await;
        let _ = self.remove(key);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn spawn(&self, key: SessionKey) -> SessionQueue {
        SessionQueue::spawn(key, self.config.clone(), self.builder.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::session::{tests::FakeBuilder, SessionState};
    use pretty_assertions::assert_eq;

    fn registry() -> Arc<SessionRegistry> {
        Arc::new(SessionRegistry::new(
            SessionConfig::default(),
            Arc::new(FakeBuilder::default()),
        ))
    }

    #[tokio::test]
    async fn get_creates_idle_session_once() {
        let registry = registry();
        let first = registry.get(42);
        let second = registry.get(42);

        assert_eq!(first.state(), SessionState::Idle);
        assert_eq!(registry.len(), 1);

        first.add_track(crate::audio::TrackDescriptor::new("A", "u1")).await.unwrap();
        assert_eq!(second.snapshot().await.unwrap().pending_titles(), vec!["A"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_yields_single_instance() {
        let registry = registry();

        let tasks = (0..32).map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let session = registry.get(7);
                session
                    .add_track(crate::audio::TrackDescriptor::new(format!("t{i}"), format!("u{i}")))
                    .await
                    .unwrap();
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert_eq!(registry.len(), 1);
        let snapshot = registry.get(7).snapshot().await.unwrap();
        assert_eq!(snapshot.pending.len(), 32);
    }

    #[tokio::test]
    async fn remove_requires_destroy_first() {
        let registry = registry();
        assert!(matches!(registry.remove(1), Err(RegistryError::Missing(1))));

        let session = registry.get(1);
        assert!(matches!(registry.remove(1), Err(RegistryError::StillActive(1))));

        session.destroy().await;
        let removed = registry.remove(1).unwrap();
        assert!(removed.is_destroyed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn destroyed_session_is_replaced_on_get() {
        let registry = registry();
        let old = registry.get(5);
        old.destroy().await;

        assert!(registry.get_existing(5).is_none());
        let fresh = registry.get(5);
        assert_eq!(fresh.state(), SessionState::Idle);
        assert!(old.is_destroyed());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_destroys_and_forgets() {
        let registry = registry();
        let session = registry.get(9);

        registry.shutdown(9).await;
        registry.shutdown(9).await;

        assert!(session.is_destroyed());
        assert!(registry.is_empty());
    }
}
