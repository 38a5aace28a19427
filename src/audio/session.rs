//! Cola de reproducción por sesión (una por guild).
//!
//! Cada sesión es una tarea de tokio con su propio buzón: comandos del usuario,
//! eventos del sink/transporte y resultados de construcción de pipelines entran
//! por ahí y se procesan de uno en uno, así que las transiciones nunca se
//! intercalan.
//!
//! Cada pista que arranca recibe una generación nueva. Los finales de pista y los
//! pipelines terminados que traen una generación vieja se descartan: así un `skip`
//! produce exactamente un avance aunque el sink también avise `idle` al detenerse.

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use super::{
    notify::{notify_best_effort, Notice, Notifier},
    pipeline::{AudioPipeline, AudioStream, PipelineBuilder},
    queue::{MusicQueue, QueueSnapshot},
    track::TrackDescriptor,
    transport::{AudioSink, Connection, ConnectionEvents, SessionEvent, TrackEvents, TrackOutcome, Transport},
};
use crate::{
    config::Config,
    error::{ConnectionError, PipelineError, QueueError},
};

/// Clave de sesión (id de guild)
pub type SessionKey = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Sin conexión de voz
    Idle,
    ConnectedEmpty,
    Playing,
    /// Transitorio: la pista actual terminó y se está eligiendo la siguiente
    Advancing,
    Destroyed,
}

/// Tiempos de la máquina de estados
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            reconnect_grace: config.reconnect_grace,
        }
    }
}

/// Resultado de encolar desde la capa de comandos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// No había nada sonando y la pista pasó a ser la actual
    Started,
    /// Quedó en la cola en esta posición (1 = la siguiente)
    Queued { position: usize },
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Connect {
        transport: Arc<dyn Transport>,
        notify: Option<Arc<dyn Notifier>>,
        reply: Reply<Result<(), ConnectionError>>,
    },
    AddTrack {
        track: TrackDescriptor,
        start: bool,
        reply: Reply<Enqueued>,
    },
    PlayNext {
        reply: Reply<Result<(), QueueError>>,
    },
    Skip {
        reply: Reply<Result<(), QueueError>>,
    },
    Pause {
        reply: Reply<Result<bool, QueueError>>,
    },
    Resume {
        reply: Reply<Result<bool, QueueError>>,
    },
    Stop {
        reply: Reply<()>,
    },
    Destroy {
        reply: Reply<()>,
    },
    Snapshot {
        reply: Reply<QueueSnapshot>,
    },
}

/// Pipeline construido (o fallido) para una generación concreta
struct Built {
    generation: u64,
    result: Result<(AudioPipeline, AudioStream), PipelineError>,
}

/// Handle clonable hacia la tarea de una sesión
#[derive(Clone)]
pub struct SessionQueue {
    key: SessionKey,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
}

impl std::fmt::Debug for SessionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionQueue")
            .field("key", &self.key)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl SessionQueue {
    /// Crea la sesión en estado `Idle` y lanza su tarea
    pub fn spawn(key: SessionKey, config: SessionConfig, builder: Arc<dyn PipelineBuilder>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (built_tx, built_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let actor = SessionActor {
            key,
            config,
            builder,
            queue: MusicQueue::new(),
            connection: None,
            sink: None,
            notify: None,
            pipeline: None,
            build_task: None,
            generation: 0,
            loading: false,
            paused: false,
            disconnect_epoch: 0,
            awaiting_reconnect: false,
            state_tx,
            events_tx,
            built_tx,
        };
        tokio::spawn(actor.run(commands_rx, events_rx, built_rx));
        debug!("🆕 Sesión creada para guild {}", key);

        Self {
            key,
            commands: commands_tx,
            state: state_rx,
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    /// Receptor para observar cambios de estado
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).ok()?;
        rx.await.ok()
    }

    /// Se une al transporte y fija el canal de avisos
    pub async fn connect(
        &self,
        transport: Arc<dyn Transport>,
        notify: Option<Arc<dyn Notifier>>,
    ) -> Result<(), ConnectionError> {
        self.request(|reply| Command::Connect {
            transport,
            notify,
            reply,
        })
        .await
        .unwrap_or(Err(ConnectionError::Destroyed))
    }

    /// Agrega al final de la cola sin arrancar la reproducción
    pub async fn add_track(&self, track: TrackDescriptor) -> Result<usize, QueueError> {
        match self
            .request(|reply| Command::AddTrack {
                track,
                start: false,
                reply,
            })
            .await
        {
            Some(Enqueued::Queued { position }) => Ok(position),
            Some(Enqueued::Started) => Ok(0),
            None => Err(QueueError::Destroyed),
        }
    }

    /// Agrega y, si no hay pista actual, arranca la reproducción
    pub async fn enqueue(&self, track: TrackDescriptor) -> Result<Enqueued, QueueError> {
        self.request(|reply| Command::AddTrack {
            track,
            start: true,
            reply,
        })
        .await
        .ok_or(QueueError::Destroyed)
    }

    /// Fuerza el avance a la siguiente pista
    pub async fn play_next(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::PlayNext { reply })
            .await
            .unwrap_or(Err(QueueError::Destroyed))
    }

    pub async fn skip(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Skip { reply })
            .await
            .unwrap_or(Err(QueueError::Destroyed))
    }

    /// Devuelve `true` si la llamada cambió el estado de pausa
    pub async fn pause(&self) -> Result<bool, QueueError> {
        self.request(|reply| Command::Pause { reply })
            .await
            .unwrap_or(Err(QueueError::Destroyed))
    }

    pub async fn resume(&self) -> Result<bool, QueueError> {
        self.request(|reply| Command::Resume { reply })
            .await
            .unwrap_or(Err(QueueError::Destroyed))
    }

    /// Vacía la cola y detiene la pista sin avanzar; la conexión sigue abierta
    pub async fn stop(&self) -> Result<(), QueueError> {
        self.request(|reply| Command::Stop { reply })
            .await
            .ok_or(QueueError::Destroyed)
    }

    /// Detiene todo y libera la conexión. Llamarlo de nuevo no hace nada.
    pub async fn destroy(&self) {
        let _ = self.request(|reply| Command::Destroy { reply }).await;
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        self.request(|reply| Command::Snapshot { reply })
            .await
            .ok_or(QueueError::Destroyed)
    }
}

struct SessionActor {
    key: SessionKey,
    config: SessionConfig,
    builder: Arc<dyn PipelineBuilder>,
    queue: MusicQueue,
    connection: Option<Arc<dyn Connection>>,
    sink: Option<Arc<dyn AudioSink>>,
    notify: Option<Arc<dyn Notifier>>,
    pipeline: Option<AudioPipeline>,
    build_task: Option<JoinHandle<()>>,
    generation: u64,
    /// Hay un pipeline en construcción para la generación actual
    loading: bool,
    paused: bool,
    disconnect_epoch: u64,
    awaiting_reconnect: bool,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    built_tx: mpsc::UnboundedSender<Built>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        mut builds: mpsc::UnboundedReceiver<Built>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Todos los handles de la sesión {} se soltaron", self.key);
                        self.destroy().await;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event).await,
                Some(built) = builds.recv() => self.on_pipeline_built(built).await,
            }

            if self.state() == SessionState::Destroyed {
                break;
            }
        }
        debug!("🔚 Tarea de sesión {} terminada", self.key);
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Estado de reposo según haya conexión o no
    fn rest_state(&self) -> SessionState {
        if self.connection.is_some() {
            SessionState::ConnectedEmpty
        } else {
            SessionState::Idle
        }
    }

    async fn notify(&self, notice: Notice) {
        notify_best_effort(self.notify.as_ref(), notice).await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                transport,
                notify,
                reply,
            } => {
                let _ = reply.send(self.connect(transport, notify).await);
            }
            Command::AddTrack { track, start, reply } => {
                let position = self.queue.add_track(track);
                let outcome = if start && self.queue.current().is_none() && self.sink.is_some() {
                    self.advance().await;
                    Enqueued::Started
                } else {
                    Enqueued::Queued { position }
                };
                let _ = reply.send(outcome);
            }
            Command::PlayNext { reply } => {
                let result = if self.sink.is_none() {
                    Err(QueueError::NotConnected)
                } else {
                    self.halt_playback().await;
                    self.advance().await;
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Skip { reply } => {
                let result = if self.state() != SessionState::Playing {
                    Err(QueueError::NothingPlaying)
                } else {
                    info!("⏭️ Saltando pista en guild {}", self.key);
                    self.halt_playback().await;
                    self.advance().await;
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.set_paused(true).await);
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.set_paused(false).await);
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Destroy { reply } => {
                self.destroy().await;
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.queue.snapshot());
            }
        }
    }

    async fn connect(
        &mut self,
        transport: Arc<dyn Transport>,
        notify: Option<Arc<dyn Notifier>>,
    ) -> Result<(), ConnectionError> {
        if self.connection.is_some() {
            return Err(ConnectionError::AlreadyConnected);
        }

        info!("🔗 Conectando sesión {} al canal de voz...", self.key);
        let events = ConnectionEvents::new(self.events_tx.clone());
        let timeout = self.config.connect_timeout;

        let connection = match tokio::time::timeout(timeout, transport.connect(events)).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                error!("❌ Error al conectar sesión {}: {}", self.key, e);
                transport.abort().await;
                return Err(e);
            }
            Err(_) => {
                error!("⏱️ La conexión de la sesión {} no estuvo lista en {:?}", self.key, timeout);
                transport.abort().await;
                return Err(ConnectionError::Timeout(timeout));
            }
        };

        self.sink = Some(connection.subscribe());
        self.connection = Some(connection);
        self.notify = notify;
        self.awaiting_reconnect = false;
        self.set_state(SessionState::ConnectedEmpty);
        info!("🔊 Sesión {} conectada", self.key);
        Ok(())
    }

    /// Invalida la pista actual: nueva generación y procesos cerrados
    fn retire_current(&mut self) {
        self.generation += 1;
        self.loading = false;
        self.paused = false;

        if let Some(task) = self.build_task.take() {
            task.abort();
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.close();
        }
    }

    /// Corta lo que esté sonando sin disparar un avance
    async fn halt_playback(&mut self) {
        let was_feeding = self.pipeline.is_some();
        self.retire_current();

        if was_feeding {
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.stop().await {
                    warn!("⚠️ No se pudo detener el sink de la sesión {}: {}", self.key, e);
                }
            }
        }
    }

    /// Algoritmo de avance: siguiente pista o fin de cola
    async fn advance(&mut self) {
        self.retire_current();

        let Some(track) = self.queue.advance().cloned() else {
            self.set_state(self.rest_state());
            info!("📭 Cola terminada en guild {}", self.key);
            self.notify(Notice::QueueFinished).await;
            return;
        };

        self.set_state(SessionState::Playing);
        self.loading = true;

        let generation = self.generation;
        let builder = self.builder.clone();
        let built_tx = self.built_tx.clone();
        info!("🎵 Preparando: {} (generación {})", track.title(), generation);

        self.build_task = Some(tokio::spawn(async move {
            let result = builder.build(track.locator()).await;
            // si la sesión ya no existe, el pipeline se suelta y sus procesos mueren
            let _ = built_tx.send(Built { generation, result });
        }));
    }

    async fn on_pipeline_built(&mut self, built: Built) {
        if built.generation != self.generation || !self.loading {
            debug!("🗑️ Pipeline obsoleto (generación {}) descartado", built.generation);
            if let Ok((pipeline, _)) = built.result {
                pipeline.close();
            }
            return;
        }

        self.loading = false;
        self.build_task = None;
        let title = self
            .queue
            .current()
            .map(|t| t.title().to_string())
            .unwrap_or_default();

        let (pipeline, stream) = match built.result {
            Ok(parts) => parts,
            Err(e) => {
                warn!("❌ No se pudo preparar '{}': {}", title, e);
                self.fail_current(title, e.to_string()).await;
                return;
            }
        };

        let Some(sink) = self.sink.clone() else {
            pipeline.close();
            return;
        };

        let events = TrackEvents::new(self.generation, self.events_tx.clone());
        if let Err(e) = sink.play(stream, events).await {
            warn!("❌ El sink rechazó '{}': {}", title, e);
            pipeline.close();
            self.fail_current(title, e.to_string()).await;
            return;
        }

        self.pipeline = Some(pipeline);
        if self.paused {
            if let Err(e) = sink.pause().await {
                warn!("⚠️ No se pudo pausar la pista recién iniciada: {}", e);
            }
        }

        info!("▶️ Reproduciendo: {} en guild {}", title, self.key);
        self.notify(Notice::NowPlaying { title }).await;
    }

    async fn fail_current(&mut self, title: String, reason: String) {
        self.notify(Notice::FailedToPlay { title, reason }).await;
        self.set_state(SessionState::Advancing);
        self.advance().await;
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TrackEnded { generation, outcome } => self.on_track_ended(generation, outcome).await,
            SessionEvent::Disconnected => self.on_disconnected(),
            SessionEvent::Reconnected => {
                if self.awaiting_reconnect {
                    info!("🔄 Sesión {} reconectada", self.key);
                    self.awaiting_reconnect = false;
                    self.disconnect_epoch += 1;
                }
            }
            SessionEvent::GraceExpired { epoch } => {
                if self.awaiting_reconnect && epoch == self.disconnect_epoch {
                    error!("🔌 Sesión {} desconectada sin reconexión, destruyendo", self.key);
                    self.destroy().await;
                }
            }
        }
    }

    /// Punto único de despacho para finales de pista
    async fn on_track_ended(&mut self, generation: u64, outcome: TrackOutcome) {
        if generation != self.generation || self.state() != SessionState::Playing || self.loading {
            debug!("Fin de pista obsoleto (generación {}) ignorado", generation);
            return;
        }

        match outcome {
            TrackOutcome::Finished => debug!("🎵 Track terminado en guild {}", self.key),
            TrackOutcome::Errored(reason) => {
                error!("❌ Error de reproducción en guild {}: {}", self.key, reason);
                self.notify(Notice::PlaybackError { reason }).await;
            }
        }

        self.set_state(SessionState::Advancing);
        self.advance().await;
    }

    fn on_disconnected(&mut self) {
        if self.connection.is_none() || self.awaiting_reconnect {
            return;
        }

        warn!(
            "🔌 Sesión {} desconectada, esperando reconexión {:?}",
            self.key, self.config.reconnect_grace
        );
        self.awaiting_reconnect = true;
        self.disconnect_epoch += 1;

        let epoch = self.disconnect_epoch;
        let grace = self.config.reconnect_grace;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = events.send(SessionEvent::GraceExpired { epoch });
        });
    }

    async fn set_paused(&mut self, paused: bool) -> Result<bool, QueueError> {
        if self.state() != SessionState::Playing {
            return Err(QueueError::NothingPlaying);
        }
        if self.paused == paused {
            return Ok(false);
        }

        // con el pipeline aún en construcción basta con recordar la pausa
        if self.pipeline.is_some() {
            if let Some(sink) = &self.sink {
                let result = if paused { sink.pause().await } else { sink.unpause().await };
                if let Err(e) = result {
                    warn!("⚠️ Control de pausa falló en guild {}: {}", self.key, e);
                    return Ok(false);
                }
            }
        }

        self.paused = paused;
        if paused {
            info!("⏸️ Reproducción pausada en guild {}", self.key);
        } else {
            info!("▶️ Reproducción reanudada en guild {}", self.key);
        }
        Ok(true)
    }

    async fn stop(&mut self) {
        let cleared = self.queue.clear();
        self.halt_playback().await;
        self.set_state(self.rest_state());
        info!("⏹️ Reproducción detenida en guild {} ({} pendientes descartadas)", self.key, cleared);
    }

    async fn destroy(&mut self) {
        if self.state() == SessionState::Destroyed {
            return;
        }

        self.stop().await;
        self.sink = None;
        if let Some(connection) = self.connection.take() {
            connection.disconnect().await;
        }
        self.awaiting_reconnect = false;
        self.set_state(SessionState::Destroyed);
        info!("👋 Sesión {} destruida", self.key);
    }
}
