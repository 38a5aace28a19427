//! Adaptador de songbird para los traits de `audio::transport`.
//!
//! Los handlers de eventos de songbird no deciden nada: sólo reenvían al buzón de
//! la sesión, que es quien aplica generación y gracia de reconexión.

use anyhow::Result;
use parking_lot::Mutex;
use serenity::{
    all::{ChannelId, GuildId},
    async_trait,
    http::Http,
};
use songbird::{
    events::CoreEvent,
    input::{AudioStream as LiveStream, Input, LiveInput, RawAdapter},
    tracks::{PlayMode, TrackHandle},
    Call, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use symphonia::core::{io::ReadOnlySource, probe::Hint};
use tokio_util::io::SyncIoBridge;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        AudioSink, AudioStream, Connection, ConnectionEvents, Notifier, StreamFormat, TrackEvents, Transport,
    },
    error::{ConnectionError, SinkError},
};

/// Handler para finales de track (natural o por `stop`)
struct TrackEndNotifier {
    events: TrackEvents,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🎵 Track terminó (generación {})", self.events.generation());
        self.events.idle();
        None
    }
}

/// Handler para errores de tracks
struct TrackErrorNotifier {
    events: TrackEvents,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let mut reason = String::from("unknown playback error");
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let Some(text) = error_reason(&state.playing) {
                    reason = text;
                }
            }
        }
        error!("❌ Error en track (generación {}): {}", self.events.generation(), reason);
        self.events.errored(reason);
        None
    }
}

/// Texto legible del fallo de un track, si lo hubo
fn error_reason(mode: &PlayMode) -> Option<String> {
    match mode {
        PlayMode::Errored(e) => Some(e.to_string()),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug)]
enum DriverChange {
    Lost,
    Restored,
}

/// Handler para desconexiones y reconexiones del driver de voz
struct DriverWatcher {
    guild_id: GuildId,
    change: DriverChange,
    events: ConnectionEvents,
}

#[async_trait]
impl VoiceEventHandler for DriverWatcher {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        match self.change {
            DriverChange::Lost => {
                warn!("🔌 Driver de voz desconectado en guild {}", self.guild_id);
                self.events.disconnected();
            }
            DriverChange::Restored => {
                info!("🔄 Driver de voz conectado en guild {}", self.guild_id);
                self.events.reconnected();
            }
        }
        None
    }
}

/// Une la sesión a un canal de voz concreto
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    channel_id: ChannelId,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self {
            manager,
            guild_id,
            channel_id,
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn connect(&self, events: ConnectionEvents) -> Result<Arc<dyn Connection>, ConnectionError> {
        let call = self
            .manager
            .join(self.guild_id, self.channel_id)
            .await
            .map_err(|e| ConnectionError::Join(e.to_string()))?;

        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();

            let watchers = [
                (CoreEvent::DriverDisconnect, DriverChange::Lost),
                (CoreEvent::DriverConnect, DriverChange::Restored),
                (CoreEvent::DriverReconnect, DriverChange::Restored),
            ];
            for (event, change) in watchers {
                handler.add_global_event(
                    VoiceEvent::Core(event),
                    DriverWatcher {
                        guild_id: self.guild_id,
                        change,
                        events: events.clone(),
                    },
                );
            }
        }

        info!("🔊 Conectado al canal {} en guild {}", self.channel_id, self.guild_id);
        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild_id: self.guild_id,
            call,
        }))
    }

    async fn abort(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            debug!("Nada que deshacer en guild {}: {:?}", self.guild_id, e);
        }
    }
}

pub struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
}

#[async_trait]
impl Connection for SongbirdConnection {
    fn subscribe(&self) -> Arc<dyn AudioSink> {
        Arc::new(SongbirdSink {
            call: self.call.clone(),
            current: Mutex::new(None),
        })
    }

    async fn disconnect(&self) {
        if let Err(e) = self.manager.remove(self.guild_id).await {
            warn!("⚠️ Error al salir del canal de voz en guild {}: {:?}", self.guild_id, e);
        } else {
            info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        }
    }
}

/// Reproduce en la llamada de songbird, una pista a la vez
pub struct SongbirdSink {
    call: Arc<tokio::sync::Mutex<Call>>,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdSink {
    fn current(&self) -> Result<TrackHandle, SinkError> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| SinkError::Control("no track loaded".into()))
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn play(&self, stream: AudioStream, events: TrackEvents) -> Result<(), SinkError> {
        let input = into_input(stream);

        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        handle
            .add_event(
                VoiceEvent::Track(TrackEvent::End),
                TrackEndNotifier { events: events.clone() },
            )
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        handle
            .add_event(VoiceEvent::Track(TrackEvent::Error), TrackErrorNotifier { events })
            .map_err(|e| SinkError::Rejected(e.to_string()))?;

        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<(), SinkError> {
        self.current()?.pause().map_err(|e| SinkError::Control(e.to_string()))
    }

    async fn unpause(&self) -> Result<(), SinkError> {
        self.current()?.play().map_err(|e| SinkError::Control(e.to_string()))
    }

    async fn stop(&self) -> Result<(), SinkError> {
        let Some(handle) = self.current.lock().take() else {
            return Ok(());
        };
        handle.stop().map_err(|e| SinkError::Control(e.to_string()))
    }
}

/// Convierte la salida del pipeline en un `Input` de songbird.
///
/// songbird decodifica en hilos propios, así que el lector async se puentea a `Read`.
fn into_input(stream: AudioStream) -> Input {
    let format = stream.format();
    let reader = ReadOnlySource::new(SyncIoBridge::new(stream.into_reader()));

    match format {
        StreamFormat::Pcm {
            sample_rate,
            channels,
        } => RawAdapter::new(reader, sample_rate, channels).into(),
        StreamFormat::OggOpus => {
            let mut hint = Hint::new();
            hint.with_extension("ogg");
            Input::Live(
                LiveInput::Raw(LiveStream {
                    input: Box::new(reader),
                    hint: Some(hint),
                }),
                None,
            )
        }
    }
}

/// Avisos de la sesión al canal de texto donde se pidió la música
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(&self, text: String) -> Result<()> {
        self.channel_id.say(&self.http, text).await?;
        Ok(())
    }
}
