//! # Bot Module
//!
//! Discord front-end for the stream-queue engine.
//!
//! - Command registration and handling (`/play`, `/queue`, `/skip`, `/pause`, `/resume`, `/stop`)
//! - Songbird adapter behind the engine's transport traits ([`voice`])
//! - Cleanup when the bot is removed from a voice channel
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use stream_queue::{audio::{ProcessPipelineBuilder, SessionConfig, SessionRegistry}, bot::StreamQueueBot, config::Config, sources::TrackLookup};
//! # fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let registry = Arc::new(SessionRegistry::new(
//!     SessionConfig::from(&config),
//!     Arc::new(ProcessPipelineBuilder::from_config(&config)),
//! ));
//! let lookup = Arc::new(TrackLookup::from_config(&config)?);
//! let bot = StreamQueueBot::new(config, registry, lookup);
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod voice;

use crate::{audio::SessionRegistry, config::Config, sources::TrackLookup};

/// Main Discord event handler.
///
/// Holds the session registry shared by every guild and the track lookup used by `/play`.
pub struct StreamQueueBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    /// Live sessions, one per guild
    pub registry: Arc<SessionRegistry>,
    /// Turns queries and links into tracks
    pub lookup: Arc<TrackLookup>,
}

impl StreamQueueBot {
    pub fn new(config: Config, registry: Arc<SessionRegistry>, lookup: Arc<TrackLookup>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            lookup,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered per guild when `GUILD_ID` is set (instant updates, useful
    /// for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::from(guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(()); // No fallar, pero no registrar comandos
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for StreamQueueBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    /// Errors are logged and reported back to the user as an ephemeral message.
    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, &command, self).await {
                error!("Error manejando comando: {:?}", e);
                handlers::report_error(&ctx, &command, &e).await;
            }
        }
    }

    /// Tears the guild's session down when the bot itself leaves or is kicked from voice.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.registry.shutdown(guild_id.get()).await;
        }
    }
}
