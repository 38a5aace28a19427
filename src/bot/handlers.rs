use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    voice::{ChannelNotifier, SongbirdTransport},
    StreamQueueBot,
};
use crate::{
    audio::{Enqueued, Notifier, SessionState},
    error::ConnectionError,
    ui::embeds,
};

const NOTHING_PLAYING: &str = "Nothing is playing.";

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, command, bot, guild_id).await,
        "queue" => handle_queue(ctx, command, bot, guild_id).await,
        "skip" => handle_skip(ctx, command, bot, guild_id).await,
        "pause" => handle_pause(ctx, command, bot, guild_id).await,
        "resume" => handle_resume(ctx, command, bot, guild_id).await,
        "stop" => handle_stop(ctx, command, bot, guild_id).await,
        _ => reply(ctx, command, "❌ Comando no reconocido", true).await,
    }
}

/// Informa un error inesperado al usuario, respondiendo o con followup según haga falta
pub async fn report_error(ctx: &Context, command: &CommandInteraction, error: &anyhow::Error) {
    let content = format!("Error: {error}");
    let response = CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content.clone())
            .ephemeral(true),
    );

    if command.create_response(&ctx.http, response).await.is_err() {
        let followup = CreateInteractionResponseFollowup::new().content(content).ephemeral(true);
        if let Err(e) = command.create_followup(&ctx.http, followup).await {
            warn!("No se pudo informar el error al usuario: {:?}", e);
        }
    }
}

async fn reply(ctx: &Context, command: &CommandInteraction, content: impl Into<String>, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

/// Reemplaza la respuesta diferida
async fn edit(ctx: &Context, command: &CommandInteraction, content: impl Into<String>) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await?;
    Ok(())
}

// Handlers específicos para cada comando

async fn handle_play(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot, guild_id: GuildId) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .map(str::trim)
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    // Verificar que el usuario esté en un canal de voz
    let Some(voice_channel_id) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return reply(ctx, command, "Join a voice channel first!", true).await;
    };

    // Defer la respuesta ya que puede tomar tiempo
    command.defer(&ctx.http).await?;

    let track = match bot.lookup.lookup(query).await {
        Ok(track) => track,
        Err(e) => return edit(ctx, command, e.to_string()).await,
    };

    let session = bot.registry.get(guild_id.get());

    // Conectar al canal de voz si no está conectado
    if session.state() == SessionState::Idle {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
        let transport = Arc::new(SongbirdTransport::new(manager, guild_id, voice_channel_id));
        let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier::new(ctx.http.clone(), command.channel_id));

        match session.connect(transport, Some(notifier)).await {
            Ok(()) | Err(ConnectionError::AlreadyConnected) => {}
            Err(e) => return edit(ctx, command, format!("Could not connect: {e}")).await,
        }
    }

    let title = track.title().to_string();
    match session.enqueue(track).await {
        Ok(Enqueued::Started) => {
            // "Now playing" lo envía la sesión
            if let Err(e) = command.delete_response(&ctx.http).await {
                warn!("No se pudo borrar la respuesta diferida: {:?}", e);
            }
            Ok(())
        }
        Ok(Enqueued::Queued { .. }) => edit(ctx, command, format!("Added to queue: **{title}**")).await,
        Err(e) => edit(ctx, command, format!("Error: {e}")).await,
    }
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot, guild_id: GuildId) -> Result<()> {
    let Some(session) = bot.registry.get_existing(guild_id.get()) else {
        return reply(ctx, command, "Nothing in the queue.", true).await;
    };

    let snapshot = match session.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(_) => return reply(ctx, command, "Nothing in the queue.", true).await,
    };

    match embeds::create_queue_embed(&snapshot, bot.config.queue_display_limit) {
        Some(embed) => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
                )
                .await?;
            Ok(())
        }
        None => reply(ctx, command, "Queue is empty.", true).await,
    }
}

async fn handle_skip(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot, guild_id: GuildId) -> Result<()> {
    let Some(session) = bot.registry.get_existing(guild_id.get()) else {
        return reply(ctx, command, NOTHING_PLAYING, true).await;
    };

    match session.skip().await {
        Ok(()) => reply(ctx, command, "Skipped.", false).await,
        Err(_) => reply(ctx, command, NOTHING_PLAYING, true).await,
    }
}

/// Alterna pausa y reanudación
async fn handle_pause(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot, guild_id: GuildId) -> Result<()> {
    let Some(session) = bot.registry.get_existing(guild_id.get()) else {
        return reply(ctx, command, NOTHING_PLAYING, true).await;
    };

    let outcome = match session.pause().await {
        Ok(true) => Ok("Paused."),
        Ok(false) => session.resume().await.map(|_| "Resumed."),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(text) => reply(ctx, command, text, false).await,
        Err(_) => reply(ctx, command, NOTHING_PLAYING, true).await,
    }
}

async fn handle_resume(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot, guild_id: GuildId) -> Result<()> {
    let Some(session) = bot.registry.get_existing(guild_id.get()) else {
        return reply(ctx, command, NOTHING_PLAYING, true).await;
    };

    match session.resume().await {
        Ok(true) => reply(ctx, command, "Resumed.", false).await,
        Ok(false) => reply(ctx, command, "Playback is not paused.", true).await,
        Err(_) => reply(ctx, command, NOTHING_PLAYING, true).await,
    }
}

async fn handle_stop(ctx: &Context, command: &CommandInteraction, bot: &StreamQueueBot, guild_id: GuildId) -> Result<()> {
    let connected = bot
        .registry
        .get_existing(guild_id.get())
        .is_some_and(|s| s.state() != SessionState::Idle);
    if !connected {
        return reply(ctx, command, NOTHING_PLAYING, true).await;
    }

    bot.registry.shutdown(guild_id.get()).await;
    reply(ctx, command, "Stopped and disconnected.", false).await
}

/// Canal de voz en el que está el usuario, según la caché
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
