use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::{CommandInteraction, ComponentInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{
        coordinator::{CoordinatorHandle, PlayOutcome},
        queue::{QueuedRequest, Requester},
        session::TransportOutcome,
    },
    bot::JukeboxBot,
    error::MusicError,
    ui::{
        buttons::{self, ControlAction},
        embeds,
        messages::Acknowledgement,
    },
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let action = match command.data.name.as_str() {
        "play" => return handle_play(ctx, &command, bot, guild_id).await,
        "queue" => return handle_queue(ctx, &command, bot, guild_id).await,
        "nowplaying" => return handle_nowplaying(ctx, &command, bot, guild_id).await,
        "pause" => ControlAction::Pause,
        "resume" => ControlAction::Resume,
        "skip" => ControlAction::Skip,
        "stop" => ControlAction::Stop,
        "loop" => ControlAction::ToggleLoop,
        _ => {
            command
                .create_response(&ctx.http, ephemeral("❌ Comando no reconocido"))
                .await?;
            return Ok(());
        }
    };

    let content = control_reply(&bot.registry.coordinator(guild_id), action).await;
    command.create_response(&ctx.http, ephemeral(content)).await?;
    Ok(())
}

/// Maneja los botones del reproductor
pub async fn handle_component(
    ctx: &Context,
    component: ComponentInteraction,
    bot: &JukeboxBot,
) -> Result<()> {
    let guild_id = component
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Componente usado fuera de un servidor"))?;

    info!(
        "🔘 Botón {} presionado por {} en guild {}",
        component.data.custom_id, component.user.name, guild_id
    );

    let content = match ControlAction::from_custom_id(&component.data.custom_id) {
        Some(action) => control_reply(&bot.registry.coordinator(guild_id), action).await,
        None => "❌ Acción no reconocida".to_string(),
    };

    component.create_response(&ctx.http, ephemeral(content)).await?;
    Ok(())
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    // Defer la respuesta ya que la descarga puede tomar tiempo
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let coordinator = bot.registry.coordinator(guild_id);
    let outcome = request_playback(ctx, command, bot, &coordinator, guild_id, &query).await;
    let response = match outcome {
        Ok(PlayOutcome::Started(track)) => EditInteractionResponse::new()
            .embed(embeds::now_playing_embed(&track, Some(command.user.id)))
            .components(buttons::player_controls(&coordinator.snapshot())),
        Ok(PlayOutcome::Queued { position }) => {
            EditInteractionResponse::new().embed(embeds::queued_embed(&query, position))
        }
        Ok(PlayOutcome::Cancelled) => EditInteractionResponse::new()
            .content(Acknowledgement::Cancelled { query }.to_string()),
        Err(e) => {
            if !e.is_user_input() {
                warn!("❌ Error al procesar '{}': {}", query, e);
            }
            EditInteractionResponse::new()
                .embed(embeds::error_embed("Error al procesar la música", &e.to_string()))
        }
    };

    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

async fn request_playback(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    coordinator: &CoordinatorHandle,
    guild_id: GuildId,
    query: &str,
) -> Result<PlayOutcome, MusicError> {
    if query.is_empty() {
        return Err(MusicError::EmptyQuery);
    }

    let voice_channel_id = get_user_voice_channel(ctx, guild_id, command.user.id)
        .ok_or(MusicError::NotInVoiceChannel)?;

    bot.join_voice_channel(ctx, guild_id, voice_channel_id)
        .await
        .map_err(|e| MusicError::Transport(e.to_string()))?;

    let requester = Requester {
        user_id: command.user.id,
        user_name: command.user.name.clone(),
        text_channel: command.channel_id,
    };
    coordinator.play(QueuedRequest::new(query, requester)).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.registry.coordinator(guild_id).snapshot();

    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().embed(embeds::queue_embed(&snapshot)),
            ),
        )
        .await?;
    Ok(())
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &JukeboxBot,
    guild_id: GuildId,
) -> Result<()> {
    let snapshot = bot.registry.coordinator(guild_id).snapshot();

    let response = match &snapshot.now_playing {
        Some(track) => CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .embed(embeds::now_playing_embed(track, None))
                .components(buttons::player_controls(&snapshot)),
        ),
        None => ephemeral(Acknowledgement::NothingPlaying.to_string()),
    };

    command.create_response(&ctx.http, response).await?;
    Ok(())
}

/// Ejecuta un control y devuelve el texto para quien lo pidió.
async fn control_reply(coordinator: &CoordinatorHandle, action: ControlAction) -> String {
    match run_control(coordinator, action).await {
        Ok(ack) => ack.to_string(),
        Err(e) => {
            warn!(
                "Control {:?} falló en guild {}: {}",
                action,
                coordinator.guild_id(),
                e
            );
            format!("❌ {}", e)
        }
    }
}

async fn run_control(
    coordinator: &CoordinatorHandle,
    action: ControlAction,
) -> Result<Acknowledgement, MusicError> {
    let ack = match action {
        ControlAction::Resume => match coordinator.resume().await? {
            TransportOutcome::Applied => Acknowledgement::Resumed,
            TransportOutcome::NothingToDo if coordinator.snapshot().now_playing.is_some() => {
                Acknowledgement::AlreadyPlaying
            }
            TransportOutcome::NothingToDo => Acknowledgement::NothingPlaying,
        },
        ControlAction::Pause => match coordinator.pause().await? {
            TransportOutcome::Applied => Acknowledgement::Paused,
            TransportOutcome::NothingToDo => Acknowledgement::NothingPlaying,
        },
        ControlAction::Stop => {
            let outcome = coordinator.stop().await?;
            if outcome.stopped || outcome.disconnected {
                Acknowledgement::Stopped
            } else {
                Acknowledgement::NotConnected
            }
        }
        ControlAction::Skip => match coordinator.skip().await? {
            TransportOutcome::Applied => Acknowledgement::Skipped,
            TransportOutcome::NothingToDo => Acknowledgement::NothingToSkip,
        },
        ControlAction::ToggleLoop => Acknowledgement::Loop(coordinator.toggle_loop().await?),
    };
    Ok(ack)
}

fn ephemeral(content: impl Into<String>) -> CreateInteractionResponse {
    CreateInteractionResponse::Message(
        CreateInteractionResponseMessage::new()
            .content(content)
            .ephemeral(true),
    )
}

/// Canal de voz del usuario según la caché de la guild
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
