use serenity::{builder::CreateMessage, http::Http};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    audio::{coordinator::Announcement, registry::PlaybackRegistry},
    ui::{buttons, embeds},
};

/// Publica en el canal de texto de quien pidió cada canción lo que el
/// coordinador anuncia fuera de una interacción (pistas que salen de la cola,
/// descargas fallidas).
pub async fn run_announcer(
    http: Arc<Http>,
    registry: Arc<PlaybackRegistry>,
    mut announcements: mpsc::UnboundedReceiver<Announcement>,
) {
    while let Some(announcement) = announcements.recv().await {
        let (channel, message) = match announcement {
            Announcement::NowPlaying {
                guild_id,
                track,
                requester,
            } => {
                let mut message = CreateMessage::new()
                    .embed(embeds::now_playing_embed(&track, Some(requester.user_id)));
                if let Some(coordinator) = registry.get(guild_id) {
                    message = message.components(buttons::player_controls(&coordinator.snapshot()));
                }
                (requester.text_channel, message)
            }
            Announcement::FetchFailed {
                query,
                requester,
                error,
                ..
            } => {
                let description = format!(
                    "<@{}> no se pudo reproducir **{}**: {}",
                    requester.user_id, query, error
                );
                (
                    requester.text_channel,
                    CreateMessage::new()
                        .embed(embeds::error_embed("Error al procesar la música", &description)),
                )
            }
        };

        if let Err(e) = channel.send_message(&http, message).await {
            warn!("⚠️ No se pudo enviar anuncio al canal {}: {:?}", channel, e);
        }
    }

    debug!("Canal de anuncios cerrado");
}
