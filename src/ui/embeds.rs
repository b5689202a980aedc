use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
    model::id::UserId,
};
use std::time::Duration;

use crate::{audio::coordinator::PlaybackSnapshot, sources::Track};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Usa los botones para controlar la reproducción";

const QUEUE_PREVIEW: usize = 10;

/// Crea un embed para mostrar la canción actual
pub fn now_playing_embed(track: &Track, requested_by: Option<UserId>) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN)
        .image(&track.thumbnail);

    if let Some(uploader) = &track.uploader {
        embed = embed.field("🎤 Artista", uploader, true);
    }

    embed = embed.field(
        "⏱️ Duración",
        track
            .duration
            .map(format_duration)
            .unwrap_or_else(|| "🔴 En vivo".to_string()),
        true,
    );

    if let Some(user) = requested_by {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", user), true);
    }

    if let Some(url) = &track.url {
        embed = embed.url(url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para una petición que quedó en cola
pub fn queued_embed(query: &str, position: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Agregado a la Cola")
        .description(format!("**{}**", query))
        .color(colors::INFO_BLUE)
        .field("📍 Posición", position.to_string(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá cuando termine lo que está sonando",
        ))
}

pub fn queue_embed(snapshot: &PlaybackSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if snapshot.is_idle() && snapshot.queue.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    let status = if snapshot.loop_enabled { "🔂" } else { "▶️" };
    if let Some(current) = &snapshot.now_playing {
        embed = embed.field(format!("{} Reproduciendo", status), format!("**{}**", current.title), false);
    } else if let Some(pending) = &snapshot.pending {
        embed = embed.field("⏳ Descargando", format!("**{}**", pending), false);
    }

    if !snapshot.queue.is_empty() {
        embed = embed.field("Próximas canciones", queue_listing(&snapshot.queue), false);
    }

    let mut info = format!("**Total:** {} en cola", snapshot.queue.len());
    if snapshot.loop_enabled {
        info.push_str(" • 🔁 **Loop**");
    }

    embed
        .field("Información", info, false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

fn queue_listing(queue: &[String]) -> String {
    let mut listing: String = queue
        .iter()
        .take(QUEUE_PREVIEW)
        .enumerate()
        .map(|(i, query)| format!("**{}**. {}\n", i + 1, query))
        .collect();

    if queue.len() > QUEUE_PREVIEW {
        listing.push_str(&format!("… y {} más", queue.len() - QUEUE_PREVIEW));
    }
    listing
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
