use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Carátula usada cuando el resolver no devuelve miniatura.
pub const DEFAULT_THUMBNAIL: &str = "https://i.imgur.com/3lGbihT.png";

/// Formatos que yt-dlp puede producir con `--audio-format` y que songbird decodifica.
const SUPPORTED_AUDIO_FORMATS: &[&str] = &["mp3", "opus", "vorbis", "flac", "wav", "m4a", "aac"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Descargas
    pub scratch_dir: PathBuf,
    pub fetch_workers: usize,
    pub ytdlp_path: String,
    pub ffmpeg_location: Option<PathBuf>,
    pub audio_format: String,
    pub audio_quality: String,
    pub default_search: String,

    // Cola
    pub max_queue_size: usize,

    // UI
    pub default_thumbnail: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Descargas
            scratch_dir: std::env::var("SCRATCH_DIR")
                .unwrap_or_else(|_| "./scratch".to_string())
                .into(),
            fetch_workers: std::env::var("FETCH_WORKERS")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),
            ffmpeg_location: match std::env::var("FFMPEG_LOCATION") {
                Ok(val) if !val.trim().is_empty() => Some(val.into()),
                _ => None,
            },
            audio_format: std::env::var("AUDIO_FORMAT").unwrap_or_else(|_| "mp3".to_string()),
            audio_quality: std::env::var("AUDIO_QUALITY").unwrap_or_else(|_| "192".to_string()),
            default_search: std::env::var("DEFAULT_SEARCH")
                .unwrap_or_else(|_| "ytsearch".to_string()),

            // Cola
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,

            // UI
            default_thumbnail: std::env::var("DEFAULT_THUMBNAIL")
                .unwrap_or_else(|_| DEFAULT_THUMBNAIL.to_string()),
        };

        config.validate()?;

        // Crear el directorio temporal si no existe
        std::fs::create_dir_all(&config.scratch_dir)?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token must not be empty
    /// - The fetch pool and the queue need at least one slot
    /// - Audio format must be one yt-dlp can extract and songbird can decode
    /// - Audio quality must be numeric (kbps or VBR level)
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN no puede estar vacío");
        }

        if self.fetch_workers == 0 {
            anyhow::bail!("Fetch workers must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if !SUPPORTED_AUDIO_FORMATS.contains(&self.audio_format.as_str()) {
            anyhow::bail!(
                "Formato de audio no soportado: {} (válidos: {})",
                self.audio_format,
                SUPPORTED_AUDIO_FORMATS.join(", ")
            );
        }

        if self.audio_quality.parse::<u32>().is_err() {
            anyhow::bail!("Audio quality must be numeric, got: {}", self.audio_quality);
        }

        if self.default_search.trim().is_empty() {
            anyhow::bail!("DEFAULT_SEARCH no puede estar vacío");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: commands {}\n  \
            Fetch: {} workers, {} ({} @ {}), search prefix '{}'\n  \
            Scratch: {}\n  \
            Queue: max {} pending",
            self.guild_id
                .map_or("global".to_string(), |id| format!("guild {}", id)),
            self.fetch_workers,
            self.ytdlp_path,
            self.audio_format,
            self.audio_quality,
            self.default_search,
            self.scratch_dir.display(),
            self.max_queue_size,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            // Fetch defaults
            scratch_dir: "./scratch".into(),
            fetch_workers: 4,
            ytdlp_path: "yt-dlp".to_string(),
            ffmpeg_location: None,
            audio_format: "mp3".to_string(),
            audio_quality: "192".to_string(),
            default_search: "ytsearch".to_string(),

            // Queue defaults
            max_queue_size: 100,

            default_thumbnail: DEFAULT_THUMBNAIL.to_string(),
        }
    }
}
