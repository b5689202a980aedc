//! Errores del reproductor.
//!
//! Los fallos de borrado de artefactos no tienen tipo propio: se registran y se
//! cuentan en [`crate::storage::Reclaimer`], nunca se propagan.

use std::path::PathBuf;
use thiserror::Error;

/// Errores visibles para quien usa los controles del bot.
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("Necesitas estar en un canal de voz para usar este comando")]
    NotInVoiceChannel,

    #[error("Debes indicar una canción o una URL")]
    EmptyQuery,

    #[error("La cola está llena (máximo {0} canciones)")]
    QueueFull(usize),

    #[error("No se pudo obtener la canción: {0}")]
    Fetch(#[from] FetchError),

    #[error("Error de reproducción: {0}")]
    Transport(String),

    #[error("El bot no está conectado a un canal de voz")]
    NotConnected,

    #[error("El reproductor de este servidor ya no está disponible")]
    CoordinatorClosed,
}

/// Fallos al resolver una consulta en un artefacto local.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("la consulta está vacía")]
    EmptyQuery,

    #[error("no se pudo ejecutar yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("yt-dlp terminó con estado {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("no se encontraron resultados")]
    NoResults,

    #[error("la descarga no produjo el archivo esperado: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("metadatos ilegibles: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("el pool de descargas está cerrado")]
    PoolClosed,

    #[error("la tarea de yt-dlp terminó de forma inesperada: {0}")]
    Crashed(#[from] tokio::task::JoinError),
}

impl MusicError {
    /// Errores causados por la entrada del usuario: solo mensaje, sin cambio de estado.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            MusicError::NotInVoiceChannel | MusicError::EmptyQuery | MusicError::QueueFull(_)
        )
    }
}
