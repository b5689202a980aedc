use std::fmt;

/// Respuestas cortas a cada control, siempre efímeras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Resumed,
    AlreadyPlaying,
    Paused,
    NothingPlaying,
    Stopped,
    NotConnected,
    Skipped,
    NothingToSkip,
    Loop(bool),
    Cancelled { query: String },
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resumed => write!(f, "▶️ Música reanudada"),
            Self::AlreadyPlaying => write!(f, "🎵 La música ya está sonando"),
            Self::Paused => write!(f, "⏸️ Música pausada"),
            Self::NothingPlaying => write!(f, "❌ No hay nada reproduciéndose"),
            Self::Stopped => write!(f, "⏹️ Música detenida y bot desconectado"),
            Self::NotConnected => write!(f, "❌ El bot no está en un canal de voz"),
            Self::Skipped => write!(f, "⏭️ Canción saltada"),
            Self::NothingToSkip => write!(f, "❌ No hay nada que saltar"),
            Self::Loop(true) => write!(f, "🔁 Modo loop activado"),
            Self::Loop(false) => write!(f, "➡️ Modo loop desactivado"),
            Self::Cancelled { query } => {
                write!(f, "🚫 La petición '{}' se canceló antes de sonar", query)
            }
        }
    }
}
