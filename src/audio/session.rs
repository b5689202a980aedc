//! Sesión de reproducción: la única conexión de voz activa de un servidor.
//!
//! La sesión solo conoce el transporte (reproducir, pausar, reanudar,
//! detener). No sabe nada de la cola: quien la usa decide qué suena después
//! cuando llega la notificación de fin.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{path::Path, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::MusicError;

/// Estado del transporte de una sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Resultado de una operación de transporte que puede no tener efecto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    Applied,
    NothingToDo,
}

/// Fin de una pista, natural o forzado. `attempt` identifica la reproducción
/// que lo originó para poder descartar notificaciones viejas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub attempt: u64,
    pub error: Option<String>,
}

/// Notificación de fin de un solo uso.
///
/// Se puede clonar para registrarla en varios eventos (fin y error), pero solo
/// la primera llamada a [`CompletionNotifier::notify`] llega al coordinador.
#[derive(Clone)]
pub struct CompletionNotifier {
    attempt: u64,
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Completion>>>>,
}

impl CompletionNotifier {
    pub fn new(attempt: u64, sender: mpsc::UnboundedSender<Completion>) -> Self {
        Self {
            attempt,
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Devuelve `false` si la notificación ya se había disparado.
    pub fn notify(&self, error: Option<String>) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            return false;
        };

        if sender
            .send(Completion {
                attempt: self.attempt,
                error,
            })
            .is_err()
        {
            debug!("Coordinador cerrado, fin de pista {} descartado", self.attempt);
        }
        true
    }
}

/// Frontera con la plataforma de voz.
///
/// `play` debe disparar `on_complete` exactamente una vez: al terminar el
/// stream, al detenerse o ante un error de transporte.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    async fn play(&self, artifact: &Path, on_complete: CompletionNotifier) -> Result<(), MusicError>;
    async fn pause(&self) -> Result<(), MusicError>;
    async fn resume(&self) -> Result<(), MusicError>;
    async fn stop(&self) -> Result<(), MusicError>;
    async fn disconnect(&self) -> Result<(), MusicError>;
}

/// Envoltura de la conexión de voz con su máquina de estados de transporte.
pub struct PlaybackSession {
    connection: Arc<dyn VoiceConnection>,
    state: TransportState,
}

impl PlaybackSession {
    pub fn new(connection: Arc<dyn VoiceConnection>) -> Self {
        Self {
            connection,
            state: TransportState::Idle,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Empieza a reproducir `artifact`, deteniendo antes lo que estuviera sonando.
    pub async fn play(
        &mut self,
        artifact: &Path,
        on_complete: CompletionNotifier,
    ) -> Result<(), MusicError> {
        if self.state != TransportState::Idle {
            if let Err(e) = self.connection.stop().await {
                warn!("⚠️ No se pudo detener la pista anterior: {}", e);
            }
            self.state = TransportState::Idle;
        }

        self.connection.play(artifact, on_complete).await?;
        self.state = TransportState::Playing;
        Ok(())
    }

    pub async fn pause(&mut self) -> Result<TransportOutcome, MusicError> {
        if self.state != TransportState::Playing {
            return Ok(TransportOutcome::NothingToDo);
        }

        self.connection.pause().await?;
        self.state = TransportState::Paused;
        info!("⏸️ Reproducción pausada");
        Ok(TransportOutcome::Applied)
    }

    pub async fn resume(&mut self) -> Result<TransportOutcome, MusicError> {
        if self.state != TransportState::Paused {
            return Ok(TransportOutcome::NothingToDo);
        }

        self.connection.resume().await?;
        self.state = TransportState::Playing;
        info!("▶️ Reproducción reanudada");
        Ok(TransportOutcome::Applied)
    }

    /// Detiene el transporte. La conexión dispara la notificación de fin de la
    /// pista detenida, igual que en un fin natural.
    pub async fn stop(&mut self) -> Result<TransportOutcome, MusicError> {
        if self.state == TransportState::Idle {
            return Ok(TransportOutcome::NothingToDo);
        }

        self.state = TransportState::Idle;
        self.connection.stop().await?;
        info!("⏹️ Reproducción detenida");
        Ok(TransportOutcome::Applied)
    }

    /// La pista terminó por su cuenta.
    pub fn mark_finished(&mut self) {
        self.state = TransportState::Idle;
    }

    /// Cierra la conexión de voz, deteniendo antes el transporte.
    pub async fn disconnect(mut self) -> Result<(), MusicError> {
        if let Err(e) = self.stop().await {
            warn!("⚠️ Error deteniendo antes de desconectar: {}", e);
        }
        self.connection.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::always;
    use pretty_assertions::assert_eq;

    fn notifier() -> (CompletionNotifier, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CompletionNotifier::new(7, tx), rx)
    }

    #[test]
    fn test_notifier_fires_once() {
        let (notifier, mut rx) = notifier();
        let clone = notifier.clone();

        assert!(notifier.notify(None));
        assert!(!clone.notify(Some("late error".into())));

        assert_eq!(
            rx.try_recv().unwrap(),
            Completion {
                attempt: 7,
                error: None
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pause_and_resume_only_in_valid_states() {
        let mut connection = MockVoiceConnection::new();
        connection.expect_play().times(1).returning(|_, _| Ok(()));
        connection.expect_pause().times(1).returning(|| Ok(()));
        connection.expect_resume().times(1).returning(|| Ok(()));
        let mut session = PlaybackSession::new(Arc::new(connection));

        // Nada sonando todavía
        assert_eq!(session.pause().await.unwrap(), TransportOutcome::NothingToDo);
        assert_eq!(session.resume().await.unwrap(), TransportOutcome::NothingToDo);

        let (n, _rx) = notifier();
        session.play(Path::new("/tmp/a.mp3"), n).await.unwrap();
        assert_eq!(session.resume().await.unwrap(), TransportOutcome::NothingToDo);
        assert_eq!(session.pause().await.unwrap(), TransportOutcome::Applied);
        assert_eq!(session.state(), TransportState::Paused);
        assert_eq!(session.pause().await.unwrap(), TransportOutcome::NothingToDo);
        assert_eq!(session.resume().await.unwrap(), TransportOutcome::Applied);
        assert_eq!(session.state(), TransportState::Playing);
    }

    #[tokio::test]
    async fn test_play_while_playing_stops_first() {
        let mut connection = MockVoiceConnection::new();
        connection
            .expect_play()
            .with(always(), always())
            .times(2)
            .returning(|_, _| Ok(()));
        connection.expect_stop().times(1).returning(|| Ok(()));
        let mut session = PlaybackSession::new(Arc::new(connection));

        let (a, _rx) = notifier();
        session.play(Path::new("/tmp/a.mp3"), a).await.unwrap();
        let (b, _rx) = notifier();
        session.play(Path::new("/tmp/b.mp3"), b).await.unwrap();
        assert_eq!(session.state(), TransportState::Playing);
    }

    #[tokio::test]
    async fn test_failed_play_leaves_session_idle() {
        let mut connection = MockVoiceConnection::new();
        connection
            .expect_play()
            .returning(|_, _| Err(MusicError::Transport("archivo corrupto".into())));
        let mut session = PlaybackSession::new(Arc::new(connection));

        let (n, _rx) = notifier();
        assert!(session.play(Path::new("/tmp/a.mp3"), n).await.is_err());
        assert_eq!(session.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_stop_is_noop_when_idle_and_disconnect_stops_first() {
        let mut connection = MockVoiceConnection::new();
        connection.expect_play().returning(|_, _| Ok(()));
        connection.expect_stop().times(1).returning(|| Ok(()));
        connection.expect_disconnect().times(1).returning(|| Ok(()));
        let mut session = PlaybackSession::new(Arc::new(connection));

        assert_eq!(session.stop().await.unwrap(), TransportOutcome::NothingToDo);

        let (n, _rx) = notifier();
        session.play(Path::new("/tmp/a.mp3"), n).await.unwrap();
        session.disconnect().await.unwrap();
    }
}
