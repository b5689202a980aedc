use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    events::CoreEvent,
    input::{File, Input},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{path::Path, sync::Arc};
use tracing::{debug, info, warn};

use crate::{
    audio::session::{CompletionNotifier, VoiceConnection},
    error::MusicError,
};

/// Conexión de voz de songbird para un servidor.
pub struct SongbirdConnection {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<tokio::sync::Mutex<Call>>,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdConnection {
    pub async fn new(
        guild_id: GuildId,
        manager: Arc<Songbird>,
        call: Arc<tokio::sync::Mutex<Call>>,
    ) -> Self {
        {
            let mut handler = call.lock().await;
            register_voice_events(&mut handler, guild_id);
        }

        Self {
            guild_id,
            manager,
            call,
            current: Mutex::new(None),
        }
    }

    fn current_track(&self) -> Result<TrackHandle, MusicError> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| MusicError::Transport("no hay pista activa".to_string()))
    }
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play(&self, artifact: &Path, on_complete: CompletionNotifier) -> Result<(), MusicError> {
        let input: Input = File::new(artifact.to_path_buf()).into();

        let handle = {
            let mut handler = self.call.lock().await;
            handler.play_input(input)
        };

        // Fin natural, stop() y error llegan por el mismo notificador de un solo uso
        for event in [TrackEvent::End, TrackEvent::Error] {
            let registered = handle.add_event(
                Event::Track(event),
                TrackCompletionHandler {
                    guild_id: self.guild_id,
                    notifier: on_complete.clone(),
                },
            );
            if let Err(e) = registered {
                let _ = handle.stop();
                return Err(MusicError::Transport(format!(
                    "Error al agregar event handler: {}",
                    e
                )));
            }
        }

        debug!(
            "▶️ Pista {} iniciada en guild {}",
            on_complete.attempt(),
            self.guild_id
        );
        *self.current.lock() = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<(), MusicError> {
        self.current_track()?
            .pause()
            .map_err(|e| MusicError::Transport(e.to_string()))
    }

    async fn resume(&self) -> Result<(), MusicError> {
        self.current_track()?
            .play()
            .map_err(|e| MusicError::Transport(e.to_string()))
    }

    async fn stop(&self) -> Result<(), MusicError> {
        let Some(handle) = self.current.lock().take() else {
            return Ok(());
        };
        // Una pista que ya terminó devuelve error aquí: no es un fallo real
        if let Err(e) = handle.stop() {
            debug!("Pista ya finalizada al detener: {}", e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MusicError> {
        self.current.lock().take();
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| MusicError::Transport(format!("Error al desconectar: {}", e)))?;

        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

/// Handler para el fin de una pista (natural, detenida o con error)
struct TrackCompletionHandler {
    guild_id: GuildId,
    notifier: CompletionNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletionHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(track_list) => {
                track_list
                    .iter()
                    .find_map(|(state, _handle)| match &state.playing {
                        PlayMode::Errored(e) => Some(format!("{:?}", e)),
                        _ => None,
                    })
            }
            _ => None,
        };

        if let Some(e) = &error {
            warn!("❌ Error en track para guild {}: {}", self.guild_id, e);
        }

        if self.notifier.notify(error) {
            debug!("🎵 Track terminó en guild {}", self.guild_id);
        }

        None
    }
}

/// Handler para cambios de la conexión de voz
struct ConnectionEventHandler {
    guild_id: GuildId,
}

#[async_trait]
impl VoiceEventHandler for ConnectionEventHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverDisconnect(_) => {
                warn!(
                    "🔌 Driver de voz desconectado en guild {}",
                    self.guild_id
                );
            }
            EventContext::DriverReconnect(_) => {
                info!("🔄 Reconectado al canal de voz en guild {}", self.guild_id);
            }
            _ => {}
        }

        None
    }
}

/// Registra los handlers globales de conexión para un guild
fn register_voice_events(handler: &mut Call, guild_id: GuildId) {
    handler.remove_all_global_events();

    handler.add_global_event(
        Event::Core(CoreEvent::DriverDisconnect),
        ConnectionEventHandler { guild_id },
    );
    handler.add_global_event(
        Event::Core(CoreEvent::DriverReconnect),
        ConnectionEventHandler { guild_id },
    );
}
