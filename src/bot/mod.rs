//! # Bot Module
//!
//! Integración con Discord: registro de comandos, conexión de voz y eventos.
//!
//! [`JukeboxBot`] no guarda estado de reproducción. Todo pasa por el
//! coordinador del servidor que entrega el [`PlaybackRegistry`], así que los
//! comandos, los botones y los eventos de voz siempre ven el mismo estado.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod announcer;
pub mod commands;
pub mod handlers;

use crate::{
    audio::{registry::PlaybackRegistry, voice::SongbirdConnection},
    config::Config,
};

pub struct JukeboxBot {
    config: Arc<Config>,
    pub registry: Arc<PlaybackRegistry>,
}

impl JukeboxBot {
    pub fn new(config: Arc<Config>, registry: Arc<PlaybackRegistry>) -> Self {
        Self { config, registry }
    }

    /// Registra los comandos slash, por guild si hay `GUILD_ID` (propagación
    /// inmediata) o globalmente.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Conecta (o mueve) el bot al canal de voz y entrega la conexión al
    /// coordinador del servidor si todavía no tenía una.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
        let coordinator = self.registry.coordinator(guild_id);

        let existing = manager.get(guild_id);
        let in_channel = match &existing {
            Some(call) => {
                call.lock().await.current_channel().map(|c| c.0.get()) == Some(channel_id.get())
            }
            None => false,
        };

        let call = match existing {
            Some(call) if in_channel => call,
            _ => {
                let call = manager.join(guild_id, channel_id).await.map_err(|e| {
                    error!("Error al obtener handler de voz: {:?}", e);
                    anyhow::anyhow!("Error al conectar al canal de voz")
                })?;
                info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
                call
            }
        };

        if !coordinator.snapshot().connected {
            let connection = SongbirdConnection::new(guild_id, manager.clone(), call).await;
            coordinator.attach(Arc::new(connection)).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, self).await
                {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    /// Si alguien desconecta al bot del canal de voz, se trata como un stop.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(coordinator) = self.registry.get(guild_id) else {
            return;
        };

        let active_call_channel = match songbird::get(&ctx).await.and_then(|m| m.get(guild_id)) {
            Some(call) => call
                .lock()
                .await
                .current_channel()
                .map(|c| ChannelId::new(c.0.get())),
            None => None,
        };

        if !is_external_disconnect(old.is_some(), new.channel_id, active_call_channel) {
            if new.channel_id.is_none() && active_call_channel.is_some() {
                debug!("Salida tardía ignorada en guild {}: ya hay una llamada activa", guild_id);
            }
            return;
        }

        info!("🔌 Bot desconectado en guild {}", guild_id);
        match coordinator.stop().await {
            Ok(outcome) if outcome.stopped => {
                info!("🧹 Reproducción limpiada tras desconexión en guild {}", guild_id)
            }
            Ok(_) => {}
            Err(e) => error!("Error al detener reproducción: {:?}", e),
        }
    }
}

/// Una salida del propio bot solo cuenta como desconexión externa si songbird
/// no tiene ya otra llamada activa en el servidor: en ese caso el evento es el
/// eco de un `/stop` anterior que llegó después de volver a entrar.
fn is_external_disconnect(
    had_previous_state: bool,
    new_channel: Option<ChannelId>,
    active_call_channel: Option<ChannelId>,
) -> bool {
    had_previous_state && new_channel.is_none() && active_call_channel.is_none()
}
