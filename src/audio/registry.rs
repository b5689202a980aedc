use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    audio::coordinator::{Announcement, Coordinator, CoordinatorHandle},
    sources::FetchPool,
    storage::Reclaimer,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Coordinadores por servidor, creados la primera vez que se piden.
///
/// Todos comparten el mismo pool de descargas y el mismo directorio temporal.
pub struct PlaybackRegistry {
    coordinators: DashMap<GuildId, CoordinatorHandle>,
    pool: FetchPool,
    storage: Arc<Reclaimer>,
    max_queue_size: usize,
    announcements: mpsc::UnboundedSender<Announcement>,
    shutdown: CancellationToken,
}

impl PlaybackRegistry {
    pub fn new(
        pool: FetchPool,
        storage: Arc<Reclaimer>,
        max_queue_size: usize,
        announcements: mpsc::UnboundedSender<Announcement>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinators: DashMap::new(),
            pool,
            storage,
            max_queue_size,
            announcements,
            shutdown,
        }
    }

    /// Devuelve el coordinador del servidor, lanzándolo si no existe.
    pub fn coordinator(&self, guild_id: GuildId) -> CoordinatorHandle {
        let mut entry = self.coordinators.entry(guild_id).or_insert_with(|| {
            self.spawn(guild_id)
        });

        // Un coordinador que terminó (cierre) se reemplaza
        if entry.is_closed() && !self.shutdown.is_cancelled() {
            *entry = self.spawn(guild_id);
        }
        entry.clone()
    }

    /// Coordinador existente, sin crear uno nuevo.
    pub fn get(&self, guild_id: GuildId) -> Option<CoordinatorHandle> {
        self.coordinators.get(&guild_id).map(|h| h.clone())
    }

    /// Cancela todos los coordinadores, cierra el pool y espera a que cada
    /// coordinador suelte su conexión de voz.
    pub async fn shutdown(&self) {
        info!(
            "🛑 Cerrando {} coordinadores de reproducción",
            self.coordinators.len()
        );
        self.shutdown.cancel();
        self.pool.close();

        let handles: Vec<CoordinatorHandle> =
            self.coordinators.iter().map(|e| e.value().clone()).collect();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for handle in &handles {
                handle.closed().await;
            }
        })
        .await;

        if drained.is_err() {
            warn!("⚠️ Algunos coordinadores no terminaron a tiempo");
        }
    }

    fn spawn(&self, guild_id: GuildId) -> CoordinatorHandle {
        Coordinator::spawn(
            guild_id,
            self.pool.clone(),
            self.storage.clone(),
            self.max_queue_size,
            self.announcements.clone(),
            self.shutdown.child_token(),
        )
    }
}
