pub mod ytdlp;

use async_trait::async_trait;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::error::FetchError;

pub use ytdlp::YtDlpResolver;

/// Frontera con el motor de descargas: consulta o URL → artefacto local + metadatos.
///
/// Las implementaciones pueden bloquear (procesos externos, red); el
/// [`FetchPool`] se encarga de que nunca lo hagan en el hilo de eventos.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resuelve y descarga. En caso de error no debe quedar ningún artefacto.
    async fn resolve(&self, query: &str) -> Result<Track, FetchError>;

    /// Nombre del resolver para logs
    fn name(&self) -> &'static str;
}

/// Una pista resuelta y lista para sonar.
///
/// El artefacto pertenece a la pista: se borra cuando termina de sonar por
/// cualquier motivo.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub query: String,
    pub artifact: PathBuf,
    pub title: String,
    pub thumbnail: String,
    pub url: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<Duration>,
}

impl Track {
    pub fn new(query: impl Into<String>, artifact: PathBuf, title: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            artifact,
            title: title.into(),
            thumbnail: crate::config::DEFAULT_THUMBNAIL.to_string(),
            url: None,
            uploader: None,
            duration: None,
        }
    }

    // Setters
    pub fn with_thumbnail(mut self, thumbnail: String) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn with_url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_uploader(mut self, uploader: String) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Pool acotado de resoluciones.
///
/// Como máximo `workers` resoluciones corren a la vez; el resto espera un
/// permiso. El pool no toca estado compartido: solo devuelve valores.
#[derive(Clone)]
pub struct FetchPool {
    resolver: Arc<dyn Resolver>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl FetchPool {
    pub fn new(resolver: Arc<dyn Resolver>, workers: usize) -> Self {
        info!(
            "📥 Pool de descargas '{}' con {} workers",
            resolver.name(),
            workers
        );
        Self {
            resolver,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub async fn resolve(&self, query: &str) -> Result<Track, FetchError> {
        if query.trim().is_empty() {
            return Err(FetchError::EmptyQuery);
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::PoolClosed)?;
        debug!(
            "Resolviendo '{}' ({} permisos libres de {})",
            query,
            self.permits.available_permits(),
            self.workers
        );

        self.resolver.resolve(query).await
    }

    /// Cierra el pool; las resoluciones en espera fallan con `PoolClosed`.
    pub fn close(&self) {
        self.permits.close();
    }
}
