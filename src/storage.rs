//! Directorio temporal de artefactos de audio.
//!
//! Cada resolución escribe exactamente un archivo `temp_audio_*` en el
//! directorio temporal; el [`Reclaimer`] lo borra cuando la pista deja de
//! sonar. Borrar una ruta inexistente no es un error y los fallos de borrado
//! solo se registran.

use anyhow::Result;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};
use tokio::fs;
use tracing::{debug, info, warn};

/// Prefijo de todos los artefactos que crea el resolver.
pub const ARTIFACT_PREFIX: &str = "temp_audio_";

/// Resultado de intentar borrar un artefacto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    Removed,
    Missing,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

/// Manager del directorio temporal: nombres únicos, borrado y limpieza.
#[derive(Debug)]
pub struct Reclaimer {
    scratch_dir: PathBuf,
    sequence: AtomicU64,
    removed: AtomicUsize,
    missing: AtomicUsize,
    failed: AtomicUsize,
}

impl Reclaimer {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self {
            scratch_dir,
            sequence: AtomicU64::new(0),
            removed: AtomicUsize::new(0),
            missing: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Genera un nombre base único para un artefacto nuevo (sin extensión).
    ///
    /// El contador garantiza unicidad dentro del proceso y el sufijo aleatorio
    /// evita choques con restos de ejecuciones anteriores.
    pub fn next_artifact_stem(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}{}_{:08x}", ARTIFACT_PREFIX, seq, fastrand::u32(..))
    }

    /// Borra un artefacto. Idempotente: una ruta inexistente se ignora.
    pub async fn reclaim(&self, path: &Path) -> ReclaimOutcome {
        match fs::remove_file(path).await {
            Ok(()) => {
                self.removed.fetch_add(1, Ordering::Relaxed);
                info!("🗑️ Archivo {} eliminado", path.display());
                ReclaimOutcome::Removed
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.missing.fetch_add(1, Ordering::Relaxed);
                debug!("Archivo {} ya no existe", path.display());
                ReclaimOutcome::Missing
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!("⚠️ Error al eliminar archivo {}: {}", path.display(), e);
                ReclaimOutcome::Failed
            }
        }
    }

    /// Borra cualquier archivo cuyo nombre empiece por `stem`.
    ///
    /// Se usa tras una descarga fallida, donde yt-dlp puede haber dejado
    /// fragmentos `.part` o el contenedor original sin transcodificar.
    pub async fn reclaim_stem(&self, stem: &str) -> usize {
        let mut reclaimed = 0;
        for path in self.list_matching(|name| name.starts_with(stem)).await {
            if self.reclaim(&path).await == ReclaimOutcome::Removed {
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Elimina los artefactos huérfanos de una ejecución anterior.
    pub async fn sweep(&self) -> Result<usize> {
        fs::create_dir_all(&self.scratch_dir).await?;

        let mut reclaimed = 0;
        for path in self.list_matching(|name| name.starts_with(ARTIFACT_PREFIX)).await {
            if self.reclaim(&path).await == ReclaimOutcome::Removed {
                reclaimed += 1;
            }
        }

        if reclaimed > 0 {
            info!(
                "🧹 {} artefactos huérfanos eliminados de {}",
                reclaimed,
                self.scratch_dir.display()
            );
        }
        Ok(reclaimed)
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            removed: self.removed.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    async fn list_matching(&self, predicate: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let mut matches = Vec::new();
        let mut entries = match fs::read_dir(&self.scratch_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "⚠️ No se pudo leer el directorio temporal {}: {}",
                    self.scratch_dir.display(),
                    e
                );
                return matches;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if entry.file_name().to_str().is_some_and(&predicate) {
                        matches.push(entry.path());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("⚠️ Error recorriendo el directorio temporal: {}", e);
                    break;
                }
            }
        }

        matches
    }
}
