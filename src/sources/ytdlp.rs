use async_trait::async_trait;
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};

use super::{Resolver, Track};
use crate::{config::Config, error::FetchError, storage::Reclaimer};

/// Resolver que descarga y transcodifica con yt-dlp + FFmpeg.
///
/// Cada llamada produce un archivo `temp_audio_*` con nombre único en el
/// directorio temporal, así que resoluciones concurrentes nunca chocan.
pub struct YtDlpResolver {
    binary: String,
    ffmpeg_location: Option<PathBuf>,
    audio_format: String,
    audio_quality: String,
    default_search: String,
    default_thumbnail: String,
    storage: Arc<Reclaimer>,
}

impl YtDlpResolver {
    pub fn new(config: &Config, storage: Arc<Reclaimer>) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            ffmpeg_location: config.ffmpeg_location.clone(),
            audio_format: config.audio_format.clone(),
            audio_quality: config.audio_quality.clone(),
            default_search: config.default_search.clone(),
            default_thumbnail: config.default_thumbnail.clone(),
            storage,
        }
    }

    /// Verifica que yt-dlp y ffmpeg estén disponibles
    pub async fn verify_dependencies(&self) -> anyhow::Result<()> {
        let ytdlp_check = async_process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await;

        match ytdlp_check {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp versión: {}", version.trim());
            }
            _ => {
                error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
                anyhow::bail!("yt-dlp no disponible");
            }
        }

        let ffmpeg = self
            .ffmpeg_location
            .as_ref()
            .map(|p| p.join("ffmpeg").to_string_lossy().into_owned())
            .unwrap_or_else(|| "ffmpeg".to_string());
        let ffmpeg_check = async_process::Command::new(&ffmpeg)
            .arg("-version")
            .output()
            .await;

        match ffmpeg_check {
            Ok(output) if output.status.success() => {
                info!("✅ ffmpeg disponible");
            }
            _ => {
                error!("❌ ffmpeg no encontrado. Instala con: sudo apt install ffmpeg");
                anyhow::bail!("ffmpeg no disponible");
            }
        }

        Ok(())
    }

    /// Convierte la consulta en el objetivo de yt-dlp: las URLs pasan tal cual,
    /// el resto se convierte en búsqueda de un único resultado.
    pub fn search_target(&self, query: &str) -> String {
        let query = query.trim();
        if is_url(query) {
            query.to_string()
        } else {
            format!("{}1:{}", self.default_search, query)
        }
    }

    fn build_args(&self, stem: &str, target: &str) -> Vec<String> {
        let output = self
            .storage
            .scratch_dir()
            .join(format!("{stem}.%(ext)s"))
            .to_string_lossy()
            .into_owned();

        let mut args: Vec<String> = [
            "--format",
            "bestaudio[ext=webm]/bestaudio/best",
            "--no-playlist",
            "--no-check-certificates",
            "--restrict-filenames",
            "--quiet",
            "--no-warnings",
            "--socket-timeout",
            "30",
            "--retries",
            "3",
            "--extract-audio",
            "--audio-format",
            self.audio_format.as_str(),
            "--audio-quality",
            self.audio_quality.as_str(),
            "--output",
            output.as_str(),
            "--dump-json",
            "--no-simulate",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(location) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(location.to_string_lossy().into_owned());
        }

        // Las consultas que empiezan por '-' no deben leerse como opciones
        args.push("--".to_string());
        args.push(target.to_string());
        args
    }

    fn artifact_path(&self, stem: &str) -> PathBuf {
        self.storage
            .scratch_dir()
            .join(format!("{stem}.{}", artifact_extension(&self.audio_format)))
    }

    async fn run(&self, query: &str, stem: &str) -> Result<Track, FetchError> {
        let target = self.search_target(query);
        let args = self.build_args(stem, &target);
        let binary = self.binary.clone();

        info!("⬇️ Descargando audio con query: {}", query);

        // yt-dlp bloquea durante toda la descarga: fuera del runtime async
        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new(binary).args(&args).output()
        })
        .await??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para '{}': {}", query, stderr.trim());
            return Err(FetchError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: last_line(&stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info = parse_metadata(&stdout)?.ok_or(FetchError::NoResults)?;

        let artifact = self.artifact_path(stem);
        if tokio::fs::metadata(&artifact).await.is_err() {
            return Err(FetchError::ArtifactMissing(artifact));
        }

        let track = info.into_track(query, artifact, &self.default_thumbnail);
        info!("✅ Audio listo: {} -> {}", track.title, track.artifact.display());
        Ok(track)
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Track, FetchError> {
        if query.trim().is_empty() {
            return Err(FetchError::EmptyQuery);
        }

        let stem = self.storage.next_artifact_stem();
        let result = self.run(query, &stem).await;

        if result.is_err() {
            // No dejar restos de una descarga fallida
            let removed = self.storage.reclaim_stem(&stem).await;
            if removed > 0 {
                warn!("🧹 {} restos de descarga eliminados para '{}'", removed, query);
            }
        }

        result
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Metadatos que imprime `--dump-json`
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

impl VideoInfo {
    fn into_track(self, query: &str, artifact: PathBuf, default_thumbnail: &str) -> Track {
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| query.to_string());

        let mut track = Track::new(query, artifact, title).with_thumbnail(
            self.thumbnail
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| default_thumbnail.to_string()),
        );

        if let Some(url) = self.webpage_url {
            track = track.with_url(url);
        }
        if let Some(uploader) = self.uploader {
            track = track.with_uploader(uploader);
        }
        if let Some(duration) = self.duration.filter(|d| d.is_finite() && *d > 0.0) {
            track = track.with_duration(Duration::from_secs_f64(duration));
        }

        track
    }
}

/// Toma la primera línea JSON de la salida; `None` si la búsqueda no encontró nada.
fn parse_metadata(stdout: &str) -> Result<Option<VideoInfo>, FetchError> {
    match stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
        Some(line) => Ok(Some(serde_json::from_str(line)?)),
        None => Ok(None),
    }
}

/// Extensión del archivo final según el códec pedido a `--audio-format`.
///
/// FFmpegExtractAudio guarda `vorbis` en `.ogg` y `aac` en `.m4a`.
fn artifact_extension(format: &str) -> &str {
    match format {
        "vorbis" => "ogg",
        "aac" => "m4a",
        other => other,
    }
}

fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("sin salida de error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver(dir: &std::path::Path) -> YtDlpResolver {
        let config = Config {
            discord_token: "t".into(),
            scratch_dir: dir.to_path_buf(),
            ..Config::default()
        };
        YtDlpResolver::new(&config, Arc::new(Reclaimer::new(dir.to_path_buf())))
    }

    #[test]
    fn test_search_target() {
        let r = resolver(std::path::Path::new("/tmp"));
        assert_eq!(
            r.search_target("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(r.search_target("  never gonna give you up "), "ytsearch1:never gonna give you up");
        assert_eq!(r.search_target("ftp://example.com/a"), "ytsearch1:ftp://example.com/a");
    }

    #[test]
    fn test_args_end_with_separator_and_target() {
        let r = resolver(std::path::Path::new("/tmp/scratch"));
        let args = r.build_args("temp_audio_0_abc", "ytsearch1:-weird");
        let n = args.len();
        assert_eq!(&args[n - 2..], &["--".to_string(), "ytsearch1:-weird".to_string()]);
        assert!(args.contains(&"/tmp/scratch/temp_audio_0_abc.%(ext)s".to_string()));
        assert!(args.contains(&"mp3".to_string()));
    }

    #[test]
    fn test_parse_metadata_with_thumbnail_fallback() {
        let stdout = r#"{"title":"Song A","webpage_url":"https://youtu.be/a","duration":212.5,"uploader":"Band"}
"#;
        let info = parse_metadata(stdout).unwrap().unwrap();
        let track = info.into_track("songA", PathBuf::from("/tmp/a.mp3"), "https://default/thumb.png");

        assert_eq!(track.title, "Song A");
        assert_eq!(track.thumbnail, "https://default/thumb.png");
        assert_eq!(track.url.as_deref(), Some("https://youtu.be/a"));
        assert_eq!(track.uploader.as_deref(), Some("Band"));
        assert_eq!(track.duration, Some(Duration::from_secs_f64(212.5)));
    }

    #[test]
    fn test_parse_metadata_empty_output_means_no_results() {
        assert!(parse_metadata("\n  \n").unwrap().is_none());
        assert!(matches!(
            parse_metadata("not json"),
            Err(FetchError::Metadata(_))
        ));
    }

    #[test]
    fn test_missing_title_falls_back_to_query() {
        let info = parse_metadata(r#"{"thumbnail":"https://i/x.jpg"}"#).unwrap().unwrap();
        let track = info.into_track("songB", PathBuf::from("/tmp/b.mp3"), "d");
        assert_eq!(track.title, "songB");
        assert_eq!(track.thumbnail, "https://i/x.jpg");
    }

    #[test]
    fn test_artifact_extension() {
        assert_eq!(artifact_extension("mp3"), "mp3");
        assert_eq!(artifact_extension("vorbis"), "ogg");
        assert_eq!(artifact_extension("aac"), "m4a");
        assert_eq!(artifact_extension("m4a"), "m4a");
    }

    #[test]
    fn test_aac_artifact_path_matches_ytdlp_output() {
        let config = Config {
            discord_token: "t".into(),
            scratch_dir: "/tmp/scratch".into(),
            audio_format: "aac".into(),
            ..Config::default()
        };
        let r = YtDlpResolver::new(&config, Arc::new(Reclaimer::new("/tmp/scratch".into())));
        assert_eq!(
            r.artifact_path("temp_audio_0_abc"),
            PathBuf::from("/tmp/scratch/temp_audio_0_abc.m4a")
        );
    }

    #[tokio::test]
    async fn test_failed_spawn_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            discord_token: "t".into(),
            scratch_dir: dir.path().to_path_buf(),
            ytdlp_path: "/nonexistent/yt-dlp-binary".into(),
            ..Config::default()
        };
        let storage = Arc::new(Reclaimer::new(dir.path().to_path_buf()));
        let r = YtDlpResolver::new(&config, storage);

        assert!(matches!(r.resolve("song").await, Err(FetchError::Spawn(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
