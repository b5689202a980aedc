//! # Queue Coordinator
//!
//! Dueño único de la cola, de la pista actual y del modo loop de un servidor.
//!
//! Cada servidor tiene una tarea propia que procesa, de una en una, tres
//! fuentes de mensajes:
//!
//! - comandos de los controles ([`CoordinatorHandle`]),
//! - resultados del [`FetchPool`] (las descargas nunca corren en esta tarea),
//! - notificaciones de fin de pista de la [`PlaybackSession`].
//!
//! Como solo esta tarea toca el estado, no hace falta ningún lock. Cada
//! resolución y cada reproducción lleva un número de intento; un resultado
//! o un fin de pista con un intento que ya no es el actual se descarta (y su
//! artefacto se borra si quedó huérfano).

use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::{
        queue::{QueuedRequest, RequestQueue, Requester},
        session::{
            Completion, CompletionNotifier, PlaybackSession, TransportOutcome, TransportState,
            VoiceConnection,
        },
    },
    error::{FetchError, MusicError},
    sources::{FetchPool, Track},
    storage::Reclaimer,
};

/// Respuesta a una petición de reproducción.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    /// Empezó a sonar en respuesta a esta misma petición.
    Started(Track),
    /// Quedó en cola; `position` 1 es la siguiente.
    Queued { position: usize },
    /// Un stop o skip llegó mientras se descargaba.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    pub stopped: bool,
    pub disconnected: bool,
}

/// Mensajes para el canal de texto de quien pidió una canción en cola.
#[derive(Debug, Clone, PartialEq)]
pub enum Announcement {
    NowPlaying {
        guild_id: GuildId,
        track: Track,
        requester: Requester,
    },
    FetchFailed {
        guild_id: GuildId,
        query: String,
        requester: Requester,
        error: String,
    },
}

/// Vista de solo lectura del estado, publicada tras cada evento.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub now_playing: Option<Track>,
    pub pending: Option<String>,
    pub queue: Vec<String>,
    pub loop_enabled: bool,
    pub transport: TransportState,
    pub connected: bool,
}

impl PlaybackSnapshot {
    pub fn is_idle(&self) -> bool {
        self.now_playing.is_none() && self.pending.is_none()
    }
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Attach {
        connection: Arc<dyn VoiceConnection>,
        reply: Reply<bool>,
    },
    Play {
        request: QueuedRequest,
        reply: Reply<Result<PlayOutcome, MusicError>>,
    },
    Pause {
        reply: Reply<Result<TransportOutcome, MusicError>>,
    },
    Resume {
        reply: Reply<Result<TransportOutcome, MusicError>>,
    },
    Skip {
        reply: Reply<TransportOutcome>,
    },
    Stop {
        reply: Reply<StopOutcome>,
    },
    ToggleLoop {
        reply: Reply<bool>,
    },
}

struct Resolution {
    attempt: u64,
    result: Result<Track, FetchError>,
}

enum Phase {
    Idle,
    Resolving {
        attempt: u64,
        request: QueuedRequest,
        reply: Option<Reply<Result<PlayOutcome, MusicError>>>,
        repeat: bool,
    },
    Playing {
        attempt: u64,
        request: QueuedRequest,
        track: Track,
    },
}

/// Handle clonable hacia el coordinador de un servidor.
#[derive(Clone)]
pub struct CoordinatorHandle {
    guild_id: GuildId,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<PlaybackSnapshot>,
}

impl CoordinatorHandle {
    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Instala la conexión de voz si el coordinador no tiene ninguna.
    pub async fn attach(&self, connection: Arc<dyn VoiceConnection>) -> Result<bool, MusicError> {
        self.request(|reply| Command::Attach { connection, reply })
            .await
    }

    /// Reproduce ya si no hay nada activo; si no, encola.
    ///
    /// Cuando la petición empieza a sonar de inmediato, la respuesta llega al
    /// comenzar la reproducción (o al fallar la descarga).
    pub async fn play(&self, request: QueuedRequest) -> Result<PlayOutcome, MusicError> {
        self.request(|reply| Command::Play { request, reply })
            .await?
    }

    pub async fn pause(&self) -> Result<TransportOutcome, MusicError> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<TransportOutcome, MusicError> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    pub async fn skip(&self) -> Result<TransportOutcome, MusicError> {
        self.request(|reply| Command::Skip { reply }).await
    }

    /// Detiene, vacía la cola y suelta la conexión de voz.
    pub async fn stop(&self) -> Result<StopOutcome, MusicError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn toggle_loop(&self) -> Result<bool, MusicError> {
        self.request(|reply| Command::ToggleLoop { reply }).await
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Espera a que la tarea del coordinador termine.
    pub async fn closed(&self) {
        self.commands.closed().await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, MusicError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| MusicError::CoordinatorClosed)?;
        rx.await.map_err(|_| MusicError::CoordinatorClosed)
    }
}

pub struct Coordinator {
    guild_id: GuildId,
    pool: FetchPool,
    storage: Arc<Reclaimer>,
    session: Option<PlaybackSession>,
    queue: RequestQueue,
    phase: Phase,
    loop_enabled: bool,
    attempt: u64,
    commands: mpsc::UnboundedReceiver<Command>,
    resolutions_tx: mpsc::UnboundedSender<Resolution>,
    resolutions_rx: mpsc::UnboundedReceiver<Resolution>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    announcements: mpsc::UnboundedSender<Announcement>,
    snapshot: watch::Sender<PlaybackSnapshot>,
    shutdown: CancellationToken,
}

impl Coordinator {
    /// Lanza el coordinador de un servidor y devuelve su handle.
    pub fn spawn(
        guild_id: GuildId,
        pool: FetchPool,
        storage: Arc<Reclaimer>,
        max_queue_size: usize,
        announcements: mpsc::UnboundedSender<Announcement>,
        shutdown: CancellationToken,
    ) -> CoordinatorHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (resolutions_tx, resolutions_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PlaybackSnapshot::default());

        let coordinator = Self {
            guild_id,
            pool,
            storage,
            session: None,
            queue: RequestQueue::new(max_queue_size),
            phase: Phase::Idle,
            loop_enabled: false,
            attempt: 0,
            commands: commands_rx,
            resolutions_tx,
            resolutions_rx,
            completions_tx,
            completions_rx,
            announcements,
            snapshot: snapshot_tx,
            shutdown,
        };
        tokio::spawn(coordinator.run());

        CoordinatorHandle {
            guild_id,
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }

    async fn run(mut self) {
        info!("🎛️ Coordinador iniciado para guild {}", self.guild_id);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(completion) = self.completions_rx.recv() => {
                    self.on_completion(completion).await;
                }
                Some(resolution) = self.resolutions_rx.recv() => {
                    self.on_resolved(resolution).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
            self.publish();
        }

        self.teardown().await;
        self.publish();
        info!("🎛️ Coordinador finalizado para guild {}", self.guild_id);
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Attach { connection, reply } => {
                let attached = self.session.is_none();
                if attached {
                    self.session = Some(PlaybackSession::new(connection));
                    info!("🔊 Sesión de voz instalada en guild {}", self.guild_id);
                }
                let _ = reply.send(attached);
            }
            Command::Play { request, reply } => self.on_play(request, reply),
            Command::Pause { reply } => {
                let outcome = match self.session.as_mut() {
                    Some(session) => session.pause().await,
                    None => Ok(TransportOutcome::NothingToDo),
                };
                let _ = reply.send(outcome);
            }
            Command::Resume { reply } => {
                let outcome = match self.session.as_mut() {
                    Some(session) => session.resume().await,
                    None => Ok(TransportOutcome::NothingToDo),
                };
                let _ = reply.send(outcome);
            }
            Command::Skip { reply } => {
                let outcome = self.on_skip().await;
                let _ = reply.send(outcome);
            }
            Command::Stop { reply } => {
                let outcome = self.on_stop().await;
                let _ = reply.send(outcome);
            }
            Command::ToggleLoop { reply } => {
                self.loop_enabled = !self.loop_enabled;
                info!(
                    "🔁 Modo loop {} en guild {}",
                    if self.loop_enabled { "activado" } else { "desactivado" },
                    self.guild_id
                );
                let _ = reply.send(self.loop_enabled);
            }
        }
    }

    fn on_play(&mut self, request: QueuedRequest, reply: Reply<Result<PlayOutcome, MusicError>>) {
        if !matches!(self.phase, Phase::Idle) {
            let outcome = self
                .queue
                .push(request)
                .map(|position| PlayOutcome::Queued { position });
            let _ = reply.send(outcome);
            return;
        }

        if self.session.is_none() {
            let _ = reply.send(Err(MusicError::NotConnected));
            return;
        }

        self.start_resolution(request, Some(reply), false);
    }

    async fn on_skip(&mut self) -> TransportOutcome {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => TransportOutcome::NothingToDo,
            Phase::Playing { request, track, .. } => {
                // Invalida el fin de pista que dispara stop()
                self.attempt += 1;
                if let Some(session) = self.session.as_mut() {
                    if let Err(e) = session.stop().await {
                        warn!("⚠️ Error deteniendo la pista: {}", e);
                    }
                }
                self.storage.reclaim(&track.artifact).await;
                info!("⏭️ Saltado: {}", track.title);

                if self.queue.is_empty() {
                    self.advance(Some(request));
                } else {
                    self.advance(None);
                }
                TransportOutcome::Applied
            }
            Phase::Resolving { request, reply, .. } => {
                self.attempt += 1;
                info!("⏭️ Descarga de '{}' descartada", request.query);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(PlayOutcome::Cancelled));
                }
                self.advance(None);
                TransportOutcome::Applied
            }
        }
    }

    async fn on_stop(&mut self) -> StopOutcome {
        self.attempt += 1;

        let stopped = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => false,
            Phase::Playing { track, .. } => {
                if let Some(session) = self.session.as_mut() {
                    if let Err(e) = session.stop().await {
                        warn!("⚠️ Error deteniendo la pista: {}", e);
                    }
                }
                self.storage.reclaim(&track.artifact).await;
                true
            }
            Phase::Resolving { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(PlayOutcome::Cancelled));
                }
                true
            }
        };
        let cleared = self.queue.clear() > 0;

        let disconnected = match self.session.take() {
            Some(session) => match session.disconnect().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("⚠️ Error al desconectar en guild {}: {}", self.guild_id, e);
                    false
                }
            },
            None => false,
        };

        info!("⏹️ Reproducción detenida en guild {}", self.guild_id);
        StopOutcome {
            stopped: stopped || cleared,
            disconnected,
        }
    }

    async fn on_resolved(&mut self, resolution: Resolution) {
        let Resolution { attempt, result } = resolution;

        let (request, reply, repeat) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Resolving {
                attempt: current,
                request,
                reply,
                repeat,
            } if current == attempt => (request, reply, repeat),
            other => {
                self.phase = other;
                match result {
                    Ok(track) => {
                        debug!(
                            "Descarga obsoleta (intento {}) de '{}', descartando",
                            attempt, track.query
                        );
                        self.storage.reclaim(&track.artifact).await;
                    }
                    Err(e) => debug!("Error de descarga obsoleta (intento {}): {}", attempt, e),
                }
                return;
            }
        };

        match result {
            Ok(track) => {
                self.start_playback(attempt, request, track, reply, repeat)
                    .await
            }
            Err(e) => {
                warn!("❌ Error al obtener '{}': {}", request.query, e);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(e.into()));
                    }
                    None => self.announce(Announcement::FetchFailed {
                        guild_id: self.guild_id,
                        query: request.query.clone(),
                        requester: request.requester.clone(),
                        error: e.to_string(),
                    }),
                }
                // Una consulta que no se pudo obtener no se repite aunque haya loop
                self.advance(None);
            }
        }
    }

    async fn start_playback(
        &mut self,
        attempt: u64,
        request: QueuedRequest,
        track: Track,
        reply: Option<Reply<Result<PlayOutcome, MusicError>>>,
        repeat: bool,
    ) {
        let notifier = CompletionNotifier::new(attempt, self.completions_tx.clone());
        let played = match self.session.as_mut() {
            Some(session) => session.play(&track.artifact, notifier).await,
            None => Err(MusicError::NotConnected),
        };

        match played {
            Ok(()) => {
                info!("🎵 Reproduciendo: {} en guild {}", track.title, self.guild_id);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Ok(PlayOutcome::Started(track.clone())));
                    }
                    None if !repeat => self.announce(Announcement::NowPlaying {
                        guild_id: self.guild_id,
                        track: track.clone(),
                        requester: request.requester.clone(),
                    }),
                    None => {}
                }
                self.phase = Phase::Playing {
                    attempt,
                    request,
                    track,
                };
            }
            Err(e) => {
                warn!("❌ No se pudo reproducir {}: {}", track.title, e);
                self.storage.reclaim(&track.artifact).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(Err(e));
                    }
                    None => self.announce(Announcement::FetchFailed {
                        guild_id: self.guild_id,
                        query: request.query,
                        requester: request.requester,
                        error: e.to_string(),
                    }),
                }
                self.advance(None);
            }
        }
    }

    async fn on_completion(&mut self, completion: Completion) {
        let Completion { attempt, error } = completion;

        let (request, track) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Playing {
                attempt: current,
                request,
                track,
            } if current == attempt => (request, track),
            other => {
                self.phase = other;
                debug!("Fin de pista obsoleto (intento {}), ignorado", attempt);
                return;
            }
        };

        if let Some(error) = error {
            warn!(
                "⚠️ Error de transporte en '{}' (guild {}): {}",
                track.title, self.guild_id, error
            );
        }

        if let Some(session) = self.session.as_mut() {
            session.mark_finished();
        }
        self.storage.reclaim(&track.artifact).await;
        self.advance(Some(request));
    }

    /// Decide qué suena después: la misma consulta si hay loop, la cabeza de la
    /// cola, o nada.
    fn advance(&mut self, finished: Option<QueuedRequest>) {
        if self.loop_enabled {
            if let Some(request) = finished {
                info!("🔂 Repitiendo: {}", request.query);
                self.start_resolution(request, None, true);
                return;
            }
        }

        match self.queue.pop() {
            Some(next) => {
                debug!(
                    "'{}' esperó {}s en cola",
                    next.query,
                    (chrono::Utc::now() - next.requested_at).num_seconds()
                );
                self.start_resolution(next, None, false)
            }
            None => {
                self.phase = Phase::Idle;
                info!("💤 Sin más canciones en guild {}", self.guild_id);
            }
        }
    }

    fn start_resolution(
        &mut self,
        request: QueuedRequest,
        reply: Option<Reply<Result<PlayOutcome, MusicError>>>,
        repeat: bool,
    ) {
        self.attempt += 1;
        let attempt = self.attempt;
        debug!(
            "🔎 Resolviendo '{}' para {} (intento {})",
            request.query, request.requester.user_name, attempt
        );

        let pool = self.pool.clone();
        let storage = self.storage.clone();
        let results = self.resolutions_tx.clone();
        let query = request.query.clone();

        tokio::spawn(async move {
            let result = pool.resolve(&query).await;
            if let Err(mpsc::error::SendError(resolution)) = results.send(Resolution { attempt, result }) {
                // El coordinador ya terminó: nadie va a borrar este artefacto
                if let Ok(track) = resolution.result {
                    storage.reclaim(&track.artifact).await;
                }
            }
        });

        self.phase = Phase::Resolving {
            attempt,
            request,
            reply,
            repeat,
        };
    }

    fn announce(&self, announcement: Announcement) {
        if self.announcements.send(announcement).is_err() {
            debug!("Canal de anuncios cerrado");
        }
    }

    async fn teardown(&mut self) {
        let outcome = self.on_stop().await;
        if outcome.stopped {
            info!(
                "🧹 Reproducción cancelada por cierre en guild {}",
                self.guild_id
            );
        }
    }

    fn publish(&self) {
        let snapshot = PlaybackSnapshot {
            now_playing: match &self.phase {
                Phase::Playing { track, .. } => Some(track.clone()),
                _ => None,
            },
            pending: match &self.phase {
                Phase::Resolving { request, .. } => Some(request.query.clone()),
                _ => None,
            },
            queue: self.queue.iter().map(|r| r.query.clone()).collect(),
            loop_enabled: self.loop_enabled,
            transport: self
                .session
                .as_ref()
                .map(|s| s.state())
                .unwrap_or_default(),
            connected: self.session.is_some(),
        };

        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::session::VoiceConnection, sources::Resolver};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};
    use std::{
        collections::{HashMap, HashSet},
        path::{Path, PathBuf},
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::sync::Notify;

    /// Resolver falso que escribe artefactos reales en un directorio temporal.
    struct FakeResolver {
        dir: PathBuf,
        counter: AtomicUsize,
        calls: Mutex<Vec<String>>,
        failing: HashSet<String>,
        gates: Mutex<HashMap<String, Arc<Notify>>>,
    }

    impl FakeResolver {
        fn new(dir: &Path) -> Self {
            Self {
                dir: dir.to_path_buf(),
                counter: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
                failing: HashSet::new(),
                gates: Mutex::new(HashMap::new()),
            }
        }

        fn failing(mut self, query: &str) -> Self {
            self.failing.insert(query.to_string());
            self
        }

        /// La próxima resolución de `query` espera hasta `release`.
        fn hold(&self, query: &str) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.gates.lock().insert(query.to_string(), gate.clone());
            gate
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn resolve(&self, query: &str) -> Result<Track, FetchError> {
            self.calls.lock().push(query.to_string());

            let gate = self.gates.lock().remove(query);
            if let Some(gate) = gate {
                gate.notified().await;
            }

            if self.failing.contains(query) {
                return Err(FetchError::NoResults);
            }

            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let artifact = self.dir.join(format!("temp_audio_{query}_{n}.mp3"));
            std::fs::write(&artifact, b"audio")?;
            Ok(Track::new(query, artifact, format!("Title {query}")))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    /// Conexión falsa: stop() dispara la notificación como lo hace songbird.
    #[derive(Default)]
    struct FakeConnection {
        notifier: Mutex<Option<CompletionNotifier>>,
        played: Mutex<Vec<PathBuf>>,
        disconnected: AtomicBool,
    }

    impl FakeConnection {
        fn finish(&self, error: Option<&str>) {
            let notifier = self.notifier.lock().take().expect("nothing playing");
            notifier.notify(error.map(str::to_string));
        }
    }

    #[async_trait]
    impl VoiceConnection for FakeConnection {
        async fn play(&self, artifact: &Path, on_complete: CompletionNotifier) -> Result<(), MusicError> {
            assert!(artifact.exists(), "playing a reclaimed artifact");
            self.played.lock().push(artifact.to_path_buf());
            *self.notifier.lock() = Some(on_complete);
            Ok(())
        }

        async fn pause(&self) -> Result<(), MusicError> {
            Ok(())
        }

        async fn resume(&self) -> Result<(), MusicError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), MusicError> {
            if let Some(notifier) = self.notifier.lock().take() {
                notifier.notify(None);
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), MusicError> {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        resolver: Arc<FakeResolver>,
        connection: Arc<FakeConnection>,
        storage: Arc<Reclaimer>,
        handle: CoordinatorHandle,
        announcements: mpsc::UnboundedReceiver<Announcement>,
        shutdown: CancellationToken,
    }

    impl Harness {
        async fn new(build: impl FnOnce(FakeResolver) -> FakeResolver) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let resolver = Arc::new(build(FakeResolver::new(dir.path())));
            let storage = Arc::new(Reclaimer::new(dir.path().to_path_buf()));
            let pool = FetchPool::new(resolver.clone(), 4);
            let (tx, announcements) = mpsc::unbounded_channel();
            let shutdown = CancellationToken::new();

            let handle = Coordinator::spawn(
                GuildId::new(1),
                pool,
                storage.clone(),
                10,
                tx,
                shutdown.clone(),
            );
            let connection = Arc::new(FakeConnection::default());
            assert!(handle.attach(connection.clone()).await.unwrap());

            Self {
                dir,
                resolver,
                connection,
                storage,
                handle,
                announcements,
                shutdown,
            }
        }

        async fn wait_for(&self, predicate: impl FnMut(&PlaybackSnapshot) -> bool) -> PlaybackSnapshot {
            let mut rx = self.handle.snapshot.clone();
            let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
                .await
                .expect("timed out waiting for snapshot")
                .expect("coordinator gone")
                .clone();
            snapshot
        }

        async fn wait_reclaimed(&self, removed: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.storage.stats().removed < removed {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("timed out waiting for reclaim");
        }

        async fn wait_playing(&self, query: &str) -> PlaybackSnapshot {
            self.wait_for(|s| s.now_playing.as_ref().is_some_and(|t| t.query == query))
                .await
        }

        fn artifacts(&self) -> usize {
            std::fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    fn request(query: &str) -> QueuedRequest {
        QueuedRequest::new(
            query,
            Requester {
                user_id: UserId::new(10),
                user_name: "tester".into(),
                text_channel: ChannelId::new(20),
            },
        )
    }

    fn started_query(outcome: PlayOutcome) -> String {
        match outcome {
            PlayOutcome::Started(track) => track.query,
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_request_then_queue_then_advance() {
        let mut h = Harness::new(|r| r).await;

        let outcome = h.handle.play(request("songA")).await.unwrap();
        assert_eq!(started_query(outcome), "songA");
        let snapshot = h.handle.snapshot();
        let artifact_a = snapshot.now_playing.unwrap().artifact;
        assert!(artifact_a.exists());

        assert_eq!(
            h.handle.play(request("songB")).await.unwrap(),
            PlayOutcome::Queued { position: 1 }
        );
        assert_eq!(h.handle.snapshot().queue, vec!["songB".to_string()]);

        h.connection.finish(None);
        let snapshot = h.wait_playing("songB").await;
        assert!(snapshot.queue.is_empty());
        assert!(!artifact_a.exists());
        assert_eq!(h.resolver.calls(), vec!["songA", "songB"]);

        match h.announcements.recv().await.unwrap() {
            Announcement::NowPlaying { track, .. } => assert_eq!(track.query, "songB"),
            other => panic!("unexpected announcement {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requests_during_first_resolution_are_fifo() {
        let h = Harness::new(|r| r).await;
        let gate = h.resolver.hold("songA");

        let handle = h.handle.clone();
        let first = tokio::spawn(async move { handle.play(request("songA")).await });
        h.wait_for(|s| s.pending.as_deref() == Some("songA")).await;

        assert_eq!(
            h.handle.play(request("songB")).await.unwrap(),
            PlayOutcome::Queued { position: 1 }
        );
        assert_eq!(
            h.handle.play(request("songC")).await.unwrap(),
            PlayOutcome::Queued { position: 2 }
        );

        gate.notify_one();
        assert_eq!(started_query(first.await.unwrap().unwrap()), "songA");

        h.connection.finish(None);
        h.wait_playing("songB").await;
        h.connection.finish(None);
        h.wait_playing("songC").await;
        h.connection.finish(None);
        h.wait_for(|s| s.is_idle()).await;

        assert_eq!(h.resolver.calls(), vec!["songA", "songB", "songC"]);
        assert_eq!(h.artifacts(), 0);
        assert_eq!(h.storage.stats().removed, 3);
        assert_eq!(h.storage.stats().missing, 0);
    }

    #[tokio::test]
    async fn test_skip_with_empty_queue_goes_idle() {
        let h = Harness::new(|r| r).await;
        h.handle.play(request("songA")).await.unwrap();

        assert_eq!(h.handle.skip().await.unwrap(), TransportOutcome::Applied);
        let snapshot = h.wait_for(|s| s.is_idle()).await;
        assert_eq!(snapshot.transport, TransportState::Idle);
        assert!(snapshot.connected);

        // El fin de pista que dispara stop() no provoca un segundo borrado
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.artifacts(), 0);
        assert_eq!(h.storage.stats().removed, 1);
        assert_eq!(h.storage.stats().missing, 0);

        assert_eq!(h.handle.skip().await.unwrap(), TransportOutcome::NothingToDo);
    }

    #[tokio::test]
    async fn test_skip_plays_queue_head() {
        let h = Harness::new(|r| r).await;
        h.handle.play(request("songA")).await.unwrap();
        h.handle.play(request("songB")).await.unwrap();

        h.handle.skip().await.unwrap();
        h.wait_playing("songB").await;
        assert_eq!(h.connection.played.lock().len(), 2);
        assert_eq!(h.artifacts(), 1);
    }

    #[tokio::test]
    async fn test_loop_resolves_same_query_each_time() {
        let h = Harness::new(|r| r).await;
        assert!(h.handle.toggle_loop().await.unwrap());
        h.handle.play(request("songA")).await.unwrap();
        let first = h.handle.snapshot().now_playing.unwrap().artifact;

        h.connection.finish(None);
        let snapshot = h
            .wait_for(|s| {
                s.now_playing
                    .as_ref()
                    .is_some_and(|t| t.artifact != first)
            })
            .await;
        assert!(!first.exists());
        assert!(snapshot.loop_enabled);
        assert_eq!(h.resolver.calls(), vec!["songA", "songA"]);

        let second = snapshot.now_playing.unwrap().artifact;
        h.connection.finish(None);
        h.wait_for(|s| s.now_playing.as_ref().is_some_and(|t| t.artifact != second))
            .await;
        assert_eq!(h.resolver.calls().len(), 3);

        assert!(!h.handle.toggle_loop().await.unwrap());
        h.connection.finish(None);
        h.wait_for(|s| s.is_idle()).await;
        assert_eq!(h.resolver.calls().len(), 3);
        assert_eq!(h.storage.stats().removed, 3);
        assert_eq!(h.storage.stats().missing, 0);
    }

    #[tokio::test]
    async fn test_stop_during_resolution_discards_result() {
        let h = Harness::new(|r| r).await;
        let gate = h.resolver.hold("songA");

        let handle = h.handle.clone();
        let first = tokio::spawn(async move { handle.play(request("songA")).await });
        h.wait_for(|s| s.pending.is_some()).await;
        h.handle.play(request("songB")).await.unwrap();

        let outcome = h.handle.stop().await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome {
                stopped: true,
                disconnected: true
            }
        );
        assert_eq!(first.await.unwrap().unwrap(), PlayOutcome::Cancelled);
        assert!(h.connection.disconnected.load(Ordering::SeqCst));

        // La descarga termina después del stop: su artefacto se borra al llegar
        gate.notify_one();
        h.wait_reclaimed(1).await;

        let snapshot = h.handle.snapshot();
        assert!(snapshot.is_idle());
        assert!(snapshot.queue.is_empty());
        assert!(!snapshot.connected);
        assert!(h.connection.played.lock().is_empty());
        assert_eq!(h.artifacts(), 0);
    }

    #[tokio::test]
    async fn test_stop_while_playing_reclaims_once_and_clears_queue() {
        let h = Harness::new(|r| r).await;
        h.handle.play(request("songA")).await.unwrap();
        assert_eq!(
            h.handle.play(request("songB")).await.unwrap(),
            PlayOutcome::Queued { position: 1 }
        );

        let outcome = h.handle.stop().await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome {
                stopped: true,
                disconnected: true
            }
        );

        // El fin de pista que dispara stop() llega tarde y se ignora
        h.wait_reclaimed(1).await;
        let snapshot = h.wait_for(|s| !s.connected).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(snapshot.is_idle());
        assert!(snapshot.queue.is_empty());
        assert_eq!(h.storage.stats().removed, 1);
        assert_eq!(h.storage.stats().missing, 0);
        assert_eq!(h.artifacts(), 0);
        assert_eq!(h.resolver.calls(), vec!["songA"]);
        assert!(h.connection.disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_skip_during_resolution_moves_to_queue_head() {
        let h = Harness::new(|r| r).await;
        let gate = h.resolver.hold("songA");

        let handle = h.handle.clone();
        let first = tokio::spawn(async move { handle.play(request("songA")).await });
        h.wait_for(|s| s.pending.is_some()).await;
        h.handle.play(request("songB")).await.unwrap();

        assert_eq!(h.handle.skip().await.unwrap(), TransportOutcome::Applied);
        assert_eq!(first.await.unwrap().unwrap(), PlayOutcome::Cancelled);
        h.wait_playing("songB").await;

        gate.notify_one();
        h.wait_reclaimed(1).await;
        assert_eq!(h.artifacts(), 1);
        assert_eq!(h.handle.snapshot().now_playing.unwrap().query, "songB");
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_state_unchanged() {
        let mut h = Harness::new(|r| r.failing("bad")).await;

        let err = h.handle.play(request("bad")).await.unwrap_err();
        assert!(matches!(err, MusicError::Fetch(FetchError::NoResults)));
        assert!(h.handle.snapshot().is_idle());
        assert_eq!(h.artifacts(), 0);

        // Un fallo de una petición encolada se anuncia y la cola sigue
        h.handle.play(request("songA")).await.unwrap();
        h.handle.play(request("bad")).await.unwrap();
        h.handle.play(request("songC")).await.unwrap();
        h.connection.finish(None);
        h.wait_playing("songC").await;

        match h.announcements.recv().await.unwrap() {
            Announcement::FetchFailed { query, .. } => assert_eq!(query, "bad"),
            other => panic!("unexpected announcement {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_advances_like_completion() {
        let h = Harness::new(|r| r).await;
        h.handle.play(request("songA")).await.unwrap();
        h.handle.play(request("songB")).await.unwrap();

        h.connection.finish(Some("decoder error"));
        h.wait_playing("songB").await;
        assert_eq!(h.artifacts(), 1);
    }

    #[tokio::test]
    async fn test_pause_resume_acknowledgements() {
        let h = Harness::new(|r| r).await;
        assert_eq!(h.handle.pause().await.unwrap(), TransportOutcome::NothingToDo);

        h.handle.play(request("songA")).await.unwrap();
        assert_eq!(h.handle.resume().await.unwrap(), TransportOutcome::NothingToDo);
        assert_eq!(h.handle.pause().await.unwrap(), TransportOutcome::Applied);
        assert_eq!(h.handle.pause().await.unwrap(), TransportOutcome::NothingToDo);
        assert_eq!(h.handle.snapshot().transport, TransportState::Paused);
        assert_eq!(h.handle.resume().await.unwrap(), TransportOutcome::Applied);
    }

    #[tokio::test]
    async fn test_play_without_voice_connection() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(FakeResolver::new(dir.path()));
        let storage = Arc::new(Reclaimer::new(dir.path().to_path_buf()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = Coordinator::spawn(
            GuildId::new(2),
            FetchPool::new(resolver.clone(), 1),
            storage,
            10,
            tx,
            CancellationToken::new(),
        );

        assert!(matches!(
            handle.play(request("songA")).await,
            Err(MusicError::NotConnected)
        ));
        assert!(resolver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_reclaims_current_artifact() {
        let h = Harness::new(|r| r).await;
        h.handle.play(request("songA")).await.unwrap();
        h.handle.play(request("songB")).await.unwrap();
        assert_eq!(h.artifacts(), 1);

        h.shutdown.cancel();
        let snapshot = h.wait_for(|s| !s.connected).await;
        assert!(snapshot.queue.is_empty());
        assert_eq!(h.artifacts(), 0);
        assert_eq!(h.resolver.calls(), vec!["songA"]);
        assert!(h.connection.disconnected.load(Ordering::SeqCst));
    }
}
