use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::registry::PlaybackRegistry;
use crate::bot::{announcer, JukeboxBot};
use crate::config::Config;
use crate::sources::{FetchPool, YtDlpResolver};
use crate::storage::Reclaimer;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("⚙️ {}", config.summary());

    let storage = Arc::new(Reclaimer::new(config.scratch_dir.clone()));
    let resolver = Arc::new(YtDlpResolver::new(&config, storage.clone()));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        resolver.verify_dependencies().await?;
        println!("OK");
        return Ok(());
    }

    // Restos de una ejecución anterior
    match storage.sweep().await {
        Ok(0) => {}
        Ok(removed) => info!("🧹 {} archivos temporales antiguos eliminados", removed),
        Err(e) => warn!("⚠️ No se pudo limpiar el directorio temporal: {:?}", e),
    }

    if let Err(e) = resolver.verify_dependencies().await {
        warn!("⚠️ {:?}: las descargas fallarán hasta instalar las dependencias", e);
    }

    let pool = FetchPool::new(resolver, config.fetch_workers);
    let (announce_tx, announce_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(PlaybackRegistry::new(
        pool,
        storage.clone(),
        config.max_queue_size,
        announce_tx,
        CancellationToken::new(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), registry.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    tokio::spawn(announcer::run_announcer(
        client.http.clone(),
        registry.clone(),
        announce_rx,
    ));

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    let signal_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        signal_registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    registry.shutdown().await;

    let stats = storage.stats();
    info!(
        "👋 Bot detenido ({} artefactos borrados, {} ya no existían, {} fallos)",
        stats.removed, stats.missing, stats.failed
    );
    Ok(())
}
