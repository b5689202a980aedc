//! # Audio Module
//!
//! Reproducción de una cola por servidor.
//!
//! ## Arquitectura
//!
//! ### [`coordinator`] - Queue Coordinator
//! - Tarea única por servidor: dueña de la cola, la pista actual y el loop
//! - Decide qué suena después de cada fin de pista
//!
//! ### [`queue`] - Cola de peticiones
//! - FIFO estricto, sin prioridades ni deduplicación
//!
//! ### [`session`] - Playback Session
//! - Máquina de estados del transporte (Idle, Playing, Paused)
//! - Trait [`session::VoiceConnection`] como frontera con la plataforma de voz
//!
//! ### [`voice`] - Songbird
//! - Implementación de la conexión de voz sobre songbird
//!
//! ### [`registry`] - Registro por servidor
//! - Crea coordinadores bajo demanda y los cancela al cerrar

pub mod coordinator;
pub mod queue;
pub mod registry;
pub mod session;
pub mod voice;
