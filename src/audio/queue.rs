use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, UserId};
use std::collections::VecDeque;
use tracing::info;

use crate::error::MusicError;

/// Quién pidió la canción y dónde anunciarla.
#[derive(Debug, Clone, PartialEq)]
pub struct Requester {
    pub user_id: UserId,
    pub user_name: String,
    pub text_channel: ChannelId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedRequest {
    pub query: String,
    pub requester: Requester,
    pub requested_at: DateTime<Utc>,
}

impl QueuedRequest {
    pub fn new(query: impl Into<String>, requester: Requester) -> Self {
        Self {
            query: query.into(),
            requester,
            requested_at: Utc::now(),
        }
    }
}

/// Cola de peticiones pendientes: FIFO estricto, sin prioridades ni deduplicación.
#[derive(Debug)]
pub struct RequestQueue {
    items: VecDeque<QueuedRequest>,
    max_size: usize,
}

impl RequestQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega una petición al final y devuelve su posición (1 = la siguiente).
    pub fn push(&mut self, request: QueuedRequest) -> Result<usize, MusicError> {
        if self.items.len() >= self.max_size {
            return Err(MusicError::QueueFull(self.max_size));
        }

        info!("➕ Agregado a la cola: {}", request.query);
        self.items.push_back(request);
        Ok(self.items.len())
    }

    /// Obtiene la siguiente petición (FIFO - First In, First Out)
    pub fn pop(&mut self) -> Option<QueuedRequest> {
        let next = self.items.pop_front();
        match &next {
            Some(item) => info!("➡️ Siguiente en cola (FIFO): {}", item.query),
            None => info!("📭 Cola vacía, no hay siguiente track"),
        }
        next
    }

    /// Limpia la cola
    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        if removed > 0 {
            info!("🗑️ Cola limpiada ({} canciones)", removed);
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.items.iter()
    }
}
