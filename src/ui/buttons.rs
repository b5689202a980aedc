use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

use crate::audio::{coordinator::PlaybackSnapshot, session::TransportState};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PLAY: &str = "music_play";
    pub const PAUSE: &str = "music_pause";
    pub const STOP: &str = "music_stop";
    pub const SKIP: &str = "music_skip";
    pub const LOOP: &str = "music_loop";
}

/// Acción de un botón del reproductor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Resume,
    Pause,
    Stop,
    Skip,
    ToggleLoop,
}

impl ControlAction {
    pub fn from_custom_id(id: &str) -> Option<Self> {
        match id {
            button_ids::PLAY => Some(Self::Resume),
            button_ids::PAUSE => Some(Self::Pause),
            button_ids::STOP => Some(Self::Stop),
            button_ids::SKIP => Some(Self::Skip),
            button_ids::LOOP => Some(Self::ToggleLoop),
            _ => None,
        }
    }
}

/// Crea los controles del reproductor a partir del estado actual.
///
/// Los botones no guardan estado propio: cada pulsación se resuelve contra el
/// coordinador del servidor, así que un mensaje viejo sigue funcionando.
pub fn player_controls(snapshot: &PlaybackSnapshot) -> Vec<CreateActionRow> {
    let paused = snapshot.transport == TransportState::Paused;
    let active = !snapshot.is_idle();

    let play_btn = CreateButton::new(button_ids::PLAY)
        .label("Play")
        .emoji('▶')
        .style(if paused {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        });

    let pause_btn = CreateButton::new(button_ids::PAUSE)
        .label("Pause")
        .emoji('⏸')
        .style(ButtonStyle::Primary);

    let stop_btn = CreateButton::new(button_ids::STOP)
        .label("Stop")
        .emoji('⏹')
        .style(ButtonStyle::Danger);

    let skip_btn = CreateButton::new(button_ids::SKIP)
        .label("Skip")
        .emoji('⏭')
        .style(ButtonStyle::Secondary)
        .disabled(!active);

    let loop_btn = CreateButton::new(button_ids::LOOP)
        .label("Loop")
        .emoji('🔁')
        .style(if snapshot.loop_enabled {
            ButtonStyle::Success
        } else {
            ButtonStyle::Secondary
        });

    vec![CreateActionRow::Buttons(vec![
        play_btn, pause_btn, stop_btn, skip_btn, loop_btn,
    ])]
}
