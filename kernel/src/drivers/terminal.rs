//! Terminal geometry/state shared by whichever console frontend is active.
//!
//! The framebuffer renderer that would actually draw glyphs is a named
//! external boundary; this just holds the dimensions and cursor state a
//! renderer (or `fs::pty`'s `Winsize`) would read, so `console::init` has
//! somewhere to park it before the console backend comes up.

use spin::Mutex;

use crate::sync::once_lock::GlobalState;

#[derive(Debug, Clone, Copy)]
pub struct TerminalState {
    pub rows: u16,
    pub cols: u16,
    pub cursor_row: u16,
    pub cursor_col: u16,
}

impl Default for TerminalState {
    fn default() -> Self {
        Self { rows: 24, cols: 80, cursor_row: 0, cursor_col: 0 }
    }
}

static TERMINAL: GlobalState<Mutex<TerminalState>> = GlobalState::new();

pub fn init() {
    if TERMINAL.init(Mutex::new(TerminalState::default())).is_err() {
        log::warn!("terminal: already initialized");
    }
}

pub fn state() -> TerminalState {
    TERMINAL.with(|lock| *lock.lock()).unwrap_or_default()
}

pub fn advance_cursor(rows_down: u16, cols_right: u16) {
    TERMINAL.with(|lock| {
        let mut state = lock.lock();
        state.cursor_row = (state.cursor_row + rows_down).min(state.rows.saturating_sub(1));
        state.cursor_col = (state.cursor_col + cols_right).min(state.cols.saturating_sub(1));
    });
}
