//! Tracks whether the remote application has bracketed paste enabled.
//!
//! Applications turn the mode on with `CSI ? 2004 h` and off with
//! `CSI ? 2004 l`. The output stream arrives in arbitrary chunks, so the
//! sequences are recognized with a stateful `vte` parser rather than by
//! searching each chunk.

use vte::{Params, Parser, Perform};

const BRACKETED_PASTE: u16 = 2004;

pub struct PasteModeTracker {
    parser: Parser,
    mode: ModeState,
}

#[derive(Default)]
struct ModeState {
    bracketed: bool,
}

impl Perform for ModeState {
    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        if ignore || intermediates != b"?" {
            return;
        }
        let enable = match action {
            'h' => true,
            'l' => false,
            _ => return,
        };
        // A single sequence may toggle several private modes at once.
        if params.iter().any(|param| param.first() == Some(&BRACKETED_PASTE)) {
            self.bracketed = enable;
        }
    }
}

impl PasteModeTracker {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            mode: ModeState::default(),
        }
    }

    /// Feed a chunk of transport output.
    pub fn advance(&mut self, bytes: &[u8]) {
        self.parser.advance(&mut self.mode, bytes);
    }

    pub fn bracketed(&self) -> bool {
        self.mode.bracketed
    }

    /// Forget everything; used when a new transport starts.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for PasteModeTracker {
    fn default() -> Self {
        Self::new()
    }
}
