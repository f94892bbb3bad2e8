//! Bracketed-paste framing for pastes and uploaded paths.
//!
//! A frame is sent as two independent writes: `START + payload`, then `END`
//! after a short delay. Some transports re-chunk whatever is sitting in
//! their input buffer, and an end marker split across two chunks is not
//! recognized by the remote line editor. The session performs the two
//! writes; this module only builds them.

/// `ESC [ 200 ~`
pub const START_MARKER: &[u8] = b"\x1b[200~";

/// `ESC [ 201 ~`
pub const END_MARKER: &[u8] = b"\x1b[201~";

/// Stand-in for ESC inside bracketed text (SYMBOL FOR ESCAPE).
pub const ESCAPE_REPLACEMENT: char = '\u{241b}';

/// The two writes of one bracketed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketedFrame {
    opening: Vec<u8>,
}

impl BracketedFrame {
    /// Frame a payload that is already safe to send.
    pub fn new(payload: &[u8]) -> Self {
        let mut opening = Vec::with_capacity(START_MARKER.len() + payload.len());
        opening.extend_from_slice(START_MARKER);
        opening.extend_from_slice(payload);
        Self { opening }
    }

    /// Frame a list of paths (or other tokens) as the shell should see them.
    pub fn paths<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(join_tokens(tokens).as_bytes())
    }

    /// Frame pasted text, normalizing line endings and neutralizing ESC.
    pub fn text(text: &str) -> Self {
        Self::new(sanitize_bracketed(&normalize_newlines(text)).as_bytes())
    }

    /// First write: start marker followed by the payload.
    pub fn opening(&self) -> &[u8] {
        &self.opening
    }

    /// Second write: the end marker alone.
    pub fn closing(&self) -> &'static [u8] {
        END_MARKER
    }

    pub fn payload(&self) -> &[u8] {
        &self.opening[START_MARKER.len()..]
    }
}

/// Quote a token if it contains a space.
pub fn quote_token(token: &str) -> String {
    if token.contains(' ') {
        format!("\"{token}\"")
    } else {
        token.to_string()
    }
}

/// Space-join tokens, quoting as needed, with one trailing space so the
/// cursor ends up ready for the next argument.
pub fn join_tokens<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let quoted: Vec<String> = tokens
        .into_iter()
        .map(|token| quote_token(token.as_ref()))
        .collect();
    format!("{} ", quoted.join(" "))
}

/// Terminals send Enter as CR, so pasted line endings become CR too.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\r").replace('\n', "\r")
}

/// Replace every ESC so the payload cannot end bracket mode early.
pub fn sanitize_bracketed(text: &str) -> String {
    text.replace('\x1b', &ESCAPE_REPLACEMENT.to_string())
}
