//! Local-input echo suppression.
//!
//! A pane may render a keystroke optimistically and also receive the host's
//! echo of that same keystroke; only one rendering must survive. Each pane
//! gets a bounded FIFO of the bytes it most recently sent as input, consumed
//! greedily against incoming output to strip a single echoed occurrence.

use std::collections::HashMap;
use std::collections::VecDeque;

use panesync_protocol::PaneId;

/// Cap on buffered input per pane; oldest chars are evicted first.
pub const ECHO_BUFFER_MAX_CHARS: usize = 4096;

/// Registry of per-pane echo buffers. All mutation happens from the owning
/// pane's reconciliation path, serialized by the caller.
#[derive(Debug, Default)]
pub struct EchoSuppressor {
    buffers: HashMap<PaneId, VecDeque<char>>,
}

impl EchoSuppressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records text the pane just sent as user input. Input is recorded even
    /// when it will never be forwarded, so a later host echo still matches.
    pub fn record_input(&mut self, pane: PaneId, text: &str) {
        let buffer = self.buffers.entry(pane).or_default();
        buffer.extend(text.chars());
        while buffer.len() > ECHO_BUFFER_MAX_CHARS {
            buffer.pop_front();
        }
    }

    /// Walks the pane's buffer and `incoming` in lockstep and returns the
    /// unconsumed suffix of `incoming` to actually render.
    ///
    /// A matching char advances both sides. A CR/LF on either side is
    /// skipped without requiring a counterpart, because line-ending
    /// normalization differs between local echo and host echo. Any other
    /// mismatch stops the walk. With an empty buffer this is the identity.
    pub fn consume(&mut self, pane: PaneId, incoming: &str) -> String {
        let Some(buffer) = self.buffers.get_mut(&pane) else {
            return incoming.to_string();
        };
        if buffer.is_empty() {
            return incoming.to_string();
        }

        let chars: Vec<char> = incoming.chars().collect();
        let mut idx = 0;
        loop {
            match (buffer.front().copied(), chars.get(idx).copied()) {
                (None, _) => break,
                (Some(buffered), Some(inbound)) if buffered == inbound => {
                    buffer.pop_front();
                    idx += 1;
                }
                (Some('\r' | '\n'), _) => {
                    buffer.pop_front();
                }
                (Some(_), Some('\r' | '\n')) => {
                    idx += 1;
                }
                _ => break,
            }
        }

        chars[idx..].iter().collect()
    }

    /// Drops all state for an unmounted pane.
    pub fn remove_pane(&mut self, pane: PaneId) {
        self.buffers.remove(&pane);
    }

    pub fn pending_len(&self, pane: PaneId) -> usize {
        self.buffers.get(&pane).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_echo_is_fully_consumed() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        echo.record_input(pane, "ls\n");
        assert_eq!(echo.consume(pane, "ls\n"), "");
        assert_eq!(echo.pending_len(pane), 0);
    }

    #[test]
    fn empty_buffer_is_identity() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        assert_eq!(echo.consume(pane, "unrelated output"), "unrelated output");
    }

    #[test]
    fn crlf_difference_still_consumes() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        echo.record_input(pane, "ls\r\n");
        assert_eq!(echo.consume(pane, "ls\n"), "");
        assert_eq!(echo.pending_len(pane), 0);
    }

    #[test]
    fn mismatch_stops_the_walk_and_keeps_the_rest() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        echo.record_input(pane, "git status\n");
        // Host echoed only "git s" before interleaving other output.
        assert_eq!(echo.consume(pane, "git som"), "om");
        // "git s" matched and was removed; "tatus\n" is still pending.
        assert_eq!(echo.pending_len(pane), "tatus\n".len());
    }

    #[test]
    fn echo_split_across_chunks_is_consumed_incrementally() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        echo.record_input(pane, "echo hi\n");
        assert_eq!(echo.consume(pane, "echo "), "");
        assert_eq!(echo.consume(pane, "hi\nhi\n"), "hi\n");
        assert_eq!(echo.pending_len(pane), 0);
    }

    #[test]
    fn buffer_is_capped_at_limit() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        let long = "x".repeat(ECHO_BUFFER_MAX_CHARS + 100);
        echo.record_input(pane, &long);
        assert_eq!(echo.pending_len(pane), ECHO_BUFFER_MAX_CHARS);
    }

    #[test]
    fn remove_pane_clears_state() {
        let mut echo = EchoSuppressor::new();
        let pane = PaneId::new();
        echo.record_input(pane, "ls\n");
        echo.remove_pane(pane);
        assert_eq!(echo.consume(pane, "ls\n"), "ls\n");
    }
}
