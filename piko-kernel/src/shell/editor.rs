//! Line editor: byte-at-a-time editing with echo, a 16-entry history
//! walked by the arrow keys, and tab completion over the command table.
//!
//! Pure logic over an output sink, so the whole state machine (including
//! the ANSI CSI parsing for the arrows) unit-tests on the host; the shell
//! feeds it UART bytes and a console writer.

use alloc::collections::VecDeque;
use alloc::string::String;
use core::fmt::Write;

/// Entries kept in the history ring.
pub const HISTORY_MAX: usize = 16;

/// Escape-sequence parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Esc {
    Idle,
    Esc,
    Csi,
}

/// The editor: current line, cursor, history and the in-progress line
/// saved while browsing history.
pub struct LineEditor {
    buf: String,
    cursor: usize,
    history: VecDeque<String>,
    /// Position while browsing history: 0 = most recent entry.
    hist_pos: Option<usize>,
    saved: String,
    esc: Esc,
}

impl LineEditor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            cursor: 0,
            history: VecDeque::new(),
            hist_pos: None,
            saved: String::new(),
            esc: Esc::Idle,
        }
    }

    /// History entries, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// Feed one input byte. Echo and control output go to `out`; when the
    /// byte completes a line it is returned (empty for Ctrl-C).
    pub fn input<W: Write>(
        &mut self,
        byte: u8,
        commands: &[&str],
        prompt: &str,
        out: &mut W,
    ) -> Option<String> {
        match self.esc {
            Esc::Esc => {
                self.esc = if byte == b'[' { Esc::Csi } else { Esc::Idle };
                return None;
            }
            Esc::Csi => {
                // Parameter bytes keep the sequence open; the final byte
                // selects the action.
                if (0x30..=0x3F).contains(&byte) {
                    return None;
                }
                self.esc = Esc::Idle;
                match byte {
                    b'A' => self.history_up(prompt, out),
                    b'B' => self.history_down(prompt, out),
                    b'C' => self.cursor_right(out),
                    b'D' => self.cursor_left(out),
                    _ => {}
                }
                return None;
            }
            Esc::Idle => {}
        }

        match byte {
            0x1B => {
                self.esc = Esc::Esc;
                None
            }
            b'\r' | b'\n' => Some(self.finish(out)),
            0x03 => {
                // Ctrl-C: drop the line, yield an empty one.
                let _ = out.write_str("^C\n");
                self.buf.clear();
                self.cursor = 0;
                self.hist_pos = None;
                Some(String::new())
            }
            0x7F | 0x08 => {
                self.backspace(prompt, out);
                None
            }
            0x15 => {
                // Ctrl-U: erase from the line start to the cursor.
                if self.cursor > 0 {
                    self.buf.drain(..self.cursor);
                    self.cursor = 0;
                    self.redraw(prompt, out);
                }
                None
            }
            0x01 => {
                // Ctrl-A: cursor home.
                if self.cursor > 0 {
                    let _ = write!(out, "\x1b[{}D", self.cursor);
                    self.cursor = 0;
                }
                None
            }
            0x0C => {
                // Ctrl-L: clear screen, reprint the line.
                let _ = out.write_str("\x1b[2J\x1b[H");
                self.redraw(prompt, out);
                None
            }
            b'\t' => {
                self.complete(commands, prompt, out);
                None
            }
            0x20..=0x7E => {
                self.insert(byte as char, prompt, out);
                None
            }
            _ => None,
        }
    }

    fn finish<W: Write>(&mut self, out: &mut W) -> String {
        let _ = out.write_str("\n");
        let line = core::mem::take(&mut self.buf);
        self.cursor = 0;
        self.hist_pos = None;
        if !line.trim().is_empty() && self.history.front().map(String::as_str) != Some(&line) {
            self.history.push_front(line.clone());
            self.history.truncate(HISTORY_MAX);
        }
        line
    }

    fn insert<W: Write>(&mut self, c: char, prompt: &str, out: &mut W) {
        if self.cursor == self.buf.len() {
            self.buf.push(c);
            self.cursor += 1;
            let mut tmp = [0u8; 4];
            let _ = out.write_str(c.encode_utf8(&mut tmp));
        } else {
            self.buf.insert(self.cursor, c);
            self.cursor += 1;
            self.redraw(prompt, out);
        }
    }

    fn backspace<W: Write>(&mut self, prompt: &str, out: &mut W) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        self.buf.remove(self.cursor);
        if self.cursor == self.buf.len() {
            let _ = out.write_str("\x08 \x08");
        } else {
            self.redraw(prompt, out);
        }
    }

    fn cursor_left<W: Write>(&mut self, out: &mut W) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let _ = out.write_str("\x1b[D");
        }
    }

    fn cursor_right<W: Write>(&mut self, out: &mut W) {
        if self.cursor < self.buf.len() {
            self.cursor += 1;
            let _ = out.write_str("\x1b[C");
        }
    }

    fn history_up<W: Write>(&mut self, prompt: &str, out: &mut W) {
        if self.history.is_empty() {
            return;
        }
        let pos = match self.hist_pos {
            None => {
                self.saved = core::mem::take(&mut self.buf);
                0
            }
            Some(p) => (p + 1).min(self.history.len() - 1),
        };
        self.hist_pos = Some(pos);
        self.buf = self.history[pos].clone();
        self.cursor = self.buf.len();
        self.redraw(prompt, out);
    }

    fn history_down<W: Write>(&mut self, prompt: &str, out: &mut W) {
        match self.hist_pos {
            None => {}
            Some(0) => {
                // Past the newest entry: back to the in-progress line.
                self.hist_pos = None;
                self.buf = core::mem::take(&mut self.saved);
                self.cursor = self.buf.len();
                self.redraw(prompt, out);
            }
            Some(p) => {
                self.hist_pos = Some(p - 1);
                self.buf = self.history[p - 1].clone();
                self.cursor = self.buf.len();
                self.redraw(prompt, out);
            }
        }
    }

    /// Tab completion over the command table; only the command word (no
    /// spaces yet, cursor at the end) completes.
    fn complete<W: Write>(&mut self, commands: &[&str], prompt: &str, out: &mut W) {
        if self.buf.is_empty() || self.cursor != self.buf.len() || self.buf.contains(' ') {
            return;
        }

        let mut matches = commands.iter().filter(|c| c.starts_with(self.buf.as_str()));
        let Some(first) = matches.next() else { return };

        if matches.clone().next().is_none() {
            // Unique: complete and add the separating space.
            let rest = &first[self.buf.len()..];
            let _ = out.write_str(rest);
            let _ = out.write_str(" ");
            self.buf.push_str(rest);
            self.buf.push(' ');
            self.cursor = self.buf.len();
            return;
        }

        // Ambiguous: extend to the longest common prefix, or list.
        let mut common = *first;
        for m in matches.clone() {
            while !m.starts_with(common) {
                common = &common[..common.len() - 1];
            }
        }
        if common.len() > self.buf.len() {
            let rest = &common[self.buf.len()..];
            let _ = out.write_str(rest);
            self.buf.push_str(rest);
            self.cursor = self.buf.len();
        } else {
            let _ = out.write_str("\n");
            let _ = out.write_str(first);
            for m in matches {
                let _ = write!(out, "  {}", m);
            }
            let _ = out.write_str("\n");
            self.redraw(prompt, out);
        }
    }

    /// Erase the terminal line and reprint prompt, buffer and cursor.
    fn redraw<W: Write>(&self, prompt: &str, out: &mut W) {
        let _ = write!(out, "\r\x1b[2K{}{}", prompt, self.buf);
        let back = self.buf.len() - self.cursor;
        if back > 0 {
            let _ = write!(out, "\x1b[{}D", back);
        }
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMDS: &[&str] = &["cat", "cd", "clear", "help", "mem", "memtest", "mkdir"];

    fn feed(ed: &mut LineEditor, bytes: &[u8]) -> (Vec<String>, String) {
        let mut lines = Vec::new();
        let mut out = String::new();
        for &b in bytes {
            if let Some(line) = ed.input(b, CMDS, "> ", &mut out) {
                lines.push(line);
            }
        }
        (lines, out)
    }

    #[test]
    fn plain_line_echoes_and_returns() {
        let mut ed = LineEditor::new();
        let (lines, out) = feed(&mut ed, b"help\r");
        assert_eq!(lines, vec!["help"]);
        assert!(out.starts_with("help"));
    }

    #[test]
    fn backspace_edits_the_buffer() {
        let mut ed = LineEditor::new();
        let (lines, _) = feed(&mut ed, b"hellp\x7Fo\r");
        assert_eq!(lines, vec!["hello"]);
    }

    #[test]
    fn backspace_at_start_is_ignored() {
        let mut ed = LineEditor::new();
        let (lines, _) = feed(&mut ed, b"\x7F\x7Fok\r");
        assert_eq!(lines, vec!["ok"]);
    }

    #[test]
    fn ctrl_c_yields_empty_line() {
        let mut ed = LineEditor::new();
        let (lines, out) = feed(&mut ed, b"doomed\x03");
        assert_eq!(lines, vec![""]);
        assert!(out.contains("^C"));
        // The cancelled text is gone.
        let (lines, _) = feed(&mut ed, b"next\r");
        assert_eq!(lines, vec!["next"]);
    }

    #[test]
    fn ctrl_u_erases_to_line_start() {
        let mut ed = LineEditor::new();
        let (lines, _) = feed(&mut ed, b"garbage\x15fine\r");
        assert_eq!(lines, vec!["fine"]);
    }

    #[test]
    fn cursor_movement_inserts_mid_line() {
        let mut ed = LineEditor::new();
        // "hllo", three lefts to just after 'h', insert the missing 'e'.
        let (lines, _) = feed(&mut ed, b"hllo\x1b[D\x1b[D\x1b[De\r");
        assert_eq!(lines, vec!["hello"]);
    }

    #[test]
    fn ctrl_a_then_type_prepends() {
        let mut ed = LineEditor::new();
        let (lines, _) = feed(&mut ed, b"dir\x01mk\r");
        assert_eq!(lines, vec!["mkdir"]);
    }

    #[test]
    fn history_recalls_most_recent_first() {
        let mut ed = LineEditor::new();
        feed(&mut ed, b"first\rsecond\rthird\r");
        // Up once: third (most recent).
        let (lines, _) = feed(&mut ed, b"\x1b[A\r");
        assert_eq!(lines, vec!["third"]);
        // Up three times walks back to the first command.
        let (lines, _) = feed(&mut ed, b"\x1b[A\x1b[A\x1b[A\r");
        assert_eq!(lines, vec!["first"]);
    }

    #[test]
    fn history_up_stops_at_oldest() {
        let mut ed = LineEditor::new();
        feed(&mut ed, b"only\r");
        let (lines, _) = feed(&mut ed, b"\x1b[A\x1b[A\x1b[A\r");
        assert_eq!(lines, vec!["only"]);
    }

    #[test]
    fn history_down_restores_in_progress_line() {
        let mut ed = LineEditor::new();
        feed(&mut ed, b"old\r");
        // Start typing, browse up, come back down: the draft survives.
        let (lines, _) = feed(&mut ed, b"dra\x1b[A\x1b[Bft\r");
        assert_eq!(lines, vec!["draft"]);
    }

    #[test]
    fn duplicate_history_entries_collapse() {
        let mut ed = LineEditor::new();
        feed(&mut ed, b"same\rsame\rsame\r");
        assert_eq!(ed.history().count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut ed = LineEditor::new();
        for i in 0..HISTORY_MAX + 5 {
            let mut cmd = format!("cmd{i}");
            cmd.push('\r');
            feed(&mut ed, cmd.as_bytes());
        }
        assert_eq!(ed.history().count(), HISTORY_MAX);
        // The newest entry survives, the oldest have been dropped.
        assert_eq!(ed.history().next(), Some("cmd20"));
    }

    #[test]
    fn blank_lines_stay_out_of_history() {
        let mut ed = LineEditor::new();
        feed(&mut ed, b"\r   \rreal\r");
        assert_eq!(ed.history().count(), 1);
    }

    #[test]
    fn unique_completion_appends_remainder() {
        let mut ed = LineEditor::new();
        let (lines, out) = feed(&mut ed, b"he\t\r");
        assert_eq!(lines, vec!["help "]);
        assert!(out.contains("lp "));
    }

    #[test]
    fn ambiguous_completion_extends_common_prefix() {
        let mut ed = LineEditor::new();
        // "me" extends to "mem" (mem, memtest share it) without a space.
        let (lines, _) = feed(&mut ed, b"me\t\r");
        assert_eq!(lines, vec!["mem"]);
    }

    #[test]
    fn fully_ambiguous_completion_lists_candidates() {
        let mut ed = LineEditor::new();
        let (lines, out) = feed(&mut ed, b"c\ta\r");
        // "c" first extends to the common prefix... there is none beyond
        // "c", so the candidates are listed and the buffer is unchanged.
        assert_eq!(lines, vec!["ca"]);
        assert!(out.contains("cat"));
        assert!(out.contains("cd"));
        assert!(out.contains("clear"));
    }

    #[test]
    fn completion_leaves_arguments_alone() {
        let mut ed = LineEditor::new();
        let (lines, _) = feed(&mut ed, b"cat fi\tle\r");
        assert_eq!(lines, vec!["cat file"]);
    }
}
