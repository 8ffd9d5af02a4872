//! Resume-command extraction.
//!
//! The host announces how a finished Codex conversation can be continued by
//! printing a resume command (for example `codex resume --yolo deadbeef`),
//! sometimes wrapped in an OSC 8 hyperlink so terminals render it clickable.
//! This module scans decoded output for that announcement and produces a
//! canonical handle for persistence. Extraction is pure and idempotent;
//! persisting the handle is the pane controller's concern.

use std::sync::OnceLock;

use panesync_protocol::ResumeHandle;
use regex_lite::Regex;

/// Tool whose `resume` subcommand is recognized.
const RESUME_TOOL: &str = "codex";
const RESUME_SUBCOMMAND: &str = "resume";

/// Flags whose value designates the session identifier, in priority order.
/// When none of these appears the last bare token wins.
const SESSION_FLAGS: [&str; 4] = ["--session-id", "--session", "--id", "-s"];

/// Builds the command line that resumes the session named by `identifier`,
/// the inverse of [`extract_resume_command`] for the bare-identifier form.
pub fn resume_command_for(identifier: &str) -> String {
    format!("{RESUME_TOOL} {RESUME_SUBCOMMAND} {identifier}")
}

fn csi_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\[[0-9;:?]*[ -/]*[@-~]").ok())
        .as_ref()
}

fn osc_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").ok())
        .as_ref()
}

/// Removes CSI sequences and OSC wrappers (including their terminators) so a
/// hyperlink-wrapped announcement matches the plain-text pattern.
pub fn strip_escape_sequences(chunk: &str) -> String {
    let mut out = chunk.to_string();
    if let Some(re) = osc_regex() {
        out = re.replace_all(&out, "").into_owned();
    }
    if let Some(re) = csi_regex() {
        out = re.replace_all(&out, "").into_owned();
    }
    // Orphaned terminators remain when the opener sat in an earlier chunk or
    // the sequence was empty; a dangling `ESC \` would also read as a trailing
    // backslash to the tokenizer.
    out.replace("\u{1b}\\", "").replace('\u{1b}', "")
}

/// Scans `chunk` for a resume-command announcement and returns the canonical
/// handle, or `None` when no complete command is present.
pub fn extract_resume_command(chunk: &str) -> Option<ResumeHandle> {
    let stripped = strip_escape_sequences(chunk);
    // Scan newest-first: a reprinted banner may carry a stale handle above a
    // fresher one.
    for line in stripped.lines().rev() {
        if let Some(handle) = extract_from_line(line) {
            return Some(handle);
        }
    }
    None
}

fn extract_from_line(line: &str) -> Option<ResumeHandle> {
    // Prose lines with an unmatched quote (apostrophes, mostly) make shlex
    // bail; plain whitespace splitting is good enough for those.
    let tokens = shlex::split(line)
        .unwrap_or_else(|| line.split_whitespace().map(str::to_string).collect());
    let tool_idx = tokens.iter().position(|token| {
        // Announcements quoted in prose keep their backticks attached.
        let cleaned = normalize(token);
        let name = cleaned.rsplit(['/', '\\']).next().unwrap_or(&cleaned);
        name == RESUME_TOOL
    })?;
    if tokens
        .get(tool_idx + 1)
        .map(|token| normalize(token))
        .as_deref()
        != Some(RESUME_SUBCOMMAND)
    {
        return None;
    }

    let args = &tokens[tool_idx + 2..];
    let identifier = session_identifier(args)?;
    let raw_command = tokens[tool_idx..]
        .iter()
        .map(|token| normalize(token))
        .collect::<Vec<_>>()
        .join(" ");
    Some(ResumeHandle {
        raw_command,
        session_identifier: identifier,
    })
}

fn session_identifier(args: &[String]) -> Option<String> {
    for flag in SESSION_FLAGS {
        for (idx, token) in args.iter().enumerate() {
            if token == flag {
                if let Some(value) = args.get(idx + 1)
                    && !value.starts_with('-')
                {
                    return Some(normalize(value));
                }
            } else if let Some(value) = token
                .strip_prefix(flag)
                .and_then(|rest| rest.strip_prefix('='))
            {
                return Some(normalize(value));
            }
        }
    }

    // No allow-listed flag: fall back to the last bare token.
    args.iter()
        .rev()
        .find(|token| !token.starts_with('-') && !token.is_empty())
        .map(|token| normalize(token))
}

fn normalize(raw: &str) -> String {
    raw.trim_matches(|c: char| matches!(c, '.' | ',' | '`' | '\'' | '"'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hyperlink_wrapped_command_is_extracted() {
        let chunk = "\u{1b}]8;;https://x\u{7}codex resume --yolo deadbeef\u{1b}\\";
        let handle = extract_resume_command(chunk).expect("handle");
        assert_eq!(handle.session_identifier, "deadbeef");
        assert_eq!(handle.raw_command, "codex resume --yolo deadbeef");
    }

    #[test]
    fn plain_text_without_announcement_yields_none() {
        assert!(extract_resume_command("ls -la\ntotal 0\n").is_none());
        assert!(extract_resume_command("codex --help\n").is_none());
    }

    #[test]
    fn flag_assignment_form_wins_over_trailing_tokens() {
        let handle = extract_resume_command("run: codex resume --session-id=abc-123 --force now\n")
            .expect("handle");
        assert_eq!(handle.session_identifier, "abc-123");
    }

    #[test]
    fn allow_listed_flag_with_separate_value() {
        let handle =
            extract_resume_command("codex resume --session 0199a213-81ac\n").expect("handle");
        assert_eq!(handle.session_identifier, "0199a213-81ac");
    }

    #[test]
    fn falls_back_to_last_bare_token() {
        let handle =
            extract_resume_command("To continue, run `codex resume --yolo deadbeef`.\n")
                .expect("handle");
        assert_eq!(handle.session_identifier, "deadbeef");
    }

    #[test]
    fn csi_colored_announcement_is_extracted() {
        let chunk = "\u{1b}[1;32mcodex resume --id cafe42\u{1b}[0m\n";
        let handle = extract_resume_command(chunk).expect("handle");
        assert_eq!(handle.session_identifier, "cafe42");
    }

    #[test]
    fn absolute_tool_path_is_recognized() {
        let handle =
            extract_resume_command("/usr/local/bin/codex resume feedbead\n").expect("handle");
        assert_eq!(handle.session_identifier, "feedbead");
        assert!(handle.raw_command.starts_with("/usr/local/bin/codex resume"));
    }

    #[test]
    fn orphaned_string_terminator_does_not_block_extraction() {
        // Terminator without an opener, as when a hyperlink spans chunks.
        let chunk = "codex resume --id cafe42\u{1b}\\\n";
        let handle = extract_resume_command(chunk).expect("handle");
        assert_eq!(handle.session_identifier, "cafe42");
        assert_eq!(handle.raw_command, "codex resume --id cafe42");
    }

    #[test]
    fn prose_with_an_apostrophe_still_tokenizes() {
        let handle = extract_resume_command("don't forget: codex resume abc99\n")
            .expect("handle");
        assert_eq!(handle.session_identifier, "abc99");
        assert_eq!(handle.raw_command, "codex resume abc99");
    }

    #[test]
    fn newest_announcement_wins() {
        let chunk = "codex resume old111\nsome output\ncodex resume new222\n";
        let handle = extract_resume_command(chunk).expect("handle");
        assert_eq!(handle.session_identifier, "new222");
    }

    #[test]
    fn extraction_is_idempotent() {
        let chunk = "codex resume --session-id=abc-123\n";
        let first = extract_resume_command(chunk).expect("first");
        let second = extract_resume_command(chunk).expect("second");
        assert_eq!(first, second);
    }
}
