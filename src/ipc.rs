//! Newline-delimited JSON message parsing for worker IPC channels.
//!
//! Workers write one JSON document per line to their IPC descriptor
//! (fd 3 for command workers, the socket pair for closure workers).
//! Reads arrive as raw byte chunks; each worker keeps a carry buffer so
//! a line split across two reads is reassembled rather than dropped.
//! Malformed lines are discarded without disturbing later ones.

use serde_json::Value;
use tracing::trace;

/// Append `incoming` to the worker's carry buffer and decode every
/// complete line. The trailing partial line, if any, stays buffered.
///
/// Empty lines are skipped. Lines that fail to parse as JSON are dropped.
pub(crate) fn extract_messages(buf: &mut Vec<u8>, incoming: &[u8]) -> Vec<Value> {
    buf.extend_from_slice(incoming);

    let mut out = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        // strip the newline and an optional carriage return
        let mut end = line.len() - 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }
        let line = &line[..end];
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }
        match serde_json::from_slice::<Value>(line) {
            Ok(value) => out.push(value),
            Err(error) => {
                trace!(%error, len = line.len(), "dropping malformed IPC line");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_each_line_in_order() {
        let mut buf = Vec::new();
        let msgs = extract_messages(&mut buf, b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n");
        assert_eq!(msgs, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        assert!(buf.is_empty());
    }

    #[test]
    fn buffers_partial_trailing_line_across_reads() {
        let mut buf = Vec::new();
        let msgs = extract_messages(&mut buf, b"{\"hello\":");
        assert!(msgs.is_empty());
        assert!(!buf.is_empty());

        let msgs = extract_messages(&mut buf, b"\"world\"}\n");
        assert_eq!(msgs, vec![json!({"hello": "world"})]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drops_malformed_lines_and_keeps_going() {
        let mut buf = Vec::new();
        let msgs = extract_messages(&mut buf, b"bad\n{\"ok\":1}\n{not json}\n{\"ok\":2}\n");
        assert_eq!(msgs, vec![json!({"ok": 1}), json!({"ok": 2})]);
    }

    #[test]
    fn skips_empty_and_whitespace_lines() {
        let mut buf = Vec::new();
        let msgs = extract_messages(&mut buf, b"\n   \n{\"ok\":true}\n\n");
        assert_eq!(msgs, vec![json!({"ok": true})]);
    }

    #[test]
    fn trims_carriage_returns() {
        let mut buf = Vec::new();
        let msgs = extract_messages(&mut buf, b"{\"crlf\":1}\r\n");
        assert_eq!(msgs, vec![json!({"crlf": 1})]);
    }

    #[test]
    fn scalars_and_arrays_pass_through() {
        let mut buf = Vec::new();
        let msgs = extract_messages(&mut buf, b"42\n[1,2]\n\"str\"\n");
        assert_eq!(msgs, vec![json!(42), json!([1, 2]), json!("str")]);
    }
}
