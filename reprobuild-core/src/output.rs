//! Bounded capture of subprocess output.

use std::io::Read;

/// Per-stream cap on captured subprocess output.
pub const OUTPUT_TAIL_LIMIT: usize = 16 * 1024;

/// Drain `reader` completely, keeping only the last `limit` bytes.
pub(crate) fn read_tail<R: Read>(mut reader: R, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        tail.extend_from_slice(&buf[..n]);
        if tail.len() > limit.saturating_mul(2) {
            let cut = tail.len() - limit;
            tail.drain(..cut);
        }
    }
    if tail.len() > limit {
        let cut = tail.len() - limit;
        tail.drain(..cut);
    }
    Ok(tail)
}

/// Keep the last `limit` bytes of `text`, starting on a char boundary.
pub fn truncate_tail(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Diagnostic tail recorded for a failed invocation: stderr first, then
/// stdout, bounded to `limit` bytes. `None` when both are blank.
pub fn failure_tail(stderr: &str, stdout: &str, limit: usize) -> Option<String> {
    let stderr = stderr.trim_end();
    let stdout = stdout.trim_end();
    let combined = match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => return None,
        (false, true) => stderr.to_string(),
        (true, false) => stdout.to_string(),
        (false, false) => format!("{stderr}\n--- stdout ---\n{stdout}"),
    };
    Some(truncate_tail(&combined, limit).to_string())
}
