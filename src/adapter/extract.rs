//! Locate the JSON object inside an upstream error body
//!
//! Error bodies arrive as plain JSON, as an event stream whose last frame
//! carries the error, or as text with JSON embedded somewhere in it.
//!
//! Brace matching counts every `{` and `}` byte, including ones inside string
//! values. A message containing unbalanced braces can end the match early or
//! late; the translator then falls back to the raw body.

/// Return the most relevant JSON object in `body`, if any
///
/// Search order:
/// 1. the whole body, when it is already a brace-delimited object
/// 2. the last `data:` line whose payload starts with `{`
/// 3. the first `{` anywhere in the body
pub fn extract_json(body: &[u8]) -> Option<&[u8]> {
    let trimmed = body.trim_ascii();
    if trimmed.starts_with(b"{") && trimmed.ends_with(b"}") {
        return Some(body);
    }

    for line in body.split(|&b| b == b'\n').rev() {
        let Some(payload) = line.trim_ascii().strip_prefix(b"data:") else {
            continue;
        };
        let payload = payload.trim_ascii();
        if payload.starts_with(b"{") {
            // An unterminated object is still the best candidate we have
            return Some(match_braces(payload).unwrap_or(payload));
        }
    }

    let start = body.iter().position(|&b| b == b'{')?;
    match_braces(&body[start..])
}

/// Span of the object opening at `bytes[0]`, or `None` if it never closes
fn match_braces(bytes: &[u8]) -> Option<&[u8]> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&bytes[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
