//! Helpers applied to raw header text

/// Replaces each folded line break (CRLF or LF followed by SP/HTAB) with a
/// single space, so value parsers only ever see one logical line.
pub fn unfold_lws(input: &[u8]) -> Vec<u8> {
    let mut unfolded = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        let newline = match input[i] {
            b'\r' if input.get(i + 1) == Some(&b'\n') => 2,
            b'\n' => 1,
            _ => 0,
        };
        let folded = newline > 0 && matches!(input.get(i + newline), Some(b' ' | b'\t'));
        if folded {
            i += newline;
            while matches!(input.get(i), Some(b' ' | b'\t')) {
                i += 1;
            }
            if !matches!(unfolded.last(), Some(b' ' | b'\t')) {
                unfolded.push(b' ');
            }
        } else {
            unfolded.push(input[i]);
            i += 1;
        }
    }
    unfolded
}
