//! Fixed-size chunking with overlap.

/// Splits text into windows of at most `max_chars` characters, sharing
/// `overlap` characters between neighbours.
///
/// Window ends snap back to a paragraph break, then a line break, then a
/// sentence end when one falls in the last fifth of the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSizeChunker {
    max_chars: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    /// `overlap` is clamped below `max_chars` so every window advances.
    pub fn new(max_chars: usize, overlap: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap: overlap.min(max_chars - 1),
        }
    }

    /// Identifier recorded on entries chunked by this strategy.
    pub fn id(&self) -> String {
        format!("fixed:{}:{}", self.max_chars, self.overlap)
    }

    /// Split `text` into chunks. Whitespace-only text yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let target_end = (start + self.max_chars).min(total);
            let end = find_break_point(&chars, start, target_end, total);
            let piece: String = chars[start..end].iter().collect();
            if !piece.trim().is_empty() {
                chunks.push(piece);
            }
            if end >= total {
                break;
            }
            // Step back by the overlap, but always move forward.
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }
}

/// Find a good break point at or before `target_end`.
fn find_break_point(chars: &[char], start: usize, target_end: usize, total: usize) -> usize {
    if target_end >= total {
        return total;
    }

    let search_start = target_end.saturating_sub((target_end - start) / 5).max(start + 1);

    // Prefer double newline (paragraph break)
    for i in (search_start..target_end).rev() {
        if chars[i - 1] == '\n' && chars[i] == '\n' {
            return i + 1;
        }
    }

    for i in (search_start..target_end).rev() {
        if chars[i] == '\n' {
            return i + 1;
        }
    }

    for i in (search_start..target_end).rev() {
        if matches!(chars[i], '.' | '!' | '?') && chars[i + 1].is_whitespace() {
            return i + 1;
        }
    }

    target_end
}
