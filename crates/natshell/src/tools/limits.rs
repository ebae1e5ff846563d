//! Runtime limits that scale with the active model's context window.

/// Shared output limits for all tools. Defaults match the smallest
/// context-window tier; the loop re-derives them when the engine changes.
#[derive(Debug, Clone, Copy)]
pub struct ToolLimits {
    /// Cap on tool output characters before head/tail truncation.
    pub max_output_chars: usize,
    /// Default line count for `read_file`.
    pub read_file_lines: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_output_chars: 4000,
            read_file_lines: 200,
        }
    }
}

impl ToolLimits {
    pub fn for_context_window(n_ctx: u32) -> Self {
        let (max_output_chars, read_file_lines) = match n_ctx {
            0..=4096 => (4_000, 200),
            4097..=8192 => (8_000, 400),
            8193..=16384 => (16_000, 800),
            16385..=32768 => (32_000, 1_600),
            _ => (64_000, 4_000),
        };
        Self {
            max_output_chars,
            read_file_lines,
        }
    }

    /// Truncate to the configured cap, keeping the head and tail of the
    /// text with a byte-count marker in between.
    pub fn truncate(&self, text: &str) -> (String, bool) {
        truncate_middle(text, self.max_output_chars)
    }
}

/// Keep the first `cap/2` and last `cap·3/8` characters with an omission
/// marker between them. Operates on char boundaries.
pub fn truncate_middle(text: &str, cap: usize) -> (String, bool) {
    if text.chars().count() <= cap {
        return (text.to_string(), false);
    }
    let head_chars = cap / 2;
    let tail_chars = cap * 3 / 8;

    let head_end = text
        .char_indices()
        .nth(head_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let total_chars = text.chars().count();
    let tail_start = text
        .char_indices()
        .nth(total_chars - tail_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);

    let head = &text[..head_end];
    let tail = &text[tail_start..];
    let omitted_bytes = text.len() - head.len() - tail.len();
    (
        format!("{head}\n... [truncated {omitted_bytes} bytes] ...\n{tail}"),
        true,
    )
}

/// Step budget scaled to the context window, unless explicitly configured.
pub fn steps_for_context_window(n_ctx: u32) -> u32 {
    match n_ctx {
        0..=4096 => 15,
        4097..=8192 => 25,
        8193..=16384 => 35,
        16385..=32768 => 50,
        _ => 75,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_scale_with_window() {
        assert_eq!(ToolLimits::for_context_window(4096).max_output_chars, 4_000);
        assert_eq!(ToolLimits::for_context_window(8192).max_output_chars, 8_000);
        assert_eq!(ToolLimits::for_context_window(16384).read_file_lines, 800);
        assert_eq!(ToolLimits::for_context_window(262_144).max_output_chars, 64_000);
    }

    #[test]
    fn step_budget_tiers() {
        assert_eq!(steps_for_context_window(4096), 15);
        assert_eq!(steps_for_context_window(8192), 25);
        assert_eq!(steps_for_context_window(16384), 35);
        assert_eq!(steps_for_context_window(32768), 50);
        assert_eq!(steps_for_context_window(262_144), 75);
    }

    #[test]
    fn short_text_is_untouched() {
        let limits = ToolLimits::default();
        let (text, truncated) = limits.truncate("short output");
        assert_eq!(text, "short output");
        assert!(!truncated);
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let limits = ToolLimits::default();
        let input = format!("{}MIDDLE{}", "a".repeat(3000), "z".repeat(3000));
        let (text, truncated) = limits.truncate(&input);
        assert!(truncated);
        assert!(text.starts_with("aaa"));
        assert!(text.ends_with("zzz"));
        assert!(text.contains("... [truncated"));
        assert!(!text.contains("MIDDLE"));
        // Head is cap/2 = 2000 chars, tail is cap·3/8 = 1500.
        assert!(text.len() < input.len());
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let input = "é".repeat(10_000);
        let (text, truncated) = truncate_middle(&input, 4000);
        assert!(truncated);
        assert!(text.contains("... [truncated"));
    }
}
