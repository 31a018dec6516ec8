//! Self-verification pass: a deterministic text normalization, not a model
//! call.

/// Canonicalize whitespace: collapse runs of spaces and tabs inside lines,
/// strip trailing whitespace, collapse runs of blank lines to one, and trim
/// the ends. Idempotent: applying it twice equals applying it once.
pub fn canonicalize_whitespace(content: &str) -> String {
    let mut lines = Vec::new();
    let mut blank_pending = false;

    for line in content.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_pending = !lines.is_empty();
        } else {
            if blank_pending {
                lines.push(String::new());
                blank_pending = false;
            }
            lines.push(collapsed);
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_runs_and_trailing_space() {
        let out = canonicalize_whitespace("a   b\t\tc   \nnext  line ");
        assert_eq!(out, "a b c\nnext line");
    }

    #[test]
    fn test_collapses_blank_lines_and_trims_ends() {
        let out = canonicalize_whitespace("\n\n first\n\n\n\nsecond\n\n\n");
        assert_eq!(out, "first\n\nsecond");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "a   b\t\tc   \nnext  line ",
            "\n\nx\n\n\ny\n",
            "already clean\n\nexactly",
            "",
            "   \n\t\n  ",
        ];
        for sample in samples {
            let once = canonicalize_whitespace(sample);
            assert_eq!(canonicalize_whitespace(&once), once);
        }
    }
}
