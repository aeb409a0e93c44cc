// Head/tail truncation for command observations

/// Keep the first `head` and last `tail` lines, eliding the middle.
///
/// The elision marker carries the count of dropped lines so the Brain
/// knows how much it is not seeing.
pub fn head_tail(lines: &[String], head: usize, tail: usize) -> String {
    if lines.len() <= head + tail {
        return lines.join("\n");
    }

    let dropped = lines.len() - head - tail;
    let mut out = Vec::with_capacity(head + tail + 1);
    out.extend(lines[..head].iter().cloned());
    out.push(format!("[... {} lines elided ...]", dropped));
    out.extend(lines[lines.len() - tail..].iter().cloned());
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line-{i}")).collect()
    }

    #[test]
    fn test_short_output_is_untouched() {
        let lines = numbered(5);
        assert_eq!(head_tail(&lines, 3, 2), lines.join("\n"));
    }

    #[test]
    fn test_exact_fit_is_untouched() {
        let lines = numbered(10);
        assert!(!head_tail(&lines, 6, 4).contains("elided"));
    }

    #[test]
    fn test_middle_is_elided_with_count() {
        let lines = numbered(100);
        let out = head_tail(&lines, 3, 2);
        assert!(out.starts_with("line-0\nline-1\nline-2\n"));
        assert!(out.ends_with("line-98\nline-99"));
        assert!(out.contains("[... 95 lines elided ...]"));
    }

    #[test]
    fn test_empty_output() {
        assert_eq!(head_tail(&[], 10, 10), "");
    }
}
