use crate::sinks::OutputSink;

/// An in-memory sink that keeps every printed line of a single run.
///
/// Create one per grading call; it is never shared between submissions.
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Vec<String>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Last non-blank printed line; the program's answer for scalar grading.
    pub fn last_line(&self) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl OutputSink for CollectingSink {
    fn line(&mut self, line: String) {
        self.lines.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_line_skips_trailing_blanks() {
        let mut sink = CollectingSink::new();
        sink.line("1".into());
        sink.line("4".into());
        sink.line("  ".into());
        assert_eq!(sink.last_line(), Some("4"));
        assert_eq!(sink.lines().len(), 3);
    }

    #[test]
    fn test_empty_sink_has_no_answer() {
        assert_eq!(CollectingSink::new().last_line(), None);
    }
}
