/*!
# Line Walker

Buffered line access over any `BufRead` source, with one line of lookahead.

Both trace readers walk their files line by line: blank lines are
separators, `COMPLETE`/`INCOMPLETE` lines are status markers, and everything
else is content. The single-line peek is what lets a reader tell a dump
footer from the start of the next section without consuming it.
*/

use std::fmt;
use std::io::BufRead;

use crate::core::Result;

/// Dump status attached to a parsed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Complete,
    Incomplete,
}

impl fmt::Display for EntryStatus {
    /// The marker text as it appears in trace files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Complete => f.write_str("COMPLETE"),
            EntryStatus::Incomplete => f.write_str("INCOMPLETE"),
        }
    }
}

/// Lines of a trace file with 1-based numbering and one line of lookahead.
#[derive(Debug)]
pub struct LineWalker<R> {
    reader: R,
    line_no: usize,
    peeked: Option<Option<(usize, String)>>,
}

impl<R: BufRead> LineWalker<R> {
    pub fn new(reader: R) -> Self {
        LineWalker {
            reader,
            line_no: 0,
            peeked: None,
        }
    }

    /// Number of the most recently read line.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Next non-blank line, or `None` at end of input.
    pub fn next_content_line(&mut self) -> Result<Option<(usize, String)>> {
        if let Some(peeked) = self.peeked.take() {
            return Ok(peeked);
        }
        self.read_content_line()
    }

    /// Look at the next non-blank line without consuming it.
    pub fn peek_content_line(&mut self) -> Result<Option<&str>> {
        if self.peeked.is_none() {
            let line = self.read_content_line()?;
            self.peeked = Some(line);
        }
        match &self.peeked {
            Some(Some((_, line))) => Ok(Some(line)),
            _ => Ok(None),
        }
    }

    fn read_content_line(&mut self) -> Result<Option<(usize, String)>> {
        let mut buf = String::new();
        loop {
            buf.clear();
            let read = self.reader.read_line(&mut buf)?;
            if read == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = buf.trim();
            if !trimmed.is_empty() {
                return Ok(Some((self.line_no, trimmed.to_string())));
            }
        }
    }
}

/// Interpret a content line as a status marker, if it is one.
pub fn marker_status(line: &str) -> Option<EntryStatus> {
    match line {
        "COMPLETE" => Some(EntryStatus::Complete),
        "INCOMPLETE" => Some(EntryStatus::Incomplete),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_lines_and_numbers_the_rest() {
        let text = "first\n\n  \nsecond\n";
        let mut walker = LineWalker::new(text.as_bytes());
        assert_eq!(
            walker.next_content_line().unwrap(),
            Some((1, "first".to_string()))
        );
        assert_eq!(
            walker.next_content_line().unwrap(),
            Some((4, "second".to_string()))
        );
        assert_eq!(walker.next_content_line().unwrap(), None);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut walker = LineWalker::new("{0} 1\nCOMPLETE\n".as_bytes());
        assert_eq!(walker.peek_content_line().unwrap(), Some("{0} 1"));
        assert_eq!(
            walker.next_content_line().unwrap(),
            Some((1, "{0} 1".to_string()))
        );
        assert_eq!(marker_status(walker.peek_content_line().unwrap().unwrap()), Some(EntryStatus::Complete));
    }

    #[test]
    fn markers_classify() {
        assert_eq!(marker_status("COMPLETE"), Some(EntryStatus::Complete));
        assert_eq!(marker_status("INCOMPLETE"), Some(EntryStatus::Incomplete));
        assert_eq!(marker_status("{0} 1"), None);
    }
}
