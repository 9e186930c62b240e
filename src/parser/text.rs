/*!
# Range and Pattern Grammar

Parsers for the two value forms of the trace text: repetition range sets
`{a,b-c,...}` and compressed patterns `(sym)` / `(children,count)`.
*/

use std::collections::BTreeSet;

use crate::compress::Pattern;
use crate::core::{Result, Symbol};
use crate::reppat::RepetitionPattern;

use super::lexer::{TokenCursor, TraceToken};

/// Parse `{a,b-c,...}` into a repetition pattern.
///
/// Ranges must be ascending and non-overlapping; the braces may be empty.
pub fn parse_range_set(cursor: &mut TokenCursor) -> Result<RepetitionPattern> {
    cursor.expect(TraceToken::LBrace)?;
    let mut ranges = RepetitionPattern::new();

    if cursor.peek() == Some(TraceToken::RBrace) {
        cursor.next();
        return Ok(ranges);
    }

    let mut last_end: Option<u64> = None;
    loop {
        let start = cursor.expect_number()?;
        let end = if cursor.peek() == Some(TraceToken::Dash) {
            cursor.next();
            cursor.expect_number()?
        } else {
            start
        };
        if end < start {
            return Err(cursor.unexpected("an ascending range", Some(TraceToken::Number(end))));
        }
        if let Some(prev) = last_end {
            if start <= prev {
                return Err(
                    cursor.unexpected("a range after the previous one", Some(TraceToken::Number(start)))
                );
            }
        }
        ranges.add_pair(start, end);
        last_end = Some(end);

        match cursor.next() {
            Some(TraceToken::Comma) => {}
            Some(TraceToken::RBrace) => break,
            found => return Err(cursor.unexpected("',' or '}'", found)),
        }
    }

    Ok(ranges)
}

/// Parse one pattern: `(sym)` or `(pattern...,count)`.
pub fn parse_pattern(cursor: &mut TokenCursor) -> Result<Pattern> {
    cursor.expect(TraceToken::LParen)?;
    match cursor.peek() {
        Some(TraceToken::Number(sym)) => {
            cursor.next();
            cursor.expect(TraceToken::RParen)?;
            Ok(Pattern::leaf(sym))
        }
        Some(TraceToken::LParen) => {
            let mut children = vec![parse_pattern(cursor)?];
            while cursor.peek() == Some(TraceToken::LParen) {
                children.push(parse_pattern(cursor)?);
            }
            cursor.expect(TraceToken::Comma)?;
            let count = cursor.expect_number()?;
            if count == 0 {
                return Err(cursor.unexpected(
                    "a repetition count of at least 1",
                    Some(TraceToken::Number(0)),
                ));
            }
            cursor.expect(TraceToken::RParen)?;
            Ok(Pattern::sequence(children, count))
        }
        found => Err(cursor.unexpected("a pattern", found)),
    }
}

/// Parse patterns until the end of the line.
pub fn parse_patterns(cursor: &mut TokenCursor) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    while !cursor.is_done() {
        patterns.push(parse_pattern(cursor)?);
    }
    Ok(patterns)
}

/// Record every number that opens a parenthesis group; those are the
/// instruction ids, while counts always follow a comma. Scan passes use
/// this instead of building pattern trees.
pub(crate) fn collect_pattern_symbols(cursor: &mut TokenCursor, out: &mut BTreeSet<Symbol>) {
    let mut after_lparen = false;
    while let Some(token) = cursor.next() {
        if after_lparen {
            if let TraceToken::Number(sym) = token {
                out.insert(sym);
            }
        }
        after_lparen = token == TraceToken::LParen;
    }
}
