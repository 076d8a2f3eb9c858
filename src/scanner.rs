//! Line-oriented pre-processing of tracer output (§6 "Trace input format").
//!
//! The concrete grammar of a single syscall line is an external collaborator
//! (out of scope per §1) — this module owns only the line-level rules that
//! apply before a line ever reaches that grammar: skipping restart/signal
//! marker lines, and pulling coverage annotations off of `Cover:` lines and
//! attaching them to the most recently scanned call.

use crate::error::{FatalKind, Result};
use crate::ir::TracedCall;

/// Supplied by the external lexer/parser: turns one non-marker, non-`Cover:`
/// line into a `TracedCall`. Kept as a trait so this module (and the
/// translator above it) doesn't depend on a concrete grammar.
pub trait LineLexer {
    fn parse_line(&mut self, line: &str) -> Result<TracedCall>;
}

fn is_marker_line(line: &str) -> bool {
    line.contains("ERESTART") || line.contains("+++") || line.contains("---")
}

fn parse_cover_line(line: &str) -> Result<Vec<u64>> {
    let (_, list) = line
        .split_once("Cover:")
        .expect("caller already checked for `Cover:`");
    list.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty())
        .map(|tok| {
            parse_u64_auto_base(tok).ok_or_else(|| {
                FatalKind::LexerFailure {
                    line: 0,
                    message: format!("bad coverage value `{}`", tok),
                }
                .into()
            })
        })
        .collect()
}

fn parse_u64_auto_base(tok: &str) -> Option<u64> {
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        tok.parse::<u64>().ok()
    }
}

/// Scans every line of `text` through `lexer`, applying the marker/coverage
/// rules, and returns the resulting ordered list of traced calls.
pub fn scan(text: &str, lexer: &mut dyn LineLexer) -> Result<Vec<TracedCall>> {
    let mut calls: Vec<TracedCall> = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || is_marker_line(line) {
            continue;
        }
        if line.contains("Cover:") {
            let cover = parse_cover_line(line).map_err(|e| match e {
                crate::error::TraceError::Fatal(FatalKind::LexerFailure { message, .. }) => {
                    FatalKind::LexerFailure {
                        line: lineno + 1,
                        message,
                    }
                    .into()
                }
                other => other,
            })?;
            if let Some(last) = calls.last_mut() {
                last.cover.extend(cover);
            }
            continue;
        }
        let call = lexer.parse_line(line).map_err(|e| match e {
            crate::error::TraceError::Fatal(FatalKind::LexerFailure { message, .. }) => {
                FatalKind::LexerFailure {
                    line: lineno + 1,
                    message,
                }
                .into()
            }
            other => other,
        })?;
        calls.push(call);
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::RawArg;

    struct StubLexer;
    impl LineLexer for StubLexer {
        fn parse_line(&mut self, line: &str) -> Result<TracedCall> {
            Ok(TracedCall::new(1, line.to_string(), vec![RawArg::Null], 0))
        }
    }

    #[test]
    fn skips_marker_lines() {
        let text = "+++ exited with 0 +++\nhello()\n--- SIGSEGV ---\nERESTARTSYS\n";
        let calls = scan(text, &mut StubLexer).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call_name, "hello()");
    }

    #[test]
    fn attaches_coverage_to_previous_call() {
        let text = "open()\nCover: 0x1,0x2, 3\n";
        let calls = scan(text, &mut StubLexer).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].cover, vec![1, 2, 3]);
    }

    #[test]
    fn dangling_cover_line_is_ignored() {
        let text = "Cover: 0x1\n";
        let calls = scan(text, &mut StubLexer).unwrap();
        assert!(calls.is_empty());
    }
}
