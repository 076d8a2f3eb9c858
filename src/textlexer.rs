//! A minimal stand-in for the tracer's textual grammar (§1: "the concrete
//! lexer/grammar for the tracer's textual syntax" is an external
//! collaborator, out of scope for the core). This gives the CLI shell a
//! real `scanner::LineLexer` to drive end-to-end without pulling in a full
//! parser; it understands enough of a conventional `pid name(args) = ret`
//! trace line to exercise the translator on straightforward traces. Anyone
//! wiring this system to a real tracer replaces this module, not the core.

use crate::error::{FatalKind, Result};
use crate::ir::{Expression, RawArg, TracedCall};
use crate::scanner::LineLexer;

#[derive(Debug, Default)]
pub struct SimpleTextLexer;

impl SimpleTextLexer {
    pub fn new() -> Self {
        SimpleTextLexer
    }
}

fn fail(message: impl Into<String>) -> crate::error::TraceError {
    FatalKind::LexerFailure {
        line: 0,
        message: message.into(),
    }
    .into()
}

/// Splits a top-level comma list, respecting nested parens/brackets/braces
/// and quoted strings so `inet_addr("1.2.3.4"), 80` isn't split on the
/// comma inside the nested call.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' | '[' | '{' if !in_quotes => depth += 1,
            ')' | ']' | '}' if !in_quotes => depth -= 1,
            ',' if depth == 0 && !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = s[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

fn parse_arg(tok: &str) -> Result<RawArg> {
    let tok = tok.trim();
    if tok == "NULL" {
        return Ok(RawArg::Null);
    }
    if tok.starts_with('"') && tok.ends_with('"') && tok.len() >= 2 {
        return Ok(RawArg::Buffer(tok[1..tok.len() - 1].as_bytes().to_vec()));
    }
    if let Some(open) = tok.find('(') {
        if tok.ends_with(')') {
            let name = &tok[..open];
            if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.is_empty() {
                let inner = &tok[open + 1..tok.len() - 1];
                let args = split_top_level(inner)
                    .into_iter()
                    .map(parse_arg)
                    .collect::<Result<Vec<_>>>()?;
                return Ok(RawArg::Call(name.to_string(), args));
            }
        }
    }
    if let Some(hex) = tok.strip_prefix("0x").or_else(|| tok.strip_prefix("0X")) {
        let addr = u64::from_str_radix(hex, 16)
            .map_err(|_| fail(format!("bad hex literal `{}`", tok)))?;
        return Ok(RawArg::Pointer {
            address: addr,
            pointee: None,
        });
    }
    if let Ok(v) = tok.parse::<i64>() {
        return Ok(RawArg::Expression(Expression::IntLiteral(v)));
    }
    if tok.contains('|') {
        let flags = tok
            .split('|')
            .map(|f| Expression::Flag(f.trim().to_string()))
            .collect();
        return Ok(RawArg::Expression(Expression::FlagSet(flags)));
    }
    if tok.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !tok.is_empty() {
        return Ok(RawArg::Expression(Expression::Flag(tok.to_string())));
    }
    Err(fail(format!("unrecognised argument token `{}`", tok)))
}

impl LineLexer for SimpleTextLexer {
    /// Parses `[pid ]name(arg, arg, ...) = ret`. The pid prefix is
    /// optional; when absent every call is attributed to pid 1.
    fn parse_line(&mut self, line: &str) -> Result<TracedCall> {
        let (head, ret_str) = line
            .rsplit_once('=')
            .ok_or_else(|| fail("missing ` = <ret>` suffix"))?;
        let ret: i64 = ret_str
            .trim()
            .parse()
            .map_err(|_| fail(format!("bad return value `{}`", ret_str.trim())))?;

        let head = head.trim();
        let open = head
            .find('(')
            .ok_or_else(|| fail("missing `(` before argument list"))?;
        if !head.ends_with(')') {
            return Err(fail("missing closing `)`"));
        }

        let prefix = head[..open].trim();
        let (pid, call_name) = match prefix.rsplit_once(' ') {
            Some((pid_str, name)) => {
                let pid = pid_str
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| fail(format!("bad pid `{}`", pid_str)))?;
                (pid, name.trim())
            }
            None => (1, prefix),
        };
        if call_name.is_empty() {
            return Err(fail("missing syscall name"));
        }

        let args_str = &head[open + 1..head.len() - 1];
        let args = split_top_level(args_str)
            .into_iter()
            .map(parse_arg)
            .collect::<Result<Vec<_>>>()?;

        Ok(TracedCall::new(pid, call_name.to_string(), args, ret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_plain_call_with_defaulted_pid() {
        let mut lexer = SimpleTextLexer::new();
        let call = lexer.parse_line("open(\"/tmp/foo\", O_RDONLY) = 3").unwrap();
        assert_eq!(call.pid, 1);
        assert_eq!(call.call_name, "open");
        assert_eq!(call.ret, 3);
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.args[0], RawArg::Buffer(b"/tmp/foo".to_vec()));
    }

    #[test]
    fn parses_an_explicit_pid_prefix() {
        let mut lexer = SimpleTextLexer::new();
        let call = lexer.parse_line("501 close(3) = 0").unwrap();
        assert_eq!(call.pid, 501);
        assert_eq!(call.call_name, "close");
    }

    #[test]
    fn parses_a_nested_inner_call_argument() {
        let mut lexer = SimpleTextLexer::new();
        let call = lexer
            .parse_line("connect(3, inet_addr(\"127.0.0.1\"), 80) = 0")
            .unwrap();
        assert_eq!(
            call.args[1],
            RawArg::Call(
                "inet_addr".to_string(),
                vec![RawArg::Buffer(b"127.0.0.1".to_vec())]
            )
        );
    }

    #[test]
    fn flag_set_argument_splits_on_pipe() {
        let mut lexer = SimpleTextLexer::new();
        let call = lexer.parse_line("open(\"x\", O_CREAT|O_RDWR) = 4").unwrap();
        match &call.args[1] {
            RawArg::Expression(Expression::FlagSet(flags)) => assert_eq!(flags.len(), 2),
            other => panic!("expected a flag set, got {:?}", other),
        }
    }

    #[test]
    fn missing_return_value_is_a_lexer_failure() {
        let mut lexer = SimpleTextLexer::new();
        let err = lexer.parse_line("open(\"x\")").unwrap_err();
        assert!(err.is_fatal());
    }
}
