//! The intermediate ("raw trace") value model, §4.A / §3 "Raw trace call".
//!
//! Pure value types produced by the external tracer-text lexer. Two
//! operations are defined over them: a stable textual rendering (used as
//! return-cache keys) and expression evaluation against the target's
//! constant tables. `eval` is only meaningful for the `Expression` variant;
//! calling it on anything else (a pointer, struct, array or buffer) is a
//! programmer error and panics.

use crate::error::{FatalKind, Result};
use std::collections::HashMap;
use std::fmt::Write as _;

/// A constant lookup table: the target's own constants, falling back to a
/// small set of "special" constants the target doesn't export (`AT_FDCWD`,
/// protection flags, ...).
pub struct ConstTable<'a> {
    pub target: &'a dyn Fn(&str) -> Option<u64>,
    pub special: &'a HashMap<&'static str, u64>,
}

impl<'a> ConstTable<'a> {
    pub fn resolve(&self, token: &str) -> Option<u64> {
        (self.target)(token).or_else(|| self.special.get(token).copied())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Or,
    And,
    Xor,
    Shl,
    Shr,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnOp {
    Not,
}

/// One node of the untyped expression tree the tracer renders numeric
/// arguments as.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    IntLiteral(i64),
    Flag(String),
    FlagSet(Vec<Expression>),
    BinaryOp(BinOp, Box<Expression>, Box<Expression>),
    UnaryOp(UnOp, Box<Expression>),
    /// `KERNEL_VERSION(x, y, z)` and similar macro invocations that evaluate
    /// to a constant independent of the target's constant table.
    Macro(String, Vec<Expression>),
}

/// A single raw syscall argument as rendered by the tracer.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArg {
    Expression(Expression),
    Buffer(Vec<u8>),
    Pointer {
        address: u64,
        pointee: Option<Box<RawArg>>,
    },
    Null,
    Struct(Vec<RawArg>),
    Array(Vec<RawArg>),
    Field(String, Box<RawArg>),
    Call(String, Vec<RawArg>),
    Ip(String),
    /// Before/after pair, used where the tracer shows a value mutated
    /// in-place by the call (e.g. an in/out `timeval`).
    Dynamic(Box<RawArg>, Box<RawArg>),
}

impl Expression {
    pub fn eval(&self, consts: &ConstTable) -> Result<u64> {
        match self {
            Expression::IntLiteral(v) => Ok(*v as u64),
            Expression::Flag(tok) => consts
                .resolve(tok)
                .ok_or_else(|| FatalKind::UnknownFlagToken(tok.clone()).into()),
            Expression::FlagSet(items) => {
                let mut acc = 0u64;
                for item in items {
                    acc |= item.eval(consts)?;
                }
                Ok(acc)
            }
            Expression::BinaryOp(op, lhs, rhs) => {
                let l = lhs.eval(consts)?;
                let r = rhs.eval(consts)?;
                Ok(match op {
                    BinOp::Or => l | r,
                    BinOp::And => l & r,
                    BinOp::Xor => l ^ r,
                    BinOp::Shl => l << r,
                    BinOp::Shr => l >> r,
                    BinOp::Mul => l.wrapping_mul(r),
                })
            }
            Expression::UnaryOp(UnOp::Not, inner) => Ok(!inner.eval(consts)?),
            Expression::Macro(name, args) => eval_macro(name, args, consts),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Expression::IntLiteral(v) => v.to_string(),
            Expression::Flag(tok) => tok.clone(),
            Expression::FlagSet(items) => items
                .iter()
                .map(Expression::render)
                .collect::<Vec<_>>()
                .join("|"),
            Expression::BinaryOp(op, l, r) => {
                format!("({}{}{})", l.render(), binop_str(op), r.render())
            }
            Expression::UnaryOp(UnOp::Not, inner) => format!("~{}", inner.render()),
            Expression::Macro(name, args) => format!(
                "{}({})",
                name,
                args.iter()
                    .map(Expression::render)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }
}

fn binop_str(op: &BinOp) -> &'static str {
    match op {
        BinOp::Or => "|",
        BinOp::And => "&",
        BinOp::Xor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
        BinOp::Mul => "*",
    }
}

/// `KERNEL_VERSION(x, y, z)` is the only macro this system needs to fold at
/// evaluation time; anything else is folded by the translator's inner-call
/// handler instead (§4.G.3), since those depend on target-specific
/// semantics the expression evaluator doesn't have access to.
fn eval_macro(name: &str, args: &[Expression], consts: &ConstTable) -> Result<u64> {
    if name == "KERNEL_VERSION" && args.len() == 3 {
        let x = args[0].eval(consts)?;
        let y = args[1].eval(consts)?;
        let z = args[2].eval(consts)?;
        return Ok((x << 16) | (y << 8) | z);
    }
    Err(FatalKind::UnknownFlagToken(format!("{}(...)", name)).into())
}

impl RawArg {
    pub fn render(&self) -> String {
        match self {
            RawArg::Expression(e) => e.render(),
            RawArg::Buffer(bytes) => {
                let mut s = String::from("\"");
                for b in bytes {
                    let _ = write!(s, "\\x{:02x}", b);
                }
                s.push('"');
                s
            }
            RawArg::Pointer { address, pointee } => match pointee {
                Some(p) => format!("&{:#x}={}", address, p.render()),
                None => format!("{:#x}", address),
            },
            RawArg::Null => "NULL".to_string(),
            RawArg::Struct(fields) => format!(
                "{{{}}}",
                fields
                    .iter()
                    .map(RawArg::render)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            RawArg::Array(items) => format!(
                "[{}]",
                items
                    .iter()
                    .map(RawArg::render)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            RawArg::Field(name, value) => format!("{}={}", name, value.render()),
            RawArg::Call(name, args) => format!(
                "{}({})",
                name,
                args.iter()
                    .map(RawArg::render)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            RawArg::Ip(text) => text.clone(),
            RawArg::Dynamic(before, after) => {
                format!("{} => {}", before.render(), after.render())
            }
        }
    }

    /// The numeric address this arg designates, for contexts that accept a
    /// raw pointer where an integer is declared (§4.G.1 Integer rule: "Raw
    /// `Pointer` -> use its numeric address").
    pub fn pointer_address(&self) -> Option<u64> {
        match self {
            RawArg::Pointer { address, .. } => Some(*address),
            RawArg::Null => Some(0),
            _ => None,
        }
    }

    pub fn is_null_pointer(&self) -> bool {
        matches!(self, RawArg::Null)
            || matches!(self, RawArg::Pointer { address: 0, pointee: None })
    }

    /// Fields of a struct, or `None` if this isn't struct-shaped.
    pub fn struct_fields(&self) -> Option<&[RawArg]> {
        match self {
            RawArg::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            RawArg::Field(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn field_value(&self) -> Option<&RawArg> {
        match self {
            RawArg::Field(_, value) => Some(value),
            _ => None,
        }
    }
}

pub type Pid = i64;

/// `{pid, call_name, args, ret, cover, paused, resumed}` — one line (or
/// paused/resumed pair of lines) out of a trace, before trace-tree rejoin.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedCall {
    pub pid: Pid,
    pub call_name: String,
    pub args: Vec<RawArg>,
    pub ret: i64,
    pub cover: Vec<u64>,
    pub paused: bool,
    pub resumed: bool,
}

impl TracedCall {
    pub fn new(pid: Pid, call_name: impl Into<String>, args: Vec<RawArg>, ret: i64) -> Self {
        TracedCall {
            pid,
            call_name: call_name.into(),
            args,
            ret,
            cover: Vec::new(),
            paused: false,
            resumed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consts() -> HashMap<&'static str, u64> {
        let mut m = HashMap::new();
        m.insert("AT_FDCWD", (-100i64) as u64);
        m
    }

    #[test]
    fn flag_set_evaluates_to_or_of_members() {
        let special = consts();
        let target = |_: &str| -> Option<u64> { None };
        let table = ConstTable {
            target: &target,
            special: &special,
        };
        let expr = Expression::FlagSet(vec![
            Expression::IntLiteral(1),
            Expression::IntLiteral(2),
            Expression::IntLiteral(4),
        ]);
        assert_eq!(expr.eval(&table).unwrap(), 7);
    }

    #[test]
    fn unknown_flag_is_fatal() {
        let special = HashMap::new();
        let target = |_: &str| -> Option<u64> { None };
        let table = ConstTable {
            target: &target,
            special: &special,
        };
        let expr = Expression::Flag("MADE_UP_FLAG".to_string());
        let err = expr.eval(&table).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn kernel_version_macro_folds() {
        let special = HashMap::new();
        let target = |_: &str| -> Option<u64> { None };
        let table = ConstTable {
            target: &target,
            special: &special,
        };
        let expr = Expression::Macro(
            "KERNEL_VERSION".to_string(),
            vec![
                Expression::IntLiteral(4),
                Expression::IntLiteral(9),
                Expression::IntLiteral(0),
            ],
        );
        assert_eq!(expr.eval(&table).unwrap(), (4 << 16) | (9 << 8));
    }

    #[test]
    fn render_roundtrips_flag_set() {
        let expr = Expression::FlagSet(vec![
            Expression::Flag("O_CREAT".to_string()),
            Expression::Flag("O_RDWR".to_string()),
        ]);
        assert_eq!(expr.render(), "O_CREAT|O_RDWR");
    }
}
