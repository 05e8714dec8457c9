//! Abstract syntax tree for the restricted state machine language.
//!
//! The tree is produced by the parser in `smc_io` and borrowed read-only by
//! both front-ends. Each construct is a dedicated enum variant so lowering
//! dispatches exhaustively; there is no catch-all "skip" path for a node
//! kind the compiler does not understand.

use std::fmt;

/// A parsed translation unit: file-scope declarations plus functions.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProgram {
    /// File-scope variable declarations, in source order.
    pub decls: Vec<TopDecl>,
    /// Function definitions; only `main` is accepted downstream.
    pub functions: Vec<Function>,
}

impl SourceProgram {
    /// Finds the `main` function, the single entry point of a program.
    pub fn main(&self) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == "main")
    }
}

/// A file-scope `int` declaration.
///
/// The initializer classifies the declaration: `= 0` or `= 1` makes a state
/// variable with that initial value, no initializer makes an input variable,
/// anything else is ignored by hardware inference.
#[derive(Debug, Clone, PartialEq)]
pub struct TopDecl {
    pub name: String,
    pub init: Option<i64>,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub body: Vec<Stmt>,
}

/// A single assignment `name = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub name: String,
    pub value: Expr,
}

/// Statement kinds of the restricted grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name = expr;`
    Assign(Assign),
    /// `a = e1, b = e2, ...;` — folds into a single microcode word.
    CommaAssign(Vec<Assign>),
    /// A bare expression statement; dropped with a warning downstream.
    Expr(Expr),
    /// A block-scope `int` declaration, optionally initialized.
    Decl { name: String, init: Option<Expr> },
    /// `if (cond) { ... } else { ... }`
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    /// `while (cond) { ... }`
    While { cond: Expr, body: Vec<Stmt> },
    /// `for (init; cond; update) { ... }`
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    /// `switch (selector) { case N: ... default: ... }` with C fall-through.
    Switch { selector: Expr, arms: Vec<SwitchArm> },
    Break,
    Continue,
    Return(Option<Expr>),
    /// `{ ... }` — a scope for SSA versioning, transparent to lowering.
    Block(Vec<Stmt>),
}

/// A `case N:` or `default:` position inside a switch, with the statements
/// up to the next label (fall-through is preserved, not implied breaks).
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    pub label: CaseLabel,
    pub body: Vec<Stmt>,
}

/// Label of a switch arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseLabel {
    Value(i64),
    Default,
}

/// Expression kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(i64),
    Ident(String),
    Unary { op: UnOp, operand: Box<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

impl Expr {
    /// The literal value if this is a numeric constant.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// The name if this is a bare identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Collects every identifier referenced by this expression.
    pub fn referenced_idents(&self, out: &mut Vec<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Ident(name) => {
                if !out.iter().any(|n| n == name) {
                    out.push(name.clone());
                }
            }
            Expr::Unary { operand, .. } => operand.referenced_idents(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.referenced_idents(out);
                rhs.referenced_idents(out);
            }
        }
    }
}

/// Binary operators, grouped by the precedence the parser enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    LogicOr,
    LogicAnd,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Logical negation `!`.
    Not,
    /// Arithmetic negation `-`.
    Neg,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::LogicOr => "||",
            BinOp::LogicAnd => "&&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        };
        f.write_str(s)
    }
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnOp::Not => "!",
            UnOp::Neg => "-",
        })
    }
}

// Parenthesized rendering used for diagnostic labels and the DOT dump.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(n) => write!(f, "{n}"),
            Expr::Ident(name) => f.write_str(name),
            Expr::Unary { op, operand } => write!(f, "{op}{operand}"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn and(a: Expr, b: Expr) -> Expr {
        Expr::Binary {
            op: BinOp::LogicAnd,
            lhs: Box::new(a),
            rhs: Box::new(b),
        }
    }

    #[test]
    fn display_nests_parens() {
        let e = and(Expr::Ident("a0".into()), Expr::Num(1));
        assert_eq!(e.to_string(), "(a0 && 1)");
    }

    #[test]
    fn referenced_idents_deduplicates() {
        let e = and(Expr::Ident("a0".into()), Expr::Ident("a0".into()));
        let mut names = Vec::new();
        e.referenced_idents(&mut names);
        assert_eq!(names, vec!["a0".to_string()]);
    }
}
