//! Parser for the restricted C-like state machine language.
//!
//! Built from nom combinators over the preprocessed source text. The
//! grammar covers exactly the constructs the compiler lowers: file-scope
//! `int` declarations, a `main` function, structured control flow
//! (`if`/`else`, `while`, `for`, `switch` with fall-through), comma
//! assignment lists, and boolean/arithmetic expressions over identifiers
//! and integer literals. Anything else fails the parse with a line/column
//! diagnostic rather than being silently skipped.

use anyhow::{Result, anyhow};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{is_not, tag, take_until},
    character::complete::{alpha1, alphanumeric1, char, digit1, hex_digit1, multispace1, one_of},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    multi::{fold_many0, many0},
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use smc_core::ast::{
    Assign, BinOp, CaseLabel, Expr, Function, SourceProgram, Stmt, SwitchArm, TopDecl, UnOp,
};

const KEYWORDS: &[&str] = &[
    "int", "_BitInt", "if", "else", "while", "for", "switch", "case", "default", "break",
    "continue", "return", "void",
];

/// Parses a complete (already preprocessed) translation unit.
pub fn parse(source: &str) -> Result<SourceProgram> {
    match all_consuming(terminated(program, skip))(source) {
        Ok((_, prog)) => Ok(prog),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            let (line, col) = position(source, e.input);
            Err(anyhow!("parse error at line {line}, column {col}"))
        }
        Err(nom::Err::Incomplete(_)) => Err(anyhow!("parse error: truncated input")),
    }
}

fn position(source: &str, rest: &str) -> (usize, usize) {
    let consumed = source.len() - rest.len();
    let upto = &source[..consumed];
    let line = upto.matches('\n').count() + 1;
    let col = consumed - upto.rfind('\n').map(|p| p + 1).unwrap_or(0) + 1;
    (line, col)
}

// ---- lexical layer ------------------------------------------------------

/// Consumes whitespace and `//` / `/* */` comments.
fn skip(input: &str) -> IResult<&str, ()> {
    let line_comment = value((), pair(tag("//"), opt(is_not("\n"))));
    let block_comment = value((), tuple((tag("/*"), take_until("*/"), tag("*/"))));
    value(
        (),
        many0(alt((value((), multispace1), line_comment, block_comment))),
    )(input)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(skip, inner)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

/// An identifier that is not a reserved word.
fn name(input: &str) -> IResult<&str, &str> {
    verify(identifier, |s: &str| !KEYWORDS.contains(&s))(input)
}

/// A reserved word with an identifier boundary after it.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    move |input| {
        let (rest, matched) = ws(tag(kw))(input)?;
        match rest.chars().next() {
            Some(c) if c.is_alphanumeric() || c == '_' => Err(nom::Err::Error(
                nom::error::Error::new(input, nom::error::ErrorKind::Tag),
            )),
            _ => Ok((rest, matched)),
        }
    }
}

fn number(input: &str) -> IResult<&str, i64> {
    alt((
        map_res(
            preceded(alt((tag("0x"), tag("0X"))), hex_digit1),
            |s: &str| i64::from_str_radix(s, 16),
        ),
        map_res(digit1, |s: &str| s.parse::<i64>()),
    ))(input)
}

/// An integer literal with optional sign, for file-scope initializers.
fn int_literal(input: &str) -> IResult<&str, i64> {
    map(
        pair(opt(ws(char('-'))), ws(number)),
        |(neg, n)| if neg.is_some() { -n } else { n },
    )(input)
}

/// `int` or `_BitInt(N)`.
fn type_tok(input: &str) -> IResult<&str, ()> {
    alt((
        value((), keyword("int")),
        value(
            (),
            pair(
                keyword("_BitInt"),
                delimited(ws(char('(')), ws(number), ws(char(')'))),
            ),
        ),
    ))(input)
}

/// `=` that is not the first half of `==`.
fn assign_op(input: &str) -> IResult<&str, char> {
    ws(terminated(char('='), not(char('='))))(input)
}

// ---- expressions, loosest binding first ---------------------------------

fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

pub fn expr(input: &str) -> IResult<&str, Expr> {
    logic_or(input)
}

fn logic_or(input: &str) -> IResult<&str, Expr> {
    let (input, init) = logic_and(input)?;
    fold_many0(
        preceded(ws(tag("||")), logic_and),
        move || init.clone(),
        |lhs, rhs| bin(BinOp::LogicOr, lhs, rhs),
    )(input)
}

fn logic_and(input: &str) -> IResult<&str, Expr> {
    let (input, init) = bit_or(input)?;
    fold_many0(
        preceded(ws(tag("&&")), bit_or),
        move || init.clone(),
        |lhs, rhs| bin(BinOp::LogicAnd, lhs, rhs),
    )(input)
}

fn bit_or(input: &str) -> IResult<&str, Expr> {
    let (input, init) = bit_xor(input)?;
    fold_many0(
        preceded(ws(terminated(char('|'), not(char('|')))), bit_xor),
        move || init.clone(),
        |lhs, rhs| bin(BinOp::BitOr, lhs, rhs),
    )(input)
}

fn bit_xor(input: &str) -> IResult<&str, Expr> {
    let (input, init) = bit_and(input)?;
    fold_many0(
        preceded(ws(char('^')), bit_and),
        move || init.clone(),
        |lhs, rhs| bin(BinOp::BitXor, lhs, rhs),
    )(input)
}

fn bit_and(input: &str) -> IResult<&str, Expr> {
    let (input, init) = equality(input)?;
    fold_many0(
        preceded(ws(terminated(char('&'), not(char('&')))), equality),
        move || init.clone(),
        |lhs, rhs| bin(BinOp::BitAnd, lhs, rhs),
    )(input)
}

fn equality(input: &str) -> IResult<&str, Expr> {
    let (input, init) = relational(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinOp::Eq, tag("==")),
                value(BinOp::Ne, tag("!=")),
            ))),
            relational,
        ),
        move || init.clone(),
        |lhs, (op, rhs)| bin(op, lhs, rhs),
    )(input)
}

fn relational(input: &str) -> IResult<&str, Expr> {
    let (input, init) = additive(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinOp::Le, tag("<=")),
                value(BinOp::Ge, tag(">=")),
                value(BinOp::Lt, char('<')),
                value(BinOp::Gt, char('>')),
            ))),
            additive,
        ),
        move || init.clone(),
        |lhs, (op, rhs)| bin(op, lhs, rhs),
    )(input)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    let (input, init) = term(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinOp::Add, char('+')),
                value(BinOp::Sub, char('-')),
            ))),
            term,
        ),
        move || init.clone(),
        |lhs, (op, rhs)| bin(op, lhs, rhs),
    )(input)
}

fn term(input: &str) -> IResult<&str, Expr> {
    let (input, init) = unary(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinOp::Mul, char('*')),
                // A '/' that begins a comment is not a division.
                value(BinOp::Div, terminated(char('/'), not(one_of("/*")))),
            ))),
            unary,
        ),
        move || init.clone(),
        |lhs, (op, rhs)| bin(op, lhs, rhs),
    )(input)
}

fn unary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(preceded(char('!'), unary), |e| Expr::Unary {
            op: UnOp::Not,
            operand: Box::new(e),
        }),
        map(preceded(char('-'), unary), |e| Expr::Unary {
            op: UnOp::Neg,
            operand: Box::new(e),
        }),
        primary,
    )))(input)
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(number, Expr::Num),
        map(name, |s| Expr::Ident(s.to_string())),
        delimited(ws(char('(')), expr, ws(char(')'))),
    )))(input)
}

// ---- statements ---------------------------------------------------------

fn assignment(input: &str) -> IResult<&str, Assign> {
    map(
        tuple((ws(name), assign_op, expr)),
        |(name, _, value)| Assign {
            name: name.to_string(),
            value,
        },
    )(input)
}

/// A statement used as a loop/branch body, normalized to a list.
fn body(input: &str) -> IResult<&str, Vec<Stmt>> {
    map(stmt, |s| match s {
        Stmt::Block(list) => list,
        other => vec![other],
    })(input)
}

pub fn stmt(input: &str) -> IResult<&str, Stmt> {
    ws(alt((
        block_stmt,
        if_stmt,
        while_stmt,
        for_stmt,
        switch_stmt,
        value(Stmt::Break, pair(keyword("break"), ws(char(';')))),
        value(Stmt::Continue, pair(keyword("continue"), ws(char(';')))),
        return_stmt,
        decl_stmt,
        assign_list_stmt,
        map(terminated(expr, ws(char(';'))), Stmt::Expr),
        value(Stmt::Block(Vec::new()), ws(char(';'))),
    )))(input)
}

fn block_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        delimited(ws(char('{')), many0(stmt), ws(char('}'))),
        Stmt::Block,
    )(input)
}

fn if_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("if"),
            delimited(ws(char('(')), expr, ws(char(')'))),
            body,
            opt(preceded(keyword("else"), body)),
        )),
        |(_, cond, then_body, else_body)| Stmt::If {
            cond,
            then_body,
            else_body,
        },
    )(input)
}

fn while_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("while"),
            delimited(ws(char('(')), expr, ws(char(')'))),
            body,
        )),
        |(_, cond, body)| Stmt::While { cond, body },
    )(input)
}

fn for_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("for"),
            ws(char('(')),
            opt(for_init),
            ws(char(';')),
            opt(expr),
            ws(char(';')),
            opt(map(assignment, Stmt::Assign)),
            ws(char(')')),
            body,
        )),
        |(_, _, init, _, cond, _, update, _, body)| Stmt::For {
            init: init.map(Box::new),
            cond,
            update: update.map(Box::new),
            body,
        },
    )(input)
}

fn for_init(input: &str) -> IResult<&str, Stmt> {
    alt((
        map(
            tuple((type_tok, ws(name), opt(preceded(assign_op, expr)))),
            |(_, name, init)| Stmt::Decl {
                name: name.to_string(),
                init,
            },
        ),
        map(assignment, Stmt::Assign),
    ))(input)
}

fn switch_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            keyword("switch"),
            delimited(ws(char('(')), expr, ws(char(')'))),
            delimited(ws(char('{')), many0(switch_arm), ws(char('}'))),
        )),
        |(_, selector, arms)| Stmt::Switch { selector, arms },
    )(input)
}

fn switch_arm(input: &str) -> IResult<&str, SwitchArm> {
    map(
        pair(
            alt((
                map(
                    delimited(keyword("case"), ws(number), ws(char(':'))),
                    CaseLabel::Value,
                ),
                value(
                    CaseLabel::Default,
                    pair(keyword("default"), ws(char(':'))),
                ),
            )),
            many0(stmt),
        ),
        |(label, body)| SwitchArm { label, body },
    )(input)
}

fn return_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        delimited(keyword("return"), opt(expr), ws(char(';'))),
        Stmt::Return,
    )(input)
}

fn decl_stmt(input: &str) -> IResult<&str, Stmt> {
    map(
        tuple((
            type_tok,
            ws(name),
            opt(preceded(assign_op, expr)),
            ws(char(';')),
        )),
        |(_, name, init, _)| Stmt::Decl {
            name: name.to_string(),
            init,
        },
    )(input)
}

/// `a = e` or `a = e1, b = e2, ...` terminated by `;`.
fn assign_list_stmt(input: &str) -> IResult<&str, Stmt> {
    let (input, first) = assignment(input)?;
    let (input, mut rest) = many0(preceded(ws(char(',')), assignment))(input)?;
    let (input, _) = ws(char(';'))(input)?;
    if rest.is_empty() {
        Ok((input, Stmt::Assign(first)))
    } else {
        let mut list = vec![first];
        list.append(&mut rest);
        Ok((input, Stmt::CommaAssign(list)))
    }
}

// ---- top level ----------------------------------------------------------

fn top_decl(input: &str) -> IResult<&str, TopDecl> {
    map(
        tuple((
            type_tok,
            ws(name),
            opt(preceded(assign_op, int_literal)),
            ws(char(';')),
        )),
        |(_, name, init, _)| TopDecl {
            name: name.to_string(),
            init,
        },
    )(input)
}

fn function(input: &str) -> IResult<&str, Function> {
    map(
        tuple((
            type_tok,
            ws(name),
            ws(char('(')),
            opt(keyword("void")),
            ws(char(')')),
            delimited(ws(char('{')), many0(stmt), ws(char('}'))),
        )),
        |(_, name, _, _, _, body)| Function {
            name: name.to_string(),
            body,
        },
    )(input)
}

fn program(input: &str) -> IResult<&str, SourceProgram> {
    enum Item {
        Decl(TopDecl),
        Func(Function),
    }
    map(
        many0(ws(alt((
            map(function, Item::Func),
            map(top_decl, Item::Decl),
        )))),
        |items| {
            let mut prog = SourceProgram {
                decls: Vec::new(),
                functions: Vec::new(),
            };
            for item in items {
                match item {
                    Item::Decl(d) => prog.decls.push(d),
                    Item::Func(f) => prog.functions.push(f),
                }
            }
            prog
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declarations_and_main() {
        let src = "int LED0 = 0;\nint a0;\nint main() { LED0 = 1; }\n";
        let prog = parse(src).unwrap();
        assert_eq!(prog.decls.len(), 2);
        assert_eq!(prog.decls[0].init, Some(0));
        assert_eq!(prog.decls[1].init, None);
        let main = prog.main().unwrap();
        assert_eq!(main.body.len(), 1);
    }

    #[test]
    fn precedence_binds_and_over_or() {
        let (_, e) = expr("a || b && c").unwrap();
        assert_eq!(e.to_string(), "(a || (b && c))");
    }

    #[test]
    fn comparison_and_arithmetic() {
        let (_, e) = expr("a + 2 * b <= 7").unwrap();
        assert_eq!(e.to_string(), "((a + (2 * b)) <= 7)");
    }

    #[test]
    fn comments_are_whitespace() {
        let src = "int LED0 = 0; // led\nint a0; /* input */ int main() { }";
        let prog = parse(src).unwrap();
        assert_eq!(prog.decls.len(), 2);
        assert!(prog.main().is_some());
    }

    #[test]
    fn comma_assignment_statement() {
        let src = "int L0 = 0; int L1 = 0;\nint main() { L0 = 1, L1 = 0; }";
        let prog = parse(src).unwrap();
        match &prog.main().unwrap().body[0] {
            Stmt::CommaAssign(list) => assert_eq!(list.len(), 2),
            other => panic!("expected comma assignment, got {other:?}"),
        }
    }

    #[test]
    fn switch_with_fallthrough_and_default() {
        let src = "int L = 0; int sel;\nint main() {\n  switch (sel) {\n    case 0: L = 1; break;\n    case 1: L = 0;\n    default: break;\n  }\n}";
        let prog = parse(src).unwrap();
        match &prog.main().unwrap().body[0] {
            Stmt::Switch { arms, .. } => {
                assert_eq!(arms.len(), 3);
                assert_eq!(arms[0].label, CaseLabel::Value(0));
                assert_eq!(arms[2].label, CaseLabel::Default);
                // case 1 has no break: fall-through is preserved as-is.
                assert_eq!(arms[1].body.len(), 1);
            }
            other => panic!("expected switch, got {other:?}"),
        }
    }

    #[test]
    fn for_loop_with_decl_init() {
        let src = "int L = 0;\nint main() { for (int i = 0; i < 10; i = i + 1) { L = 1; } }";
        let prog = parse(src).unwrap();
        match &prog.main().unwrap().body[0] {
            Stmt::For {
                init: Some(init),
                cond: Some(_),
                update: Some(_),
                ..
            } => {
                assert!(matches!(&**init, Stmt::Decl { name, .. } if name == "i"));
            }
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn bitint_type_is_accepted() {
        let src = "_BitInt(1) LED = 0;\nint main() { }";
        let prog = parse(src).unwrap();
        assert_eq!(prog.decls[0].name, "LED");
    }

    #[test]
    fn pointer_syntax_is_a_parse_error() {
        let src = "int LED = 0;\nint main() { int *p; }";
        let err = parse(src).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn hex_literals() {
        let (_, e) = expr("0x1F").unwrap();
        assert_eq!(e, Expr::Num(31));
    }

    #[test]
    fn dangling_else_attaches_to_inner_if() {
        let src = "int L = 0; int a; int b;\nint main() { if (a) if (b) L = 1; else L = 0; }";
        let prog = parse(src).unwrap();
        match &prog.main().unwrap().body[0] {
            Stmt::If {
                else_body: None,
                then_body,
                ..
            } => match &then_body[0] {
                Stmt::If {
                    else_body: Some(_), ..
                } => {}
                other => panic!("inner if should own the else, got {other:?}"),
            },
            other => panic!("expected if, got {other:?}"),
        }
    }
}
