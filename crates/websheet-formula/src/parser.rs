//! Nom-based formula parser.
//!
//! Parses formula source straight into a located AST. Node spans are recorded
//! as remaining-input lengths while parsing and turned into byte offsets once
//! the whole source has been consumed.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, one_of, satisfy},
    combinator::{map, map_res, not, opt, recognize, value},
    error::ErrorKind,
    multi::{fold_many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use thiserror::Error;

use crate::ast::{BinaryOp, Expr, ExprKind, Loc, Selector, UnaryOp};
use websheet_core::{Scalar, SheetError};

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{cell}:{position}: {message}")]
pub struct ParseError {
    pub cell: String,
    pub message: String,
    pub position: usize,
}

impl From<ParseError> for SheetError {
    fn from(e: ParseError) -> Self {
        SheetError::Parse {
            cell: e.cell,
            position: e.position,
            message: e.message,
        }
    }
}

const KEYWORDS: &[&str] = &[
    "true", "false", "null", "if", "then", "else", "for", "in", "not", "when",
];

// =============================================================================
// Helper Combinators
// =============================================================================

/// Skip whitespace
fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn fail<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

// Span from the remaining input at node start and end; see `finish`
fn span(start: usize, end: usize) -> Loc {
    Loc {
        cell: String::new(),
        start,
        end,
    }
}

/// Attach a span to the node kind produced by `inner`
fn located<'a, F>(mut inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, Expr>
where
    F: FnMut(&'a str) -> IResult<&'a str, ExprKind>,
{
    move |input: &'a str| {
        let (rest, kind) = inner(input)?;
        Ok((rest, Expr::new(kind, span(input.len(), rest.len()))))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Match a keyword at a word boundary
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    terminated(tag(kw), not(satisfy(is_ident_char)))
}

// =============================================================================
// Token Parsers
// =============================================================================

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    let (rest, name) = recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(input)?;
    if KEYWORDS.contains(&name) {
        return fail(input, ErrorKind::Tag);
    }
    Ok((rest, name))
}

/// Parse a decimal number (integer or float)
fn parse_number(input: &str) -> IResult<&str, Scalar> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    match text.parse::<f64>() {
        Ok(n) => Ok((rest, Scalar::Number(n))),
        Err(_) => fail(input, ErrorKind::Float),
    }
}

/// Parse a single- or double-quoted string with backslash escapes
fn parse_string(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return fail(input, ErrorKind::Char),
    };
    let mut result = String::new();
    let mut chars = input[1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((&input[i + 2..], result)),
            '\\' => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, 'r')) => result.push('\r'),
                Some((_, other)) => result.push(other),
                None => break,
            },
            c => result.push(c),
        }
    }

    // Unterminated: no other alternative can succeed from here
    Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::Char)))
}

fn parse_literal(input: &str) -> IResult<&str, Scalar> {
    alt((
        value(Scalar::Bool(true), keyword("true")),
        value(Scalar::Bool(false), keyword("false")),
        value(Scalar::Null, keyword("null")),
        parse_number,
        map(parse_string, Scalar::Str),
    ))(input)
}

fn parse_name(input: &str) -> IResult<&str, String> {
    alt((map(parse_identifier, |s: &str| s.to_string()), parse_string))(input)
}

fn parse_selector(input: &str) -> IResult<&str, Selector> {
    alt((
        map(parse_name, Selector::Name),
        map_res(digit1, |d: &str| d.parse::<usize>().map(Selector::Index)),
    ))(input)
}

// =============================================================================
// Operator Parsers
// =============================================================================

fn parse_or_op(input: &str) -> IResult<&str, BinaryOp> {
    value(BinaryOp::Or, tag("||"))(input)
}

fn parse_and_op(input: &str) -> IResult<&str, BinaryOp> {
    value(BinaryOp::And, tag("&&"))(input)
}

fn parse_comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
        value(BinaryOp::In, keyword("in")),
        value(
            BinaryOp::NotIn,
            tuple((keyword("not"), multispace0, keyword("in"))),
        ),
    ))(input)
}

fn parse_additive_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Add, char('+')),
        value(BinaryOp::Sub, char('-')),
    ))(input)
}

fn parse_multiplicative_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Mul, char('*')),
        value(BinaryOp::Div, char('/')),
        value(BinaryOp::Mod, char('%')),
    ))(input)
}

// =============================================================================
// Expression Parsers (Precedence Climbing)
// =============================================================================

fn binary(start: usize, op: BinaryOp, left: Expr, right: Expr) -> Expr {
    let end = right.loc.end;
    Expr::new(
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
        span(start, end),
    )
}

/// One left-associative precedence level
fn binary_level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOp>,
) -> IResult<&'a str, Expr> {
    let (input, _) = multispace0(input)?;
    let start = input.len();
    let (input, init) = operand(input)?;

    fold_many0(
        pair(ws(operator), operand),
        move || init.clone(),
        move |acc, (op, rhs)| binary(start, op, acc, rhs),
    )(input)
}

fn parse_if(input: &str) -> IResult<&str, ExprKind> {
    let (input, _) = keyword("if")(input)?;
    let (input, cond) = parse_expression(input)?;
    let (input, _) = ws(keyword("then"))(input)?;
    let (input, then) = parse_expression(input)?;
    let (input, _) = ws(keyword("else"))(input)?;
    let (input, otherwise) = parse_expression(input)?;

    Ok((
        input,
        ExprKind::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
    ))
}

fn parse_list(input: &str) -> IResult<&str, ExprKind> {
    map(
        delimited(
            char('['),
            separated_list0(ws(char(',')), parse_expression),
            preceded(multispace0, char(']')),
        ),
        ExprKind::List,
    )(input)
}

fn parse_tuple_body(input: &str) -> IResult<&str, ExprKind> {
    map(
        terminated(
            separated_list1(
                ws(char(',')),
                pair(terminated(ws(parse_name), char(':')), parse_expression),
            ),
            preceded(multispace0, char('}')),
        ),
        ExprKind::Tuple,
    )(input)
}

fn parse_binding(input: &str) -> IResult<&str, (String, Expr)> {
    let (input, name) = ws(parse_identifier)(input)?;
    let (input, _) = keyword("in")(input)?;
    let (input, source) = parse_expression(input)?;
    Ok((input, (name.to_string(), source)))
}

fn parse_generate_body(input: &str) -> IResult<&str, ExprKind> {
    let (input, expr) = parse_expression(input)?;
    let (input, _) = ws(keyword("for"))(input)?;
    let (input, bindings) = separated_list1(ws(char(',')), parse_binding)(input)?;
    let (input, cond) = opt(preceded(ws(keyword("when")), parse_expression))(input)?;
    let (input, _) = preceded(multispace0, char('}'))(input)?;

    Ok((
        input,
        ExprKind::Generate {
            expr: Box::new(expr),
            bindings,
            cond: cond.map(Box::new),
        },
    ))
}

/// Parse `{}`, a tuple literal or a comprehension
fn parse_brace(input: &str) -> IResult<&str, ExprKind> {
    let (input, _) = char('{')(input)?;
    let (input, _) = multispace0(input)?;

    if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>('}')(input) {
        return Ok((rest, ExprKind::Tuple(Vec::new())));
    }

    alt((parse_tuple_body, parse_generate_body))(input)
}

/// Parse either a function call or a bare identifier
fn parse_call_or_identifier(input: &str) -> IResult<&str, ExprKind> {
    let (input, name) = parse_identifier(input)?;

    let args = preceded(
        multispace0,
        delimited(
            char('('),
            separated_list0(ws(char(',')), parse_expression),
            preceded(multispace0, char(')')),
        ),
    )(input);

    match args {
        Ok((rest, args)) => Ok((
            rest,
            ExprKind::Call {
                name: name.to_string(),
                args,
            },
        )),
        Err(nom::Err::Error(_)) => Ok((input, ExprKind::Ident(name.to_string()))),
        Err(e) => Err(e),
    }
}

/// Parse a primary expression (literals, constructors, calls, parentheses)
fn parse_primary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;

    alt((
        // Parenthesized expression
        delimited(char('('), parse_expression, preceded(multispace0, char(')'))),
        located(parse_if),
        located(map(parse_literal, ExprKind::Literal)),
        located(parse_list),
        located(parse_brace),
        located(parse_call_or_identifier),
    ))(input)
}

/// Parse postfix selectors: `.k`, `{k1, k2}` and `[pred]`
fn parse_postfix(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    let start = input.len();
    let (mut input, mut expr) = parse_primary(input)?;

    loop {
        let (rest, _) = multispace0(input)?;

        if let Ok((rest, key)) = preceded(pair(char('.'), multispace0), parse_selector)(rest) {
            let kind = ExprKind::Select {
                target: Box::new(expr),
                key,
            };
            expr = Expr::new(kind, span(start, rest.len()));
            input = rest;
            continue;
        }

        if let Ok((rest, keys)) = delimited(
            char('{'),
            separated_list1(ws(char(',')), ws(parse_selector)),
            char('}'),
        )(rest)
        {
            let kind = ExprKind::Project {
                target: Box::new(expr),
                keys,
            };
            expr = Expr::new(kind, span(start, rest.len()));
            input = rest;
            continue;
        }

        if let Ok((rest, pred)) = delimited(
            char('['),
            parse_expression,
            preceded(multispace0, char(']')),
        )(rest)
        {
            let kind = ExprKind::Filter {
                target: Box::new(expr),
                pred: Box::new(pred),
            };
            expr = Expr::new(kind, span(start, rest.len()));
            input = rest;
            continue;
        }

        break;
    }

    Ok((input, expr))
}

/// Parse a unary expression (prefix - or !)
fn parse_unary(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;

    alt((
        located(map(preceded(char('-'), parse_unary), |e| ExprKind::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(e),
        })),
        located(map(
            preceded(terminated(char('!'), not(char('='))), parse_unary),
            |e| ExprKind::Unary {
                op: UnaryOp::Not,
                operand: Box::new(e),
            },
        )),
        parse_postfix,
    ))(input)
}

fn parse_multiplicative(input: &str) -> IResult<&str, Expr> {
    binary_level(input, parse_unary, parse_multiplicative_op)
}

fn parse_additive(input: &str) -> IResult<&str, Expr> {
    binary_level(input, parse_multiplicative, parse_additive_op)
}

fn parse_comparison(input: &str) -> IResult<&str, Expr> {
    binary_level(input, parse_additive, parse_comparison_op)
}

fn parse_and(input: &str) -> IResult<&str, Expr> {
    binary_level(input, parse_comparison, parse_and_op)
}

fn parse_or(input: &str) -> IResult<&str, Expr> {
    binary_level(input, parse_and, parse_or_op)
}

/// Parse a complete expression
pub fn parse_expression(input: &str) -> IResult<&str, Expr> {
    let (input, _) = multispace0(input)?;
    parse_or(input)
}

// =============================================================================
// Public API
// =============================================================================

/// Compile the source of a value cell; blank source is `null`
pub fn parse_cell(source: &str, cell: &str) -> Result<Expr, ParseError> {
    parse_source(source, cell, Scalar::Null)
}

/// Compile the source of a permission slot; blank source allows
pub fn parse_permission(source: &str, cell: &str) -> Result<Expr, ParseError> {
    parse_source(source, cell, Scalar::Bool(true))
}

fn parse_source(source: &str, cell: &str, blank: Scalar) -> Result<Expr, ParseError> {
    let total = source.len();

    if source.trim().is_empty() {
        return Ok(Expr::new(
            ExprKind::Literal(blank),
            Loc {
                cell: cell.to_string(),
                start: 0,
                end: total,
            },
        ));
    }

    match parse_expression(source) {
        Ok((remaining, mut expr)) => {
            let remaining = remaining.trim_start();
            if !remaining.is_empty() {
                return Err(error_at(source, cell, total - remaining.len()));
            }
            finish(&mut expr, total, cell);
            Ok(expr)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(error_at(source, cell, total - e.input.len()))
        }
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            cell: cell.to_string(),
            message: "unexpected end of input".to_string(),
            position: total,
        }),
    }
}

// Turn remaining-length spans into offsets and stamp the cell label
fn finish(expr: &mut Expr, total: usize, cell: &str) {
    expr.walk_mut(&mut |e| {
        e.loc = Loc {
            cell: cell.to_string(),
            start: total - e.loc.start,
            end: total - e.loc.end,
        };
    });
}

fn error_at(source: &str, cell: &str, position: usize) -> ParseError {
    let message = match source[position..].chars().next() {
        Some(c) => format!("unexpected '{}'", c),
        None => "unexpected end of input".to_string(),
    };
    ParseError {
        cell: cell.to_string(),
        message,
        position,
    }
}

// =============================================================================
// Tests
// =============================================================================
