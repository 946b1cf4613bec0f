use std::fmt;

use websheet_core::Scalar;

/// Source location of a node: owning cell label and byte span
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Loc {
    pub cell: String,
    pub start: usize,
    pub end: usize,
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.cell, self.start, self.end)
    }
}

/// A located formula node
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub loc: Loc,
}

/// Abstract Syntax Tree node kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Scalar),
    Ident(String),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },

    List(Vec<Expr>),
    Tuple(Vec<(String, Expr)>),

    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },

    // l.k
    Select {
        target: Box<Expr>,
        key: Selector,
    },

    // l{k1, k2}
    Project {
        target: Box<Expr>,
        keys: Vec<Selector>,
    },

    // {expr for v1 in s1, v2 in s2 when cond}
    Generate {
        expr: Box<Expr>,
        bindings: Vec<(String, Expr)>,
        cond: Option<Box<Expr>>,
    },

    // l[pred]
    Filter {
        target: Box<Expr>,
        pred: Box<Expr>,
    },

    Call {
        name: String,
        args: Vec<Expr>,
    },
}

/// Key of a Select/Project: a column or field name, or a row/list index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Name(String),
    Index(usize),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Get the precedence of this operator (higher = binds tighter)
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::NotIn => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

impl Expr {
    pub fn new(kind: ExprKind, loc: Loc) -> Self {
        Expr { kind, loc }
    }

    /// Create an unlocated literal
    pub fn literal(value: Scalar) -> Self {
        Expr::new(ExprKind::Literal(value), Loc::default())
    }

    /// Create an unlocated identifier
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::new(ExprKind::Ident(name.into()), Loc::default())
    }

    /// Visit this node and every descendant
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => {}
            ExprKind::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            ExprKind::Unary { operand, .. } => operand.walk(f),
            ExprKind::List(items) => items.iter().for_each(|e| e.walk(f)),
            ExprKind::Tuple(fields) => fields.iter().for_each(|(_, e)| e.walk(f)),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(f);
                then.walk(f);
                otherwise.walk(f);
            }
            ExprKind::Select { target, .. } | ExprKind::Project { target, .. } => target.walk(f),
            ExprKind::Generate {
                expr,
                bindings,
                cond,
            } => {
                expr.walk(f);
                bindings.iter().for_each(|(_, e)| e.walk(f));
                if let Some(cond) = cond {
                    cond.walk(f);
                }
            }
            ExprKind::Filter { target, pred } => {
                target.walk(f);
                pred.walk(f);
            }
            ExprKind::Call { args, .. } => args.iter().for_each(|e| e.walk(f)),
        }
    }

    /// Mutable variant of [`Expr::walk`]
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        f(self);
        match &mut self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => {}
            ExprKind::Binary { left, right, .. } => {
                left.walk_mut(f);
                right.walk_mut(f);
            }
            ExprKind::Unary { operand, .. } => operand.walk_mut(f),
            ExprKind::List(items) => items.iter_mut().for_each(|e| e.walk_mut(f)),
            ExprKind::Tuple(fields) => fields.iter_mut().for_each(|(_, e)| e.walk_mut(f)),
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => {
                cond.walk_mut(f);
                then.walk_mut(f);
                otherwise.walk_mut(f);
            }
            ExprKind::Select { target, .. } | ExprKind::Project { target, .. } => {
                target.walk_mut(f)
            }
            ExprKind::Generate {
                expr,
                bindings,
                cond,
            } => {
                expr.walk_mut(f);
                bindings.iter_mut().for_each(|(_, e)| e.walk_mut(f));
                if let Some(cond) = cond {
                    cond.walk_mut(f);
                }
            }
            ExprKind::Filter { target, pred } => {
                target.walk_mut(f);
                pred.walk_mut(f);
            }
            ExprKind::Call { args, .. } => args.iter_mut().for_each(|e| e.walk_mut(f)),
        }
    }

    /// Rewrite the cell label of every node (after a row shift)
    pub fn relabel(&mut self, cell: &str) {
        self.walk_mut(&mut |e| {
            if e.loc.cell != cell {
                e.loc.cell = cell.to_string();
            }
        });
    }

    /// Whether the identifier `name` appears anywhere in the tree
    pub fn mentions(&self, name: &str) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(&e.kind, ExprKind::Ident(id) if id == name) {
                found = true;
            }
        });
        found
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(Scalar::Str(s)) => write!(f, "{:?}", s),
            ExprKind::Literal(s) => write!(f, "{}", s),
            ExprKind::Ident(name) => write!(f, "{}", name),
            ExprKind::Binary { op, left, right } => write!(f, "({} {} {})", left, op, right),
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Neg => write!(f, "-{}", operand),
                UnaryOp::Not => write!(f, "!{}", operand),
            },
            ExprKind::List(items) => {
                write!(f, "[")?;
                write_joined(f, items.iter())?;
                write!(f, "]")
            }
            ExprKind::Tuple(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            ExprKind::If {
                cond,
                then,
                otherwise,
            } => write!(f, "if {} then {} else {}", cond, then, otherwise),
            ExprKind::Select { target, key } => write!(f, "{}.{}", target, key),
            ExprKind::Project { target, keys } => {
                write!(f, "{}{{", target)?;
                write_joined(f, keys.iter())?;
                write!(f, "}}")
            }
            ExprKind::Generate {
                expr,
                bindings,
                cond,
            } => {
                write!(f, "{{{} for ", expr)?;
                for (i, (name, source)) in bindings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} in {}", name, source)?;
                }
                if let Some(cond) = cond {
                    write!(f, " when {}", cond)?;
                }
                write!(f, "}}")
            }
            ExprKind::Filter { target, pred } => write!(f, "{}[{}]", target, pred),
            ExprKind::Call { name, args } => {
                write!(f, "{}(", name)?;
                write_joined(f, args.iter())?;
                write!(f, ")")
            }
        }
    }
}

fn write_joined<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = T>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Name(name) => write!(f, "{}", name),
            Selector::Index(i) => write!(f, "{}", i),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOp::Or => write!(f, "||"),
            BinaryOp::And => write!(f, "&&"),
            BinaryOp::Eq => write!(f, "=="),
            BinaryOp::Ne => write!(f, "!="),
            BinaryOp::Lt => write!(f, "<"),
            BinaryOp::Le => write!(f, "<="),
            BinaryOp::Gt => write!(f, ">"),
            BinaryOp::Ge => write!(f, ">="),
            BinaryOp::In => write!(f, "in"),
            BinaryOp::NotIn => write!(f, "not in"),
            BinaryOp::Add => write!(f, "+"),
            BinaryOp::Sub => write!(f, "-"),
            BinaryOp::Mul => write!(f, "*"),
            BinaryOp::Div => write!(f, "/"),
            BinaryOp::Mod => write!(f, "%"),
        }
    }
}
