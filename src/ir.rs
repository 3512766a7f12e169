//! Intermediate form produced by the translator
//!
//! An [`Function`] is fully specialized: every array extent and loop bound
//! in it is a literal taken from one signature. Passes consume a function
//! and return a new one; nothing is mutated in place.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signature::{join_dims, ElementType};

/// A specialized function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

impl Function {
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Whether any loop carries the parallel marker
    pub fn has_parallel_loop(&self) -> bool {
        fn any_parallel(stmts: &[Stmt]) -> bool {
            stmts.iter().any(|s| match s {
                Stmt::Loop(l) => l.parallel || any_parallel(&l.body),
                _ => false,
            })
        }
        any_parallel(&self.body)
    }
}

/// A typed parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
}

/// Parameter types: arrays carry their baked shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamType {
    Array { elem: ElementType, dims: Vec<usize> },
    Scalar(ElementType),
}

impl ParamType {
    pub fn elem(&self) -> ElementType {
        match self {
            ParamType::Array { elem, .. } | ParamType::Scalar(elem) => *elem,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Array { elem, dims } => write!(f, "{}[{}]*", elem, join_dims(dims)),
            ParamType::Scalar(elem) => write!(f, "{}", elem),
        }
    }
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Loop(Loop),
    /// Declare and assign a typed scalar local
    Assign {
        name: String,
        ty: ElementType,
        value: Expr,
    },
    /// Indexed write: `array[offset] = value`
    Store {
        array: String,
        offset: Expr,
        value: Expr,
    },
}

/// A counted loop over a 64-bit induction variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loop {
    pub var: String,
    pub start: Expr,
    /// Exclusive upper bound
    pub end: Expr,
    pub step: i64,
    /// Iterations may run on separate threads
    pub parallel: bool,
    pub body: Vec<Stmt>,
}

impl Loop {
    /// `for var in 0..extent`
    pub fn counted(var: impl Into<String>, extent: usize, body: Vec<Stmt>) -> Self {
        Self {
            var: var.into(),
            start: Expr::int(0),
            end: Expr::int(extent as i64),
            step: 1,
            parallel: false,
            body,
        }
    }

    /// Extent when both bounds are literals
    pub fn constant_extent(&self) -> Option<i64> {
        match (&self.start, &self.end) {
            (Expr::Const(Constant::Int(start)), Expr::Const(Constant::Int(end))) => {
                Some(end - start)
            }
            _ => None,
        }
    }
}

/// Literal values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Const(Constant),
    Var(String),
    /// Indexed read: `array[offset]`
    Load { array: String, offset: Box<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
    /// Math intrinsic call
    Call { func: String, args: Vec<Expr> },
    Cast { ty: ElementType, value: Box<Expr> },
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Const(Constant::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Expr::Const(Constant::Float(value))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn load(array: impl Into<String>, offset: Expr) -> Self {
        Expr::Load {
            array: array.into(),
            offset: Box::new(offset),
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Const(_))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(Constant::Int(v)) => write!(f, "{}", v),
            Expr::Const(Constant::Float(v)) => write!(f, "{:?}", v),
            Expr::Var(name) => write!(f, "{}", name),
            Expr::Load { array, offset } => write!(f, "{}[{}]", array, offset),
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Add => write!(f, "({} + {})", lhs, rhs),
                BinOp::Sub => write!(f, "({} - {})", lhs, rhs),
                BinOp::Mul => write!(f, "({} * {})", lhs, rhs),
                BinOp::Div => write!(f, "({} / {})", lhs, rhs),
                BinOp::Min => write!(f, "min({}, {})", lhs, rhs),
            },
            Expr::Neg(inner) => write!(f, "-{}", inner),
            Expr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", func, args.join(", "))
            }
            Expr::Cast { ty, value } => write!(f, "({}){}", ty, value),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        writeln!(f, "fn {}({}) {{", self.name, params.join(", "))?;
        write_block(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt], depth: usize) -> fmt::Result {
    let pad = "    ".repeat(depth);
    for stmt in stmts {
        match stmt {
            Stmt::Loop(l) => {
                let marker = if l.parallel { "parallel " } else { "" };
                writeln!(
                    f,
                    "{}{}for {} in {}..{} step {} {{",
                    pad, marker, l.var, l.start, l.end, l.step
                )?;
                write_block(f, &l.body, depth + 1)?;
                writeln!(f, "{}}}", pad)?;
            }
            Stmt::Assign { name, ty, value } => {
                writeln!(f, "{}let {}: {} = {};", pad, name, ty, value)?;
            }
            Stmt::Store {
                array,
                offset,
                value,
            } => {
                writeln!(f, "{}{}[{}] = {};", pad, array, offset, value)?;
            }
        }
    }
    Ok(())
}
