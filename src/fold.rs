//! Constant folding over the intermediate form
//!
//! Folds arithmetic whose operands are literals, as produced by offset
//! linearization and shape reads. Integer arithmetic is folded only when it
//! neither overflows nor divides by zero; such expressions are left for the
//! native code to evaluate.

use crate::ir::{BinOp, Constant, Expr, Function, Loop, Stmt};
use crate::signature::ElementType;

/// Fold every expression of a function
pub fn fold_constants(function: Function) -> Function {
    Function {
        body: function.body.into_iter().map(fold_stmt).collect(),
        ..function
    }
}

fn fold_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Loop(l) => Stmt::Loop(Loop {
            start: fold_expr(l.start),
            end: fold_expr(l.end),
            body: l.body.into_iter().map(fold_stmt).collect(),
            ..l
        }),
        Stmt::Assign { name, ty, value } => Stmt::Assign {
            name,
            ty,
            value: fold_expr(value),
        },
        Stmt::Store {
            array,
            offset,
            value,
        } => Stmt::Store {
            array,
            offset: fold_expr(offset),
            value: fold_expr(value),
        },
    }
}

pub fn fold_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let lhs = fold_expr(*lhs);
            let rhs = fold_expr(*rhs);
            if let (Expr::Const(a), Expr::Const(b)) = (&lhs, &rhs) {
                if let Some(c) = fold_binary(op, *a, *b) {
                    return Expr::Const(c);
                }
            }
            let unit = Expr::int(1);
            if op == BinOp::Mul && rhs == unit {
                lhs
            } else if op == BinOp::Mul && lhs == unit {
                rhs
            } else {
                Expr::binary(op, lhs, rhs)
            }
        }
        Expr::Neg(inner) => match fold_expr(*inner) {
            Expr::Const(Constant::Int(v)) => match v.checked_neg() {
                Some(n) => Expr::int(n),
                None => Expr::Neg(Box::new(Expr::int(v))),
            },
            Expr::Const(Constant::Float(v)) => Expr::float(-v),
            other => Expr::Neg(Box::new(other)),
        },
        Expr::Cast { ty, value } => match (ty, fold_expr(*value)) {
            (ElementType::I64, Expr::Const(Constant::Int(v))) => Expr::int(v),
            (ElementType::F64, Expr::Const(Constant::Int(v))) => Expr::float(v as f64),
            (ElementType::F64, Expr::Const(Constant::Float(v))) => Expr::float(v),
            (ty, value) => Expr::Cast {
                ty,
                value: Box::new(value),
            },
        },
        Expr::Load { array, offset } => Expr::Load {
            array,
            offset: Box::new(fold_expr(*offset)),
        },
        Expr::Call { func, args } => Expr::Call {
            func,
            args: args.into_iter().map(fold_expr).collect(),
        },
        other => other,
    }
}

fn fold_binary(op: BinOp, a: Constant, b: Constant) -> Option<Constant> {
    match (a, b) {
        (Constant::Int(a), Constant::Int(b)) => {
            let value = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Min => Some(a.min(b)),
            };
            value.map(Constant::Int)
        }
        (a, b) => {
            let (a, b) = (as_f64(a), as_f64(b));
            let value = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Min => {
                    if a < b {
                        a
                    } else {
                        b
                    }
                }
            };
            Some(Constant::Float(value))
        }
    }
}

fn as_f64(c: Constant) -> f64 {
    match c {
        Constant::Int(v) => v as f64,
        Constant::Float(v) => v,
    }
}
