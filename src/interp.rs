//! Reference evaluator for the intermediate form
//!
//! Executes a [`Function`] directly over call arguments, following the same
//! typing rules as the emitted C: integer arithmetic on `int64_t`, `float`
//! arithmetic when an `f32` operand meets integers or other `f32` values,
//! `double` otherwise, and truncation on float-to-integer stores. Every
//! memory access is bounds checked.
//!
//! This is a verification tool, never a fallback for native execution.

use std::collections::HashMap;

use crate::error::{SpecializeError, SpecializeResult};
use crate::ir::{BinOp, Constant, Expr, Function, ParamType, Stmt};
use crate::signature::{Arg, ElementType};

/// A runtime value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    fn as_i64(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::F32(v) => v as i64,
            Value::F64(v) => v as i64,
        }
    }

    fn as_f32(self) -> f32 {
        match self {
            Value::Int(v) => v as f32,
            Value::F32(v) => v,
            Value::F64(v) => v as f32,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
        }
    }

    fn cast(self, ty: ElementType) -> Value {
        match ty {
            ElementType::I32 => Value::Int(self.as_i64() as i32 as i64),
            ElementType::I64 => Value::Int(self.as_i64()),
            ElementType::F32 => Value::F32(self.as_f32()),
            ElementType::F64 => Value::F64(self.as_f64()),
        }
    }
}

/// A bound array parameter
struct Buffer {
    ptr: *mut u8,
    elem: ElementType,
    len: usize,
    writable: bool,
}

impl Buffer {
    fn check(&self, array: &str, offset: i64) -> SpecializeResult<usize> {
        usize::try_from(offset)
            .ok()
            .filter(|offset| *offset < self.len)
            .ok_or_else(|| {
                SpecializeError::mismatch(format!(
                    "offset {} is out of bounds for `{}` of {} elements",
                    offset, array, self.len
                ))
            })
    }

    fn read(&self, array: &str, offset: i64) -> SpecializeResult<Value> {
        let offset = self.check(array, offset)?;
        // SAFETY: the offset is within the array the pointer was borrowed from
        let value = unsafe {
            match self.elem {
                ElementType::I32 => Value::Int(*(self.ptr as *const i32).add(offset) as i64),
                ElementType::I64 => Value::Int(*(self.ptr as *const i64).add(offset)),
                ElementType::F32 => Value::F32(*(self.ptr as *const f32).add(offset)),
                ElementType::F64 => Value::F64(*(self.ptr as *const f64).add(offset)),
            }
        };
        Ok(value)
    }

    fn write(&self, array: &str, offset: i64, value: Value) -> SpecializeResult<()> {
        if !self.writable {
            return Err(SpecializeError::mismatch(format!(
                "`{}` is written but was passed as a read-only input",
                array
            )));
        }
        let offset = self.check(array, offset)?;
        // SAFETY: the offset is in bounds and the array was borrowed mutably
        unsafe {
            match self.elem {
                ElementType::I32 => *(self.ptr as *mut i32).add(offset) = value.as_i64() as i32,
                ElementType::I64 => *(self.ptr as *mut i64).add(offset) = value.as_i64(),
                ElementType::F32 => *(self.ptr as *mut f32).add(offset) = value.as_f32(),
                ElementType::F64 => *(self.ptr as *mut f64).add(offset) = value.as_f64(),
            }
        }
        Ok(())
    }
}

struct Interpreter {
    buffers: HashMap<String, Buffer>,
    scalars: HashMap<String, Value>,
}

/// Run `function` over `args`, writing outputs in place
pub fn evaluate(function: &Function, args: &mut [Arg<'_>]) -> SpecializeResult<()> {
    if args.len() != function.params.len() {
        return Err(SpecializeError::mismatch(format!(
            "`{}` takes {} arguments, got {}",
            function.name,
            function.params.len(),
            args.len()
        )));
    }

    let mut interp = Interpreter {
        buffers: HashMap::new(),
        scalars: HashMap::new(),
    };

    for (param, arg) in function.params.iter().zip(args.iter()) {
        match (&param.ty, arg) {
            (ParamType::Array { elem, dims }, Arg::Array(array))
                if array.elem() == *elem && array.dims() == dims.as_slice() =>
            {
                interp.buffers.insert(
                    param.name.clone(),
                    Buffer {
                        ptr: array.as_mut_ptr(),
                        elem: *elem,
                        len: array.len(),
                        writable: array.is_writable(),
                    },
                );
            }
            (ParamType::Scalar(ElementType::I64), Arg::Int(v)) => {
                interp.scalars.insert(param.name.clone(), Value::Int(*v));
            }
            (ParamType::Scalar(ElementType::F64), Arg::Float(v)) => {
                interp.scalars.insert(param.name.clone(), Value::F64(*v));
            }
            (ty, _) => {
                return Err(SpecializeError::mismatch(format!(
                    "argument for `{}` does not match parameter type {}",
                    param.name, ty
                )))
            }
        }
    }

    let mut locals = HashMap::new();
    interp.exec_block(&function.body, &mut locals)
}

impl Interpreter {
    fn exec_block(&self, stmts: &[Stmt], locals: &mut HashMap<String, Value>) -> SpecializeResult<()> {
        for stmt in stmts {
            match stmt {
                Stmt::Loop(l) => {
                    let start = self.eval(&l.start, locals)?.as_i64();
                    let end = self.eval(&l.end, locals)?.as_i64();
                    let step = l.step.max(1);
                    let mut i = start;
                    while i < end {
                        locals.insert(l.var.clone(), Value::Int(i));
                        self.exec_block(&l.body, locals)?;
                        i += step;
                    }
                }
                Stmt::Assign { name, ty, value } => {
                    let value = self.eval(value, locals)?.cast(*ty);
                    locals.insert(name.clone(), value);
                }
                Stmt::Store {
                    array,
                    offset,
                    value,
                } => {
                    let offset = self.eval(offset, locals)?.as_i64();
                    let value = self.eval(value, locals)?;
                    self.buffer(array)?.write(array, offset, value)?;
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, locals: &HashMap<String, Value>) -> SpecializeResult<Value> {
        match expr {
            Expr::Const(Constant::Int(v)) => Ok(Value::Int(*v)),
            Expr::Const(Constant::Float(v)) => Ok(Value::F64(*v)),
            Expr::Var(name) => locals
                .get(name)
                .or_else(|| self.scalars.get(name))
                .copied()
                .ok_or_else(|| SpecializeError::unsupported(format!("unbound name `{}`", name))),
            Expr::Load { array, offset } => {
                let offset = self.eval(offset, locals)?.as_i64();
                self.buffer(array)?.read(array, offset)
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, locals)?;
                let rhs = self.eval(rhs, locals)?;
                binary(*op, lhs, rhs)
            }
            Expr::Neg(inner) => Ok(match self.eval(inner, locals)? {
                Value::Int(v) => Value::Int(v.wrapping_neg()),
                Value::F32(v) => Value::F32(-v),
                Value::F64(v) => Value::F64(-v),
            }),
            Expr::Call { func, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, locals).map(Value::as_f64))
                    .collect::<SpecializeResult<Vec<_>>>()?;
                intrinsic(func, &args).map(Value::F64)
            }
            Expr::Cast { ty, value } => Ok(self.eval(value, locals)?.cast(*ty)),
        }
    }

    fn buffer(&self, array: &str) -> SpecializeResult<&Buffer> {
        self.buffers
            .get(array)
            .ok_or_else(|| SpecializeError::unsupported(format!("unknown array `{}`", array)))
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value) -> SpecializeResult<Value> {
    let value = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
            BinOp::Add => a.wrapping_add(b),
            BinOp::Sub => a.wrapping_sub(b),
            BinOp::Mul => a.wrapping_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(SpecializeError::mismatch("integer division by zero"));
                }
                a.wrapping_div(b)
            }
            BinOp::Min => a.min(b),
        }),
        (Value::F64(_), _) | (_, Value::F64(_)) => {
            Value::F64(float_op(op, lhs.as_f64(), rhs.as_f64()))
        }
        _ => Value::F32(float_op(op, lhs.as_f32(), rhs.as_f32())),
    };
    Ok(value)
}

fn float_op<T>(op: BinOp, a: T, b: T) -> T
where
    T: std::ops::Add<Output = T>
        + std::ops::Sub<Output = T>
        + std::ops::Mul<Output = T>
        + std::ops::Div<Output = T>
        + PartialOrd,
{
    match op {
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
    }
}

fn intrinsic(func: &str, args: &[f64]) -> SpecializeResult<f64> {
    let value = match (func, args) {
        ("exp", [x]) => x.exp(),
        ("log", [x]) => x.ln(),
        ("sqrt", [x]) => x.sqrt(),
        ("tanh", [x]) => x.tanh(),
        ("fabs", [x]) => x.abs(),
        ("floor", [x]) => x.floor(),
        ("ceil", [x]) => x.ceil(),
        ("fmax", [x, y]) => x.max(*y),
        ("fmin", [x, y]) => x.min(*y),
        ("pow", [x, y]) => x.powf(*y),
        _ => {
            return Err(SpecializeError::unsupported(format!(
                "unknown intrinsic `{}` with {} arguments",
                func,
                args.len()
            )))
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Loop, Param};
    use ndarray::{Array1, Array2};
    use pretty_assertions::assert_eq;

    fn fill(dims: &[usize], elem: ElementType, value: Expr) -> Function {
        let vars: Vec<String> = (0..dims.len()).map(|k| format!("i{}", k)).collect();
        let mut body = vec![Stmt::Store {
            array: "out".to_string(),
            offset: crate::translate::linearize(&vars, dims),
            value,
        }];
        for (var, extent) in vars.iter().zip(dims).rev() {
            body = vec![Stmt::Loop(Loop::counted(var.clone(), *extent, body))];
        }
        Function {
            name: "fill".to_string(),
            params: vec![Param {
                name: "out".to_string(),
                ty: ParamType::Array {
                    elem,
                    dims: dims.to_vec(),
                },
            }],
            body,
        }
    }

    #[test]
    fn test_fill_writes_every_element() {
        let function = fill(&[3, 4], ElementType::F64, Expr::float(2.5));
        let mut out = Array2::<f64>::zeros((3, 4));
        evaluate(&function, &mut [Arg::output(&mut out)]).unwrap();
        assert_eq!(out, Array2::from_elem((3, 4), 2.5));
    }

    #[test]
    fn test_float_to_int_store_truncates() {
        let function = fill(&[2], ElementType::I32, Expr::float(-2.75));
        let mut out = Array1::<i32>::zeros(2);
        evaluate(&function, &mut [Arg::output(&mut out)]).unwrap();
        assert_eq!(out.to_vec(), vec![-2, -2]);
    }

    #[test]
    fn test_out_of_bounds_store_is_an_error() {
        let mut function = fill(&[4], ElementType::F32, Expr::float(1.0));
        let Stmt::Loop(l) = &mut function.body[0] else {
            panic!("Expected a loop");
        };
        l.end = Expr::int(5);
        let mut out = Array1::<f32>::zeros(4);
        assert!(evaluate(&function, &mut [Arg::output(&mut out)]).is_err());
    }

    #[test]
    fn test_read_only_store_is_an_error() {
        let function = fill(&[4], ElementType::F32, Expr::float(1.0));
        let out = Array1::<f32>::zeros(4);
        assert!(matches!(
            evaluate(&function, &mut [Arg::input(&out)]),
            Err(SpecializeError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn test_argument_types_must_match() {
        let function = fill(&[4], ElementType::F32, Expr::float(1.0));
        let mut wrong = Array1::<f64>::zeros(4);
        assert!(evaluate(&function, &mut [Arg::output(&mut wrong)]).is_err());
        assert!(evaluate(&function, &mut [Arg::Float(1.0)]).is_err());
        assert!(evaluate(&function, &mut []).is_err());
    }

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(binary(BinOp::Div, Value::Int(7), Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(binary(BinOp::Div, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(-3));
        assert_eq!(
            binary(BinOp::Add, Value::F32(0.5), Value::Int(1)).unwrap(),
            Value::F32(1.5)
        );
        assert_eq!(
            binary(BinOp::Mul, Value::F32(0.5), Value::F64(3.0)).unwrap(),
            Value::F64(1.5)
        );
        assert_eq!(binary(BinOp::Min, Value::Int(70), Value::Int(64)).unwrap(), Value::Int(64));
        assert!(binary(BinOp::Div, Value::Int(1), Value::Int(0)).is_err());
    }

    #[test]
    fn test_intrinsics() {
        assert_eq!(intrinsic("fmax", &[-1.0, 0.0]).unwrap(), 0.0);
        assert_eq!(intrinsic("sqrt", &[16.0]).unwrap(), 4.0);
        assert!(intrinsic("sigmoid", &[0.0]).is_err());
        assert!(intrinsic("exp", &[0.0, 1.0]).is_err());
    }
}
