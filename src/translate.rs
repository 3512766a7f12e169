//! Translation of a checked kernel into a specialized intermediate function
//!
//! Given one call signature, every `for ... in P.indices()` loop becomes an
//! explicit loop nest over P's extents, every element access becomes a
//! row-major linear offset, metadata reads become literals and helper calls
//! are inlined. The result is then constant folded.

use std::collections::HashMap;

use crate::analyzer::CheckedKernel;
use crate::ast::{self, Statement};
use crate::error::{SpecializeError, SpecializeResult};
use crate::fold::fold_constants;
use crate::ir::{BinOp, Expr, Function, Loop, Param, ParamType, Stmt};
use crate::signature::{join_dims, ArgDescriptor, ElementType, Signature};

/// Row-major strides: the product of the extents after each axis
pub fn strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1];
    }
    strides
}

/// Linear offset of the element addressed by `vars` in an array of `dims`
pub fn linearize(vars: &[String], dims: &[usize]) -> Expr {
    vars.iter()
        .zip(strides(dims))
        .map(|(var, stride)| Expr::binary(BinOp::Mul, Expr::var(var), Expr::int(stride as i64)))
        .reduce(|offset, term| Expr::binary(BinOp::Add, offset, term))
        .unwrap_or_else(|| Expr::int(0))
}

/// Names in scope while translating one expression
struct Env<'a> {
    bindings: HashMap<String, (Expr, ElementType)>,
    loop_vars: &'a [String],
    dims: &'a [usize],
}

/// Translator from a checked kernel to [`Function`]
pub struct Translator<'a> {
    checked: &'a CheckedKernel,
    params: Vec<Param>,
}

impl<'a> Translator<'a> {
    /// Type the kernel parameters from a signature
    pub fn new(checked: &'a CheckedKernel, signature: &Signature) -> SpecializeResult<Self> {
        checked.interface.check_signature(signature)?;

        let params = checked
            .kernel
            .params
            .iter()
            .zip(&signature.args)
            .map(|(name, arg)| Param {
                name: name.clone(),
                ty: match arg {
                    ArgDescriptor::Array { dims, elem } => ParamType::Array {
                        elem: *elem,
                        dims: dims.clone(),
                    },
                    ArgDescriptor::Int(_) => ParamType::Scalar(ElementType::I64),
                    ArgDescriptor::Float(_) => ParamType::Scalar(ElementType::F64),
                },
            })
            .collect();

        Ok(Self { checked, params })
    }

    pub fn translate(self) -> SpecializeResult<Function> {
        let mut body = Vec::new();
        for stmt in &self.checked.kernel.body {
            if let Statement::For { targets, iter, body: loop_body } = stmt {
                body.push(self.translate_loop(targets, iter, loop_body)?);
            }
        }

        let function = Function {
            name: self.checked.kernel.name.clone(),
            params: self.params,
            body,
        };
        Ok(fold_constants(function))
    }

    fn translate_loop(
        &self,
        targets: &[String],
        iter: &ast::Expr,
        body: &[Statement],
    ) -> SpecializeResult<Stmt> {
        let iterated = match iter {
            ast::Expr::MethodCall { receiver, .. } => match receiver.as_ref() {
                ast::Expr::Variable(name) => name,
                _ => return Err(SpecializeError::unsupported("malformed loop iterator")),
            },
            _ => return Err(SpecializeError::unsupported("malformed loop iterator")),
        };
        let (_, dims) = self.array(iterated)?;

        let mut env = Env {
            bindings: targets
                .iter()
                .map(|v| (v.clone(), (Expr::var(v), ElementType::I64)))
                .collect(),
            loop_vars: targets,
            dims,
        };

        let mut stmts = Vec::new();
        for stmt in body {
            match stmt {
                Statement::Let { name, value } => {
                    let (value, ty) = self.translate_expr(value, &env)?;
                    stmts.push(Stmt::Assign {
                        name: name.clone(),
                        ty,
                        value,
                    });
                    env.bindings.insert(name.clone(), (Expr::var(name), ty));
                }
                Statement::Assign { target, value } => {
                    let array = match target {
                        ast::Expr::Index { base, .. } => match base.as_ref() {
                            ast::Expr::Variable(name) => name,
                            _ => return Err(SpecializeError::unsupported("malformed assignment")),
                        },
                        _ => return Err(SpecializeError::unsupported("malformed assignment")),
                    };
                    let (elem, _) = self.element_array(array, &env)?;
                    let (value, ty) = self.translate_expr(value, &env)?;
                    stmts.push(Stmt::Store {
                        array: array.clone(),
                        offset: linearize(targets, dims),
                        value: cast_to(value, ty, elem),
                    });
                }
                Statement::For { .. } => {
                    return Err(SpecializeError::unsupported("nested loops are not supported"))
                }
            }
        }

        let mut nest = stmts;
        for (var, extent) in targets.iter().zip(dims).rev() {
            nest = vec![Stmt::Loop(Loop::counted(var.clone(), *extent, nest))];
        }
        nest.pop()
            .ok_or_else(|| SpecializeError::unsupported("loop over a zero-dimensional array"))
    }

    fn translate_expr(&self, expr: &ast::Expr, env: &Env<'_>) -> SpecializeResult<(Expr, ElementType)> {
        match expr {
            ast::Expr::Int(v) => Ok((Expr::int(*v), ElementType::I64)),
            ast::Expr::Float(v) => Ok((Expr::float(*v), ElementType::F64)),

            ast::Expr::Variable(name) => {
                if let Some(bound) = env.bindings.get(name) {
                    return Ok(bound.clone());
                }
                match self.param(name)? {
                    ParamType::Scalar(ty) => Ok((Expr::var(name), *ty)),
                    ParamType::Array { .. } => Err(SpecializeError::unsupported(format!(
                        "array `{}` used as a scalar",
                        name
                    ))),
                }
            }

            ast::Expr::Index { base, indices } => match base.as_ref() {
                ast::Expr::Variable(name) => {
                    let (elem, _) = self.element_array(name, env)?;
                    Ok((Expr::load(name.clone(), linearize(env.loop_vars, env.dims)), elem))
                }
                ast::Expr::Attribute { base, .. } => {
                    let name = metadata_receiver(base)?;
                    let (_, dims) = self.array(name)?;
                    let axis = match indices.as_slice() {
                        [ast::Expr::Int(axis)] => *axis,
                        _ => return Err(SpecializeError::unsupported("malformed shape access")),
                    };
                    let extent = usize::try_from(axis)
                        .ok()
                        .and_then(|axis| dims.get(axis))
                        .ok_or_else(|| {
                            SpecializeError::mismatch(format!(
                                "`{}.shape[{}]` is out of range for an array of shape [{}]",
                                name,
                                axis,
                                join_dims(dims)
                            ))
                        })?;
                    Ok((Expr::int(*extent as i64), ElementType::I64))
                }
                _ => Err(SpecializeError::unsupported("unsupported indexed expression")),
            },

            ast::Expr::Attribute { base, name: attr } => {
                let name = metadata_receiver(base)?;
                let (_, dims) = self.array(name)?;
                let value = match attr.as_str() {
                    "size" => dims.iter().product::<usize>(),
                    "ndim" => dims.len(),
                    other => {
                        return Err(SpecializeError::unsupported(format!(
                            "unknown attribute `{}.{}`",
                            name, other
                        )))
                    }
                };
                Ok((Expr::int(value as i64), ElementType::I64))
            }

            ast::Expr::Call { func, args } => {
                if let Some(helper) = self.checked.helpers.get(func) {
                    let [arg] = args.as_slice() else {
                        return Err(SpecializeError::unsupported(format!(
                            "helper `{}` takes one argument",
                            func
                        )));
                    };
                    let (arg, ty) = self.translate_expr(arg, env)?;
                    let arg = cast_to(arg, ty, ElementType::F64);
                    let helper_env = Env {
                        bindings: HashMap::from([(helper.params[0].clone(), (arg, ElementType::F64))]),
                        loop_vars: env.loop_vars,
                        dims: env.dims,
                    };
                    return self.translate_expr(&helper.body, &helper_env);
                }

                let args = args
                    .iter()
                    .map(|arg| {
                        let (arg, ty) = self.translate_expr(arg, env)?;
                        Ok(if ty.is_float() { arg } else { cast_to(arg, ty, ElementType::F64) })
                    })
                    .collect::<SpecializeResult<Vec<_>>>()?;
                Ok((
                    Expr::Call {
                        func: func.clone(),
                        args,
                    },
                    ElementType::F64,
                ))
            }

            ast::Expr::Binary { op, lhs, rhs } => {
                let op = match op {
                    ast::BinOp::Add => BinOp::Add,
                    ast::BinOp::Sub => BinOp::Sub,
                    ast::BinOp::Mul => BinOp::Mul,
                    ast::BinOp::Div => BinOp::Div,
                    other => {
                        return Err(SpecializeError::unsupported(format!(
                            "unsupported binary operator `{}`",
                            other
                        )))
                    }
                };
                let (lhs, lt) = self.translate_expr(lhs, env)?;
                let (rhs, rt) = self.translate_expr(rhs, env)?;
                let ty = lt.promote(rt);
                if ty == ElementType::I32 {
                    let (lhs, rhs) = (widen(lhs, lt), widen(rhs, rt));
                    return Ok((Expr::binary(op, lhs, rhs), ElementType::I64));
                }
                Ok((Expr::binary(op, lhs, rhs), ty))
            }

            ast::Expr::Neg(inner) => {
                let (inner, ty) = self.translate_expr(inner, env)?;
                if ty == ElementType::I32 {
                    return Ok((Expr::Neg(Box::new(widen(inner, ty))), ElementType::I64));
                }
                Ok((Expr::Neg(Box::new(inner)), ty))
            }

            ast::Expr::MethodCall { method, .. } => Err(SpecializeError::unsupported(format!(
                "method call `.{}()` outside a loop header",
                method
            ))),
        }
    }

    fn param(&self, name: &str) -> SpecializeResult<&ParamType> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.ty)
            .ok_or_else(|| SpecializeError::unsupported(format!("unknown name `{}`", name)))
    }

    fn array(&self, name: &str) -> SpecializeResult<(ElementType, &[usize])> {
        match self.param(name)? {
            ParamType::Array { elem, dims } => Ok((*elem, dims)),
            ParamType::Scalar(_) => Err(SpecializeError::mismatch(format!(
                "parameter `{}` must be an array",
                name
            ))),
        }
    }

    /// An array accessed element-wise must match the iterated shape
    fn element_array(&self, name: &str, env: &Env<'_>) -> SpecializeResult<(ElementType, &[usize])> {
        let (elem, dims) = self.array(name)?;
        if dims != env.dims {
            return Err(SpecializeError::mismatch(format!(
                "`{}` has shape [{}] but the loop iterates over [{}]",
                name,
                join_dims(dims),
                join_dims(env.dims)
            )));
        }
        Ok((elem, dims))
    }
}

fn metadata_receiver(base: &ast::Expr) -> SpecializeResult<&String> {
    match base {
        ast::Expr::Variable(name) => Ok(name),
        _ => Err(SpecializeError::unsupported(
            "array metadata can only be read from a parameter",
        )),
    }
}

/// Integer arithmetic never runs on `int32_t`, where overflow is undefined
fn widen(value: Expr, from: ElementType) -> Expr {
    cast_to(value, from, ElementType::I64)
}

fn cast_to(value: Expr, from: ElementType, to: ElementType) -> Expr {
    if from == to {
        value
    } else {
        Expr::Cast {
            ty: to,
            value: Box::new(value),
        }
    }
}

/// Translate a checked kernel for one signature
pub fn translate(checked: &CheckedKernel, signature: &Signature) -> SpecializeResult<Function> {
    let function = Translator::new(checked, signature)?.translate()?;
    log::debug!(
        "translated `{}` for {} into {} top-level statements",
        function.name,
        signature,
        function.body.len()
    );
    Ok(function)
}
