//! Definition-time analysis of kernel modules
//!
//! Checks that a parsed module stays inside the restricted element-wise
//! grammar and records how the kernel uses each parameter. Everything that
//! can be rejected without knowing argument shapes is rejected here, so a
//! kernel that passes analysis only fails later on argument mismatches or
//! toolchain problems.

use std::collections::{HashMap, HashSet};

use crate::ast::{BinOp, Expr, HelperDef, KernelDef, Module, Statement};
use crate::error::{SpecializeError, SpecializeResult};
use crate::signature::{Arg, ArgDescriptor, Signature};

/// Math intrinsics callable from kernels and helpers, with their arity
pub const INTRINSICS: &[(&str, usize)] = &[
    ("exp", 1),
    ("log", 1),
    ("sqrt", 1),
    ("tanh", 1),
    ("fabs", 1),
    ("floor", 1),
    ("ceil", 1),
    ("fmax", 2),
    ("fmin", 2),
    ("pow", 2),
];

pub fn intrinsic_arity(name: &str) -> Option<usize> {
    INTRINSICS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, arity)| *arity)
}

/// How a kernel uses one of its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamUsage {
    /// Indexed, iterated or queried for metadata
    Array { rank: Option<usize>, written: bool },
    /// Read as a scalar operand
    Scalar,
    Unused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: String,
    pub usage: ParamUsage,
}

/// The calling contract of a kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInterface {
    pub name: String,
    pub params: Vec<ParamInfo>,
}

impl KernelInterface {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn check_arity(&self, count: usize) -> SpecializeResult<()> {
        if count != self.arity() {
            return Err(SpecializeError::mismatch(format!(
                "kernel `{}` takes {} arguments, got {}",
                self.name,
                self.arity(),
                count
            )));
        }
        Ok(())
    }

    /// Check argument kinds and ranks against the parameter usage
    pub fn check_signature(&self, signature: &Signature) -> SpecializeResult<()> {
        self.check_arity(signature.len())?;

        for (param, arg) in self.params.iter().zip(&signature.args) {
            match (param.usage, arg) {
                (ParamUsage::Array { rank: Some(rank), .. }, ArgDescriptor::Array { dims, .. })
                    if rank != dims.len() =>
                {
                    return Err(SpecializeError::mismatch(format!(
                        "parameter `{}` of `{}` is used with rank {}, got a rank-{} array",
                        param.name,
                        self.name,
                        rank,
                        dims.len()
                    )));
                }
                (ParamUsage::Array { .. }, arg) if !arg.is_array() => {
                    return Err(SpecializeError::mismatch(format!(
                        "parameter `{}` of `{}` expects an array, got {}",
                        param.name, self.name, arg
                    )));
                }
                (ParamUsage::Scalar, arg) if arg.is_array() => {
                    return Err(SpecializeError::mismatch(format!(
                        "parameter `{}` of `{}` expects a scalar, got {}",
                        param.name, self.name, arg
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Written parameters must be passed with [`Arg::output`]
    pub fn check_writable(&self, args: &[Arg<'_>]) -> SpecializeResult<()> {
        for (param, arg) in self.params.iter().zip(args) {
            if let (ParamUsage::Array { written: true, .. }, Arg::Array(array)) = (param.usage, arg) {
                if !array.is_writable() {
                    return Err(SpecializeError::mismatch(format!(
                        "parameter `{}` of `{}` is written by the kernel but was passed as a read-only input",
                        param.name, self.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A kernel that passed analysis, together with the helpers it may call
#[derive(Debug, Clone)]
pub struct CheckedKernel {
    pub kernel: KernelDef,
    pub helpers: HashMap<String, HelperDef>,
    pub interface: KernelInterface,
}

/// Names visible inside one loop body
struct Scope<'a> {
    loop_vars: &'a [String],
    locals: HashSet<String>,
}

impl Scope<'_> {
    fn contains(&self, name: &str) -> bool {
        self.loop_vars.iter().any(|v| v == name) || self.locals.contains(name)
    }
}

/// Analyzer for the restricted kernel grammar
pub struct Analyzer {
    params: Vec<String>,
    usage: HashMap<String, ParamUsage>,
    helpers: HashMap<String, HelperDef>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            usage: HashMap::new(),
            helpers: HashMap::new(),
        }
    }

    /// Analyze a module holding exactly one kernel
    pub fn analyze(&mut self, module: Module) -> SpecializeResult<CheckedKernel> {
        let Module { mut kernels, helpers } = module;

        if kernels.len() != 1 {
            return Err(SpecializeError::unsupported(format!(
                "a module must define exactly one kernel, found {}",
                kernels.len()
            )));
        }
        let kernel = kernels.remove(0);

        for helper in helpers {
            self.define_helper(helper)?;
        }

        self.analyze_kernel(&kernel)?;

        let interface = KernelInterface {
            name: kernel.name.clone(),
            params: self
                .params
                .iter()
                .map(|name| ParamInfo {
                    name: name.clone(),
                    usage: self.usage.get(name).copied().unwrap_or(ParamUsage::Unused),
                })
                .collect(),
        };

        Ok(CheckedKernel {
            kernel,
            helpers: std::mem::take(&mut self.helpers),
            interface,
        })
    }

    fn define_helper(&mut self, helper: HelperDef) -> SpecializeResult<()> {
        check_name(&helper.name)?;
        if intrinsic_arity(&helper.name).is_some() {
            return Err(SpecializeError::unsupported(format!(
                "helper `{}` shadows a math intrinsic",
                helper.name
            )));
        }
        if self.helpers.contains_key(&helper.name) {
            return Err(SpecializeError::unsupported(format!(
                "helper `{}` is defined twice",
                helper.name
            )));
        }
        if helper.params.len() != 1 {
            return Err(SpecializeError::unsupported(format!(
                "helper `{}` must take exactly one scalar argument, it takes {}",
                helper.name,
                helper.params.len()
            )));
        }
        check_name(&helper.params[0])?;
        check_helper_expr(&helper, &helper.body)?;

        self.helpers.insert(helper.name.clone(), helper);
        Ok(())
    }

    fn analyze_kernel(&mut self, kernel: &KernelDef) -> SpecializeResult<()> {
        check_name(&kernel.name)?;
        for param in &kernel.params {
            check_name(param)?;
            if self.params.contains(param) {
                return Err(SpecializeError::unsupported(format!(
                    "parameter `{}` of `{}` is declared twice",
                    param, kernel.name
                )));
            }
            self.params.push(param.clone());
        }

        for stmt in &kernel.body {
            match stmt {
                Statement::For { targets, iter, body } => self.analyze_loop(targets, iter, body)?,
                _ => {
                    return Err(SpecializeError::unsupported(format!(
                        "the body of `{}` may only contain `for ... in P.indices()` loops",
                        kernel.name
                    )))
                }
            }
        }

        Ok(())
    }

    fn analyze_loop(
        &mut self,
        targets: &[String],
        iter: &Expr,
        body: &[Statement],
    ) -> SpecializeResult<()> {
        let iterated = match iter {
            Expr::MethodCall {
                receiver,
                method,
                args,
            } if method == "indices" && args.is_empty() => match receiver.as_ref() {
                Expr::Variable(name) if self.is_param(name) => name.clone(),
                _ => {
                    return Err(SpecializeError::unsupported(
                        "`indices()` must be called on an array parameter",
                    ))
                }
            },
            _ => {
                return Err(SpecializeError::unsupported(
                    "loops must iterate over `P.indices()` of an array parameter",
                ))
            }
        };
        self.use_array(&iterated, Some(targets.len()), false)?;

        let mut seen = HashSet::new();
        for target in targets {
            check_name(target)?;
            if self.is_param(target) || !seen.insert(target.as_str()) {
                return Err(SpecializeError::unsupported(format!(
                    "loop variable `{}` shadows another name",
                    target
                )));
            }
        }

        let mut scope = Scope {
            loop_vars: targets,
            locals: HashSet::new(),
        };

        for stmt in body {
            match stmt {
                Statement::For { .. } => {
                    return Err(SpecializeError::unsupported("nested loops are not supported"))
                }
                Statement::Let { name, value } => {
                    self.analyze_expr(value, &scope, false)?;
                    check_name(name)?;
                    if scope.contains(name) || self.is_param(name) {
                        return Err(SpecializeError::unsupported(format!(
                            "local `{}` shadows another name",
                            name
                        )));
                    }
                    scope.locals.insert(name.clone());
                }
                Statement::Assign { target, value } => {
                    self.analyze_expr(value, &scope, false)?;
                    match target {
                        Expr::Index { base, indices } => match base.as_ref() {
                            Expr::Variable(name) if self.is_param(name) => {
                                check_element_wise(name, indices, &scope)?;
                                self.use_array(name, Some(indices.len()), true)?;
                            }
                            _ => {
                                return Err(SpecializeError::unsupported(
                                    "assignments must write an indexed array parameter",
                                ))
                            }
                        },
                        _ => {
                            return Err(SpecializeError::unsupported(
                                "assignments must write an indexed array parameter",
                            ))
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Analyze an expression inside a loop body
    fn analyze_expr(
        &mut self,
        expr: &Expr,
        scope: &Scope<'_>,
        in_helper_arg: bool,
    ) -> SpecializeResult<()> {
        match expr {
            Expr::Int(_) | Expr::Float(_) => Ok(()),

            Expr::Variable(name) => {
                if scope.contains(name) {
                    Ok(())
                } else if self.is_param(name) {
                    self.use_scalar(name)
                } else {
                    Err(SpecializeError::unsupported(format!("unknown name `{}`", name)))
                }
            }

            Expr::Index { base, indices } => match base.as_ref() {
                Expr::Variable(name) if self.is_param(name) => {
                    check_element_wise(name, indices, scope)?;
                    self.use_array(name, Some(indices.len()), false)
                }
                Expr::Attribute { base, name: attr } if attr == "shape" => {
                    let array = self.metadata_receiver(base)?;
                    match indices.as_slice() {
                        [Expr::Int(axis)] if *axis >= 0 => self.use_array(&array, None, false),
                        _ => Err(SpecializeError::unsupported(format!(
                            "`{}.shape` must be indexed with one non-negative integer literal",
                            array
                        ))),
                    }
                }
                _ => Err(SpecializeError::unsupported(
                    "only array parameters and `.shape` can be indexed",
                )),
            },

            Expr::Attribute { base, name } => {
                let array = self.metadata_receiver(base)?;
                match name.as_str() {
                    "size" | "ndim" => self.use_array(&array, None, false),
                    "shape" => Err(SpecializeError::unsupported(format!(
                        "`{}.shape` must be indexed with an integer literal",
                        array
                    ))),
                    other => Err(SpecializeError::unsupported(format!(
                        "unknown attribute `{}.{}`",
                        array, other
                    ))),
                }
            }

            Expr::MethodCall { method, .. } => Err(SpecializeError::unsupported(format!(
                "method call `.{}()` is only allowed as a loop iterator",
                method
            ))),

            Expr::Call { func, args } => {
                if self.helpers.contains_key(func) {
                    if in_helper_arg {
                        return Err(SpecializeError::unsupported(format!(
                            "helper call `{}` nested inside another helper call",
                            func
                        )));
                    }
                    if args.len() != 1 {
                        return Err(SpecializeError::unsupported(format!(
                            "helper `{}` takes one argument, got {}",
                            func,
                            args.len()
                        )));
                    }
                    self.analyze_expr(&args[0], scope, true)
                } else if let Some(arity) = intrinsic_arity(func) {
                    if args.len() != arity {
                        return Err(SpecializeError::unsupported(format!(
                            "`{}` takes {} arguments, got {}",
                            func,
                            arity,
                            args.len()
                        )));
                    }
                    for arg in args {
                        self.analyze_expr(arg, scope, in_helper_arg)?;
                    }
                    Ok(())
                } else {
                    Err(SpecializeError::unsupported(format!("unknown function `{}`", func)))
                }
            }

            Expr::Binary { op, lhs, rhs } => {
                check_operator(*op)?;
                self.analyze_expr(lhs, scope, in_helper_arg)?;
                self.analyze_expr(rhs, scope, in_helper_arg)
            }

            Expr::Neg(inner) => self.analyze_expr(inner, scope, in_helper_arg),
        }
    }

    fn metadata_receiver(&self, base: &Expr) -> SpecializeResult<String> {
        match base {
            Expr::Variable(name) if self.is_param(name) => Ok(name.clone()),
            _ => Err(SpecializeError::unsupported(
                "array metadata can only be read from a parameter",
            )),
        }
    }

    fn is_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    fn use_array(&mut self, name: &str, rank: Option<usize>, written: bool) -> SpecializeResult<()> {
        let current = self.usage.get(name).copied().unwrap_or(ParamUsage::Unused);
        let next = match current {
            ParamUsage::Unused => ParamUsage::Array { rank, written },
            ParamUsage::Array {
                rank: known,
                written: was_written,
            } => {
                let rank = match (known, rank) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(SpecializeError::unsupported(format!(
                            "`{}` is accessed with {} and with {} indices",
                            name, a, b
                        )))
                    }
                    (Some(a), _) => Some(a),
                    (None, b) => b,
                };
                ParamUsage::Array {
                    rank,
                    written: was_written || written,
                }
            }
            ParamUsage::Scalar => {
                return Err(SpecializeError::unsupported(format!(
                    "`{}` is used both as an array and as a scalar",
                    name
                )))
            }
        };
        self.usage.insert(name.to_string(), next);
        Ok(())
    }

    fn use_scalar(&mut self, name: &str) -> SpecializeResult<()> {
        match self.usage.get(name) {
            Some(ParamUsage::Array { .. }) => Err(SpecializeError::unsupported(format!(
                "`{}` is used both as an array and as a scalar",
                name
            ))),
            _ => {
                self.usage.insert(name.to_string(), ParamUsage::Scalar);
                Ok(())
            }
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Analyze a parsed module with a fresh analyzer
pub fn check_module(module: Module) -> SpecializeResult<CheckedKernel> {
    Analyzer::new().analyze(module)
}

fn check_name(name: &str) -> SpecializeResult<()> {
    if name.starts_with("__") {
        return Err(SpecializeError::unsupported(format!(
            "identifier `{}` uses the reserved `__` prefix",
            name
        )));
    }
    Ok(())
}

fn check_operator(op: BinOp) -> SpecializeResult<()> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => Ok(()),
        BinOp::Rem | BinOp::MatMul => Err(SpecializeError::unsupported(format!(
            "unsupported binary operator `{}`",
            op
        ))),
    }
}

/// Indices must be exactly the loop variables, in order
fn check_element_wise(array: &str, indices: &[Expr], scope: &Scope<'_>) -> SpecializeResult<()> {
    let element_wise = indices.len() == scope.loop_vars.len()
        && indices
            .iter()
            .zip(scope.loop_vars)
            .all(|(index, var)| matches!(index, Expr::Variable(name) if name == var));

    if !element_wise {
        return Err(SpecializeError::unsupported(format!(
            "non-element-wise access to `{}`: indices must be the loop variables ({}) in order",
            array,
            scope.loop_vars.join(", ")
        )));
    }
    Ok(())
}

fn check_helper_expr(helper: &HelperDef, expr: &Expr) -> SpecializeResult<()> {
    match expr {
        Expr::Int(_) | Expr::Float(_) => Ok(()),
        Expr::Variable(name) if *name == helper.params[0] => Ok(()),
        Expr::Variable(name) => Err(SpecializeError::unsupported(format!(
            "helper `{}` refers to unknown name `{}`",
            helper.name, name
        ))),
        Expr::Binary { op, lhs, rhs } => {
            check_operator(*op)?;
            check_helper_expr(helper, lhs)?;
            check_helper_expr(helper, rhs)
        }
        Expr::Neg(inner) => check_helper_expr(helper, inner),
        Expr::Call { func, args } => match intrinsic_arity(func) {
            Some(arity) if arity == args.len() => {
                args.iter().try_for_each(|arg| check_helper_expr(helper, arg))
            }
            Some(arity) => Err(SpecializeError::unsupported(format!(
                "`{}` takes {} arguments, got {}",
                func,
                arity,
                args.len()
            ))),
            None => Err(SpecializeError::unsupported(format!(
                "helper `{}` may only call math intrinsics, found `{}`",
                helper.name, func
            ))),
        },
        _ => Err(SpecializeError::unsupported(format!(
            "helper `{}` must be a scalar-in, scalar-out expression",
            helper.name
        ))),
    }
}
