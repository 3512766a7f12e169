//! C code generator for specialized functions
//!
//! Emits one C99 translation unit per [`Function`]:
//!
//! - `spec_<name>`: the loop nest with exactly the parameter types of the
//!   signature it was specialized for,
//! - `spec_<name>_entry(void **args)`: a uniform wrapper casting each slot
//!   to its parameter type (arrays are passed as data pointers, scalars as
//!   pointers to their value),
//! - `spec_<name>_signature`: the parameter types as text, checked by the
//!   loader before the entry is trusted.
//!
//! Both functions return a status: `0` on success, [`FAULT_DIVISION_BY_ZERO`]
//! when an integer division met a zero divisor. Integer division goes
//! through a guarded helper so such a call reports the fault instead of
//! trapping.
//!
//! Every IR name is emitted with a `v_` prefix so kernel identifiers can
//! never collide with C keywords or libm symbols.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::ir::{BinOp, Constant, Expr, Function, ParamType, Stmt};
use crate::signature::ElementType;

/// Status returned when an integer division had a zero divisor
pub const FAULT_DIVISION_BY_ZERO: i32 = 1;

const MIN_HELPER: &str = "static inline int64_t spec_min(int64_t a, int64_t b)
{
    return a < b ? a : b;
}
";

const IDIV_HELPER: &str = "static int64_t spec_idiv(int64_t a, int64_t b, int *fault)
{
    if (b == 0) {
        #pragma omp atomic write
        *fault = 1;
        return 0;
    }
    if (b == -1) {
        return (int64_t)(0 - (uint64_t)a);
    }
    return a / b;
}
";

/// Generated source together with the symbols it defines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub source: String,
    pub symbol: String,
    pub entry_symbol: String,
    pub signature_symbol: String,
    /// Expected contents of the signature symbol
    pub signature_text: String,
    /// Whether the unit needs a multi-threading runtime
    pub parallel: bool,
}

/// Code generator for C99 targets
pub struct CodeGenerator {
    out: String,
    indent: usize,
    /// Element type of every array parameter
    arrays: HashMap<String, ElementType>,
    /// Type of every scalar name in scope
    scalars: HashMap<String, ElementType>,
    uses_min: bool,
    uses_idiv: bool,
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            out: String::new(),
            indent: 0,
            arrays: HashMap::new(),
            scalars: HashMap::new(),
            uses_min: false,
            uses_idiv: false,
        }
    }

    /// Generate a translation unit for a specialized function
    pub fn generate(mut self, function: &Function) -> TranslationUnit {
        let symbol = format!("spec_{}", function.name);
        let entry_symbol = format!("{}_entry", symbol);
        let signature_symbol = format!("{}_signature", symbol);
        let signature_text = signature_text(function);
        let parallel = function.has_parallel_loop();

        let mut written = HashSet::new();
        collect_stores(&function.body, &mut written);

        for p in &function.params {
            match &p.ty {
                ParamType::Array { elem, .. } => self.arrays.insert(p.name.clone(), *elem),
                ParamType::Scalar(elem) => self.scalars.insert(p.name.clone(), *elem),
            };
        }

        // the body decides which helpers the unit needs
        self.indent = 1;
        self.block(&function.body);
        let body = std::mem::take(&mut self.out);
        self.indent = 0;

        self.line("#include <math.h>");
        self.line("#include <stdint.h>");
        self.blank();
        self.line(&format!(
            "const char {}[] = \"{}\";",
            signature_symbol, signature_text
        ));
        self.blank();
        if self.uses_min {
            self.out.push_str(MIN_HELPER);
            self.blank();
        }
        if self.uses_idiv {
            self.out.push_str(IDIV_HELPER);
            self.blank();
        }

        let params: Vec<String> = function
            .params
            .iter()
            .map(|p| format!("{} {}", c_param_type(&p.ty, written.contains(&p.name)), mangle(&p.name)))
            .collect();
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        self.line(&format!("int {}({})", symbol, params));
        self.line("{");
        if self.uses_idiv {
            self.line("    int fault = 0;");
        }
        self.out.push_str(&body);
        self.line(if self.uses_idiv { "    return fault;" } else { "    return 0;" });
        self.line("}");
        self.blank();

        let slots: Vec<String> = function
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| match &p.ty {
                ParamType::Array { elem, .. } => {
                    let qualifier = if written.contains(&p.name) { "" } else { "const " };
                    format!("({}{}*)args[{}]", qualifier, elem.c_name(), i)
                }
                ParamType::Scalar(elem) => format!("*(const {}*)args[{}]", elem.c_name(), i),
            })
            .collect();
        self.line(&format!("int {}(void **args)", entry_symbol));
        self.line("{");
        self.indent += 1;
        if slots.is_empty() {
            self.line("(void)args;");
        }
        self.line(&format!("return {}({});", symbol, slots.join(", ")));
        self.indent -= 1;
        self.line("}");

        TranslationUnit {
            source: self.out,
            symbol,
            entry_symbol,
            signature_symbol,
            signature_text,
            parallel,
        }
    }

    fn block(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            match stmt {
                Stmt::Loop(l) => {
                    if l.parallel {
                        self.line("#pragma omp parallel for");
                    }
                    let var = mangle(&l.var);
                    let step = if l.step == 1 {
                        format!("{}++", var)
                    } else {
                        format!("{} += {}", var, l.step)
                    };
                    let (start, end) = (self.expr(&l.start), self.expr(&l.end));
                    self.line(&format!(
                        "for (int64_t {} = {}; {} < {}; {}) {{",
                        var, start, var, end, step
                    ));
                    self.scalars.insert(l.var.clone(), ElementType::I64);
                    self.indent += 1;
                    self.block(&l.body);
                    self.indent -= 1;
                    self.line("}");
                }
                Stmt::Assign { name, ty, value } => {
                    let value = self.expr(value);
                    self.scalars.insert(name.clone(), *ty);
                    self.line(&format!("const {} {} = {};", ty.c_name(), mangle(name), value));
                }
                Stmt::Store {
                    array,
                    offset,
                    value,
                } => {
                    let (offset, value) = (self.expr(offset), self.expr(value));
                    self.line(&format!("{}[{}] = {};", mangle(array), offset, value));
                }
            }
        }
    }

    fn expr(&mut self, e: &Expr) -> String {
        let mut out = String::new();
        self.write_expr(&mut out, e);
        out
    }

    fn write_expr(&mut self, out: &mut String, e: &Expr) {
        // writing to a String cannot fail
        let _ = match e {
            Expr::Const(Constant::Int(v)) => write_int(out, *v),
            Expr::Const(Constant::Float(v)) => write_float(out, *v),
            Expr::Var(name) => write!(out, "{}", mangle(name)),
            Expr::Load { array, offset } => {
                let offset = self.expr(offset);
                write!(out, "{}[{}]", mangle(array), offset)
            }
            Expr::Binary { op, lhs, rhs } => {
                let (l, r) = (self.expr(lhs), self.expr(rhs));
                match op {
                    BinOp::Add => write!(out, "({} + {})", l, r),
                    BinOp::Sub => write!(out, "({} - {})", l, r),
                    BinOp::Mul => write!(out, "({} * {})", l, r),
                    BinOp::Div if self.is_integer(lhs) && self.is_integer(rhs) => {
                        self.uses_idiv = true;
                        write!(out, "spec_idiv({}, {}, &fault)", l, r)
                    }
                    BinOp::Div => write!(out, "({} / {})", l, r),
                    BinOp::Min => {
                        self.uses_min = true;
                        write!(out, "spec_min({}, {})", l, r)
                    }
                }
            }
            Expr::Neg(inner) => {
                let inner = self.expr(inner);
                write!(out, "(-{})", inner)
            }
            Expr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(|arg| self.expr(arg)).collect();
                write!(out, "{}({})", func, args.join(", "))
            }
            Expr::Cast { ty, value } => {
                let value = self.expr(value);
                write!(out, "(({}){})", ty.c_name(), value)
            }
        };
    }

    /// Whether `e` evaluates to an integer in C
    fn is_integer(&self, e: &Expr) -> bool {
        match e {
            Expr::Const(Constant::Int(_)) => true,
            Expr::Const(Constant::Float(_)) | Expr::Call { .. } => false,
            Expr::Var(name) => self.scalars.get(name).map_or(false, |ty| !ty.is_float()),
            Expr::Load { array, .. } => self.arrays.get(array).map_or(false, |ty| !ty.is_float()),
            Expr::Binary { lhs, rhs, .. } => self.is_integer(lhs) && self.is_integer(rhs),
            Expr::Neg(inner) => self.is_integer(inner),
            Expr::Cast { ty, .. } => !ty.is_float(),
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Text stored in the signature symbol
pub fn signature_text(function: &Function) -> String {
    let params: Vec<String> = function.params.iter().map(|p| p.ty.to_string()).collect();
    format!("{}({})", function.name, params.join(", "))
}

fn mangle(name: &str) -> String {
    format!("v_{}", name)
}

fn c_param_type(ty: &ParamType, written: bool) -> String {
    match ty {
        ParamType::Array { elem, .. } if written => format!("{}*", elem.c_name()),
        ParamType::Array { elem, .. } => format!("const {}*", elem.c_name()),
        ParamType::Scalar(elem) => elem.c_name().to_string(),
    }
}

fn collect_stores(stmts: &[Stmt], written: &mut HashSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Loop(l) => collect_stores(&l.body, written),
            Stmt::Store { array, .. } => {
                written.insert(array.clone());
            }
            Stmt::Assign { .. } => {}
        }
    }
}

fn write_int(out: &mut String, v: i64) -> std::fmt::Result {
    if v == i64::MIN {
        write!(out, "INT64_MIN")
    } else if i32::try_from(v).is_ok() {
        write!(out, "{}", v)
    } else {
        write!(out, "INT64_C({})", v)
    }
}

fn write_float(out: &mut String, v: f64) -> std::fmt::Result {
    if v.is_nan() {
        write!(out, "NAN")
    } else if v.is_infinite() {
        write!(out, "{}", if v > 0.0 { "INFINITY" } else { "(-INFINITY)" })
    } else {
        write!(out, "{:?}", v)
    }
}
