//! Abstract Syntax Tree definitions for kernel source

/// A parsed source module: kernels plus the scalar helpers defined alongside
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub kernels: Vec<KernelDef>,
    pub helpers: Vec<HelperDef>,
}

impl Module {
    /// Append the items of another module
    pub fn merge(&mut self, other: Module) {
        self.kernels.extend(other.kernels);
        self.helpers.extend(other.helpers);
    }
}

/// `kernel name(params) { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct KernelDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

/// `fn name(params) { return expr; }`
#[derive(Debug, Clone, PartialEq)]
pub struct HelperDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Expr,
}

/// A statement in a kernel body
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `for y, x in iter { ... }`
    For {
        targets: Vec<String>,
        iter: Expr,
        body: Vec<Statement>,
    },
    /// `let name = value;`
    Let { name: String, value: Expr },
    /// `target = value;`
    Assign { target: Expr, value: Expr },
}

/// Binary operators as written in source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    MatMul,
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::MatMul => "@",
        };
        write!(f, "{}", symbol)
    }
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal
    Int(i64),

    /// Floating point literal
    Float(f64),

    /// Name reference: parameter, loop variable or local
    Variable(String),

    /// Indexed access: `a[y, x]`, `a.shape[0]`
    Index { base: Box<Expr>, indices: Vec<Expr> },

    /// Attribute access: `a.shape`, `a.size`
    Attribute { base: Box<Expr>, name: String },

    /// Method call: `output.indices()`
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },

    /// Function call: `relu(x)`, `exp(x)`
    Call { func: String, args: Vec<Expr> },

    /// Binary operation
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    /// Unary negation
    Neg(Box<Expr>),
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Visit this expression and every sub-expression, parents first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Int(_) | Expr::Float(_) | Expr::Variable(_) => {}
            Expr::Index { base, indices } => {
                base.walk(visit);
                indices.iter().for_each(|e| e.walk(visit));
            }
            Expr::Attribute { base, .. } => base.walk(visit),
            Expr::MethodCall { receiver, args, .. } => {
                receiver.walk(visit);
                args.iter().for_each(|e| e.walk(visit));
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.walk(visit)),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Expr::Neg(inner) => inner.walk(visit),
        }
    }
}
