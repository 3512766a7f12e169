//! Kernel Specializer
//!
//! This library turns small element-wise array kernels into native code
//! specialized for the exact shapes and element types they are called with.
//! A kernel is written once in a restricted loop language; on each call the
//! argument signature selects (or builds) a compiled C loop nest with every
//! extent baked in, loop-blocked for locality and parallelized with OpenMP.
//!
//! # Example
//!
//! ```rust,no_run
//! use kernel_specializer::{Arg, SpecializedFn};
//! use ndarray::Array2;
//!
//! let add = SpecializedFn::define(
//!     "kernel array_array_add(a, b, output) {
//!         for y, x in output.indices() {
//!             output[y, x] = a[y, x] + b[y, x];
//!         }
//!     }",
//! )
//! .unwrap();
//!
//! let a = Array2::<f32>::from_elem((4, 4), 1.0);
//! let b = Array2::<f32>::from_elem((4, 4), 2.0);
//! let mut output = Array2::<f32>::zeros((4, 4));
//! add.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut output)])
//!     .unwrap();
//! assert!(output.iter().all(|&v| v == 3.0));
//! ```

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod analyzer;
pub mod signature;
pub mod ir;
pub mod translate;
pub mod fold;
pub mod interp;
pub mod tiling;
pub mod codegen;
pub mod toolchain;
pub mod loader;
pub mod cache;
pub mod dispatch;
pub mod ops;
pub mod error;

pub use analyzer::{Analyzer, CheckedKernel, KernelInterface, ParamInfo, ParamUsage};
pub use cache::SpecializationCache;
pub use codegen::{CodeGenerator, TranslationUnit};
pub use dispatch::{CompiledEntry, SpecializedFn, SpecializedFnBuilder, SpecializerConfig};
pub use error::{SpecializeError, SpecializeResult};
pub use ir::Function;
pub use loader::{compile, NativeFunction};
pub use ops::{smap, ArrayOps};
pub use parser::Parser;
pub use signature::{Arg, ArgDescriptor, ElementType, Signature, SignatureKey};
pub use tiling::{LoopBlocking, DEFAULT_BLOCK_FACTOR};
pub use toolchain::{CcToolchain, Toolchain, ToolchainConfig};

/// Translate kernel source for one signature without compiling it
///
/// Runs the whole front half of the pipeline: parse, analyze, translate,
/// fold and, when `config` enables it, loop blocking.
pub fn specialize(
    source: &str,
    signature: &Signature,
    config: &SpecializerConfig,
) -> SpecializeResult<Function> {
    let module = parser::parse_module(source)?;
    let checked = analyzer::check_module(module)?;
    let function = translate::translate(&checked, signature)?;

    if config.loop_blocking {
        Ok(LoopBlocking::new(config.block_factor).apply(function))
    } else {
        Ok(function)
    }
}
