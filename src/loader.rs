//! Building, loading and invoking native code
//!
//! [`compile`] turns a specialized [`Function`] into a [`NativeFunction`]:
//! the generated unit is written into a private temporary directory, built
//! by a [`Toolchain`] into a shared library, loaded with `libloading`, and
//! accepted only if its signature symbol matches the function's parameter
//! types. The library and its directory live exactly as long as the
//! returned handle.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt;
use std::path::Path;

use libloading::{Library, Symbol};
use tempfile::TempDir;

use crate::codegen::{CodeGenerator, TranslationUnit, FAULT_DIVISION_BY_ZERO};
use crate::error::{SpecializeError, SpecializeResult};
use crate::ir::{Function, ParamType};
use crate::signature::{join_dims, Arg, ElementType};
use crate::toolchain::Toolchain;

type EntryFn = unsafe extern "C" fn(*mut *mut c_void) -> c_int;

/// A loaded specialized function
///
/// Immutable once loaded; safe to call from many threads at once.
pub struct NativeFunction {
    entry: EntryFn,
    symbol: String,
    param_types: Vec<ParamType>,
    // dropped in this order: the library is unloaded before its files go away
    _library: Library,
    _build_dir: TempDir,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("symbol", &self.symbol)
            .field("param_types", &self.param_types)
            .finish()
    }
}

impl NativeFunction {
    /// Name of the specialized C function
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn param_types(&self) -> &[ParamType] {
        &self.param_types
    }

    /// Invoke the native code with `args`
    ///
    /// Every argument is checked against the exact parameter type list
    /// before control passes to native code. An integer division by zero
    /// inside the kernel is reported as [`SpecializeError::ArgumentMismatch`]
    /// once the call returns; outputs may then be partially written.
    pub(crate) fn call(&self, args: &mut [Arg<'_>]) -> SpecializeResult<()> {
        if args.len() != self.param_types.len() {
            return Err(SpecializeError::mismatch(format!(
                "`{}` takes {} arguments, got {}",
                self.symbol,
                self.param_types.len(),
                args.len()
            )));
        }

        // scalars are passed by pointer to an eight-byte slot
        let mut scalars: Vec<u64> = args
            .iter()
            .map(|arg| match arg {
                Arg::Int(v) => *v as u64,
                Arg::Float(v) => v.to_bits(),
                Arg::Array(_) => 0,
            })
            .collect();

        let mut slots = Vec::with_capacity(args.len());
        for ((ty, arg), scalar) in self.param_types.iter().zip(args.iter()).zip(scalars.iter_mut()) {
            let slot = match (ty, arg) {
                (ParamType::Array { elem, dims }, Arg::Array(array))
                    if array.elem() == *elem && array.dims() == dims.as_slice() =>
                {
                    array.as_mut_ptr() as *mut c_void
                }
                (ParamType::Scalar(ElementType::I64), Arg::Int(_))
                | (ParamType::Scalar(ElementType::F64), Arg::Float(_)) => {
                    scalar as *mut u64 as *mut c_void
                }
                (ty, arg) => {
                    return Err(SpecializeError::mismatch(format!(
                        "`{}` expects {}, got {}",
                        self.symbol,
                        ty,
                        describe(arg)
                    )))
                }
            };
            slots.push(slot);
        }

        // SAFETY: each slot matches the parameter type the library was
        // verified to expect, array slots point at buffers of exactly the
        // baked shape, and the scalar slots outlive the call
        let status = unsafe { (self.entry)(slots.as_mut_ptr()) };
        match status {
            0 => Ok(()),
            FAULT_DIVISION_BY_ZERO => Err(SpecializeError::mismatch(format!(
                "integer division by zero in `{}`",
                self.symbol
            ))),
            other => Err(SpecializeError::symbol(
                &self.symbol,
                format!("entry returned unknown status {}", other),
            )),
        }
    }
}

fn describe(arg: &Arg<'_>) -> String {
    match arg {
        Arg::Array(array) => format!("{}[{}]", array.elem(), join_dims(array.dims())),
        Arg::Int(_) => "int".to_string(),
        Arg::Float(_) => "float".to_string(),
    }
}

/// Generate, build and load a specialized function
pub fn compile(function: &Function, toolchain: &dyn Toolchain) -> SpecializeResult<NativeFunction> {
    let unit = CodeGenerator::new().generate(function);
    log::trace!("generated source for `{}`:\n{}", unit.symbol, unit.source);

    let build_dir = tempfile::Builder::new()
        .prefix("kernelspec-")
        .tempdir()
        .map_err(|e| SpecializeError::compilation(format!("cannot create build directory: {}", e)))?;

    let source = build_dir.path().join(format!("{}.c", unit.symbol));
    std::fs::write(&source, &unit.source)
        .map_err(|e| SpecializeError::compilation(format!("cannot write {}: {}", source.display(), e)))?;

    let library = build_dir.path().join(libloading::library_filename(&unit.symbol));
    toolchain.build(&source, &library, unit.parallel)?;
    if !library.exists() {
        return Err(SpecializeError::compilation(format!(
            "the toolchain reported success but produced no {}",
            library.display()
        )));
    }

    let (library, entry) = load(&unit, &library)?;
    Ok(NativeFunction {
        entry,
        symbol: unit.symbol,
        param_types: function.params.iter().map(|p| p.ty.clone()).collect(),
        _library: library,
        _build_dir: build_dir,
    })
}

/// Load a built unit and resolve its entry point
fn load(unit: &TranslationUnit, path: &Path) -> SpecializeResult<(Library, EntryFn)> {
    // SAFETY: the library is one we just generated; its initialisers are
    // the C runtime's own
    let library = unsafe { Library::new(path) }
        .map_err(|e| SpecializeError::symbol(&unit.entry_symbol, format!("cannot load {}: {}", path.display(), e)))?;

    // SAFETY: the signature symbol is a NUL-terminated char array
    let found = unsafe {
        let symbol: Symbol<*const c_char> = library
            .get(unit.signature_symbol.as_bytes())
            .map_err(|e| SpecializeError::symbol(&unit.signature_symbol, e.to_string()))?;
        let ptr: *const c_char = *symbol;
        if ptr.is_null() {
            return Err(SpecializeError::symbol(&unit.signature_symbol, "null signature"));
        }
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    };
    if found != unit.signature_text {
        return Err(SpecializeError::symbol(
            &unit.entry_symbol,
            format!(
                "signature mismatch: expected `{}`, library has `{}`",
                unit.signature_text, found
            ),
        ));
    }

    // SAFETY: the verified signature says the entry takes `void **` and
    // returns a status
    let entry = unsafe {
        let symbol: Symbol<EntryFn> = library
            .get(unit.entry_symbol.as_bytes())
            .map_err(|e| SpecializeError::symbol(&unit.entry_symbol, e.to_string()))?;
        *symbol
    };

    log::debug!("resolved `{}` in {}", unit.entry_symbol, path.display());
    Ok((library, entry))
}
