//! Array operations built on specialized kernels
//!
//! [`ArrayOps::add`] chooses between the array-array and array-scalar add
//! kernels from the operand kinds; [`smap`] lifts a scalar helper into an
//! element-wise map over rank-2 arrays.

use std::sync::Arc;

use crate::dispatch::{SpecializedFn, SpecializedFnBuilder, SpecializerConfig};
use crate::error::{SpecializeError, SpecializeResult};
use crate::parser::parse_module;
use crate::signature::Arg;
use crate::toolchain::Toolchain;

pub const ARRAY_ARRAY_ADD: &str = "kernel array_array_add(a, b, output) {
    for y, x in output.indices() {
        output[y, x] = a[y, x] + b[y, x];
    }
}";

pub const ARRAY_SCALAR_ADD: &str = "kernel array_scalar_add(a, b, output) {
    for y, x in output.indices() {
        output[y, x] = a[y, x] + b;
    }
}";

/// Kind of one operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Array,
    Scalar,
}

impl Operand {
    pub fn of(arg: &Arg<'_>) -> Self {
        if arg.is_array() {
            Operand::Array
        } else {
            Operand::Scalar
        }
    }
}

/// Which add kernel handles an operand pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddKernel {
    ArrayArray,
    ArrayScalar,
    /// `scalar + array`, run as `array + scalar`
    ScalarArray,
}

impl AddKernel {
    pub fn select(lhs: Operand, rhs: Operand) -> SpecializeResult<Self> {
        match (lhs, rhs) {
            (Operand::Array, Operand::Array) => Ok(AddKernel::ArrayArray),
            (Operand::Array, Operand::Scalar) => Ok(AddKernel::ArrayScalar),
            (Operand::Scalar, Operand::Array) => Ok(AddKernel::ScalarArray),
            (Operand::Scalar, Operand::Scalar) => Err(SpecializeError::mismatch(
                "adding two scalars needs no array kernel",
            )),
        }
    }
}

/// The add kernels and their dispatch table
#[derive(Debug)]
pub struct ArrayOps {
    array_array_add: SpecializedFn,
    array_scalar_add: SpecializedFn,
}

impl ArrayOps {
    pub fn new() -> SpecializeResult<Self> {
        Self::with_config(SpecializerConfig::from_env(), None)
    }

    pub fn with_config(
        config: SpecializerConfig,
        toolchain: Option<Arc<dyn Toolchain>>,
    ) -> SpecializeResult<Self> {
        let define = |source: &str| {
            let mut builder = SpecializedFn::builder(source).config(config.clone());
            if let Some(toolchain) = &toolchain {
                builder = builder.toolchain(Arc::clone(toolchain));
            }
            builder.build()
        };
        Ok(Self {
            array_array_add: define(ARRAY_ARRAY_ADD)?,
            array_scalar_add: define(ARRAY_SCALAR_ADD)?,
        })
    }

    /// `output = lhs + rhs` for any operand pair with at least one array
    pub fn add<'a>(&self, lhs: Arg<'a>, rhs: Arg<'a>, output: Arg<'a>) -> SpecializeResult<()> {
        match AddKernel::select(Operand::of(&lhs), Operand::of(&rhs))? {
            AddKernel::ArrayArray => self.array_array_add.call(&mut [lhs, rhs, output]),
            AddKernel::ArrayScalar => self.array_scalar_add.call(&mut [lhs, rhs, output]),
            AddKernel::ScalarArray => self.array_scalar_add.call(&mut [rhs, lhs, output]),
        }
    }

    pub fn array_array_add(&self) -> &SpecializedFn {
        &self.array_array_add
    }

    pub fn array_scalar_add(&self) -> &SpecializedFn {
        &self.array_scalar_add
    }
}

/// Kernel builder applying a single-argument helper to every element
pub fn smap_builder(helper_source: &str) -> SpecializeResult<SpecializedFnBuilder> {
    let module = parse_module(helper_source)?;
    if !module.kernels.is_empty() || module.helpers.len() != 1 {
        return Err(SpecializeError::unsupported(
            "smap takes a source defining exactly one helper function",
        ));
    }
    let name = &module.helpers[0].name;
    let kernel = format!(
        "kernel smap_{name}(a, output) {{
    for y, x in output.indices() {{
        output[y, x] = {name}(a[y, x]);
    }}
}}"
    );
    Ok(SpecializedFn::builder(kernel).helper(helper_source))
}

/// Element-wise map of a single-argument helper over rank-2 arrays
pub fn smap(helper_source: &str) -> SpecializeResult<SpecializedFn> {
    smap_builder(helper_source)?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::ParamUsage;
    use ndarray::Array2;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select() {
        assert_eq!(
            AddKernel::select(Operand::Array, Operand::Array).unwrap(),
            AddKernel::ArrayArray
        );
        assert_eq!(
            AddKernel::select(Operand::Array, Operand::Scalar).unwrap(),
            AddKernel::ArrayScalar
        );
        assert_eq!(
            AddKernel::select(Operand::Scalar, Operand::Array).unwrap(),
            AddKernel::ScalarArray
        );
        assert!(matches!(
            AddKernel::select(Operand::Scalar, Operand::Scalar),
            Err(SpecializeError::ArgumentMismatch { .. })
        ));
    }

    #[test]
    fn test_operand_kinds() {
        let a = Array2::<f64>::zeros((2, 2));
        assert_eq!(Operand::of(&Arg::input(&a)), Operand::Array);
        assert_eq!(Operand::of(&Arg::Float(1.0)), Operand::Scalar);
        assert_eq!(Operand::of(&Arg::Int(1)), Operand::Scalar);
    }

    #[test]
    fn test_scalar_add_dispatch_is_rejected_before_compiling() {
        let ops = ArrayOps::with_config(SpecializerConfig::default(), None).unwrap();
        let mut out = Array2::<f64>::zeros((2, 2));
        let result = ops.add(Arg::Float(1.0), Arg::Int(2), Arg::output(&mut out));
        assert!(matches!(result, Err(SpecializeError::ArgumentMismatch { .. })));
        assert!(ops.array_scalar_add().cached_signatures().is_empty());
    }

    #[test]
    fn test_smap_kernel() {
        let f = smap("fn relu(v) { return fmax(v, 0.0); }").unwrap();
        assert_eq!(f.name(), "smap_relu");
        assert_eq!(
            f.interface().params[0].usage,
            ParamUsage::Array { rank: Some(2), written: false }
        );

        let a = Array2::<f64>::from_shape_fn((3, 4), |(y, x)| y as f64 - x as f64);
        let mut out = Array2::<f64>::zeros((3, 4));
        f.evaluate_reference(&mut [Arg::input(&a), Arg::output(&mut out)])
            .unwrap();
        assert_eq!(out, a.mapv(|v| v.max(0.0)));
    }

    #[test]
    fn test_smap_requires_one_helper() {
        assert!(matches!(
            smap("fn a(v) { return v; } fn b(v) { return v; }"),
            Err(SpecializeError::UnsupportedConstruct { .. })
        ));
        assert!(matches!(
            smap(ARRAY_ARRAY_ADD),
            Err(SpecializeError::UnsupportedConstruct { .. })
        ));
    }
}
