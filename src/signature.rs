//! Call arguments and the signatures derived from them
//!
//! A [`Signature`] is the canonical description of one call's arguments:
//! shape and element type for arrays, kind and value for scalars. Its
//! [`SignatureKey`] is what the specialization cache hashes. Scalar values
//! are deliberately absent from the key since scalars always travel as
//! native parameters.

use std::fmt;
use std::marker::PhantomData;

use ndarray::{ArrayBase, Data, DataMut, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::{SpecializeError, SpecializeResult};

/// Numeric element types understood by the specializer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementType {
    I32,
    I64,
    F32,
    F64,
}

impl ElementType {
    /// C spelling of the type
    pub fn c_name(self) -> &'static str {
        match self {
            ElementType::I32 => "int32_t",
            ElementType::I64 => "int64_t",
            ElementType::F32 => "float",
            ElementType::F64 => "double",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }

    /// Usual arithmetic conversion of two operand types
    ///
    /// Floating point beats integer, wider beats narrower; the variant
    /// order encodes exactly that ranking.
    pub fn promote(self, other: ElementType) -> ElementType {
        self.max(other)
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            ElementType::I32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::F64 => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i32" => Ok(ElementType::I32),
            "i64" => Ok(ElementType::I64),
            "f32" => Ok(ElementType::F32),
            "f64" => Ok(ElementType::F64),
            other => Err(format!("unknown element type `{}`", other)),
        }
    }
}

/// Rust element types that may back an array argument
pub trait Element: Copy + 'static {
    const TYPE: ElementType;
}

impl Element for i32 {
    const TYPE: ElementType = ElementType::I32;
}

impl Element for i64 {
    const TYPE: ElementType = ElementType::I64;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;
}

impl Element for f64 {
    const TYPE: ElementType = ElementType::F64;
}

/// A borrowed array argument
///
/// Holds the data pointer of an `ndarray` array together with its shape and
/// element type. The lifetime ties the pointer to the borrow it came from.
#[derive(Debug)]
pub struct ArrayArg<'a> {
    ptr: *mut u8,
    dims: Vec<usize>,
    elem: ElementType,
    writable: bool,
    standard_layout: bool,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> ArrayArg<'a> {
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn elem(&self) -> ElementType {
        self.elem
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }
}

/// One argument of a specialized call
#[derive(Debug)]
pub enum Arg<'a> {
    Array(ArrayArg<'a>),
    Int(i64),
    Float(f64),
}

impl<'a> Arg<'a> {
    /// Borrow an array as a read-only input
    pub fn input<A, S, D>(array: &'a ArrayBase<S, D>) -> Self
    where
        A: Element,
        S: Data<Elem = A>,
        D: Dimension,
    {
        Arg::Array(ArrayArg {
            ptr: array.as_ptr() as *mut u8,
            dims: array.shape().to_vec(),
            elem: A::TYPE,
            writable: false,
            standard_layout: array.is_standard_layout(),
            _borrow: PhantomData,
        })
    }

    /// Borrow an array as a writable output
    pub fn output<A, S, D>(array: &'a mut ArrayBase<S, D>) -> Self
    where
        A: Element,
        S: DataMut<Elem = A>,
        D: Dimension,
    {
        let standard_layout = array.is_standard_layout();
        let dims = array.shape().to_vec();
        Arg::Array(ArrayArg {
            ptr: array.as_mut_ptr() as *mut u8,
            dims,
            elem: A::TYPE,
            writable: true,
            standard_layout,
            _borrow: PhantomData,
        })
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Arg::Array(_))
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_array()
    }
}

impl From<i64> for Arg<'_> {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg<'_> {
    fn from(value: i32) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<f64> for Arg<'_> {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<f32> for Arg<'_> {
    fn from(value: f32) -> Self {
        Arg::Float(value as f64)
    }
}

/// Description of one argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArgDescriptor {
    Array { dims: Vec<usize>, elem: ElementType },
    Int(i64),
    Float(f64),
}

impl ArgDescriptor {
    pub fn array(dims: &[usize], elem: ElementType) -> Self {
        ArgDescriptor::Array {
            dims: dims.to_vec(),
            elem,
        }
    }

    /// The hashable part of this descriptor
    pub fn kind(&self) -> ArgKind {
        match self {
            ArgDescriptor::Array { dims, elem } => ArgKind::Array {
                dims: dims.clone(),
                elem: *elem,
            },
            ArgDescriptor::Int(_) => ArgKind::Int,
            ArgDescriptor::Float(_) => ArgKind::Float,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ArgDescriptor::Array { .. })
    }
}

impl fmt::Display for ArgDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgDescriptor::Array { dims, elem } => write!(f, "{}[{}]", elem, join_dims(dims)),
            ArgDescriptor::Int(v) => write!(f, "int({})", v),
            ArgDescriptor::Float(v) => write!(f, "float({})", v),
        }
    }
}

/// Cache-relevant kind of one argument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKind {
    Array { dims: Vec<usize>, elem: ElementType },
    Int,
    Float,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::Array { dims, elem } => write!(f, "{}[{}]", elem, join_dims(dims)),
            ArgKind::Int => write!(f, "int"),
            ArgKind::Float => write!(f, "float"),
        }
    }
}

/// Canonical signature of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub args: Vec<ArgDescriptor>,
}

impl Signature {
    pub fn new(args: Vec<ArgDescriptor>) -> Self {
        Self { args }
    }

    /// Derive the signature of a call's arguments
    pub fn extract(args: &[Arg<'_>]) -> SpecializeResult<Self> {
        let args = args
            .iter()
            .enumerate()
            .map(|(position, arg)| describe(position, arg))
            .collect::<SpecializeResult<Vec<_>>>()?;
        Ok(Self { args })
    }

    /// Cache key: shapes and types, scalar kinds without their values
    pub fn key(&self) -> SignatureKey {
        SignatureKey(self.args.iter().map(ArgDescriptor::kind).collect())
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Hashable cache key derived from a [`Signature`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureKey(pub Vec<ArgKind>);

impl fmt::Display for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|k| k.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

fn describe(position: usize, arg: &Arg<'_>) -> SpecializeResult<ArgDescriptor> {
    match arg {
        Arg::Int(v) => Ok(ArgDescriptor::Int(*v)),
        Arg::Float(v) => Ok(ArgDescriptor::Float(*v)),
        Arg::Array(array) => {
            if array.dims.is_empty() {
                return Err(SpecializeError::unsupported_argument(format!(
                    "argument {} is a zero-dimensional array",
                    position
                )));
            }
            if array.dims.contains(&0) {
                return Err(SpecializeError::unsupported_argument(format!(
                    "argument {} has an empty axis: shape [{}]",
                    position,
                    join_dims(&array.dims)
                )));
            }
            if !array.standard_layout {
                return Err(SpecializeError::unsupported_argument(format!(
                    "argument {} is not a contiguous row-major array",
                    position
                )));
            }
            Ok(ArgDescriptor::Array {
                dims: array.dims.clone(),
                elem: array.elem,
            })
        }
    }
}

pub(crate) fn join_dims(dims: &[usize]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("x")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Array2, Array3, ArrayD, IxDyn};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_arrays_and_scalars() {
        let a = Array2::<f32>::zeros((4, 4));
        let mut out = Array3::<i64>::zeros((2, 3, 5));
        let args = [Arg::input(&a), Arg::from(5.0f32), Arg::from(7i32), Arg::output(&mut out)];

        let signature = Signature::extract(&args).unwrap();
        assert_eq!(
            signature.args,
            vec![
                ArgDescriptor::array(&[4, 4], ElementType::F32),
                ArgDescriptor::Float(5.0),
                ArgDescriptor::Int(7),
                ArgDescriptor::array(&[2, 3, 5], ElementType::I64),
            ]
        );
        assert_eq!(signature.to_string(), "(f32[4x4], float(5), int(7), i64[2x3x5])");
    }

    #[test]
    fn test_key_ignores_scalar_values() {
        let a = Array2::<f64>::zeros((3, 3));
        let first = Signature::extract(&[Arg::input(&a), Arg::Float(5.0)]).unwrap();
        let second = Signature::extract(&[Arg::input(&a), Arg::Float(-1.5)]).unwrap();
        assert_ne!(first, second);
        assert_eq!(first.key(), second.key());
    }

    #[test]
    fn test_key_distinguishes_shape_and_type() {
        let small = Array2::<f32>::zeros((4, 4));
        let large = Array2::<f32>::zeros((8, 8));
        let double = Array2::<f64>::zeros((4, 4));
        let k1 = Signature::extract(&[Arg::input(&small)]).unwrap().key();
        let k2 = Signature::extract(&[Arg::input(&large)]).unwrap().key();
        let k3 = Signature::extract(&[Arg::input(&double)]).unwrap().key();
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(
            Signature::extract(&[Arg::Int(1)]).unwrap().key(),
            Signature::extract(&[Arg::Float(1.0)]).unwrap().key()
        );
    }

    #[test]
    fn test_dynamic_dimension_arrays() {
        let a = ArrayD::<i32>::zeros(IxDyn(&[2, 2, 2, 2]));
        let signature = Signature::extract(&[Arg::input(&a)]).unwrap();
        assert_eq!(signature.args[0], ArgDescriptor::array(&[2, 2, 2, 2], ElementType::I32));
    }

    #[test]
    fn test_rejects_non_contiguous() {
        let a = Array2::<f32>::zeros((4, 4));
        let transposed = a.t();
        let result = Signature::extract(&[Arg::input(&transposed)]);
        assert!(matches!(result, Err(SpecializeError::UnsupportedArgumentType { .. })));

        let strided = a.slice(s![.., ..;2]);
        let result = Signature::extract(&[Arg::input(&strided)]);
        assert!(matches!(result, Err(SpecializeError::UnsupportedArgumentType { .. })));
    }

    #[test]
    fn test_rejects_empty_and_zero_dimensional() {
        let empty = Array2::<f32>::zeros((0, 4));
        assert!(matches!(
            Signature::extract(&[Arg::input(&empty)]),
            Err(SpecializeError::UnsupportedArgumentType { .. })
        ));

        let scalar_array = ArrayD::<f32>::zeros(IxDyn(&[]));
        assert!(matches!(
            Signature::extract(&[Arg::input(&scalar_array)]),
            Err(SpecializeError::UnsupportedArgumentType { .. })
        ));
    }

    #[test]
    fn test_promotion() {
        assert_eq!(ElementType::I32.promote(ElementType::F32), ElementType::F32);
        assert_eq!(ElementType::I64.promote(ElementType::F32), ElementType::F32);
        assert_eq!(ElementType::F32.promote(ElementType::F64), ElementType::F64);
        assert_eq!(ElementType::I32.promote(ElementType::I64), ElementType::I64);
    }
}
