//! End-to-end tests against the system C compiler

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use kernel_specializer::{
    smap, Arg, ArrayOps, CcToolchain, SpecializeError, SpecializeResult, SpecializedFn,
    SpecializerConfig, Toolchain, ToolchainConfig,
};
use ndarray::{Array2, Array3};

const ARRAY_ARRAY_ADD: &str = "kernel array_array_add(a, b, output) {
    for y, x in output.indices() {
        output[y, x] = a[y, x] + b[y, x];
    }
}";

const ARRAY_SCALAR_ADD: &str = "kernel array_scalar_add(a, b, output) {
    for y, x in output.indices() {
        output[y, x] = a[y, x] + b;
    }
}";

/// Counts builds and delegates to the system compiler
struct CountingToolchain {
    inner: CcToolchain,
    builds: AtomicUsize,
}

impl CountingToolchain {
    fn new(openmp: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: CcToolchain::new(ToolchainConfig {
                openmp,
                ..ToolchainConfig::default()
            }),
            builds: AtomicUsize::new(0),
        })
    }

    fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl Toolchain for CountingToolchain {
    fn build(&self, source: &Path, output: &Path, parallel: bool) -> SpecializeResult<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.inner.build(source, output, parallel)
    }
}

/// Fails its first build, then delegates
struct FlakyToolchain {
    inner: CcToolchain,
    attempts: AtomicUsize,
}

impl Toolchain for FlakyToolchain {
    fn build(&self, source: &Path, output: &Path, parallel: bool) -> SpecializeResult<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(SpecializeError::compilation("transient toolchain failure"));
        }
        self.inner.build(source, output, parallel)
    }
}

/// Rewrites the generated source before building it
struct TamperingToolchain {
    inner: CcToolchain,
    tamper: fn(String) -> String,
}

impl Toolchain for TamperingToolchain {
    fn build(&self, source: &Path, output: &Path, parallel: bool) -> SpecializeResult<()> {
        let text = fs::read_to_string(source).map_err(|e| SpecializeError::compilation(e.to_string()))?;
        fs::write(source, (self.tamper)(text)).map_err(|e| SpecializeError::compilation(e.to_string()))?;
        self.inner.build(source, output, parallel)
    }
}

fn define(source: &str, toolchain: Arc<dyn Toolchain>) -> SpecializedFn {
    SpecializedFn::builder(source)
        .config(SpecializerConfig::default())
        .toolchain(toolchain)
        .build()
        .unwrap()
}

fn serial() -> CcToolchain {
    CcToolchain::new(ToolchainConfig {
        openmp: false,
        ..ToolchainConfig::default()
    })
}

#[test]
fn test_add_4x4_then_8x8_recompiles() {
    let toolchain = CountingToolchain::new(false);
    let add = define(ARRAY_ARRAY_ADD, toolchain.clone());

    let a = Array2::<f32>::from_elem((4, 4), 1.0);
    let b = Array2::<f32>::from_elem((4, 4), 2.0);
    let mut output = Array2::<f32>::zeros((4, 4));
    add.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, Array2::from_elem((4, 4), 3.0));

    // same signature: no new build
    output.fill(0.0);
    add.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, Array2::from_elem((4, 4), 3.0));
    assert_eq!(toolchain.builds(), 1);

    let a = Array2::<f32>::from_shape_fn((8, 8), |(y, x)| (y * 8 + x) as f32);
    let b = Array2::<f32>::from_elem((8, 8), 0.5);
    let mut output = Array2::<f32>::zeros((8, 8));
    add.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, &a + &b);
    assert_eq!(toolchain.builds(), 2);
    assert_eq!(add.cached_signatures().len(), 2);
}

#[test]
fn test_scalar_value_change_reuses_entry() {
    let toolchain = CountingToolchain::new(false);
    let add = define(ARRAY_SCALAR_ADD, toolchain.clone());

    let a = Array2::<f64>::from_shape_fn((3, 3), |(y, x)| (y * 3 + x) as f64);
    let mut output = Array2::<f64>::zeros((3, 3));

    add.call(&mut [Arg::input(&a), Arg::Float(5.0), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, a.mapv(|v| v + 5.0));

    add.call(&mut [Arg::input(&a), Arg::Float(-1.25), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, a.mapv(|v| v - 1.25));
    assert_eq!(toolchain.builds(), 1);

    // an integer scalar is a different signature
    add.call(&mut [Arg::input(&a), Arg::Int(2), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, a.mapv(|v| v + 2.0));
    assert_eq!(toolchain.builds(), 2);
}

#[test]
fn test_array_ops_dispatch() {
    let ops = ArrayOps::with_config(
        SpecializerConfig::default(),
        Some(Arc::new(serial()) as Arc<dyn Toolchain>),
    )
    .unwrap();

    let a = Array2::<f32>::from_elem((3, 3), 1.5);
    let mut output = Array2::<f32>::zeros((3, 3));
    ops.add(Arg::input(&a), Arg::input(&a), Arg::output(&mut output))
        .unwrap();
    assert_eq!(output, Array2::from_elem((3, 3), 3.0));

    ops.add(Arg::input(&a), Arg::Float(5.0), Arg::output(&mut output))
        .unwrap();
    assert_eq!(output, Array2::from_elem((3, 3), 6.5));

    ops.add(Arg::Float(-0.5), Arg::input(&a), Arg::output(&mut output))
        .unwrap();
    assert_eq!(output, Array2::from_elem((3, 3), 1.0));

    assert_eq!(ops.array_scalar_add().cached_signatures().len(), 1);
}

#[test]
fn test_concurrent_first_calls_compile_once() {
    let toolchain = CountingToolchain::new(false);
    let add = define(ARRAY_ARRAY_ADD, toolchain.clone());
    let barrier = Barrier::new(6);

    thread::scope(|scope| {
        for t in 0..6 {
            let (add, barrier) = (&add, &barrier);
            scope.spawn(move || {
                let a = Array2::<f64>::from_elem((16, 16), t as f64);
                let b = Array2::<f64>::from_elem((16, 16), 0.5);
                let mut output = Array2::<f64>::zeros((16, 16));
                barrier.wait();
                add.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut output)])
                    .unwrap();
                assert_eq!(output, Array2::from_elem((16, 16), t as f64 + 0.5));
            });
        }
    });

    assert_eq!(toolchain.builds(), 1);
    assert_eq!(add.cached_signatures().len(), 1);
}

#[test]
fn test_blocked_native_matches_reference() {
    let toolchain = CountingToolchain::new(true);
    let f = define(
        "kernel scale_add(a, b, alpha, output) {
            for y, x in output.indices() {
                output[y, x] = a[y, x] * alpha + b[y, x];
            }
        }",
        toolchain,
    );

    let a = Array2::<f64>::from_shape_fn((70, 45), |(y, x)| (y as f64) * 0.25 - x as f64);
    let b = Array2::<f64>::from_shape_fn((70, 45), |(y, x)| (x * y) as f64 / 7.0);
    let mut native = Array2::<f64>::zeros((70, 45));
    let mut reference = Array2::<f64>::zeros((70, 45));

    f.call(&mut [Arg::input(&a), Arg::input(&b), Arg::Float(1.5), Arg::output(&mut native)])
        .unwrap();
    f.evaluate_reference(&mut [
        Arg::input(&a),
        Arg::input(&b),
        Arg::Float(1.5),
        Arg::output(&mut reference),
    ])
    .unwrap();

    let key = &f.cached_signatures()[0];
    let entry = f.compiled_entry(key).unwrap();
    assert!(entry.function.has_parallel_loop());

    for (n, r) in native.iter().zip(reference.iter()) {
        assert!((n - r).abs() <= 1e-12 * r.abs().max(1.0), "{} != {}", n, r);
    }
}

#[test]
fn test_integer_kernel_is_exact() {
    let f = define(
        "kernel mix(a, b, k, output) {
            for z, y, x in output.indices() {
                let t = a[z, y, x] * k - b[z, y, x] / 3;
                output[z, y, x] = t + output.shape[2];
            }
        }",
        Arc::new(serial()),
    );

    let a = Array3::<i32>::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 20 + y * 5 + x) as i32 - 30);
    let b = Array3::<i32>::from_shape_fn((3, 4, 5), |(z, y, x)| (x * 7) as i32 - (z * y) as i32);
    let mut native = Array3::<i32>::zeros((3, 4, 5));
    let mut reference = Array3::<i32>::zeros((3, 4, 5));

    f.call(&mut [Arg::input(&a), Arg::input(&b), Arg::Int(3), Arg::output(&mut native)])
        .unwrap();
    f.evaluate_reference(&mut [Arg::input(&a), Arg::input(&b), Arg::Int(3), Arg::output(&mut reference)])
        .unwrap();

    let expected = Array3::from_shape_fn((3, 4, 5), |idx| a[idx] * 3 - b[idx] / 3 + 5);
    assert_eq!(native, expected);
    assert_eq!(reference, expected);
}

#[test]
fn test_i32_products_do_not_overflow() {
    let f = define(
        "kernel square(a, output) {
            for y, x in output.indices() {
                output[y, x] = a[y, x] * a[y, x] + 1;
            }
        }",
        Arc::new(serial()),
    );

    let a = Array2::<i32>::from_shape_fn((2, 3), |(y, x)| 100_000 - (y * 3 + x) as i32 * 40_000);
    let mut native = Array2::<i64>::zeros((2, 3));
    let mut reference = Array2::<i64>::zeros((2, 3));

    f.call(&mut [Arg::input(&a), Arg::output(&mut native)]).unwrap();
    f.evaluate_reference(&mut [Arg::input(&a), Arg::output(&mut reference)])
        .unwrap();

    let expected = a.mapv(|v| v as i64 * v as i64 + 1);
    assert_eq!(native, expected);
    assert_eq!(reference, expected);
}

#[test]
fn test_integer_division_by_zero_is_reported() {
    let f = define(
        "kernel ratio(a, b, output) {
            for y, x in output.indices() {
                output[y, x] = a[y, x] / b[y, x];
            }
        }",
        Arc::new(serial()),
    );

    let a = Array2::<i64>::from_elem((3, 3), 12);
    let mut b = Array2::<i64>::from_elem((3, 3), 4);
    b[(1, 2)] = 0;
    b[(2, 0)] = -1;
    let mut native = Array2::<i64>::zeros((3, 3));
    let mut reference = Array2::<i64>::zeros((3, 3));

    let result = f.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut native)]);
    assert!(matches!(result, Err(SpecializeError::ArgumentMismatch { .. })), "{:?}", result);
    let result = f.evaluate_reference(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut reference)]);
    assert!(matches!(result, Err(SpecializeError::ArgumentMismatch { .. })), "{:?}", result);

    b[(1, 2)] = 6;
    f.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut native)])
        .unwrap();
    assert_eq!(native, Array2::from_shape_fn((3, 3), |idx| a[idx] / b[idx]));
    assert_eq!(f.cached_signatures().len(), 1);
}

#[test]
fn test_smap_native() {
    let relu = smap("fn relu(v) { return fmax(v, 0.0); }").unwrap();
    let a = Array2::<f32>::from_shape_fn((5, 6), |(y, x)| y as f32 - x as f32);
    let mut output = Array2::<f32>::from_elem((5, 6), f32::NAN);

    let result = relu.call(&mut [Arg::input(&a), Arg::output(&mut output)]);
    // the default configuration reads the toolchain from the environment
    if let Err(SpecializeError::CompilationError { message }) = &result {
        panic!("system toolchain unavailable: {}", message);
    }
    result.unwrap();
    assert_eq!(output, a.mapv(|v| v.max(0.0)));
}

#[test]
fn test_failed_build_is_retried() {
    let toolchain = Arc::new(FlakyToolchain {
        inner: serial(),
        attempts: AtomicUsize::new(0),
    });
    let add = define(ARRAY_ARRAY_ADD, toolchain.clone());

    let a = Array2::<f32>::ones((2, 2));
    let mut output = Array2::<f32>::zeros((2, 2));

    let first = add.call(&mut [Arg::input(&a), Arg::input(&a), Arg::output(&mut output)]);
    assert!(matches!(first, Err(SpecializeError::CompilationError { .. })));
    assert!(add.cached_signatures().is_empty());

    add.call(&mut [Arg::input(&a), Arg::input(&a), Arg::output(&mut output)])
        .unwrap();
    assert_eq!(output, Array2::from_elem((2, 2), 2.0));
    assert_eq!(toolchain.attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn test_missing_entry_point_is_a_symbol_error() {
    let toolchain = Arc::new(TamperingToolchain {
        inner: serial(),
        tamper: |_| "int unrelated(void) { return 0; }\n".to_string(),
    });
    let add = define(ARRAY_ARRAY_ADD, toolchain);

    let a = Array2::<f32>::ones((2, 2));
    let mut output = Array2::<f32>::zeros((2, 2));
    let result = add.call(&mut [Arg::input(&a), Arg::input(&a), Arg::output(&mut output)]);
    assert!(matches!(result, Err(SpecializeError::SymbolResolutionError { .. })));
    assert!(add.cached_signatures().is_empty());
}

#[test]
fn test_mismatched_signature_is_a_symbol_error() {
    let toolchain = Arc::new(TamperingToolchain {
        inner: serial(),
        tamper: |text| text.replacen("f32[2x2]*", "f64[2x2]*", 1),
    });
    let add = define(ARRAY_ARRAY_ADD, toolchain);

    let a = Array2::<f32>::ones((2, 2));
    let mut output = Array2::<f32>::zeros((2, 2));
    let result = add.call(&mut [Arg::input(&a), Arg::input(&a), Arg::output(&mut output)]);
    match result {
        Err(SpecializeError::SymbolResolutionError { message, .. }) => {
            assert!(message.contains("signature mismatch"), "{}", message);
        }
        other => panic!("Expected SymbolResolutionError, got {:?}", other),
    }
}

#[test]
fn test_rejects_calls_that_do_not_fit_the_kernel() {
    let add = define(ARRAY_ARRAY_ADD, Arc::new(serial()));
    let a = Array2::<f32>::ones((4, 4));
    let b = Array2::<f32>::ones((4, 5));
    let mut output = Array2::<f32>::zeros((4, 4));

    let result = add.call(&mut [Arg::input(&a), Arg::input(&b), Arg::output(&mut output)]);
    assert!(matches!(result, Err(SpecializeError::ArgumentMismatch { .. })));

    let result = add.call(&mut [Arg::input(&a), Arg::output(&mut output)]);
    assert!(matches!(result, Err(SpecializeError::ArgumentMismatch { .. })));
    assert!(add.cached_signatures().is_empty());
}
