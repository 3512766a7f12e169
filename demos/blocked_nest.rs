//! Example: Loop Blocking
//!
//! Shows the loop nest produced for a large array before and after loop
//! blocking, the C emitted for it, and checks that the native result
//! agrees with the reference evaluator.
//!
//! Run with: cargo run --example blocked_nest

use kernel_specializer::{
    specialize, Arg, ArgDescriptor, CodeGenerator, ElementType, Signature, SpecializedFn,
    SpecializerConfig,
};
use ndarray::Array2;

const SCALE_ADD: &str = "kernel scale_add(a, b, alpha, output) {
    for y, x in output.indices() {
        output[y, x] = a[y, x] * alpha + b[y, x];
    }
}";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Loop Blocking Example ===\n");

    let signature = Signature::new(vec![
        ArgDescriptor::array(&[100, 70], ElementType::F64),
        ArgDescriptor::array(&[100, 70], ElementType::F64),
        ArgDescriptor::Float(0.0),
        ArgDescriptor::array(&[100, 70], ElementType::F64),
    ]);

    let plain = specialize(
        SCALE_ADD,
        &signature,
        &SpecializerConfig {
            loop_blocking: false,
            ..SpecializerConfig::default()
        },
    )
    .unwrap();
    println!("Unblocked:\n{}", plain);

    let blocked = specialize(SCALE_ADD, &signature, &SpecializerConfig::default()).unwrap();
    println!("Blocked (factor 32):\n{}", blocked);

    println!("Generated C:\n{}", CodeGenerator::new().generate(&blocked).source);

    // Native and reference results must agree
    let f = SpecializedFn::define(SCALE_ADD).unwrap();
    let a = Array2::<f64>::from_shape_fn((100, 70), |(y, x)| (y as f64).sin() + x as f64);
    let b = Array2::<f64>::from_shape_fn((100, 70), |(y, x)| (x as f64).cos() - y as f64);
    let mut native = Array2::<f64>::zeros((100, 70));
    let mut reference = Array2::<f64>::zeros((100, 70));

    f.call(&mut [Arg::input(&a), Arg::input(&b), Arg::Float(0.25), Arg::output(&mut native)])
        .unwrap();
    f.evaluate_reference(&mut [
        Arg::input(&a),
        Arg::input(&b),
        Arg::Float(0.25),
        Arg::output(&mut reference),
    ])
    .unwrap();

    let max_error = native
        .iter()
        .zip(reference.iter())
        .map(|(n, r)| (n - r).abs())
        .fold(0.0, f64::max);
    println!("Max difference between native and reference: {:e}", max_error);
}
