//! Example: Element-wise Helpers
//!
//! Lifts scalar helper functions into element-wise kernels with `smap`
//! and uses a helper inside a hand-written kernel.
//!
//! Run with: cargo run --example smap_helpers

use kernel_specializer::{smap, Arg, SpecializedFn};
use ndarray::Array2;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Element-wise Helper Example ===\n");

    let a = Array2::<f32>::from_shape_fn((4, 6), |(y, x)| y as f32 - x as f32);
    println!("Input:\n{}\n", a);

    // Example 1: rectifier
    let relu = smap("fn relu(v) { return fmax(v, 0.0); }").unwrap();
    let mut output = Array2::<f32>::zeros((4, 6));
    relu.call(&mut [Arg::input(&a), Arg::output(&mut output)])
        .unwrap();
    println!("relu:\n{}\n", output);

    // Example 2: logistic function
    let sigmoid = smap("fn sigmoid(v) { return 1.0 / (1.0 + exp(-v)); }").unwrap();
    sigmoid
        .call(&mut [Arg::input(&a), Arg::output(&mut output)])
        .unwrap();
    println!("sigmoid:\n{}\n", output);

    // Example 3: a helper supplied alongside a kernel
    let leaky = SpecializedFn::builder(
        "kernel leaky_scale(a, scale, output) {
            for y, x in output.indices() {
                let t = leaky(a[y, x]);
                output[y, x] = t * scale;
            }
        }",
    )
    .helper("fn leaky(v) { return fmax(v, v * 0.01); }")
    .build()
    .unwrap();
    leaky
        .call(&mut [Arg::input(&a), Arg::Float(2.0), Arg::output(&mut output)])
        .unwrap();
    println!("leaky_scale (scale = 2):\n{}", output);
}
