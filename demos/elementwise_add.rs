//! Example: Element-wise Addition
//!
//! Specializes the array-array and array-scalar add kernels, showing one
//! compilation per shape and reuse of the compiled entry when only a
//! scalar value changes.
//!
//! Run with: cargo run --example elementwise_add

use kernel_specializer::{Arg, ArrayOps};
use ndarray::Array2;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Element-wise Addition Example ===\n");

    let ops = ArrayOps::new().unwrap();

    // Example 1: two 4x4 arrays
    println!("Example 1: output[y, x] = a[y, x] + b[y, x] for 4x4 f32 arrays");
    let a = Array2::<f32>::from_elem((4, 4), 1.0);
    let b = Array2::<f32>::from_elem((4, 4), 2.0);
    let mut output = Array2::<f32>::zeros((4, 4));
    ops.add(Arg::input(&a), Arg::input(&b), Arg::output(&mut output))
        .unwrap();
    println!("{}\n", output);

    // Example 2: a new shape compiles a new specialization
    println!("Example 2: the same kernel on 8x8 arrays");
    let a = Array2::<f32>::from_shape_fn((8, 8), |(y, x)| (y * 8 + x) as f32);
    let b = Array2::<f32>::from_elem((8, 8), 0.5);
    let mut output = Array2::<f32>::zeros((8, 8));
    ops.add(Arg::input(&a), Arg::input(&b), Arg::output(&mut output))
        .unwrap();
    println!("{}\n", output);
    println!(
        "Cached signatures: {}\n",
        ops.array_array_add().cached_signatures().len()
    );

    // Example 3: array plus scalar, changing only the scalar
    println!("Example 3: output[y, x] = a[y, x] + b for a 3x3 array");
    let a = Array2::<f64>::from_shape_fn((3, 3), |(y, x)| (y * 3 + x) as f64);
    let mut output = Array2::<f64>::zeros((3, 3));
    for scalar in [5.0, -1.5] {
        ops.add(Arg::input(&a), Arg::Float(scalar), Arg::output(&mut output))
            .unwrap();
        println!("b = {}:\n{}\n", scalar, output);
    }

    // Example 4: scalar plus array dispatches to the commuted kernel
    println!("Example 4: 10.0 + a");
    ops.add(Arg::Float(10.0), Arg::input(&a), Arg::output(&mut output))
        .unwrap();
    println!("{}\n", output);

    println!(
        "array_scalar_add compiled {} time(s)",
        ops.array_scalar_add().cached_signatures().len()
    );
}
