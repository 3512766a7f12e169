//! Kernel Specializer CLI
//!
//! Usage:
//!   kernelspec -f add.kernel --arg f32:4x4 --arg f32:4x4 --arg f32:4x4
//!   kernelspec "kernel k(a, b, out) { ... }" --arg f64:64x64 --arg float --arg f64:64x64 --ir
//!   kernelspec -f smap.kernel --helper relu.kernel --arg f32:128x128 --arg f32:128x128 --compile

use clap::Parser as ClapParser;
use colored::Colorize;
use std::fs;
use std::io::{self, Read};

use kernel_specializer::{
    compile, specialize, ArgDescriptor, CcToolchain, CodeGenerator, ElementType, Function,
    Signature, SpecializerConfig, ToolchainConfig, DEFAULT_BLOCK_FACTOR,
};

#[derive(ClapParser, Debug)]
#[command(name = "kernelspec")]
#[command(author = "Runtime Team")]
#[command(version = "0.1.0")]
#[command(about = "Specializes element-wise array kernels into native loop nests")]
struct Args {
    /// Kernel source text
    #[arg(value_name = "SOURCE")]
    source: Option<String>,

    /// Read kernel source from file
    #[arg(short = 'f', long = "file")]
    input_file: Option<String>,

    /// Additional source files defining helper functions
    #[arg(long = "helper")]
    helpers: Vec<String>,

    /// Argument descriptors in call order (e.g., "f32:4x4", "int", "float=0.5")
    #[arg(short = 'a', long = "arg", value_parser = parse_arg)]
    args: Vec<ArgDescriptor>,

    /// Print the intermediate form instead of C
    #[arg(long = "ir")]
    ir_output: bool,

    /// Print the intermediate form as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Disable loop blocking
    #[arg(long = "no-block")]
    no_block: bool,

    /// Loop blocking tile edge
    #[arg(short = 'b', long = "block-factor", default_value_t = DEFAULT_BLOCK_FACTOR)]
    block_factor: usize,

    /// Build and load the native function
    #[arg(short = 'c', long = "compile")]
    compile: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn parse_arg(s: &str) -> Result<ArgDescriptor, String> {
    match s {
        "int" => return Ok(ArgDescriptor::Int(0)),
        "float" => return Ok(ArgDescriptor::Float(0.0)),
        _ => {}
    }
    if let Some(value) = s.strip_prefix("int=") {
        return value
            .parse()
            .map(ArgDescriptor::Int)
            .map_err(|_| format!("Invalid integer: {}", value));
    }
    if let Some(value) = s.strip_prefix("float=") {
        return value
            .parse()
            .map(ArgDescriptor::Float)
            .map_err(|_| format!("Invalid float: {}", value));
    }

    let (elem, dims) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid argument format: {}", s))?;
    let elem: ElementType = elem.parse()?;
    let dims = dims
        .split('x')
        .map(|d| {
            d.parse::<usize>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| format!("Invalid dimension: {}", d))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ArgDescriptor::Array { dims, elem })
}

fn read_source(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("{}: Failed to read file '{}': {}", "Error".red(), path, e);
        std::process::exit(1);
    })
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "warn" }),
    )
    .init();

    // Get source from argument, file, or stdin
    let mut source = if let Some(source) = args.source {
        source
    } else if let Some(file) = &args.input_file {
        read_source(file)
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer).unwrap_or_else(|e| {
            eprintln!("{}: Failed to read stdin: {}", "Error".red(), e);
            std::process::exit(1);
        });
        buffer
    };
    for helper in &args.helpers {
        source.push('\n');
        source.push_str(&read_source(helper));
    }

    let signature = Signature::new(args.args);
    let config = SpecializerConfig {
        block_factor: args.block_factor,
        loop_blocking: !args.no_block,
        toolchain: ToolchainConfig::from_env(),
    };

    if args.verbose {
        println!("{}", "Kernel Specializer".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!("{}: {}", "Signature".green(), signature);
        if config.loop_blocking {
            println!("{}: {}", "Block factor".green(), config.block_factor);
        } else {
            println!("{}: disabled", "Loop blocking".green());
        }
        println!();
    }

    let function = match specialize(&source, &signature, &config) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}: {}", "Specialization error".red(), e);
            std::process::exit(1);
        }
    };

    if args.json_output {
        match serde_json::to_string_pretty(&function) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{}: Failed to serialize to JSON: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
    } else if args.ir_output {
        print!("{}", function);
    } else if !args.compile {
        print!("{}", CodeGenerator::new().generate(&function).source);
    }

    if args.compile {
        compile_and_report(&function, config.toolchain);
    }
}

fn compile_and_report(function: &Function, config: ToolchainConfig) {
    let toolchain = CcToolchain::new(config);
    match compile(function, &toolchain) {
        Ok(native) => {
            println!("{}", "Compilation Results".bold().green());
            println!("{}", "=".repeat(50));
            println!("{}: {}", "Entry".cyan(), native.symbol());
            println!("{}: {}", "Compiler".cyan(), toolchain.config().compiler);
            println!(
                "{}: {}",
                "Parallel".cyan(),
                if function.has_parallel_loop() { "yes" } else { "no" }
            );
            for (param, ty) in function.params.iter().zip(native.param_types()) {
                println!("  {} {}", param.name.bold(), ty);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Compilation error".red(), e);
            std::process::exit(1);
        }
    }
}
