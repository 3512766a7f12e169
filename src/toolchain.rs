//! External C toolchain configuration and invocation

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{SpecializeError, SpecializeResult};

/// Configuration for the C compiler used to build specialized functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable
    pub compiler: String,
    /// Optimization level passed as `-O<n>`
    pub opt_level: u8,
    /// Pass `-fopenmp` for units carrying the parallel marker
    pub openmp: bool,
    /// Extra flags inserted before the source file
    pub extra_flags: Vec<String>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "cc".to_string(),
            opt_level: 3,
            openmp: true,
            extra_flags: Vec::new(),
        }
    }
}

impl ToolchainConfig {
    /// Defaults overridden by `CC`, `KERNEL_SPEC_OPT_LEVEL`,
    /// `KERNEL_SPEC_OPENMP` and `KERNEL_SPEC_CFLAGS`
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(compiler) = lookup("CC").filter(|cc| !cc.trim().is_empty()) {
            self.compiler = compiler.trim().to_string();
        }
        if let Some(level) = lookup("KERNEL_SPEC_OPT_LEVEL") {
            match level.trim().parse() {
                Ok(level) => self.opt_level = level,
                Err(_) => log::warn!("ignoring invalid KERNEL_SPEC_OPT_LEVEL `{}`", level),
            }
        }
        if let Some(openmp) = lookup("KERNEL_SPEC_OPENMP") {
            self.openmp = !matches!(
                openmp.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
        if let Some(flags) = lookup("KERNEL_SPEC_CFLAGS") {
            self.extra_flags = flags.split_whitespace().map(str::to_string).collect();
        }
        self
    }

    /// Full argument list for building `source` into the shared library `output`
    pub fn args(&self, source: &Path, output: &Path, parallel: bool) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            format!("-O{}", self.opt_level).into(),
            "-std=c99".into(),
            "-fPIC".into(),
            "-shared".into(),
        ];
        if parallel && self.openmp {
            args.push("-fopenmp".into());
        }
        args.extend(self.extra_flags.iter().map(OsString::from));
        args.push(source.as_os_str().to_owned());
        args.push("-o".into());
        args.push(output.as_os_str().to_owned());
        args.push("-lm".into());
        args
    }
}

/// A source-in, shared-library-out build step
pub trait Toolchain: Send + Sync {
    /// Build the C file at `source` into a loadable library at `output`
    fn build(&self, source: &Path, output: &Path, parallel: bool) -> SpecializeResult<()>;
}

/// Toolchain driving a command-line C compiler
#[derive(Debug, Clone, Default)]
pub struct CcToolchain {
    config: ToolchainConfig,
}

impl CcToolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }
}

impl Toolchain for CcToolchain {
    fn build(&self, source: &Path, output: &Path, parallel: bool) -> SpecializeResult<()> {
        let started = Instant::now();
        let result = Command::new(&self.config.compiler)
            .args(self.config.args(source, output, parallel))
            .output()
            .map_err(|e| {
                SpecializeError::compilation(format!(
                    "failed to run `{}`: {}",
                    self.config.compiler, e
                ))
            })?;

        if !result.status.success() {
            return Err(SpecializeError::compilation(format!(
                "`{}` failed ({}) building {}:\n{}",
                self.config.compiler,
                result.status,
                source.display(),
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }

        log::info!(
            "built {} with `{}` in {:.2?}{}",
            output.display(),
            self.config.compiler,
            started.elapsed(),
            if parallel && self.config.openmp { " (openmp)" } else { "" }
        );
        Ok(())
    }
}
