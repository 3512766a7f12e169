//! The specialized function façade
//!
//! [`SpecializedFn`] is what the rest of a program calls. Each call derives
//! the signature of its arguments, looks it up in the function's own cache
//! and, on a miss, translates, blocks, compiles and loads a native function
//! for it. Outputs are written in place through the array arguments.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analyzer::{check_module, CheckedKernel, KernelInterface};
use crate::cache::SpecializationCache;
use crate::error::SpecializeResult;
use crate::interp;
use crate::ir::Function;
use crate::loader::{compile, NativeFunction};
use crate::parser::parse_module;
use crate::signature::{Arg, Signature, SignatureKey};
use crate::tiling::{LoopBlocking, DEFAULT_BLOCK_FACTOR};
use crate::toolchain::{CcToolchain, Toolchain, ToolchainConfig};
use crate::translate::translate;

/// Specializer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecializerConfig {
    /// Tile edge used by loop blocking
    pub block_factor: usize,
    /// Apply loop blocking to qualifying nests
    pub loop_blocking: bool,
    pub toolchain: ToolchainConfig,
}

impl Default for SpecializerConfig {
    fn default() -> Self {
        Self {
            block_factor: DEFAULT_BLOCK_FACTOR,
            loop_blocking: true,
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl SpecializerConfig {
    /// Default configuration with the toolchain taken from the environment
    pub fn from_env() -> Self {
        Self {
            toolchain: ToolchainConfig::from_env(),
            ..Self::default()
        }
    }
}

/// A compiled specialization: the function it was built from and its
/// loaded native code
#[derive(Debug)]
pub struct CompiledEntry {
    pub function: Function,
    pub native: NativeFunction,
}

/// Builder for [`SpecializedFn`]
pub struct SpecializedFnBuilder {
    source: String,
    helpers: Vec<String>,
    config: Option<SpecializerConfig>,
    toolchain: Option<Arc<dyn Toolchain>>,
}

impl SpecializedFnBuilder {
    /// Add helper functions defined in a separate source
    pub fn helper(mut self, source: impl Into<String>) -> Self {
        self.helpers.push(source.into());
        self
    }

    pub fn config(mut self, config: SpecializerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `toolchain` instead of a [`CcToolchain`] built from the config
    pub fn toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Parse and analyze the kernel
    ///
    /// Fails with `UnsupportedConstruct` for anything outside the kernel
    /// grammar, before any call is made.
    pub fn build(self) -> SpecializeResult<SpecializedFn> {
        let mut module = parse_module(&self.source)?;
        for helper in &self.helpers {
            module.merge(parse_module(helper)?);
        }
        let checked = check_module(module)?;

        let config = self.config.unwrap_or_else(SpecializerConfig::from_env);
        let toolchain = self
            .toolchain
            .unwrap_or_else(|| Arc::new(CcToolchain::new(config.toolchain.clone())));

        log::debug!(
            "defined kernel `{}` with {} parameters",
            checked.interface.name,
            checked.interface.arity()
        );

        Ok(SpecializedFn {
            checked,
            config,
            toolchain,
            cache: SpecializationCache::new(),
        })
    }
}

/// A kernel specialized and compiled per call signature
pub struct SpecializedFn {
    checked: CheckedKernel,
    config: SpecializerConfig,
    toolchain: Arc<dyn Toolchain>,
    cache: SpecializationCache<SignatureKey, CompiledEntry>,
}

impl fmt::Debug for SpecializedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecializedFn")
            .field("name", &self.name())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl SpecializedFn {
    /// Define a kernel with the default configuration
    pub fn define(source: &str) -> SpecializeResult<Self> {
        Self::builder(source).build()
    }

    pub fn builder(source: impl Into<String>) -> SpecializedFnBuilder {
        SpecializedFnBuilder {
            source: source.into(),
            helpers: Vec::new(),
            config: None,
            toolchain: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.checked.interface.name
    }

    pub fn interface(&self) -> &KernelInterface {
        &self.checked.interface
    }

    pub fn config(&self) -> &SpecializerConfig {
        &self.config
    }

    /// The intermediate function for a signature, after loop blocking
    pub fn specialize(&self, signature: &Signature) -> SpecializeResult<Function> {
        let function = translate(&self.checked, signature)?;
        if self.config.loop_blocking {
            Ok(LoopBlocking::new(self.config.block_factor).apply(function))
        } else {
            Ok(function)
        }
    }

    /// Run the kernel on `args`, compiling it for their signature on first use
    pub fn call(&self, args: &mut [Arg<'_>]) -> SpecializeResult<()> {
        let signature = self.check(args)?;
        let entry = self.cache.lookup_or_build(&signature.key(), |key| {
            log::debug!("cache miss for `{}` with {}", self.name(), key);
            let function = self.specialize(&signature)?;
            let native = compile(&function, self.toolchain.as_ref())?;
            Ok(CompiledEntry { function, native })
        })?;
        entry.native.call(args)
    }

    /// Run the kernel through the reference evaluator instead of native code
    pub fn evaluate_reference(&self, args: &mut [Arg<'_>]) -> SpecializeResult<()> {
        let signature = self.check(args)?;
        let function = self.specialize(&signature)?;
        interp::evaluate(&function, args)
    }

    /// Signatures with a compiled entry
    pub fn cached_signatures(&self) -> Vec<SignatureKey> {
        self.cache.keys()
    }

    pub fn compiled_entry(&self, key: &SignatureKey) -> Option<Arc<CompiledEntry>> {
        self.cache.get(key)
    }

    fn check(&self, args: &[Arg<'_>]) -> SpecializeResult<Signature> {
        let interface = self.interface();
        interface.check_arity(args.len())?;
        let signature = Signature::extract(args)?;
        interface.check_signature(&signature)?;
        interface.check_writable(args)?;
        Ok(signature)
    }
}
