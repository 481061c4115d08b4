//! Build orchestration.
//!
//! [`JitContext`] ties configuration, flag assembly, the arch gate, the
//! per-module file lock and the [`ExtensionBuilder`] together. Loading a
//! module twice in one process with unchanged sources and flags returns the
//! same handle, while a changed fingerprint rebuilds it. Loading it from two
//! processes at once compiles it once, because the second process waits on
//! `<jit_dir>/<name>.lock` and then finds the fingerprinted build in place.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::arch::{check_cuda_arch, resolve_arch_flags};
use crate::builder::{BuildRequest, ExtensionBuilder, NvccBuilder};
use crate::cache::{self, CacheStats};
use crate::codegen::{self, AttentionVariant, GeneratedSource, MlaVariant};
use crate::env::JitConfig;
use crate::error::{JitError, Result};
use crate::flags::{common_nvcc_flags, remove_unwanted_nvcc_flags, BuildFlags};
use crate::lock::BuildLock;
use crate::logging::init_logging;
use crate::module::JitModule;
use crate::prebuilt::PrebuiltOps;

/// Per-call build options.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Extra host compiler flags, appended to the defaults.
    pub extra_cflags: Vec<String>,
    /// Extra nvcc flags, appended to the defaults.
    pub extra_cuda_cflags: Vec<String>,
    /// Extra linker flags.
    pub extra_ldflags: Vec<String>,
    /// Include paths replacing the default list.
    pub extra_include_paths: Option<Vec<PathBuf>>,
    /// Log every compiler invocation.
    pub verbose: bool,
}

impl LoadOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends host compiler flags.
    pub fn with_cflags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_cflags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Appends nvcc flags.
    pub fn with_cuda_cflags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_cuda_cflags
            .extend(flags.into_iter().map(Into::into));
        self
    }

    /// Appends linker flags.
    pub fn with_ldflags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_ldflags.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Uses `paths` instead of the default include directories.
    pub fn with_include_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.extra_include_paths = Some(paths);
        self
    }

    /// Sets verbose compiler output.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// A module in the context table, with the fingerprint it was built from.
///
/// Prebuilt modules have no fingerprint.
#[derive(Debug, Clone)]
struct LoadedModule {
    fingerprint: Option<String>,
    module: Arc<JitModule>,
}

/// Process-wide JIT state.
pub struct JitContext {
    config: JitConfig,
    nvcc_flags: Vec<String>,
    builder: Arc<dyn ExtensionBuilder>,
    prebuilt: PrebuiltOps,
    modules: RwLock<HashMap<String, LoadedModule>>,
    arch_flags: Mutex<Option<Vec<String>>>,
}

impl std::fmt::Debug for JitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitContext")
            .field("workspace_dir", &self.config.workspace_dir())
            .field("nvcc_flags", &self.nvcc_flags)
            .field("loaded", &self.modules.read().len())
            .finish_non_exhaustive()
    }
}

impl JitContext {
    /// Initializes a context that builds with nvcc.
    pub fn initialize(config: JitConfig) -> Result<Self> {
        Self::initialize_with_builder(config, Arc::new(NvccBuilder::new()))
    }

    /// Initializes a context with a custom builder.
    ///
    /// Creates the workspace directory, installs logging (unless a global
    /// subscriber already exists), sanitizes the common nvcc flags and loads
    /// the prebuilt registry.
    pub fn initialize_with_builder(
        config: JitConfig,
        builder: Arc<dyn ExtensionBuilder>,
    ) -> Result<Self> {
        config.ensure_workspace()?;
        if !init_logging(&config.log_path())? {
            tracing::debug!("Global subscriber already installed, keeping it");
        }

        let mut nvcc_flags = common_nvcc_flags();
        remove_unwanted_nvcc_flags(&mut nvcc_flags);

        let prebuilt = PrebuiltOps::load(config.prebuilt_dir())?;
        if prebuilt.has_prebuilt_ops() {
            tracing::info!("Prebuilt ops available: {}", prebuilt.uris().count());
        }

        Ok(Self {
            config,
            nvcc_flags,
            builder,
            prebuilt,
            modules: RwLock::new(HashMap::new()),
            arch_flags: Mutex::new(None),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Sanitized common nvcc flags.
    pub fn nvcc_flags(&self) -> &[String] {
        &self.nvcc_flags
    }

    /// Prebuilt op registry.
    pub fn prebuilt(&self) -> &PrebuiltOps {
        &self.prebuilt
    }

    /// `-gencode` flags for this context, resolved on first use.
    pub fn arch_flags(&self) -> Result<Vec<String>> {
        let mut cached = self.arch_flags.lock();
        if let Some(flags) = cached.as_ref() {
            return Ok(flags.clone());
        }
        let flags = resolve_arch_flags(&self.config)?;
        *cached = Some(flags.clone());
        Ok(flags)
    }

    /// Module already loaded under `name` in this context.
    pub fn loaded(&self, name: &str) -> Option<Arc<JitModule>> {
        self.modules
            .read()
            .get(name)
            .map(|loaded| Arc::clone(&loaded.module))
    }

    /// Builds `sources` into the module `name` and loads it.
    ///
    /// A module already loaded under `name` is returned as is when its
    /// sources, flags and include paths are unchanged, and rebuilt otherwise.
    ///
    /// Fails with [`JitError::UnsupportedArch`] before touching the cache if
    /// any target arch is older than sm75, and with [`JitError::Config`] if
    /// the default include paths are used while the native header directory
    /// is missing.
    pub fn load_cuda_ops(
        &self,
        name: &str,
        sources: &[PathBuf],
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        validate_module_name(name)?;

        let flags = BuildFlags::assemble(
            &options.extra_cflags,
            &options.extra_cuda_cflags,
            &options.extra_ldflags,
        );
        tracing::info!("Loading JIT ops: {}", name);

        let arch_flags = self.arch_flags()?;
        check_cuda_arch(&arch_flags)?;

        let jit_dir = self.config.jit_dir();
        let build_dir = jit_dir.join(name);
        fs::create_dir_all(&build_dir)?;

        let include_paths = match &options.extra_include_paths {
            Some(paths) => paths.clone(),
            None => {
                self.config.check_include_dir()?;
                self.config.default_include_paths()
            }
        };

        let _lock = BuildLock::acquire(jit_dir.join(format!("{name}.lock")))?;

        let request = BuildRequest {
            name,
            sources,
            flags: &flags,
            common_nvcc_flags: &self.nvcc_flags,
            arch_flags: &arch_flags,
            include_paths: &include_paths,
            build_dir: &build_dir,
            verbose: options.verbose,
        };
        let fingerprint = request.fingerprint()?;

        if let Some(loaded) = self.modules.read().get(name) {
            if loaded.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                return Ok(Arc::clone(&loaded.module));
            }
            tracing::info!("Inputs of {} changed, rebuilding", name);
        }

        let module = Arc::new(self.builder.build_and_load(&request)?);

        self.modules.write().insert(
            name.to_string(),
            LoadedModule {
                fingerprint: Some(fingerprint),
                module: Arc::clone(&module),
            },
        );
        Ok(module)
    }

    /// Loads a generated variant, preferring a prebuilt library.
    pub fn load_generated(
        &self,
        generated: &GeneratedSource,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        if let Some(path) = self.prebuilt.library_path(&generated.uri) {
            if let Some(module) = self.loaded(&generated.uri) {
                return Ok(module);
            }
            tracing::info!("Loading prebuilt ops: {}", generated.uri);
            // SAFETY: registered prebuilt libraries are produced by the same
            // templates as JIT builds and have no load-time side effects.
            let module = Arc::new(unsafe { JitModule::load(&generated.uri, path)? });
            let mut modules = self.modules.write();
            let loaded = modules
                .entry(generated.uri.clone())
                .or_insert(LoadedModule {
                    fingerprint: None,
                    module,
                });
            return Ok(Arc::clone(&loaded.module));
        }

        self.load_cuda_ops(&generated.uri, &generated.sources, options)
    }

    /// Generates and loads `<act_func_name>_and_mul`.
    pub fn gen_act_and_mul_module(
        &self,
        act_func_name: &str,
        act_func_def: &str,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        let generated =
            codegen::gen_act_and_mul_cu(&self.config.gen_src_dir(), act_func_name, act_func_def)?;
        self.load_generated(&generated, options)
    }

    /// Generates and loads a single-request decode variant.
    pub fn single_decode_module(
        &self,
        variant: &AttentionVariant,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        let generated = codegen::gen_single_decode_cu(&self.config.gen_src_dir(), variant)?;
        self.load_generated(&generated, options)
    }

    /// Generates and loads a batched decode variant.
    pub fn batch_decode_module(
        &self,
        variant: &AttentionVariant,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        let generated = codegen::gen_batch_decode_cu(&self.config.gen_src_dir(), variant)?;
        self.load_generated(&generated, options)
    }

    /// Generates and loads a batched MLA decode variant.
    pub fn batch_decode_mla_module(
        &self,
        variant: &MlaVariant,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        let generated = codegen::gen_batch_decode_mla_cu(&self.config.gen_src_dir(), variant)?;
        self.load_generated(&generated, options)
    }

    /// Generates and loads a single-request prefill variant.
    pub fn single_prefill_module(
        &self,
        variant: &AttentionVariant,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        let generated = codegen::gen_single_prefill_cu(&self.config.gen_src_dir(), variant)?;
        self.load_generated(&generated, options)
    }

    /// Generates and loads a batched prefill variant.
    pub fn batch_prefill_module(
        &self,
        variant: &AttentionVariant,
        options: &LoadOptions,
    ) -> Result<Arc<JitModule>> {
        let generated = codegen::gen_batch_prefill_cu(&self.config.gen_src_dir(), variant)?;
        self.load_generated(&generated, options)
    }

    /// Deletes everything under the JIT cache directory.
    ///
    /// Modules already loaded stay usable; the next load rebuilds them.
    pub fn clear_cache_dir(&self) -> Result<()> {
        let jit_dir = self.config.jit_dir();
        cache::clear_dir(&jit_dir)?;
        self.modules.write().clear();
        tracing::info!("Cleared JIT cache: {}", jit_dir.display());
        Ok(())
    }

    /// Statistics for the JIT cache directory.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats::scan(&self.config.jit_dir())
    }
}

fn validate_module_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || Path::new(name).is_absolute();
    if invalid {
        return Err(JitError::Config(format!("invalid module name '{name}'")));
    }
    Ok(())
}

static GLOBAL: OnceLock<JitContext> = OnceLock::new();

/// Process-wide context configured from the environment.
///
/// The first successful call initializes it; later calls return the same
/// context.
pub fn global() -> Result<&'static JitContext> {
    if let Some(ctx) = GLOBAL.get() {
        return Ok(ctx);
    }
    let ctx = JitContext::initialize(JitConfig::from_env())?;
    Ok(GLOBAL.get_or_init(|| ctx))
}
