//! Building extension sources into a loadable module.
//!
//! [`ExtensionBuilder`] is the seam between the orchestration in
//! [`crate::jit`] and the external toolchain. [`NvccBuilder`] is the
//! production implementation:
//!
//! 1. fingerprint sources, flags and include paths
//! 2. if the stored fingerprint matches and the library exists, load it
//! 3. otherwise compile `.cu` sources with nvcc and C++ sources with the host
//!    compiler, link `lib<name>_<fp>.so`, store the fingerprint and load it
//!
//! The library file name carries a fingerprint prefix, so a rebuild never
//! overwrites a library that is still mapped into the process.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use crate::cache::{self, Fingerprint};
use crate::error::{JitError, Result};
use crate::flags::BuildFlags;
use crate::module::JitModule;
use crate::toolchain::Toolchain;

const LIBRARY_TAG_LEN: usize = 16;

/// Everything needed to build one extension module.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// Logical module name.
    pub name: &'a str,
    /// Source files.
    pub sources: &'a [PathBuf],
    /// Host, device and linker flags.
    pub flags: &'a BuildFlags,
    /// Common nvcc flags, already sanitized.
    pub common_nvcc_flags: &'a [String],
    /// `-gencode` flags.
    pub arch_flags: &'a [String],
    /// Include directories.
    pub include_paths: &'a [PathBuf],
    /// Per-module build directory.
    pub build_dir: &'a Path,
    /// Log every compiler invocation.
    pub verbose: bool,
}

impl BuildRequest<'_> {
    /// Path of the shared library built from inputs with `fingerprint`.
    pub fn library_path(&self, fingerprint: &str) -> PathBuf {
        let tag = &fingerprint[..fingerprint.len().min(LIBRARY_TAG_LEN)];
        self.build_dir
            .join(libloading::library_filename(format!("{}_{}", self.name, tag)))
    }

    /// Fingerprint of every input that affects the build output.
    pub fn fingerprint(&self) -> Result<String> {
        let mut fp = Fingerprint::new(self.name);
        for source in self.sources {
            fp.source(source)?;
        }
        fp.strings("cflags", &self.flags.cflags)
            .strings("cuda_cflags", &self.flags.cuda_cflags)
            .strings("ldflags", &self.flags.ldflags)
            .strings("common_nvcc_flags", self.common_nvcc_flags)
            .strings("arch_flags", self.arch_flags);
        for include in self.include_paths {
            fp.field("include", include.to_string_lossy().as_bytes());
        }
        Ok(fp.finish())
    }
}

/// Builds sources into a module and loads it.
///
/// Implementations may reuse a previous build when its inputs are unchanged.
pub trait ExtensionBuilder: Send + Sync {
    /// Builds (or reuses) and loads the module described by `request`.
    fn build_and_load(&self, request: &BuildRequest<'_>) -> Result<JitModule>;
}

/// Kind of compiler a source file needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Cuda,
    Cxx,
}

impl SourceKind {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(OsStr::to_str) {
            Some("cu") => Ok(Self::Cuda),
            Some("cpp" | "cc" | "cxx" | "c") => Ok(Self::Cxx),
            _ => Err(JitError::Config(format!(
                "unsupported source file type: {}",
                path.display()
            ))),
        }
    }
}

/// Builds with nvcc and the host C++ compiler, loads with `libloading`.
#[derive(Debug, Clone, Default)]
pub struct NvccBuilder {
    toolchain: Option<Toolchain>,
}

impl NvccBuilder {
    /// Builder that discovers the toolchain on first compile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder with an explicit toolchain.
    pub fn with_toolchain(toolchain: Toolchain) -> Self {
        Self {
            toolchain: Some(toolchain),
        }
    }

    fn toolchain(&self) -> Result<Toolchain> {
        match &self.toolchain {
            Some(toolchain) => Ok(toolchain.clone()),
            None => Toolchain::discover(),
        }
    }

    fn compile_command(
        toolchain: &Toolchain,
        request: &BuildRequest<'_>,
        source: &Path,
        object: &Path,
    ) -> Result<Command> {
        let mut cmd;
        match SourceKind::of(source)? {
            SourceKind::Cuda => {
                cmd = Command::new(&toolchain.nvcc);
                cmd.arg("-c")
                    .arg(source)
                    .arg("-o")
                    .arg(object)
                    .args(["--compiler-options", "-fPIC"])
                    .args(request.common_nvcc_flags)
                    .args(request.arch_flags)
                    .args(&request.flags.cuda_cflags);
            }
            SourceKind::Cxx => {
                cmd = Command::new(&toolchain.cxx);
                cmd.arg("-c")
                    .arg(source)
                    .arg("-o")
                    .arg(object)
                    .args(["-fPIC", "-std=c++17"])
                    .args(&request.flags.cflags);
            }
        }

        cmd.arg(format!("-DKERNJIT_EXTENSION_NAME={}", request.name));
        for include in request.include_paths {
            cmd.arg(format!("-I{}", include.display()));
        }
        if let Some(cuda_include) = toolchain.cuda_include_dir() {
            cmd.arg(format!("-I{}", cuda_include.display()));
        }

        Ok(cmd)
    }

    fn link_command(
        toolchain: &Toolchain,
        request: &BuildRequest<'_>,
        objects: &[PathBuf],
        library: &Path,
    ) -> Command {
        let mut cmd = Command::new(&toolchain.cxx);
        cmd.arg("-shared").args(objects).arg("-o").arg(library);
        if let Some(lib_dir) = toolchain.cuda_lib_dir() {
            cmd.arg(format!("-L{}", lib_dir.display()));
        }
        cmd.arg("-lcudart").args(&request.flags.ldflags);
        cmd
    }

    fn compile(&self, request: &BuildRequest<'_>, library: &Path) -> Result<()> {
        let toolchain = self.toolchain()?;
        let mut objects = Vec::with_capacity(request.sources.len());

        for (index, source) in request.sources.iter().enumerate() {
            let stem = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("source{index}"));
            let object = request.build_dir.join(format!("{index}_{stem}.o"));

            let mut cmd = Self::compile_command(&toolchain, request, source, &object)?;
            let output = run(&mut cmd, request.verbose)?;
            if !output.status.success() {
                return Err(JitError::CompileFailed {
                    source_file: source.clone(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }
            objects.push(object);
        }

        let mut cmd = Self::link_command(&toolchain, request, &objects, library);
        let output = run(&mut cmd, request.verbose)?;
        if !output.status.success() {
            return Err(JitError::LinkFailed {
                library: library.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(())
    }
}

impl ExtensionBuilder for NvccBuilder {
    fn build_and_load(&self, request: &BuildRequest<'_>) -> Result<JitModule> {
        let fingerprint = request.fingerprint()?;
        let library = request.library_path(&fingerprint);

        let up_to_date = library.exists()
            && cache::stored_fingerprint(request.build_dir).as_deref() == Some(fingerprint.as_str());

        if up_to_date {
            tracing::debug!(module = request.name, "Reusing cached build");
        } else {
            tracing::info!(
                module = request.name,
                sources = request.sources.len(),
                "Compiling"
            );
            self.compile(request, &library)?;
            cache::store_fingerprint(request.build_dir, &fingerprint)?;
            remove_stale_libraries(request, &library);
        }

        // The library was produced by this builder from the caller's sources.
        unsafe { JitModule::load(request.name, library) }
    }
}

/// Deletes libraries of earlier builds of the same module.
///
/// Mapped libraries stay valid after unlinking, so failures are only logged.
fn remove_stale_libraries(request: &BuildRequest<'_>, keep: &Path) {
    use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};

    let prefix = format!("{}{}_", DLL_PREFIX, request.name);
    let Ok(entries) = std::fs::read_dir(request.build_dir) else {
        return;
    };
    for path in entries.flatten().map(|e| e.path()) {
        if path == keep {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
            continue;
        };
        if file_name.starts_with(&prefix) && file_name.ends_with(DLL_SUFFIX) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale library");
            }
        }
    }
}

fn run(cmd: &mut Command, verbose: bool) -> Result<Output> {
    if verbose {
        tracing::info!("{:?}", cmd);
    }
    let output = cmd.output().map_err(|e| {
        JitError::ToolchainNotFound(format!("failed to run {:?}: {}", cmd.get_program(), e))
    })?;
    if verbose && !output.stdout.is_empty() {
        tracing::info!("{}", String::from_utf8_lossy(&output.stdout).trim_end());
    }
    Ok(output)
}
