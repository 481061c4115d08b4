//! # kernjit
//!
//! Just-in-time build, cache and load layer for CUDA kernel extensions.
//!
//! Kernel sources are compiled on first use into a per-module directory under
//! `<workspace>/cached_ops`, loaded into the process, and reused on later
//! runs as long as sources and flags are unchanged. Concurrent builds of the
//! same module, from threads or from separate processes, are serialized on a
//! file lock so each module is compiled once.
//!
//! ```no_run
//! use kernjit::{JitConfig, JitContext, LoadOptions};
//!
//! # fn main() -> kernjit::Result<()> {
//! let ctx = JitContext::initialize(JitConfig::from_env())?;
//! let module = ctx.gen_act_and_mul_module(
//!     "silu",
//!     "__device__ __forceinline__ float silu(const float& x) { return x / (1.0f + __expf(-x)); }",
//!     &LoadOptions::new(),
//! )?;
//! assert!(module.has_symbol("silu_and_mul"));
//! # Ok(())
//! # }
//! ```
//!
//! Targets older than sm75 are rejected with [`JitError::UnsupportedArch`]
//! before anything is compiled.
//!
//! The native kernel headers are not part of this crate. Point
//! `KERNJIT_INCLUDE_DIR` at them, or pass explicit include paths through
//! [`LoadOptions::with_include_paths`]; otherwise builds fail early with
//! [`JitError::Config`].

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arch;
pub mod builder;
pub mod cache;
pub mod codegen;
pub mod env;
pub mod error;
pub mod flags;
pub mod jit;
pub mod lock;
pub mod logging;
pub mod module;
pub mod prebuilt;
pub mod toolchain;

pub use arch::{check_cuda_arch, parse_arch_list, CudaArch, MIN_COMPUTE_CAPABILITY};
pub use builder::{BuildRequest, ExtensionBuilder, NvccBuilder};
pub use cache::CacheStats;
pub use codegen::{AttentionVariant, DType, GeneratedSource, MlaVariant, PosEncodingMode};
pub use env::JitConfig;
pub use error::{JitError, Result};
pub use flags::{remove_unwanted_nvcc_flags, BuildFlags};
pub use jit::{global, JitContext, LoadOptions};
pub use lock::BuildLock;
pub use module::JitModule;
pub use prebuilt::PrebuiltOps;
pub use toolchain::Toolchain;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
