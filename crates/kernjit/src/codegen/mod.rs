//! Kernel source generation.
//!
//! Generators render a CUDA source for one kernel variant into
//! `<gen_src_dir>/<uri>/`, where the URI is a deterministic name encoding the
//! variant's template parameters. The URI doubles as the module name passed
//! to [`crate::JitContext::load_cuda_ops`], so every variant gets its own
//! build directory and lock.
//!
//! Files are only rewritten when their content changes, which keeps the
//! build fingerprint (and therefore the cached build) stable across runs.

mod activation;
mod attention;
mod templates;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::Result;

pub use activation::{
    gen_act_and_mul_cu, get_act_and_mul_cu_str, get_act_and_mul_uri, ACT_DTYPE_BF16, ACT_DTYPE_F16,
};
pub use attention::{
    gen_batch_decode_cu, gen_batch_decode_mla_cu, gen_batch_prefill_cu, gen_single_decode_cu,
    gen_single_prefill_cu, get_batch_decode_mla_uri, get_batch_decode_uri, get_batch_prefill_uri,
    get_single_decode_uri, get_single_prefill_uri, AttentionVariant, MlaVariant,
    SUPPORTED_HEAD_DIMS,
};

/// Sources generated for one kernel variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    /// Module name for the variant.
    pub uri: String,
    /// Files to compile.
    pub sources: Vec<PathBuf>,
}

/// Element types understood by the kernel templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// IEEE half precision.
    F16,
    /// bfloat16.
    BF16,
    /// IEEE single precision.
    F32,
    /// FP8 with 4 exponent and 3 mantissa bits.
    E4M3,
    /// FP8 with 5 exponent and 2 mantissa bits.
    E5M2,
    /// 32-bit signed index.
    I32,
    /// 64-bit signed index.
    I64,
}

impl DType {
    /// Short name used in URIs.
    pub const fn filename_safe(&self) -> &'static str {
        match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::E4M3 => "e4m3",
            DType::E5M2 => "e5m2",
            DType::I32 => "i32",
            DType::I64 => "i64",
        }
    }

    /// C++ type name used in generated sources.
    pub const fn cpp_type(&self) -> &'static str {
        match self {
            DType::F16 => "half",
            DType::BF16 => "nv_bfloat16",
            DType::F32 => "float",
            DType::E4M3 => "__nv_fp8_e4m3",
            DType::E5M2 => "__nv_fp8_e5m2",
            DType::I32 => "int32_t",
            DType::I64 => "int64_t",
        }
    }

    /// True for index types.
    pub const fn is_integer(&self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.filename_safe())
    }
}

/// Positional encoding applied inside the attention kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PosEncodingMode {
    /// No positional encoding.
    #[default]
    None = 0,
    /// Llama-style rotary embedding applied on the fly.
    RopeLlama = 1,
    /// ALiBi bias.
    Alibi = 2,
}

impl PosEncodingMode {
    /// Numeric code used in URIs.
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    /// C++ enumerator name.
    pub const fn cpp_name(&self) -> &'static str {
        match self {
            PosEncodingMode::None => "PosEncodingMode::kNone",
            PosEncodingMode::RopeLlama => "PosEncodingMode::kRoPELlama",
            PosEncodingMode::Alibi => "PosEncodingMode::kALiBi",
        }
    }
}

/// Writes `content` to `path` unless the file already holds exactly that.
///
/// Returns `true` if the file was written.
pub fn write_if_different(path: &Path, content: &str) -> Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == content {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(true)
}

/// Renders a template with C++-safe (non-HTML-escaped) output.
pub(crate) fn render<T: Serialize>(name: &str, template: &str, data: &T) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.register_template_string(name, template)?;
    Ok(handlebars.render(name, data)?)
}
