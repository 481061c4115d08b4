//! Attention kernel variants: URIs and source generation.

use std::path::Path;

use serde_json::{json, Value};

use super::templates;
use super::{render, write_if_different, DType, GeneratedSource, PosEncodingMode};
use crate::error::{JitError, Result};

/// Head dimensions the attention kernels are instantiated for.
pub const SUPPORTED_HEAD_DIMS: &[u32] = &[64, 128, 256, 512];

/// Template parameters of a standard attention kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttentionVariant {
    /// Query element type.
    pub dtype_q: DType,
    /// Key/value element type.
    pub dtype_kv: DType,
    /// Output element type.
    pub dtype_o: DType,
    /// Index type for batched kernels.
    pub dtype_idx: DType,
    /// Head dimension.
    pub head_dim: u32,
    /// Positional encoding.
    pub pos_encoding_mode: PosEncodingMode,
    /// Sliding-window attention.
    pub use_sliding_window: bool,
    /// Soft-capping of attention logits.
    pub use_logits_soft_cap: bool,
    /// Accumulate QK in fp16 (prefill only).
    pub use_fp16_qk_reduction: bool,
}

impl Default for AttentionVariant {
    fn default() -> Self {
        Self {
            dtype_q: DType::F16,
            dtype_kv: DType::F16,
            dtype_o: DType::F16,
            dtype_idx: DType::I32,
            head_dim: 128,
            pos_encoding_mode: PosEncodingMode::None,
            use_sliding_window: false,
            use_logits_soft_cap: false,
            use_fp16_qk_reduction: false,
        }
    }
}

impl AttentionVariant {
    fn validate(&self) -> Result<()> {
        validate_head_dim(self.head_dim)?;
        validate_index_type(self.dtype_idx)?;
        for dtype in [self.dtype_q, self.dtype_kv, self.dtype_o] {
            if dtype.is_integer() {
                return Err(JitError::Config(format!(
                    "{dtype} is not a valid attention element type"
                )));
            }
        }
        Ok(())
    }

    fn template_data(&self, uri: &str) -> Value {
        json!({
            "uri": uri,
            "dtype_q": self.dtype_q.cpp_type(),
            "dtype_kv": self.dtype_kv.cpp_type(),
            "dtype_o": self.dtype_o.cpp_type(),
            "dtype_idx": self.dtype_idx.cpp_type(),
            "head_dim": self.head_dim,
            "pos_encoding_mode": self.pos_encoding_mode.cpp_name(),
            "use_sliding_window": self.use_sliding_window,
            "use_logits_soft_cap": self.use_logits_soft_cap,
            "use_fp16_qk_reduction": self.use_fp16_qk_reduction,
            "use_alibi": self.pos_encoding_mode == PosEncodingMode::Alibi,
        })
    }
}

/// Template parameters of a multi-head latent attention decode kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MlaVariant {
    /// Query element type.
    pub dtype_q: DType,
    /// Compressed KV element type.
    pub dtype_kv: DType,
    /// Output element type.
    pub dtype_o: DType,
    /// Index type.
    pub dtype_idx: DType,
    /// Compressed KV head dimension.
    pub head_dim_ckv: u32,
    /// Positional-encoding key head dimension.
    pub head_dim_kpe: u32,
    /// Sliding-window attention.
    pub use_sliding_window: bool,
    /// Soft-capping of attention logits.
    pub use_logits_soft_cap: bool,
}

impl Default for MlaVariant {
    fn default() -> Self {
        Self {
            dtype_q: DType::F16,
            dtype_kv: DType::F16,
            dtype_o: DType::F16,
            dtype_idx: DType::I32,
            head_dim_ckv: 512,
            head_dim_kpe: 64,
            use_sliding_window: false,
            use_logits_soft_cap: false,
        }
    }
}

fn validate_head_dim(head_dim: u32) -> Result<()> {
    if SUPPORTED_HEAD_DIMS.contains(&head_dim) {
        Ok(())
    } else {
        Err(JitError::Config(format!(
            "unsupported head_dim {head_dim}, expected one of {SUPPORTED_HEAD_DIMS:?}"
        )))
    }
}

fn validate_index_type(dtype: DType) -> Result<()> {
    if dtype.is_integer() {
        Ok(())
    } else {
        Err(JitError::Config(format!("{dtype} is not an index type")))
    }
}

/// URI of a single-request decode kernel.
pub fn get_single_decode_uri(v: &AttentionVariant) -> String {
    format!(
        "single_decode_with_kv_cache_dtype_q_{}_dtype_kv_{}_dtype_o_{}_head_dim_{}_posenc_{}_use_swa_{}_use_logits_cap_{}",
        v.dtype_q,
        v.dtype_kv,
        v.dtype_o,
        v.head_dim,
        v.pos_encoding_mode.code(),
        v.use_sliding_window,
        v.use_logits_soft_cap,
    )
}

/// URI of a batched decode kernel.
pub fn get_batch_decode_uri(v: &AttentionVariant) -> String {
    format!(
        "batch_decode_with_kv_cache_dtype_q_{}_dtype_kv_{}_dtype_o_{}_dtype_idx_{}_head_dim_{}_posenc_{}_use_swa_{}_use_logits_cap_{}",
        v.dtype_q,
        v.dtype_kv,
        v.dtype_o,
        v.dtype_idx,
        v.head_dim,
        v.pos_encoding_mode.code(),
        v.use_sliding_window,
        v.use_logits_soft_cap,
    )
}

/// URI of a batched MLA decode kernel.
pub fn get_batch_decode_mla_uri(v: &MlaVariant) -> String {
    format!(
        "batch_decode_mla_with_kv_cache_dtype_q_{}_dtype_kv_{}_dtype_o_{}_dtype_idx_{}_head_dim_ckv_{}_head_dim_kpe_{}_use_swa_{}_use_logits_cap_{}",
        v.dtype_q,
        v.dtype_kv,
        v.dtype_o,
        v.dtype_idx,
        v.head_dim_ckv,
        v.head_dim_kpe,
        v.use_sliding_window,
        v.use_logits_soft_cap,
    )
}

/// URI of a single-request prefill kernel.
pub fn get_single_prefill_uri(v: &AttentionVariant) -> String {
    format!(
        "single_prefill_with_kv_cache_dtype_q_{}_dtype_kv_{}_dtype_o_{}_head_dim_{}_posenc_{}_use_swa_{}_use_logits_cap_{}_f16qk_{}",
        v.dtype_q,
        v.dtype_kv,
        v.dtype_o,
        v.head_dim,
        v.pos_encoding_mode.code(),
        v.use_sliding_window,
        v.use_logits_soft_cap,
        v.use_fp16_qk_reduction,
    )
}

/// URI of a batched prefill kernel.
pub fn get_batch_prefill_uri(v: &AttentionVariant) -> String {
    format!(
        "batch_prefill_with_kv_cache_dtype_q_{}_dtype_kv_{}_dtype_o_{}_dtype_idx_{}_head_dim_{}_posenc_{}_use_swa_{}_use_logits_cap_{}_f16qk_{}",
        v.dtype_q,
        v.dtype_kv,
        v.dtype_o,
        v.dtype_idx,
        v.head_dim,
        v.pos_encoding_mode.code(),
        v.use_sliding_window,
        v.use_logits_soft_cap,
        v.use_fp16_qk_reduction,
    )
}

fn generate(
    gen_dir: &Path,
    uri: String,
    file_name: &str,
    template: &str,
    data: &Value,
) -> Result<GeneratedSource> {
    let path = gen_dir.join(&uri).join(file_name);
    let source = render(file_name, template, data)?;
    if write_if_different(&path, &source)? {
        tracing::debug!(path = %path.display(), "Generated attention source");
    }
    Ok(GeneratedSource {
        uri,
        sources: vec![path],
    })
}

/// Generates the single-request decode instantiation.
pub fn gen_single_decode_cu(gen_dir: &Path, v: &AttentionVariant) -> Result<GeneratedSource> {
    v.validate()?;
    let uri = get_single_decode_uri(v);
    let data = v.template_data(&uri);
    generate(
        gen_dir,
        uri,
        "single_decode_inst.cu",
        &templates::single_decode_template(),
        &data,
    )
}

/// Generates the batched decode instantiation.
pub fn gen_batch_decode_cu(gen_dir: &Path, v: &AttentionVariant) -> Result<GeneratedSource> {
    v.validate()?;
    let uri = get_batch_decode_uri(v);
    let data = v.template_data(&uri);
    generate(
        gen_dir,
        uri,
        "batch_decode_inst.cu",
        &templates::batch_decode_template(),
        &data,
    )
}

/// Generates the batched MLA decode instantiation.
pub fn gen_batch_decode_mla_cu(gen_dir: &Path, v: &MlaVariant) -> Result<GeneratedSource> {
    validate_index_type(v.dtype_idx)?;
    if v.head_dim_ckv == 0 || v.head_dim_kpe == 0 {
        return Err(JitError::Config("MLA head dimensions must be non-zero".to_string()));
    }

    let uri = get_batch_decode_mla_uri(v);
    let data = json!({
        "uri": uri,
        "dtype_q": v.dtype_q.cpp_type(),
        "dtype_kv": v.dtype_kv.cpp_type(),
        "dtype_o": v.dtype_o.cpp_type(),
        "dtype_idx": v.dtype_idx.cpp_type(),
        "head_dim_ckv": v.head_dim_ckv,
        "head_dim_kpe": v.head_dim_kpe,
        "use_sliding_window": v.use_sliding_window,
        "use_logits_soft_cap": v.use_logits_soft_cap,
    });
    generate(
        gen_dir,
        uri,
        "batch_decode_mla_inst.cu",
        &templates::batch_decode_mla_template(),
        &data,
    )
}

/// Generates the single-request prefill instantiation.
pub fn gen_single_prefill_cu(gen_dir: &Path, v: &AttentionVariant) -> Result<GeneratedSource> {
    v.validate()?;
    let uri = get_single_prefill_uri(v);
    let data = v.template_data(&uri);
    generate(
        gen_dir,
        uri,
        "single_prefill_inst.cu",
        &templates::single_prefill_template(),
        &data,
    )
}

/// Generates the batched prefill instantiation.
pub fn gen_batch_prefill_cu(gen_dir: &Path, v: &AttentionVariant) -> Result<GeneratedSource> {
    v.validate()?;
    let uri = get_batch_prefill_uri(v);
    let data = v.template_data(&uri);
    generate(
        gen_dir,
        uri,
        "batch_prefill_inst.cu",
        &templates::batch_prefill_template(),
        &data,
    )
}
