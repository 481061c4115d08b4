//! Fused activation-and-multiply kernels.

use std::path::Path;

use serde_json::json;

use super::templates::ACT_AND_MUL_TEMPLATE;
use super::{render, write_if_different, GeneratedSource};
use crate::error::{JitError, Result};

/// dtype codes accepted by the generated entry point.
pub const ACT_DTYPE_F16: i32 = 0;
/// See [`ACT_DTYPE_F16`].
pub const ACT_DTYPE_BF16: i32 = 1;

/// Module name for an activation, e.g. `silu_and_mul`.
pub fn get_act_and_mul_uri(act_func_name: &str) -> String {
    format!("{act_func_name}_and_mul")
}

/// Renders the source of the `<act_func_name>_and_mul` kernel.
///
/// `act_func_def` is C++ defining a `__device__` function named
/// `act_func_name` that takes and returns `float`.
pub fn get_act_and_mul_cu_str(act_func_name: &str, act_func_def: &str) -> Result<String> {
    if !is_cpp_identifier(act_func_name) {
        return Err(JitError::Config(format!(
            "activation name '{act_func_name}' is not a C++ identifier"
        )));
    }

    render(
        "act_and_mul",
        ACT_AND_MUL_TEMPLATE,
        &json!({
            "act_func_name": act_func_name,
            "act_func_def": act_func_def,
            "func_name": get_act_and_mul_uri(act_func_name),
            "dtype_f16": ACT_DTYPE_F16,
            "dtype_bf16": ACT_DTYPE_BF16,
        }),
    )
}

/// Writes `<gen_dir>/<act_func_name>_and_mul.cu` if its content changed.
pub fn gen_act_and_mul_cu(
    gen_dir: &Path,
    act_func_name: &str,
    act_func_def: &str,
) -> Result<GeneratedSource> {
    let uri = get_act_and_mul_uri(act_func_name);
    let path = gen_dir.join(format!("{uri}.cu"));
    let source = get_act_and_mul_cu_str(act_func_name, act_func_def)?;

    if write_if_different(&path, &source)? {
        tracing::debug!(path = %path.display(), "Generated activation source");
    }

    Ok(GeneratedSource {
        uri,
        sources: vec![path],
    })
}

fn is_cpp_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const GELU_TANH: &str = r#"__device__ __forceinline__ float gelu_tanh(const float& val) {
  const float cdf = 0.5f * (1.0f + tanhf(0.7978845608028654f * (val + 0.044715f * val * val * val)));
  return val * cdf;
}"#;

    #[test]
    fn test_act_source_contains_definition_and_entry() {
        let src = get_act_and_mul_cu_str("gelu_tanh", GELU_TANH).unwrap();
        assert!(src.contains("const float& val"), "definition must not be escaped");
        assert!(src.contains("extern \"C\" int gelu_tanh_and_mul("));
        assert!(src.contains("act_and_mul_kernel<T, gelu_tanh>"));
        assert!(src.contains("case 1:"));
    }

    #[test]
    fn test_act_rejects_bad_name() {
        assert!(get_act_and_mul_cu_str("gelu-tanh", GELU_TANH).is_err());
        assert!(get_act_and_mul_cu_str("9lu", GELU_TANH).is_err());
        assert!(get_act_and_mul_cu_str("", GELU_TANH).is_err());
    }

    #[test]
    fn test_gen_act_writes_file() {
        let temp = TempDir::new().unwrap();
        let generated = gen_act_and_mul_cu(temp.path(), "gelu_tanh", GELU_TANH).unwrap();

        assert_eq!(generated.uri, "gelu_tanh_and_mul");
        assert_eq!(
            generated.sources,
            vec![temp.path().join("gelu_tanh_and_mul.cu")]
        );
        let on_disk = fs::read_to_string(&generated.sources[0]).unwrap();
        assert_eq!(on_disk, get_act_and_mul_cu_str("gelu_tanh", GELU_TANH).unwrap());
    }
}
