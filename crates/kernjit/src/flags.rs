//! Compiler flag assembly.

/// Host compiler flags applied to every build.
pub const DEFAULT_CFLAGS: &[&str] = &["-O3", "-Wno-switch-bool"];

/// nvcc flags applied to every build, before per-build extras.
pub const DEFAULT_CUDA_CFLAGS: &[&str] = &[
    "-O3",
    "-std=c++17",
    "--threads",
    "4",
    "-use_fast_math",
    "-DKERNJIT_ENABLE_BF16",
    "-DKERNJIT_ENABLE_FP8",
];

/// nvcc flags every extension build starts from.
pub const COMMON_NVCC_FLAGS: &[&str] = &[
    "-D__CUDA_NO_HALF_OPERATORS__",
    "-D__CUDA_NO_HALF_CONVERSIONS__",
    "-D__CUDA_NO_BFLOAT16_CONVERSIONS__",
    "-D__CUDA_NO_HALF2_OPERATORS__",
    "--expt-relaxed-constexpr",
];

/// Common flags that disable the half/bfloat16 operators the kernels rely on.
pub const UNWANTED_NVCC_FLAGS: &[&str] = &[
    "-D__CUDA_NO_HALF_OPERATORS__",
    "-D__CUDA_NO_HALF_CONVERSIONS__",
    "-D__CUDA_NO_BFLOAT16_CONVERSIONS__",
    "-D__CUDA_NO_HALF2_OPERATORS__",
];

/// Returns [`COMMON_NVCC_FLAGS`] as an owned list.
pub fn common_nvcc_flags() -> Vec<String> {
    COMMON_NVCC_FLAGS.iter().map(|s| s.to_string()).collect()
}

/// Removes every occurrence of [`UNWANTED_NVCC_FLAGS`] from `flags`.
///
/// Flags that are not present are skipped. A second call never changes the
/// result of the first.
pub fn remove_unwanted_nvcc_flags(flags: &mut Vec<String>) {
    flags.retain(|f| !UNWANTED_NVCC_FLAGS.contains(&f.as_str()));
}

/// Fully assembled flags for one build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Host compiler flags.
    pub cflags: Vec<String>,
    /// nvcc flags.
    pub cuda_cflags: Vec<String>,
    /// Extra linker flags.
    pub ldflags: Vec<String>,
}

impl BuildFlags {
    /// Defaults followed by the caller's extras, in that order.
    pub fn assemble(
        extra_cflags: &[String],
        extra_cuda_cflags: &[String],
        extra_ldflags: &[String],
    ) -> Self {
        let mut cflags: Vec<String> = DEFAULT_CFLAGS.iter().map(|s| s.to_string()).collect();
        cflags.extend(extra_cflags.iter().cloned());

        let mut cuda_cflags: Vec<String> =
            DEFAULT_CUDA_CFLAGS.iter().map(|s| s.to_string()).collect();
        cuda_cflags.extend(extra_cuda_cflags.iter().cloned());

        Self {
            cflags,
            cuda_cflags,
            ldflags: extra_ldflags.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_unwanted_flags() {
        let mut flags = common_nvcc_flags();
        remove_unwanted_nvcc_flags(&mut flags);
        assert_eq!(flags, vec!["--expt-relaxed-constexpr".to_string()]);
    }

    #[test]
    fn test_remove_unwanted_flags_idempotent() {
        let mut once = common_nvcc_flags();
        remove_unwanted_nvcc_flags(&mut once);

        let mut twice = common_nvcc_flags();
        remove_unwanted_nvcc_flags(&mut twice);
        remove_unwanted_nvcc_flags(&mut twice);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_duplicated_flags_idempotent() {
        let mut once = vec![
            "-D__CUDA_NO_HALF_OPERATORS__".to_string(),
            "-D__CUDA_NO_HALF_OPERATORS__".to_string(),
            "-O3".to_string(),
        ];
        remove_unwanted_nvcc_flags(&mut once);
        assert_eq!(once, vec!["-O3".to_string()]);

        let mut twice = once.clone();
        remove_unwanted_nvcc_flags(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_missing_flag_is_ignored() {
        let mut flags = vec!["-lineinfo".to_string()];
        remove_unwanted_nvcc_flags(&mut flags);
        assert_eq!(flags, vec!["-lineinfo".to_string()]);
    }

    #[test]
    fn test_assemble_appends_extras() {
        let flags = BuildFlags::assemble(
            &["-g".to_string()],
            &["-lineinfo".to_string()],
            &["-lcuda".to_string()],
        );

        assert_eq!(flags.cflags, vec!["-O3", "-Wno-switch-bool", "-g"]);
        assert_eq!(flags.cuda_cflags.first().map(String::as_str), Some("-O3"));
        assert_eq!(flags.cuda_cflags.last().map(String::as_str), Some("-lineinfo"));
        assert!(flags.cuda_cflags.contains(&"-DKERNJIT_ENABLE_FP8".to_string()));
        assert_eq!(flags.ldflags, vec!["-lcuda"]);
    }
}
