//! CUDA architecture resolution and the minimum-capability gate.
//!
//! The arch list is resolved in this order:
//!
//! 1. `KERNJIT_CUDA_ARCH_LIST` / the configured list, e.g. `"7.5;8.0 8.6+PTX"` or `"Ampere"`
//! 2. the compute capability of every visible device
//! 3. [`FALLBACK_ARCH_LIST`]
//!
//! Each entry becomes one `-gencode` flag; `+PTX` entries also embed PTX for
//! forward compatibility.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::env::JitConfig;
use crate::error::{JitError, Result};

/// Oldest GPU generation the kernels support (Turing).
pub const MIN_COMPUTE_CAPABILITY: u32 = 75;

/// Arch list used when none is configured and no device can be queried.
pub const FALLBACK_ARCH_LIST: &str = "7.5;8.0;8.6;8.9;9.0+PTX";

/// Largest major compute capability accepted in arch lists.
const MAX_MAJOR: u32 = 99;

/// One target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CudaArch {
    /// Major compute capability.
    pub major: u32,
    /// Minor compute capability.
    pub minor: u32,
    /// Also embed PTX for this arch.
    pub ptx: bool,
}

impl CudaArch {
    /// Creates an arch without PTX embedding.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self {
            major,
            minor,
            ptx: false,
        }
    }

    /// Compute capability as a number, e.g. 86.
    pub const fn number(&self) -> u32 {
        self.major.saturating_mul(10).saturating_add(self.minor)
    }

    /// `-gencode` flags for this arch.
    pub fn gencode_flags(&self) -> Vec<String> {
        let n = self.number();
        let mut flags = vec![format!("-gencode=arch=compute_{n},code=sm_{n}")];
        if self.ptx {
            flags.push(format!("-gencode=arch=compute_{n},code=compute_{n}"));
        }
        flags
    }

    fn parse(entry: &str) -> Result<Self> {
        let (version, ptx) = match entry.strip_suffix("+PTX") {
            Some(v) => (v, true),
            None => (entry, false),
        };
        let invalid = || JitError::InvalidArch(entry.to_string());

        let (major, minor) = version.split_once('.').ok_or_else(invalid)?;
        let major: u32 = major.parse().map_err(|_| invalid())?;
        let minor: u32 = minor.parse().map_err(|_| invalid())?;
        if major == 0 || major > MAX_MAJOR || minor > 9 {
            return Err(invalid());
        }

        Ok(Self { major, minor, ptx })
    }
}

impl fmt::Display for CudaArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if self.ptx {
            write!(f, "+PTX")?;
        }
        Ok(())
    }
}

/// Named generations accepted in arch lists.
fn named_generation(name: &str) -> Option<&'static str> {
    match name {
        "Turing" => Some("7.5+PTX"),
        "Ampere" => Some("8.0;8.6+PTX"),
        "Ada" => Some("8.9+PTX"),
        "Hopper" => Some("9.0+PTX"),
        _ => None,
    }
}

/// Parses an arch list separated by `;` or whitespace.
///
/// Duplicate entries are collapsed; a `+PTX` entry wins over the plain one.
pub fn parse_arch_list(list: &str) -> Result<Vec<CudaArch>> {
    let mut archs: Vec<CudaArch> = Vec::new();

    for entry in list.split(|c: char| c == ';' || c.is_whitespace()) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let parsed = match named_generation(entry) {
            Some(expanded) => parse_arch_list(expanded)?,
            None => vec![CudaArch::parse(entry)?],
        };

        for arch in parsed {
            match archs
                .iter_mut()
                .find(|a| a.major == arch.major && a.minor == arch.minor)
            {
                Some(existing) => existing.ptx |= arch.ptx,
                None => archs.push(arch),
            }
        }
    }

    if archs.is_empty() {
        return Err(JitError::InvalidArch(format!("empty arch list '{list}'")));
    }

    archs.sort();
    Ok(archs)
}

/// `-gencode` flags for every arch, in order.
pub fn gencode_flags(archs: &[CudaArch]) -> Vec<String> {
    archs.iter().flat_map(CudaArch::gencode_flags).collect()
}

fn compute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"compute_(\d+)").expect("compute_ pattern is a valid regex"))
}

/// Extracts the compute capability named by an arch flag, if any.
pub fn compute_capability_of(flag: &str) -> Option<u32> {
    compute_regex()
        .captures(flag)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Rejects flags that target a generation below [`MIN_COMPUTE_CAPABILITY`].
///
/// Flags that do not name a `compute_XY` arch are ignored.
pub fn check_cuda_arch<S: AsRef<str>>(arch_flags: &[S]) -> Result<()> {
    for flag in arch_flags {
        if let Some(arch) = compute_capability_of(flag.as_ref()) {
            if arch < MIN_COMPUTE_CAPABILITY {
                return Err(JitError::UnsupportedArch {
                    found: arch,
                    required: MIN_COMPUTE_CAPABILITY,
                });
            }
        }
    }
    Ok(())
}

/// Resolves the arch list for `config` into `-gencode` flags.
pub fn resolve_arch_flags(config: &JitConfig) -> Result<Vec<String>> {
    Ok(gencode_flags(&resolve_archs(config)?))
}

/// Resolves the arch list for `config`.
pub fn resolve_archs(config: &JitConfig) -> Result<Vec<CudaArch>> {
    if let Some(list) = config.arch_list() {
        return parse_arch_list(list);
    }

    let detected = detect_device_archs();
    if !detected.is_empty() {
        let list = detected
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");
        tracing::debug!(archs = %list, "Detected device compute capabilities");
        return parse_arch_list(&list);
    }

    tracing::warn!(
        "No CUDA arch list configured and no device detected, using {}",
        FALLBACK_ARCH_LIST
    );
    parse_arch_list(FALLBACK_ARCH_LIST)
}

/// Compute capabilities of the visible devices, deduplicated.
pub fn detect_device_archs() -> Vec<CudaArch> {
    let mut archs = query_devices();
    if archs.is_empty() {
        if let Some(arch) = compute_cap_from_env() {
            archs.push(arch);
        }
    }
    archs.sort();
    archs.dedup();
    archs
}

#[cfg(feature = "cuda")]
fn query_devices() -> Vec<CudaArch> {
    // cudarc panics if the driver library is missing
    std::panic::catch_unwind(|| {
        let count = cudarc::driver::CudaContext::device_count().unwrap_or(0);
        (0..count.max(0) as usize)
            .filter_map(|ordinal| {
                let ctx = cudarc::driver::CudaContext::new(ordinal).ok()?;
                let (major, minor) = ctx.compute_capability().ok()?;
                Some(CudaArch::new(major as u32, minor as u32))
            })
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(not(feature = "cuda"))]
fn query_devices() -> Vec<CudaArch> {
    let output = match std::process::Command::new("nvidia-smi")
        .args(["--query-gpu=compute_cap", "--format=csv,noheader"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        _ => return Vec::new(),
    };

    parse_compute_cap_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses `nvidia-smi --query-gpu=compute_cap` output, one `X.Y` per line.
#[cfg_attr(feature = "cuda", allow(dead_code))]
fn parse_compute_cap_output(stdout: &str) -> Vec<CudaArch> {
    stdout
        .lines()
        .filter_map(|line| CudaArch::parse(line.trim()).ok())
        .collect()
}

/// `CUDA_COMPUTE_CAP`, accepted as `86` or `8.6`.
fn compute_cap_from_env() -> Option<CudaArch> {
    parse_compute_cap(&std::env::var("CUDA_COMPUTE_CAP").ok()?)
}

fn parse_compute_cap(value: &str) -> Option<CudaArch> {
    let value = value.trim();
    if value.contains('.') {
        return CudaArch::parse(value).ok();
    }
    let n: u32 = value.parse().ok()?;
    CudaArch::parse(&format!("{}.{}", n / 10, n % 10)).ok()
}
