//! Build orchestration tests with a stub builder.
//!
//! The stub records every compile in `<build_dir>/compiles` and loads the C
//! library as the "module", so these tests need no CUDA toolchain.
//!
//! Run with: cargo test -p kernjit --test jit_cache

#![cfg(target_os = "linux")]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kernjit::{
    BuildRequest, ExtensionBuilder, JitConfig, JitContext, JitError, JitModule, LoadOptions,
    PrebuiltOps,
};
use tempfile::TempDir;

const BUILD_TIME: Duration = Duration::from_millis(300);

/// Compiles whenever `<build_dir>/stamp` does not hold the request fingerprint.
struct StubBuilder;

impl StubBuilder {
    fn compiles(build_dir: &Path) -> usize {
        fs::read_to_string(build_dir.join("compiles"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

impl ExtensionBuilder for StubBuilder {
    fn build_and_load(&self, request: &BuildRequest<'_>) -> kernjit::Result<JitModule> {
        let fingerprint = request.fingerprint()?;
        let stamp = request.build_dir.join("stamp");
        if fs::read_to_string(&stamp).ok().as_deref() != Some(fingerprint.as_str()) {
            thread::sleep(BUILD_TIME);
            let mut log = fs::read_to_string(request.build_dir.join("compiles")).unwrap_or_default();
            log.push_str(&fingerprint);
            log.push('\n');
            fs::write(request.build_dir.join("compiles"), log)?;
            fs::write(&stamp, &fingerprint)?;
        }
        unsafe { JitModule::load(request.name, "libc.so.6") }
    }
}

/// Temp root holding the workspace, a header directory and kernel sources.
struct Fixture {
    temp: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("include")).unwrap();
        Self { temp }
    }

    fn workspace(&self) -> PathBuf {
        self.temp.path().join("ws")
    }

    fn config(&self) -> JitConfig {
        JitConfig::default()
            .with_workspace_dir(self.workspace())
            .with_include_dir(self.temp.path().join("include"))
            .with_arch_list("8.0;9.0+PTX")
    }

    fn context(&self) -> JitContext {
        JitContext::initialize_with_builder(self.config(), Arc::new(StubBuilder)).unwrap()
    }

    fn source(&self, file: &str, body: &str) -> PathBuf {
        let path = self.temp.path().join(file);
        fs::write(&path, body).unwrap();
        path
    }

    fn sources(&self) -> Vec<PathBuf> {
        vec![self.source("ops.cu", "__global__ void ops() {}\n")]
    }
}

#[test]
fn test_initialize_creates_missing_workspace() {
    let fixture = Fixture::new();
    let workspace = fixture.temp.path().join("nested").join("workspace");
    let config = fixture.config().with_workspace_dir(&workspace);

    let ctx = JitContext::initialize_with_builder(config, Arc::new(StubBuilder)).unwrap();
    assert!(workspace.is_dir());
    assert!(ctx.config().log_path().starts_with(&workspace));
}

#[test]
fn test_same_context_reuses_loaded_module() {
    let fixture = Fixture::new();
    let ctx = fixture.context();
    let sources = fixture.sources();

    let first = ctx.load_cuda_ops("ops", &sources, &LoadOptions::new()).unwrap();
    let second = ctx.load_cuda_ops("ops", &sources, &LoadOptions::new()).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "ops");
    assert_eq!(StubBuilder::compiles(&ctx.config().jit_dir().join("ops")), 1);
    assert!(ctx.config().jit_dir().join("ops.lock").exists());
}

#[test]
fn test_changed_sources_or_flags_rebuild() {
    let fixture = Fixture::new();
    let ctx = fixture.context();
    let build_dir = ctx.config().jit_dir().join("ops");

    let a = vec![fixture.source("a.cu", "__global__ void a() {}\n")];
    let first = ctx.load_cuda_ops("ops", &a, &LoadOptions::new()).unwrap();

    let b = vec![fixture.source("b.cu", "__global__ void b() {}\n")];
    let debug = LoadOptions::new().with_cuda_cflags(["-G"]);
    let second = ctx.load_cuda_ops("ops", &b, &debug).unwrap();

    assert_eq!(StubBuilder::compiles(&build_dir), 2);
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&second, &ctx.loaded("ops").unwrap()));

    // Same inputs again reuse the rebuilt module.
    let third = ctx.load_cuda_ops("ops", &b, &debug).unwrap();
    assert!(Arc::ptr_eq(&second, &third));

    // Editing a source in place also rebuilds.
    fixture.source("b.cu", "__global__ void b() { return; }\n");
    let fourth = ctx.load_cuda_ops("ops", &b, &debug).unwrap();
    assert!(!Arc::ptr_eq(&third, &fourth));
    assert_eq!(StubBuilder::compiles(&build_dir), 3);
}

#[test]
fn test_missing_include_dir_is_config_error() {
    let fixture = Fixture::new();
    let config = fixture
        .config()
        .with_include_dir(fixture.temp.path().join("no_headers"));
    let ctx = JitContext::initialize_with_builder(config, Arc::new(StubBuilder)).unwrap();
    let sources = fixture.sources();

    let err = ctx
        .load_cuda_ops("ops", &sources, &LoadOptions::new())
        .unwrap_err();
    assert!(matches!(err, JitError::Config(_)));
    assert_eq!(StubBuilder::compiles(&ctx.config().jit_dir().join("ops")), 0);

    let explicit = LoadOptions::new().with_include_paths(vec![fixture.temp.path().to_path_buf()]);
    ctx.load_cuda_ops("ops", &sources, &explicit).unwrap();
    assert_eq!(StubBuilder::compiles(&ctx.config().jit_dir().join("ops")), 1);
}

#[test]
fn test_concurrent_loads_compile_once() {
    let fixture = Fixture::new();
    let ctx = Arc::new(fixture.context());
    let sources = fixture.sources();

    let start = Instant::now();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let sources = sources.clone();
            thread::spawn(move || {
                ctx.load_cuda_ops("ops", &sources, &LoadOptions::new())
                    .unwrap();
                Instant::now()
            })
        })
        .collect();
    let finished: Vec<Instant> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(StubBuilder::compiles(&ctx.config().jit_dir().join("ops")), 1);
    for end in finished {
        assert!(end.duration_since(start) >= BUILD_TIME);
    }
}

#[test]
fn test_contexts_sharing_workspace_compile_once() {
    let fixture = Fixture::new();
    let a = Arc::new(fixture.context());
    let b = Arc::new(fixture.context());
    let sources = fixture.sources();

    let handles: Vec<_> = [a.clone(), b.clone()]
        .into_iter()
        .map(|ctx| {
            let sources = sources.clone();
            thread::spawn(move || {
                ctx.load_cuda_ops("shared", &sources, &LoadOptions::new())
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(StubBuilder::compiles(&a.config().jit_dir().join("shared")), 1);
    assert!(a.loaded("shared").is_some());
    assert!(b.loaded("shared").is_some());
}

#[test]
fn test_different_modules_build_independently() {
    let fixture = Fixture::new();
    let ctx = fixture.context();
    let sources = fixture.sources();

    ctx.load_cuda_ops("a", &sources, &LoadOptions::new()).unwrap();
    ctx.load_cuda_ops("b", &sources, &LoadOptions::new()).unwrap();

    let jit_dir = ctx.config().jit_dir();
    assert_eq!(StubBuilder::compiles(&jit_dir.join("a")), 1);
    assert_eq!(StubBuilder::compiles(&jit_dir.join("b")), 1);
    assert_eq!(ctx.cache_stats().entries, 2);
}

#[test]
fn test_clear_cache_dir_empties_jit_dir() {
    let fixture = Fixture::new();
    let ctx = fixture.context();
    let sources = fixture.sources();

    ctx.load_cuda_ops("ops", &sources, &LoadOptions::new()).unwrap();
    let jit_dir = ctx.config().jit_dir();
    assert!(fs::read_dir(&jit_dir).unwrap().count() > 0);

    ctx.clear_cache_dir().unwrap();
    assert!(jit_dir.is_dir());
    assert_eq!(fs::read_dir(&jit_dir).unwrap().count(), 0);
    assert!(ctx.loaded("ops").is_none());

    // Clearing twice is fine.
    ctx.clear_cache_dir().unwrap();

    ctx.load_cuda_ops("ops", &sources, &LoadOptions::new()).unwrap();
    assert_eq!(StubBuilder::compiles(&jit_dir.join("ops")), 1);
}

#[test]
fn test_old_arch_rejected() {
    let fixture = Fixture::new();
    let config = fixture.config().with_arch_list("7.0");
    let ctx = JitContext::initialize_with_builder(config, Arc::new(StubBuilder)).unwrap();
    let sources = fixture.sources();

    let err = ctx
        .load_cuda_ops("ops", &sources, &LoadOptions::new())
        .unwrap_err();
    assert!(matches!(err, JitError::UnsupportedArch { found: 70, .. }));
    assert_eq!(err.to_string(), "kernjit requires sm75+, found compute_70");
    assert!(!ctx.config().jit_dir().join("ops").exists());
}

#[test]
fn test_prebuilt_registry_bypasses_builder() {
    let fixture = Fixture::new();
    let prebuilt = fixture.temp.path().join("prebuilt");
    let uri = kernjit::codegen::get_act_and_mul_uri("relu");
    PrebuiltOps::write(&prebuilt, [uri.clone()]).unwrap();
    // Any loadable library stands in for the prebuilt module.
    let libc = ["/lib/x86_64-linux-gnu/libc.so.6", "/usr/lib64/libc.so.6", "/lib64/libc.so.6"]
        .into_iter()
        .map(Path::new)
        .find(|p| p.exists());
    let Some(libc) = libc else {
        return;
    };
    std::os::unix::fs::symlink(libc, prebuilt.join(libloading::library_filename(&uri))).unwrap();

    let config = fixture.config().with_prebuilt_dir(&prebuilt);
    let ctx = JitContext::initialize_with_builder(config, Arc::new(StubBuilder)).unwrap();
    assert!(ctx.prebuilt().contains(&uri));

    let module = ctx
        .gen_act_and_mul_module(
            "relu",
            "__device__ __forceinline__ float relu(const float& x) { return x > 0.f ? x : 0.f; }",
            &LoadOptions::new(),
        )
        .unwrap();
    assert_eq!(module.name(), uri);
    assert!(module.path().starts_with(&prebuilt));
    assert!(!ctx.config().jit_dir().join(&uri).exists());
}
