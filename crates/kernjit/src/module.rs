//! Loaded kernel extension modules.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use crate::error::{JitError, Result};

/// A built extension loaded into the current process.
///
/// The underlying library stays loaded for as long as the module is alive.
#[derive(Debug)]
pub struct JitModule {
    name: String,
    path: PathBuf,
    library: Library,
}

impl JitModule {
    /// Loads the shared library at `path` under the logical name `name`.
    ///
    /// # Safety
    ///
    /// Loading runs the library's initializers. The caller must trust the
    /// library; kernjit only loads libraries it built or that the prebuilt
    /// registry names.
    pub unsafe fn load(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let name = name.into();
        let path = path.into();

        let library = unsafe { Library::new(&path) }.map_err(|e| JitError::LoadFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(module = %name, path = %path.display(), "Loaded module");

        Ok(Self {
            name,
            path,
            library,
        })
    }

    /// Logical module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the loaded library.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up an exported symbol.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's actual type, and the returned symbol must
    /// not outlive this module.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<Symbol<'_, T>> {
        let mut bytes = name.as_bytes().to_vec();
        if bytes.last() != Some(&0) {
            bytes.push(0);
        }

        unsafe { self.library.get(&bytes) }.map_err(|_| JitError::MissingSymbol {
            module: self.name.clone(),
            symbol: name.to_string(),
        })
    }

    /// Returns true if the module exports `name`.
    pub fn has_symbol(&self, name: &str) -> bool {
        // Only the address is inspected, never called.
        unsafe { self.symbol::<*const ()>(name).is_ok() }
    }
}
