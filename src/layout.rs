//! Directory layout of an interpreter install tree and its bundle outputs.
//!
//! Every component takes paths from a [`BundleLayout`] instead of consulting
//! process-wide defaults, so two builds with different prefixes never step on
//! each other.

use std::path::{Path, PathBuf};

use crate::arch::Arch;

/// Executables whose basename starts with this are interpreter binaries.
pub const INTERPRETER_PREFIX: &str = "python";

/// Libraries whose declared name starts with this ship inside the install
/// tree itself and are excluded from system dependency resolution.
pub const INTERPRETER_LIB_PREFIX: &str = "libpython";

/// Path scheme for one bundle build.
///
/// The tree mirrors what the interpreter installer produces:
///
/// ```text
/// {prefix}/{version}/{project}/            virtual environment
/// {prefix}/{version}/{project}/main/       interpreter main environment
/// {prefix}/{version}/{project}/main/lib/   private interpreter libraries
/// {prefix}/system_lib/{project}/           bundled system libraries + loader
/// ```
#[derive(Debug, Clone)]
pub struct BundleLayout {
    install_prefix: PathBuf,
    python_version: String,
    project: String,
    arch: Arch,
    loader_source: PathBuf,
}

impl BundleLayout {
    pub fn new(
        install_prefix: impl Into<PathBuf>,
        python_version: impl Into<String>,
        project: impl Into<String>,
        arch: Arch,
    ) -> Self {
        Self {
            install_prefix: install_prefix.into(),
            python_version: python_version.into(),
            project: project.into(),
            arch,
            loader_source: arch.loader_path().to_path_buf(),
        }
    }

    /// Override where the dynamic loader is copied from.
    ///
    /// Defaults to the architecture's `/lib64` loader; tests and sysroot
    /// builds point this somewhere else.
    pub fn with_loader_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.loader_source = path.into();
        self
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn python_version(&self) -> &str {
        &self.python_version
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn install_prefix(&self) -> &Path {
        &self.install_prefix
    }

    /// Root of the versioned environment tree, e.g. `{prefix}/3.11.4`.
    pub fn env_root(&self) -> PathBuf {
        self.install_prefix.join(&self.python_version)
    }

    /// Virtual environment directory, e.g. `{prefix}/3.11.4/{project}`.
    pub fn virtual_dir(&self) -> PathBuf {
        self.env_root().join(&self.project)
    }

    /// Interpreter main environment, nested under the virtual environment.
    pub fn main_dir(&self) -> PathBuf {
        self.virtual_dir().join("main")
    }

    /// Private interpreter library directory (`libpythonX.Y.so` lives here).
    pub fn main_lib_dir(&self) -> PathBuf {
        self.main_dir().join("lib")
    }

    pub fn main_bin_dir(&self) -> PathBuf {
        self.main_dir().join("bin")
    }

    pub fn virtual_bin_dir(&self) -> PathBuf {
        self.virtual_dir().join("bin")
    }

    /// Destination directory for bundled system libraries and the loader.
    pub fn system_lib_dir(&self) -> PathBuf {
        self.install_prefix.join("system_lib").join(&self.project)
    }

    /// Where the dynamic loader is copied from on the build host.
    pub fn loader_source(&self) -> &Path {
        &self.loader_source
    }

    /// Where the bundled copy of the dynamic loader ends up.
    ///
    /// This is also the interpreter path written into relinked executables.
    pub fn loader_dest(&self) -> PathBuf {
        let name = self
            .loader_source
            .file_name()
            .unwrap_or(self.loader_source.as_os_str());
        self.system_lib_dir().join(name)
    }

    /// Runtime search path for ordinary shared objects: the bundled system
    /// library directory only.
    pub fn shared_object_search_paths(&self) -> Vec<PathBuf> {
        vec![self.system_lib_dir()]
    }

    /// Runtime search path for interpreter binaries and installed
    /// executables: the private interpreter library directory first, so the
    /// environment's own copy of a library shadows the bundled system one.
    pub fn executable_search_paths(&self) -> Vec<PathBuf> {
        vec![self.main_lib_dir(), self.system_lib_dir()]
    }
}
