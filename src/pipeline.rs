//! End-to-end bundle pipeline
//!
//! The algorithmic work lives in [`crate::resolve`], [`crate::collect`],
//! and [`crate::relink`]; this module strings it together with the plain
//! sequential steps around it: compiling the interpreter, creating the
//! virtual environment, installing packages, pruning cache artifacts, and
//! archiving the result with a rendered install script.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::BundleError;
use crate::layout::BundleLayout;
use crate::BundleOutcome;
use crate::Bundler;

/// How the virtual environment is created.
///
/// The two interpreter generations differ only in this one step, so it is a
/// strategy value rather than two builder types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenvStrategy {
    /// `python3 -m venv` (stdlib, interpreter 3.x)
    Venv,
    /// `python2 -m virtualenv`, installed on demand (interpreter 2.x)
    Virtualenv,
}

impl VenvStrategy {
    /// Pick the strategy matching an interpreter version string.
    pub fn for_version(version: &str) -> Result<Self, BundleError> {
        match version.chars().next() {
            Some('3') => Ok(VenvStrategy::Venv),
            Some('2') => Ok(VenvStrategy::Virtualenv),
            _ => Err(BundleError::UnsupportedVersion(version.to_string())),
        }
    }

    /// Major version digit of the interpreter binary this strategy drives
    /// (`python3` / `python2`).
    pub fn python_major(self) -> char {
        match self {
            VenvStrategy::Venv => '3',
            VenvStrategy::Virtualenv => '2',
        }
    }
}

/// Builds a complete relocatable bundle from interpreter sources.
pub struct BundleBuilder {
    layout: BundleLayout,
    strategy: VenvStrategy,
    /// Directory holding `Python/` source tarballs, `requirements.txt`,
    /// and the `install.sh` template.
    packages_dir: PathBuf,
}

impl BundleBuilder {
    pub fn new(
        layout: BundleLayout,
        strategy: VenvStrategy,
        packages_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            layout,
            strategy,
            packages_dir: packages_dir.into(),
        }
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    /// Run every phase in order. Each phase is a full barrier: the next one
    /// starts only after the previous completed.
    pub fn run(&self) -> Result<BundleOutcome, BundleError> {
        self.build_main_env()?;
        self.create_virtual_env()?;
        self.pip_install()?;
        let outcome = self.bundle_libraries()?;
        self.clean()?;
        self.archive()?;
        Ok(outcome)
    }

    /// Unpack, configure, and install the interpreter main environment.
    pub fn build_main_env(&self) -> Result<(), BundleError> {
        let version = self.layout.python_version();
        let main_dir = self.layout.main_dir();
        let tarball = self
            .packages_dir
            .join("Python")
            .join(format!("Python-{}.tgz", version));

        run_shell(&format!(
            "tar -xf {tarball} -C /tmp/ \
             && cd /tmp/Python-{version} \
             && ./configure --prefix={prefix} --disable-option-checking \
                --enable-shared --enable-loadable-sqlite-extensions \
             && make -j \"$(nproc)\" \
             && make install",
            tarball = tarball.display(),
            version = version,
            prefix = main_dir.display(),
        ))?;

        if !main_dir.is_dir() {
            return Err(BundleError::NotADirectory(main_dir));
        }
        Ok(())
    }

    /// Create the virtual environment on top of the main environment.
    pub fn create_virtual_env(&self) -> Result<(), BundleError> {
        let python = self.main_python();
        let main_lib = self.layout.main_lib_dir();
        let virtual_dir = self.layout.virtual_dir();
        let prompt = self.layout.project();

        match self.strategy {
            VenvStrategy::Venv => run_shell(&format!(
                "export LD_LIBRARY_PATH={main_lib}:$LD_LIBRARY_PATH \
                 && {python} -m venv --symlinks --prompt {prompt} {virtual_dir}",
                main_lib = main_lib.display(),
                python = python.display(),
                prompt = prompt,
                virtual_dir = virtual_dir.display(),
            )),
            VenvStrategy::Virtualenv => run_shell(&format!(
                "export LD_LIBRARY_PATH={main_lib}:$LD_LIBRARY_PATH \
                 && {python} -m pip install virtualenv \
                 && {python} -m virtualenv --prompt={prompt} {virtual_dir}",
                main_lib = main_lib.display(),
                python = python.display(),
                prompt = prompt,
                virtual_dir = virtual_dir.display(),
            )),
        }
    }

    /// Install third-party packages from `requirements.txt`, if present.
    pub fn pip_install(&self) -> Result<(), BundleError> {
        let requirements = self.packages_dir.join("requirements.txt");
        if !requirements.is_file() {
            return Ok(());
        }

        run_shell(&format!(
            "source {virtual_dir}/bin/activate \
             && export LD_LIBRARY_PATH={main_lib}:$LD_LIBRARY_PATH \
             && pip install --upgrade pip \
             && pip install -r {requirements}",
            virtual_dir = self.layout.virtual_dir().display(),
            main_lib = self.layout.main_lib_dir().display(),
            requirements = requirements.display(),
        ))
    }

    /// Resolve, collect, and relink: the core bundling phases, in order.
    pub fn bundle_libraries(&self) -> Result<BundleOutcome, BundleError> {
        Bundler::new(self.layout.clone()).bundle_libraries()
    }

    /// Prune test suites, bytecode caches, and other artifacts that only
    /// inflate the archive.
    pub fn clean(&self) -> Result<(), BundleError> {
        clean_tree(&self.layout.env_root())?;
        let share = self.layout.main_dir().join("share");
        if share.is_dir() {
            fs::remove_dir_all(&share)?;
        }
        Ok(())
    }

    /// Archive the virtual environment and the system libraries, render the
    /// install script, and wrap everything into one distributable tarball.
    pub fn archive(&self) -> Result<(), BundleError> {
        let project = self.layout.project();
        let build_dir = self.packages_dir.join("build");
        let tar_dir = build_dir.join(project);
        fs::create_dir_all(&tar_dir)?;

        let virtual_archive = format!("{}_env_virtual.tar.gz", project);
        let system_lib_archive = "system_lib.tar.gz";

        run_shell(&format!(
            "tar -czf {archive} {target}",
            archive = tar_dir.join(&virtual_archive).display(),
            target = self.layout.virtual_dir().display(),
        ))?;
        run_shell(&format!(
            "tar -czf {archive} {target}",
            archive = tar_dir.join(system_lib_archive).display(),
            target = self.layout.system_lib_dir().display(),
        ))?;

        let template = self.packages_dir.join("install.sh");
        let rendered = render_install_script(
            &fs::read_to_string(&template)?,
            &virtual_archive,
            system_lib_archive,
            &self.layout.virtual_dir(),
        );
        fs::write(tar_dir.join("install.sh"), rendered)?;

        let bundle_name = format!("{}_{}_env.tar.gz", project, self.layout.arch().tag());
        run_shell(&format!(
            "cd {build_dir} && tar -czf {bundle} {dir} && rm -rf {dir}",
            build_dir = build_dir.display(),
            bundle = bundle_name,
            dir = project,
        ))
    }

    fn main_python(&self) -> PathBuf {
        self.layout
            .main_bin_dir()
            .join(format!("python{}", self.strategy.python_major()))
    }
}

/// Interpreter versions available for building, read from the source
/// tarball names under `{packages_dir}/Python/`.
pub fn available_versions(packages_dir: &Path) -> Result<Vec<String>, BundleError> {
    let python_dir = packages_dir.join("Python");
    let mut versions = Vec::new();
    for entry in fs::read_dir(&python_dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(version) = name
            .strip_prefix("Python-")
            .and_then(|rest| rest.strip_suffix(".tgz"))
        {
            versions.push(version.to_string());
        }
    }
    versions.sort();
    Ok(versions)
}

fn run_shell(cmd: &str) -> Result<(), BundleError> {
    let status = Command::new("sh").arg("-c").arg(cmd).status()?;
    if !status.success() {
        return Err(BundleError::CommandFailed {
            command: cmd.to_string(),
            status: status.code().unwrap_or(-1),
        });
    }
    Ok(())
}

fn render_install_script(
    template: &str,
    virtual_archive: &str,
    system_lib_archive: &str,
    virtual_dir: &Path,
) -> String {
    template
        .replace("__virtual_env_package__", virtual_archive)
        .replace("__system_lib_package__", system_lib_archive)
        .replace("__virtual_env_active__", &virtual_dir.to_string_lossy())
}

/// Directory names pruned wholesale before archiving.
const PRUNED_DIRS: [&str; 5] = ["test", "tests", "idle_test", "test-data", "__pycache__"];

/// File extensions pruned before archiving.
const PRUNED_EXTENSIONS: [&str; 3] = ["pyc", "pyi", "exe"];

fn clean_tree(root: &Path) -> Result<(), BundleError> {
    if !root.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if path.is_dir() && !path.is_symlink() {
            if PRUNED_DIRS.contains(&name.as_ref()) {
                fs::remove_dir_all(&path)?;
            } else {
                clean_tree(&path)?;
            }
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| PRUNED_EXTENSIONS.contains(&ext))
        {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
