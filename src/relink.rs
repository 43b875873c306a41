//! Batch relinking of an install tree against the bundled libraries
//!
//! Runs after collection, so every search path written here points at a
//! directory that is already populated. Shared objects anywhere under the
//! install prefix (the freshly bundled copies included, so they can find
//! each other) get the system library directory as their only search path.
//! Interpreter binaries and installed executables additionally get the
//! private interpreter library directory, ahead of the system one, and have
//! their program interpreter redirected to the bundled loader.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::elf;
use crate::error::{BundleError, ElfError};
use crate::layout::BundleLayout;
use crate::layout::INTERPRETER_PREFIX;

/// A file whose dynamic metadata could not be rewritten
#[derive(Debug)]
pub struct RelinkFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a tree relinking pass
///
/// Per-file failures are expected (a handful of files under any real tree
/// are not dynamically linked) and never abort the batch; callers that want
/// stricter semantics can inspect [`RelinkReport::failed`] and escalate.
#[derive(Debug, Default)]
pub struct RelinkReport {
    pub relinked: Vec<PathBuf>,
    pub failed: Vec<RelinkFailure>,
}

impl RelinkReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn ok(&mut self, path: impl Into<PathBuf>) {
        self.relinked.push(path.into());
    }

    fn fail(&mut self, path: impl Into<PathBuf>, reason: impl Into<String>) {
        self.failed.push(RelinkFailure {
            path: path.into(),
            reason: reason.into(),
        });
    }
}

/// Rewrites runtime search paths and program interpreters in place.
pub struct ElfRelinker<'a> {
    layout: &'a BundleLayout,
}

impl<'a> ElfRelinker<'a> {
    pub fn new(layout: &'a BundleLayout) -> Self {
        Self { layout }
    }

    /// Rewrite one file's runtime search path and/or program interpreter.
    ///
    /// `search_paths` is ordered highest-priority first and is written as a
    /// single colon-joined RUNPATH entry. An empty list leaves the search
    /// path untouched.
    pub fn relink_file(
        &self,
        path: &Path,
        search_paths: &[PathBuf],
        interpreter: Option<&Path>,
    ) -> Result<(), ElfError> {
        let runpath = if search_paths.is_empty() {
            None
        } else {
            Some(join_search_paths(search_paths))
        };
        elf::patch_elf(path, runpath.as_deref(), interpreter)
    }

    /// Relink every ELF object under the install prefix per its role.
    ///
    /// # Errors
    ///
    /// Per-file rewrite failures land in the report; only an unreadable
    /// binary directory is surfaced as an error.
    pub fn relink_tree(&self) -> Result<RelinkReport, BundleError> {
        let mut report = RelinkReport::default();
        let mut done: HashSet<PathBuf> = HashSet::new();

        self.relink_shared_objects(&mut report, &mut done);
        self.relink_executables(&mut report, &mut done)?;

        Ok(report)
    }

    /// Every `*.so*` file under the install prefix gets the system library
    /// directory as its search path. The bundled loader itself is excluded:
    /// rewriting the program that loads everything else would be
    /// self-defeating.
    fn relink_shared_objects(&self, report: &mut RelinkReport, done: &mut HashSet<PathBuf>) {
        let loader_dest = self.layout.loader_dest();
        let search_paths = self.layout.shared_object_search_paths();

        let pattern = format!("{}/**/*.so*", self.layout.install_prefix().display());
        let Ok(paths) = glob::glob(&pattern) else {
            return;
        };

        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                // Unreadable entries are reported, not dropped: the batch
                // keeps going either way.
                Err(e) => {
                    report.fail(e.path().to_path_buf(), e.error().to_string());
                    continue;
                }
            };
            if path == loader_dest {
                continue;
            }
            if !elf::is_elf(&path) {
                continue;
            }
            if !done.insert(path.clone()) {
                continue;
            }
            match self.relink_file(&path, &search_paths, None) {
                Ok(()) => report.ok(path),
                Err(e) => report.fail(path, e.to_string()),
            }
        }
    }

    /// Interpreter binaries in both `bin` directories, plus every ELF
    /// executable installed into the virtual environment's `bin`, get the
    /// private-then-shared search path and the bundled loader as their
    /// program interpreter.
    fn relink_executables(
        &self,
        report: &mut RelinkReport,
        done: &mut HashSet<PathBuf>,
    ) -> Result<(), BundleError> {
        let search_paths = self.layout.executable_search_paths();
        let loader_dest = self.layout.loader_dest();

        for bin_dir in [self.layout.main_bin_dir(), self.layout.virtual_bin_dir()] {
            for path in bin_entries(&bin_dir)? {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                let is_interpreter = name.starts_with(INTERPRETER_PREFIX);
                let is_virtual_bin = bin_dir == self.layout.virtual_bin_dir();
                if !is_interpreter && !(is_virtual_bin && elf::is_elf(&path)) {
                    continue;
                }

                // A venv python is typically a symlink to the main binary;
                // patch the target once instead of twice.
                let target = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !done.insert(target.clone()) {
                    continue;
                }

                match self.relink_file(&target, &search_paths, Some(&loader_dest)) {
                    Ok(()) => report.ok(target),
                    Err(e) => report.fail(target, e.to_string()),
                }
            }
        }

        Ok(())
    }
}

fn join_search_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Regular entries of a `bin` directory, sorted for deterministic reports.
/// A missing directory (tree built without a main env yet) yields nothing.
fn bin_entries(dir: &Path) -> Result<Vec<PathBuf>, BundleError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| !p.is_dir())
        .collect();
    entries.sort();
    Ok(entries)
}
