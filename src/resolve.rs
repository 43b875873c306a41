//! Transitive shared-library dependency resolution
//!
//! Walks every shared object under the install tree, reads its DT_NEEDED
//! entries, and resolves each name to a concrete file the way the dynamic
//! linker would: the requesting object's RUNPATH/RPATH first (with `$ORIGIN`
//! substituted), then caller-supplied extra directories, then the standard
//! system library directories. Resolution is transitive and deduplicates by
//! canonical (symlink-free) path.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use crate::elf;
use crate::elf::ElfInfo;
use crate::error::BundleError;
use crate::layout::BundleLayout;
use crate::layout::INTERPRETER_LIB_PREFIX;

/// One resolved native shared-library requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryDependency {
    /// Name the dependent object declared (a DT_NEEDED entry, i.e. a soname)
    pub name: String,
    /// Path the name resolved to on the build host (possibly a symlink)
    pub discovered: PathBuf,
    /// Symlink-free path the discovered path ultimately points at
    pub canonical: PathBuf,
}

impl LibraryDependency {
    /// Build a dependency from a declared name and the path it resolved to,
    /// following any symlink chain to the canonical file.
    pub fn resolve(name: impl Into<String>, discovered: impl Into<PathBuf>) -> std::io::Result<Self> {
        let discovered = discovered.into();
        let canonical = fs::canonicalize(&discovered)?;
        Ok(Self {
            name: name.into(),
            discovered,
            canonical,
        })
    }
}

/// A file that could not be inspected during resolution, with the reason
#[derive(Debug)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a dependency resolution pass
#[derive(Debug, Default)]
pub struct Resolution {
    /// Deduplicated dependencies, in discovery order
    pub dependencies: Vec<LibraryDependency>,
    /// Files skipped with a warning instead of aborting the pass
    pub skipped: Vec<SkippedFile>,
    canonical_seen: HashSet<PathBuf>,
}

impl Resolution {
    /// Insert a dependency unless one with the same canonical path is
    /// already present. Returns true if the dependency was new.
    pub(crate) fn insert(&mut self, dep: LibraryDependency) -> bool {
        if !self.canonical_seen.insert(dep.canonical.clone()) {
            return false;
        }
        self.dependencies.push(dep);
        true
    }

    fn skip(&mut self, path: impl Into<PathBuf>, reason: impl Into<String>) {
        self.skipped.push(SkippedFile {
            path: path.into(),
            reason: reason.into(),
        });
    }
}

/// Computes the dependency closure of an install tree.
pub struct DependencyResolver<'a> {
    layout: &'a BundleLayout,
    extra_search_paths: Vec<PathBuf>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(layout: &'a BundleLayout) -> Self {
        Self {
            layout,
            extra_search_paths: Vec::new(),
        }
    }

    /// Add a directory searched after each object's own RUNPATH but before
    /// the standard system directories.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extra_search_paths.push(path.into());
        self
    }

    /// Resolve the full dependency closure of the install tree.
    ///
    /// The returned set has at most one entry per canonical path, and always
    /// contains the host dynamic loader as its final unconditional entry.
    ///
    /// # Errors
    ///
    /// Fails only when the tree root is not a readable directory. Individual
    /// files that cannot be inspected are recorded in
    /// [`Resolution::skipped`] and do not abort the pass.
    pub fn resolve(&self) -> Result<Resolution, BundleError> {
        let root = self.layout.env_root();
        if !root.is_dir() {
            return Err(BundleError::NotADirectory(root));
        }

        let mut resolution = Resolution::default();
        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        let mut inspected: HashSet<PathBuf> = HashSet::new();
        let mut names_seen: HashSet<String> = HashSet::new();

        for path in self.shared_objects_under(&root, &mut resolution) {
            queue.push_back(path);
        }

        while let Some(path) = queue.pop_front() {
            if !inspected.insert(path.clone()) {
                continue;
            }

            // Non-ELF files matching the naming convention (linker scripts,
            // zero-length placeholders) are silently uninteresting.
            if !elf::is_elf(&path) {
                continue;
            }

            let info = match elf::inspect(&path) {
                Ok(info) => info,
                Err(e) => {
                    resolution.skip(&path, e.to_string());
                    continue;
                }
            };

            self.collect_needed(&path, &info, &mut names_seen, &mut resolution, &mut queue);
        }

        self.append_loader(&mut resolution);

        Ok(resolution)
    }

    /// Resolve one object's declared dependencies into the running
    /// resolution, queueing newly discovered libraries for their own
    /// inspection.
    ///
    /// Only successfully resolved names are memoized in `names_seen`: a
    /// name one requester cannot resolve may still be resolvable through a
    /// later requester's own RUNPATH, so a failed lookup must stay
    /// retryable.
    fn collect_needed(
        &self,
        requester: &Path,
        info: &ElfInfo,
        names_seen: &mut HashSet<String>,
        resolution: &mut Resolution,
        queue: &mut VecDeque<PathBuf>,
    ) {
        let requester_dirs = self.requester_search_dirs(requester, &info.runpath, &info.rpath);

        for name in &info.needed {
            // The interpreter's own library ships inside the tree and is
            // relinked there, never bundled from the system.
            if name.starts_with(INTERPRETER_LIB_PREFIX) {
                continue;
            }
            if names_seen.contains(name) {
                continue;
            }

            let Some(found) = self.find_library(name, &requester_dirs) else {
                resolution.skip(
                    requester,
                    format!("could not locate needed library {}", name),
                );
                continue;
            };

            match LibraryDependency::resolve(name.clone(), &found) {
                Ok(dep) => {
                    names_seen.insert(name.clone());
                    let canonical = dep.canonical.clone();
                    if resolution.insert(dep) {
                        queue.push_back(canonical);
                    }
                }
                Err(e) => {
                    resolution.skip(&found, format!("could not canonicalize: {}", e));
                }
            }
        }
    }

    /// Enumerate `*.so*` files under the root, recording unreadable entries.
    fn shared_objects_under(&self, root: &Path, resolution: &mut Resolution) -> Vec<PathBuf> {
        let pattern = format!("{}/**/*.so*", root.display());
        let paths = match glob::glob(&pattern) {
            Ok(paths) => paths,
            // Only reachable with a malformed root path
            Err(e) => {
                resolution.skip(root, format!("bad scan pattern: {}", e));
                return Vec::new();
            }
        };

        let mut found = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => {
                    if path.is_file() && !path.is_symlink() {
                        found.push(path);
                    }
                }
                Err(e) => {
                    resolution.skip(e.path().to_path_buf(), e.error().to_string());
                }
            }
        }
        found
    }

    /// Directories the requesting object itself asks to be searched,
    /// RUNPATH taking precedence over the legacy RPATH.
    fn requester_search_dirs(
        &self,
        requester: &Path,
        runpath: &[String],
        rpath: &[String],
    ) -> Vec<PathBuf> {
        let origin = requester.parent().unwrap_or(Path::new("/"));
        let entries = if !runpath.is_empty() { runpath } else { rpath };
        entries
            .iter()
            .filter_map(|entry| substitute_origin(origin, entry))
            .collect()
    }

    fn find_library(&self, name: &str, requester_dirs: &[PathBuf]) -> Option<PathBuf> {
        // A DT_NEEDED entry containing a slash is used as a path directly.
        if name.contains('/') {
            let direct = PathBuf::from(name);
            return direct.is_file().then_some(direct);
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        for dir in requester_dirs {
            candidates.push(dir.join(name));
        }
        for dir in &self.extra_search_paths {
            candidates.push(dir.join(name));
        }
        for dir in self.default_search_dirs() {
            candidates.push(dir.join(name));
        }

        candidates
            .into_iter()
            .find(|p| p.exists() || p.is_symlink())
    }

    fn default_search_dirs(&self) -> Vec<PathBuf> {
        let triplet = self.layout.arch().multiarch_triplet();
        vec![
            PathBuf::from("/lib64"),
            PathBuf::from("/usr/lib64"),
            PathBuf::from("/lib").join(triplet),
            PathBuf::from("/usr/lib").join(triplet),
            PathBuf::from("/lib"),
            PathBuf::from("/usr/lib"),
        ]
    }

    /// The loader is always bundled, whether or not anything under the tree
    /// turned out to need it: the relinked executables will.
    fn append_loader(&self, resolution: &mut Resolution) {
        let source = self.layout.loader_source();
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dep = match LibraryDependency::resolve(&name, source) {
            Ok(dep) => dep,
            // Loader not present on the build host (e.g. sysroot builds):
            // keep the declared path so collection reports it properly.
            Err(_) => LibraryDependency {
                name,
                discovered: source.to_path_buf(),
                canonical: source.to_path_buf(),
            },
        };
        resolution.insert(dep);
    }
}

/// Substitute `$ORIGIN`/`${ORIGIN}` with the requesting object's directory.
///
/// Relative entries without `$ORIGIN` resolve against the linker's notion of
/// the current working directory, which is unknowable here, so they are
/// dropped.
fn substitute_origin(origin: &Path, entry: &str) -> Option<PathBuf> {
    let resolved = if entry.contains("${ORIGIN}") {
        entry.replace("${ORIGIN}", &origin.to_string_lossy())
    } else if entry.contains("$ORIGIN") {
        entry.replace("$ORIGIN", &origin.to_string_lossy())
    } else {
        entry.to_string()
    };

    resolved.starts_with('/').then(|| PathBuf::from(resolved))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use tempfile::TempDir;

    use crate::arch::Arch;

    use super::*;

    fn layout_in(temp: &TempDir) -> BundleLayout {
        BundleLayout::new(temp.path(), "3.11.4", "acme", Arch::X86_64)
    }

    fn touch(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_resolve_requires_directory() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp);
        let err = DependencyResolver::new(&layout).resolve().unwrap_err();
        assert!(matches!(err, BundleError::NotADirectory(_)));
    }

    #[test]
    fn test_resolve_appends_loader_unconditionally() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("3.11.4")).unwrap();
        let fake_loader = temp.path().join("ld-linux-x86-64.so.2");
        touch(&fake_loader, b"loader");
        let layout = layout_in(&temp).with_loader_source(&fake_loader);

        let resolution = DependencyResolver::new(&layout).resolve().unwrap();
        assert_eq!(resolution.dependencies.len(), 1);
        assert_eq!(resolution.dependencies[0].name, "ld-linux-x86-64.so.2");
        assert!(resolution.skipped.is_empty());
    }

    #[test]
    fn test_resolve_skips_unparseable_so_with_warning() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp).with_loader_source(temp.path().join("missing-loader"));
        // ELF magic followed by garbage: classified ELF, fails inspection.
        let mut junk = vec![0x7f, b'E', b'L', b'F'];
        junk.extend_from_slice(&[0u8; 8]);
        touch(&layout.env_root().join("lib/libjunk.so"), &junk);
        // Zero-length and text files are skipped without even a warning.
        touch(&layout.env_root().join("lib/empty.so"), b"");
        touch(&layout.env_root().join("lib/script.so"), b"#!/bin/sh\n");

        let resolution = DependencyResolver::new(&layout).resolve().unwrap();
        // Only the (unresolvable) loader entry remains.
        assert_eq!(resolution.dependencies.len(), 1);
        assert_eq!(resolution.skipped.len(), 1);
        assert!(resolution.skipped[0]
            .path
            .to_string_lossy()
            .ends_with("libjunk.so"));
    }

    #[test]
    fn test_dedup_by_canonical_path() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("libbar.so.1.2.3");
        touch(&real, b"library body");
        let link = temp.path().join("libbar.so.1");
        symlink(&real, &link).unwrap();

        let via_link = LibraryDependency::resolve("libbar.so.1", &link).unwrap();
        let via_real = LibraryDependency::resolve("libbar.so.1.2.3", &real).unwrap();
        assert_eq!(via_link.canonical, via_real.canonical);

        let mut resolution = Resolution::default();
        assert!(resolution.insert(via_link));
        assert!(!resolution.insert(via_real));
        assert_eq!(resolution.dependencies.len(), 1);
        // First declared name wins.
        assert_eq!(resolution.dependencies[0].name, "libbar.so.1");
    }

    #[test]
    fn test_failed_lookup_is_retried_for_later_requesters() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp);
        let resolver = DependencyResolver::new(&layout);

        // Only the second requester's private directory holds the library.
        touch(&temp.path().join("b/priv/libshared.so.1"), b"library body");

        let mut names_seen = HashSet::new();
        let mut resolution = Resolution::default();
        let mut queue = VecDeque::new();

        // First requester has no RUNPATH: the lookup fails and is reported.
        let bare = ElfInfo {
            needed: vec!["libshared.so.1".to_string()],
            rpath: Vec::new(),
            runpath: Vec::new(),
            interpreter: None,
        };
        resolver.collect_needed(
            &temp.path().join("a/liba.so"),
            &bare,
            &mut names_seen,
            &mut resolution,
            &mut queue,
        );
        assert!(resolution.dependencies.is_empty());
        assert_eq!(resolution.skipped.len(), 1);

        // Second requester resolves the same name through its own RUNPATH;
        // the earlier failure must not have poisoned the lookup.
        let with_runpath = ElfInfo {
            needed: vec!["libshared.so.1".to_string()],
            rpath: Vec::new(),
            runpath: vec!["$ORIGIN/priv".to_string()],
            interpreter: None,
        };
        resolver.collect_needed(
            &temp.path().join("b/libb.so"),
            &with_runpath,
            &mut names_seen,
            &mut resolution,
            &mut queue,
        );
        assert_eq!(resolution.dependencies.len(), 1);
        assert_eq!(resolution.dependencies[0].name, "libshared.so.1");
        // The newly resolved library is queued for its own inspection.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_substitute_origin() {
        let origin = Path::new("/opt/env/lib");
        assert_eq!(
            substitute_origin(origin, "$ORIGIN/../lib64"),
            Some(PathBuf::from("/opt/env/lib/../lib64"))
        );
        assert_eq!(
            substitute_origin(origin, "${ORIGIN}"),
            Some(PathBuf::from("/opt/env/lib"))
        );
        assert_eq!(
            substitute_origin(origin, "/usr/lib"),
            Some(PathBuf::from("/usr/lib"))
        );
        // Relative without $ORIGIN is dropped.
        assert_eq!(substitute_origin(origin, "../lib"), None);
    }
}
