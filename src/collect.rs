//! Copying resolved libraries into the bundled system library directory

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BundleError;
use crate::layout::BundleLayout;
use crate::resolve::LibraryDependency;

/// Copies each resolved dependency into the bundle's system library
/// directory.
///
/// Destination files are named after the *declared* dependency name, not the
/// canonical file's basename: other binaries look libraries up by soname,
/// and the canonical target of a soname symlink usually carries a longer
/// versioned name.
pub struct LibraryCollector<'a> {
    layout: &'a BundleLayout,
}

impl<'a> LibraryCollector<'a> {
    pub fn new(layout: &'a BundleLayout) -> Self {
        Self { layout }
    }

    /// Copy every dependency (content and mode bits) into the system
    /// library directory, creating it if needed.
    ///
    /// Idempotent: re-running with the same inputs reproduces the same
    /// destination contents, and a half-written file from an interrupted
    /// earlier run is simply overwritten.
    ///
    /// # Errors
    ///
    /// A canonical source that no longer exists is fatal: a bundle with a
    /// missing library would fail to launch on the target host.
    pub fn collect(&self, deps: &[LibraryDependency]) -> Result<(), BundleError> {
        let dest_dir = self.layout.system_lib_dir();
        fs::create_dir_all(&dest_dir)?;

        for dep in deps {
            if !dep.canonical.is_file() {
                return Err(BundleError::MissingDependency {
                    name: dep.name.clone(),
                    path: dep.canonical.clone(),
                });
            }
            let dest = dest_dir.join(declared_basename(&dep.name));
            // fs::copy carries permission bits along with the contents.
            fs::copy(&dep.canonical, &dest)?;
        }

        Ok(())
    }
}

/// Final path component of the declared name. Declared names are sonames and
/// normally have no directory part; a slash-bearing DT_NEEDED entry is
/// reduced to its basename so the destination directory stays flat.
fn declared_basename(name: &str) -> PathBuf {
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;
    use std::os::unix::fs::PermissionsExt;

    use tempfile::TempDir;

    use crate::arch::Arch;

    use super::*;

    fn layout_in(temp: &TempDir) -> BundleLayout {
        BundleLayout::new(temp.path(), "3.11.4", "acme", Arch::X86_64)
    }

    fn make_dep(temp: &TempDir, name: &str, real_name: &str, contents: &[u8]) -> LibraryDependency {
        let real = temp.path().join(real_name);
        fs::write(&real, contents).unwrap();
        let mut perms = fs::metadata(&real).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&real, perms).unwrap();

        let link = temp.path().join(name);
        if name != real_name {
            symlink(&real, &link).unwrap();
        }
        LibraryDependency::resolve(name, if name == real_name { real } else { link }).unwrap()
    }

    #[test]
    fn test_collect_names_after_declared_basename() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp);
        let dep = make_dep(&temp, "libbar.so.1", "libbar.so.1.2.3", b"bar body");

        LibraryCollector::new(&layout).collect(&[dep]).unwrap();

        let copied = layout.system_lib_dir().join("libbar.so.1");
        assert_eq!(fs::read(&copied).unwrap(), b"bar body");
        // Canonical basename must not appear in the bundle.
        assert!(!layout.system_lib_dir().join("libbar.so.1.2.3").exists());
    }

    #[test]
    fn test_collect_preserves_mode_bits() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp);
        let dep = make_dep(&temp, "libexec.so", "libexec.so", b"x");

        LibraryCollector::new(&layout).collect(&[dep]).unwrap();

        let mode = fs::metadata(layout.system_lib_dir().join("libexec.so"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_collect_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp);
        let dep = make_dep(&temp, "libbaz.so.2", "libbaz.so.2.0.0", b"baz body");
        let collector = LibraryCollector::new(&layout);

        collector.collect(std::slice::from_ref(&dep)).unwrap();
        let first = fs::read(layout.system_lib_dir().join("libbaz.so.2")).unwrap();
        collector.collect(std::slice::from_ref(&dep)).unwrap();
        let second = fs::read(layout.system_lib_dir().join("libbaz.so.2")).unwrap();
        assert_eq!(first, second);

        let entries: Vec<_> = fs::read_dir(layout.system_lib_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_collect_missing_source_is_fatal() {
        let temp = TempDir::new().unwrap();
        let layout = layout_in(&temp);
        let dep = LibraryDependency {
            name: "libgone.so.1".to_string(),
            discovered: temp.path().join("libgone.so.1"),
            canonical: temp.path().join("libgone.so.1.0"),
        };

        let err = LibraryCollector::new(&layout).collect(&[dep]).unwrap_err();
        assert!(matches!(err, BundleError::MissingDependency { name, .. } if name == "libgone.so.1"));
    }

    #[test]
    fn test_declared_basename_flattens_paths() {
        assert_eq!(declared_basename("libfoo.so.1"), PathBuf::from("libfoo.so.1"));
        assert_eq!(
            declared_basename("/lib64/ld-linux-x86-64.so.2"),
            PathBuf::from("ld-linux-x86-64.so.2")
        );
    }
}
