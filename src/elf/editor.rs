//! In-place ELF patching using elb
//!
//! The `elb` crate is a pure Rust library for rewriting RPATH, RUNPATH, and
//! the program interpreter of ELF files, so no external patching tool is
//! involved and string-capacity checks happen in-process.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::path::Path;

use elb::DynamicTag;
use elb::Elf;
use elb::ElfPatcher;

use crate::error::ElfError;

/// Fallback page size when the host refuses to report one
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// System page size (elb needs it to lay out moved segments; 16K on some
/// arm64 hosts, so this cannot be a constant).
fn host_page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        DEFAULT_PAGE_SIZE
    }
}

fn path_cstring(path: &Path) -> Result<CString, ElfError> {
    let display = path.display().to_string();
    CString::new(display.clone()).map_err(|_| ElfError::InvalidPathString(display))
}

/// Rewrite the runtime search path and/or program interpreter of an ELF
/// file, in place.
///
/// `runpath` is the already colon-joined directory list. Passing `None` for
/// either field leaves that field untouched. File contents outside the
/// dynamic-linking metadata and the file's permissions are unchanged.
///
/// # Errors
///
/// Returns an error if the file does not parse as ELF or the patch cannot
/// be applied (e.g. no dynamic section). Callers batch-processing a tree
/// record the failure and move on.
pub fn patch_elf(
    path: &Path,
    runpath: Option<&str>,
    interpreter: Option<&Path>,
) -> Result<(), ElfError> {
    if runpath.is_none() && interpreter.is_none() {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| ElfError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

    let elf = Elf::read(&mut file, host_page_size()).map_err(|e| ElfError::Patch {
        path: path.to_path_buf(),
        message: format!("failed to parse ELF: {}", e),
    })?;

    let mut patcher = ElfPatcher::new(elf, file);

    if let Some(runpath) = runpath {
        let cstring = CString::new(runpath).map_err(|_| ElfError::InvalidPathString(runpath.to_string()))?;
        patcher
            .set_dynamic_tag(DynamicTag::Runpath, cstring.as_c_str())
            .map_err(|e| ElfError::Patch {
                path: path.to_path_buf(),
                message: format!("failed to set RUNPATH: {}", e),
            })?;
    }

    if let Some(interpreter) = interpreter {
        let cstring = path_cstring(interpreter)?;
        patcher
            .set_interpreter(cstring.as_c_str())
            .map_err(|e| ElfError::Patch {
                path: path.to_path_buf(),
                message: format!("failed to set interpreter: {}", e),
            })?;
    }

    patcher.finish().map_err(|e| ElfError::Patch {
        path: path.to_path_buf(),
        message: format!("failed to finish patching: {}", e),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::elf::reader;

    #[test]
    fn test_patch_nothing_is_a_noop() {
        // No fields requested: the file is not even opened.
        patch_elf(Path::new("/nonexistent"), None, None).unwrap();
    }

    #[test]
    fn test_patch_non_elf_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("not_elf.so");
        std::fs::write(&path, "plain text").unwrap();
        let err = patch_elf(&path, Some("/opt/lib"), None).unwrap_err();
        assert!(matches!(err, ElfError::Patch { .. }));
    }

    #[test]
    #[ignore] // Requires a dynamically linked glibc test binary
    fn test_patch_runpath_roundtrip() {
        let temp = TempDir::new().unwrap();
        let exe = std::env::current_exe().unwrap();
        let copy = temp.path().join("patched");
        std::fs::copy(&exe, &copy).unwrap();

        patch_elf(&copy, Some("/opt/private:/opt/system"), None).unwrap();

        let info = reader::inspect(&copy).unwrap();
        assert_eq!(
            info.runpath,
            vec!["/opt/private".to_string(), "/opt/system".to_string()]
        );
    }

    #[test]
    #[ignore] // Requires a dynamically linked glibc test binary
    fn test_patch_interpreter_roundtrip() {
        let temp = TempDir::new().unwrap();
        let exe = std::env::current_exe().unwrap();
        let copy = temp.path().join("patched");
        std::fs::copy(&exe, &copy).unwrap();

        let loader = Path::new("/opt/system_lib/ld-linux-x86-64.so.2");
        patch_elf(&copy, None, Some(loader)).unwrap();

        let info = reader::inspect(&copy).unwrap();
        assert_eq!(info.interpreter.as_deref(), loader.to_str());
    }
}
