//! ELF classification and inspection using goblin
//!
//! The read side never mutates anything: it classifies files by magic bytes
//! and extracts the dynamic-section fields the bundler needs (DT_NEEDED,
//! DT_RPATH, DT_RUNPATH, SONAME, program interpreter).

use std::fs;
use std::io::Read;
use std::path::Path;

use goblin::elf::dynamic::{DT_NEEDED, DT_RPATH, DT_RUNPATH};
use goblin::elf::Elf as GoblinElf;

use crate::error::ElfError;

use super::types::ElfInfo;

/// ELF magic bytes: 0x7f followed by ASCII "ELF" (e_ident[EI_MAG0..EI_MAG3])
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Classify a path as an ELF object.
///
/// Returns true only for a regular file (not a symlink, not a directory)
/// whose first four bytes are the ELF magic. Any read error classifies the
/// file as non-ELF rather than failing: a zero-length `.so` or an
/// unreadable file is simply not an ELF object for our purposes.
pub fn is_elf(path: &Path) -> bool {
    if path.is_symlink() || path.is_dir() {
        return false;
    }

    let mut file = match fs::File::open(path) {
        Ok(file) => file,
        Err(_) => return false,
    };

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() {
        return false;
    }

    magic == ELF_MAGIC
}

/// Read the dynamic-linking metadata of an ELF file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse as ELF.
/// Callers treat this as "skip with a warning": one unreadable file must not
/// abort a whole tree scan.
pub fn inspect(path: &Path) -> Result<ElfInfo, ElfError> {
    let bytes = fs::read(path).map_err(|e| ElfError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let elf = GoblinElf::parse(&bytes).map_err(|e| ElfError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut needed = Vec::new();
    let mut rpath = Vec::new();
    let mut runpath = Vec::new();

    if let Some(dynamic) = &elf.dynamic {
        for dyn_entry in &dynamic.dyns {
            match dyn_entry.d_tag {
                DT_NEEDED => {
                    if let Ok(idx) = usize::try_from(dyn_entry.d_val) {
                        if let Some(name) = elf.dynstrtab.get_at(idx) {
                            needed.push(name.to_string());
                        }
                    }
                }
                DT_RPATH => {
                    if let Ok(idx) = usize::try_from(dyn_entry.d_val) {
                        if let Some(list) = elf.dynstrtab.get_at(idx) {
                            rpath.extend(split_search_path(list));
                        }
                    }
                }
                DT_RUNPATH => {
                    if let Ok(idx) = usize::try_from(dyn_entry.d_val) {
                        if let Some(list) = elf.dynstrtab.get_at(idx) {
                            runpath.extend(split_search_path(list));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Ok(ElfInfo {
        needed,
        rpath,
        runpath,
        interpreter: elf.interpreter.map(str::to_string),
    })
}

fn split_search_path(list: &str) -> Vec<String> {
    list.split(':')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
