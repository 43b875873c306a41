//! Types for ELF file information

/// Dynamic-linking metadata read from an ELF object
#[derive(Debug, Clone)]
pub struct ElfInfo {
    /// Declared library dependencies (DT_NEEDED)
    pub needed: Vec<String>,
    /// RPATH entries (legacy, DT_RPATH), colon-split
    pub rpath: Vec<String>,
    /// RUNPATH entries (preferred, DT_RUNPATH), colon-split
    pub runpath: Vec<String>,
    /// Program interpreter path (PT_INTERP), if present
    pub interpreter: Option<String>,
}
