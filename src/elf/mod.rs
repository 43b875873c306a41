//! ELF classification, inspection, and in-place patching

mod types;
mod reader;
mod editor;

pub use editor::patch_elf;
pub use reader::inspect;
pub use reader::is_elf;
pub use types::ElfInfo;
