//! Host architecture detection and dynamic loader selection.

use std::path::Path;

use crate::error::BundleError;

/// Instruction-set architectures the bundler can target.
///
/// The bundle is built on the same architecture it will run on; the only
/// architecture-specific input is the path of the host dynamic loader that
/// gets copied into the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Aarch64,
    X86_64,
}

impl Arch {
    /// Detect the architecture of the machine running the build.
    pub fn host() -> Result<Self, BundleError> {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Map a machine identifier (as reported by `uname -m`) to an architecture.
    pub fn from_machine(machine: &str) -> Result<Self, BundleError> {
        match machine {
            "aarch64" | "arm64" => Ok(Arch::Aarch64),
            "x86_64" | "amd64" => Ok(Arch::X86_64),
            other => Err(BundleError::UnsupportedArchitecture(other.to_string())),
        }
    }

    /// Path of the host dynamic loader for this architecture.
    pub fn loader_path(self) -> &'static Path {
        match self {
            Arch::Aarch64 => Path::new("/lib64/ld-linux-aarch64.so.1"),
            Arch::X86_64 => Path::new("/lib64/ld-linux-x86-64.so.2"),
        }
    }

    /// Multiarch directory name used by Debian-style library layouts.
    pub fn multiarch_triplet(self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64-linux-gnu",
            Arch::X86_64 => "x86_64-linux-gnu",
        }
    }

    /// Tag used in bundle archive names.
    pub fn tag(self) -> &'static str {
        match self {
            Arch::Aarch64 => "aarch64",
            Arch::X86_64 => "x86_64",
        }
    }
}
