//! relopack: relocatable Python runtime bundler
//!
//! Takes a freshly installed interpreter tree with a virtual environment
//! layered on top and makes it runnable on a different host without that
//! host's system shared libraries or dynamic linker. Three phases, each a
//! full barrier before the next:
//!
//! 1. **Resolve** the transitive closure of native shared libraries the
//!    tree's ELF objects need, deduplicated by canonical path.
//! 2. **Collect** the closure (plus the dynamic loader) into an isolated
//!    system library directory, naming each copy after its declared soname.
//! 3. **Relink** every ELF object in place: shared objects search only the
//!    bundled directory; executables search the private interpreter library
//!    directory first and have their program interpreter redirected to the
//!    bundled loader.
//!
//! # Example
//!
//! ```no_run
//! use relopack::{Arch, BundleLayout, Bundler};
//!
//! let layout = BundleLayout::new("/root/.python_env", "3.11.4", "acme", Arch::host().unwrap());
//! let outcome = Bundler::new(layout).bundle_libraries().unwrap();
//! for failure in &outcome.relink.failed {
//!     eprintln!("not relinked: {}", failure.path.display());
//! }
//! ```

pub mod arch;
pub mod collect;
pub mod elf;
pub mod error;
pub mod layout;
pub mod pipeline;
pub mod relink;
pub mod resolve;

pub use arch::Arch;
pub use collect::LibraryCollector;
pub use elf::is_elf;
pub use elf::ElfInfo;
pub use error::BundleError;
pub use error::ElfError;
pub use layout::BundleLayout;
pub use pipeline::BundleBuilder;
pub use pipeline::VenvStrategy;
pub use relink::ElfRelinker;
pub use relink::RelinkReport;
pub use resolve::DependencyResolver;
pub use resolve::LibraryDependency;
pub use resolve::Resolution;

/// Combined result of the three bundling phases
#[derive(Debug)]
pub struct BundleOutcome {
    pub resolution: Resolution,
    pub relink: RelinkReport,
}

/// High-level API for the core bundling phases
///
/// Runs resolve, collect, and relink in order against one
/// [`BundleLayout`]. Re-running against a previously (even partially)
/// populated bundle directory is safe: every phase is idempotent per file.
pub struct Bundler {
    layout: BundleLayout,
}

impl Bundler {
    pub fn new(layout: BundleLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &BundleLayout {
        &self.layout
    }

    /// Resolve the dependency closure, copy it into the bundle, and relink
    /// the install tree against it.
    ///
    /// # Errors
    ///
    /// Fails on phase-level preconditions (unreadable tree root, a resolved
    /// dependency vanishing before collection). Per-file problems are
    /// reported in the returned [`BundleOutcome`] instead.
    pub fn bundle_libraries(&self) -> Result<BundleOutcome, BundleError> {
        let resolution = DependencyResolver::new(&self.layout).resolve()?;
        LibraryCollector::new(&self.layout).collect(&resolution.dependencies)?;
        let relink = ElfRelinker::new(&self.layout).relink_tree()?;
        Ok(BundleOutcome { resolution, relink })
    }
}
