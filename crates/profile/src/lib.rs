//! Host system profiler.
//!
//! Detects the operating system, distro family, package managers,
//! privilege capabilities and core library versions of the machine
//! Opsdeck runs on, and normalizes them into one immutable
//! [`SystemProfile`]. Detection is best-effort: probes are bounded at one
//! second each and degrade to `unknown` rather than failing.

pub mod detect;
pub mod distro;
pub mod probe;
pub mod service;
pub mod types;

pub use detect::detect;
pub use service::{ProfileService, PROFILE_TTL};
pub use types::{
    Capabilities, ContainerInfo, DistroFamily, DistroInfo, LibcType, LibraryInfo, OsKind,
    PackageManager, PackageManagerInfo, SystemProfile,
};
