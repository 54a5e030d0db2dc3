//! caskfs daemon: a filesystem view over an object-store container.
//!
//! The [`fs`] module is the dispatcher core; [`fuse`] adapts it to the
//! kernel transport and [`mount`] runs the mount loop. Backing stores
//! come from the `caskfs-store` crate.

pub mod cli;
pub mod fs;
pub mod fuse;
pub mod mount;

pub use fs::CaskFs;
