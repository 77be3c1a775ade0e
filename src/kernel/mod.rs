//! Kernel-facing helpers
//!
//! - `kconfig`: required `.config` options and config parsing
//! - `cmdline`: GRUB command line merge and CPU list handling

pub mod cmdline;
pub mod kconfig;
