//! Host platform queries: process architecture, manifest search directories
//! and the running executable.

pub mod arch;
pub mod paths;
