//! I/O helpers: config, processes, run artifacts and the working tree.

pub mod config;
pub mod executor;
pub mod fs_atomic;
pub mod init;
pub mod modes;
pub mod patch_apply;
pub mod pool;
pub mod process;
pub mod prompt;
pub mod repo_scan;
pub mod rpc;
pub mod run_store;
