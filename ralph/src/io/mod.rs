//! Side effects of the build loop: files, processes, and git.

pub mod agent;
pub mod backlog_store;
pub mod bin_detect;
pub mod commit;
pub mod config;
pub mod gates;
pub mod git;
pub mod init;
pub mod iteration_log;
pub mod process;
pub mod progress_log;
pub mod prompt;
pub mod verify;
