pub mod analyzer;
pub mod classifier;
pub mod config;
pub mod git;
pub mod output;
mod process;
pub mod proposal;
pub mod report;
pub mod snapshot;
pub mod tracking;
