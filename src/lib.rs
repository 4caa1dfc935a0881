pub mod cloudformation;
pub mod config;
pub mod dependent;
pub mod identity;
pub mod orchestrator;
pub mod outputs;
pub mod package;
pub mod parameters;
pub mod pipeline;
pub mod preconditions;
pub mod process;
pub mod reconcile;
pub mod s3;
pub mod stack;
pub mod store;
pub mod summary;
pub mod validate;

#[cfg(test)]
mod testing;
