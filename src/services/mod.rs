mod status_updater;

pub use status_updater::{status_updater, Mutation, Mutator, MutatorError, RetryConfig, StatusError, StatusUpdate, StatusUpdater, StatusUpdaterService, DEFAULT_QUEUE_CAPACITY};
#[cfg(test)]
pub(crate) use status_updater::tests;
