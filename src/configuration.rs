use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    services::{RetryConfig, DEFAULT_QUEUE_CAPACITY},
    Result,
};

const DEFAULT_READINESS_TIMEOUT_SECS: u64 = 60;

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_readiness_timeout_secs() -> u64 {
    DEFAULT_READINESS_TIMEOUT_SECS
}

#[derive(Clone, Debug, TypedBuilder, Deserialize, PartialEq, Eq)]
pub struct StatusUpdaterConfiguration {
    #[builder(default = DEFAULT_QUEUE_CAPACITY)]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[builder(default)]
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for StatusUpdaterConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Debug, TypedBuilder, Deserialize, PartialEq, Eq)]
pub struct ReadinessConfiguration {
    #[builder(default = DEFAULT_READINESS_TIMEOUT_SECS)]
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReadinessConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReadinessConfiguration {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Debug, TypedBuilder, Deserialize)]
pub struct Configuration {
    pub controller_name: String,
    #[builder(default)]
    #[serde(default)]
    pub enable_open_telemetry: Option<bool>,
    #[builder(default)]
    #[serde(default)]
    pub status_updater: StatusUpdaterConfiguration,
    #[builder(default)]
    #[serde(default)]
    pub readiness: ReadinessConfiguration,
}

#[derive(Error, Debug)]
enum ConfigurationError {
    #[error("controller name must be not empty")]
    ControllerName,
    #[error("status queue capacity must be positive")]
    QueueCapacity,
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(ConfigurationError::ControllerName.into());
        }
        if self.status_updater.queue_capacity == 0 {
            return Err(ConfigurationError::QueueCapacity.into());
        }
        Ok(())
    }
}
