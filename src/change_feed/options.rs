use crate::core::{DocError, Result};
use std::time::Duration;

pub const DEFAULT_FEED_POLL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_ITEMS_PER_POLL: usize = 100;
pub const DEFAULT_LEASE_CONTAINER: &str = "leases";

/// Change feed listener configuration
#[derive(Debug, Clone)]
pub struct ChangeFeedOptions {
    /// Logical processor name, shared by every instance of one listener
    pub processor_name: String,

    /// Distinguishes instances; part of the lease token
    pub instance_name: String,

    /// Container holding checkpoints
    pub lease_container: String,

    /// Database of the lease container; default database when `None`
    pub lease_database: Option<String>,

    /// Wait after a poll that returned no changes
    pub feed_poll_delay: Duration,

    /// Upper bound on changes fetched per poll
    pub max_items_per_poll: usize,

    /// Upper bound on concurrently running handler invocations
    pub max_degree_of_parallelism: usize,
}

impl ChangeFeedOptions {
    /// Options with a fresh random instance name.
    pub fn new(processor_name: &str) -> Self {
        Self {
            processor_name: processor_name.to_string(),
            instance_name: uuid::Uuid::new_v4().to_string(),
            lease_container: DEFAULT_LEASE_CONTAINER.to_string(),
            lease_database: None,
            feed_poll_delay: DEFAULT_FEED_POLL_DELAY,
            max_items_per_poll: DEFAULT_MAX_ITEMS_PER_POLL,
            max_degree_of_parallelism: 1,
        }
    }

    /// Fixed instance name, so a restarted listener resumes its checkpoint.
    pub fn instance_name(mut self, name: &str) -> Self {
        self.instance_name = name.to_string();
        self
    }

    pub fn lease_container(mut self, container: &str, database: Option<&str>) -> Self {
        self.lease_container = container.to_string();
        self.lease_database = database.map(str::to_string);
        self
    }

    pub fn feed_poll_delay(mut self, delay: Duration) -> Self {
        self.feed_poll_delay = delay;
        self
    }

    pub fn max_items_per_poll(mut self, max: usize) -> Self {
        self.max_items_per_poll = max;
        self
    }

    pub fn max_degree_of_parallelism(mut self, max: usize) -> Self {
        self.max_degree_of_parallelism = max;
        self
    }

    /// Identifies this listener's checkpoint.
    pub fn lease_token(&self) -> String {
        format!("{}.{}", self.processor_name, self.instance_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.processor_name.is_empty() {
            return Err(DocError::InvalidConfig("processor_name cannot be empty".into()));
        }
        if self.instance_name.is_empty() {
            return Err(DocError::InvalidConfig("instance_name cannot be empty".into()));
        }
        if self.lease_container.is_empty() {
            return Err(DocError::InvalidConfig("lease_container cannot be empty".into()));
        }
        if self.max_items_per_poll == 0 {
            return Err(DocError::InvalidConfig("max_items_per_poll must be > 0".into()));
        }
        if self.max_degree_of_parallelism == 0 {
            return Err(DocError::InvalidConfig(
                "max_degree_of_parallelism must be > 0".into(),
            ));
        }
        Ok(())
    }
}
