//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmError};
use crate::resource::Resource;

/// Configuration of a RingVM instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Devices available per machine.
    #[serde(default)]
    pub resource: Resource,
    /// Id of this machine within the cluster.
    #[serde(default)]
    pub machine_id: i64,
    /// Completion polling behavior.
    #[serde(default)]
    pub poll: PollConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            resource: Resource::default(),
            machine_id: 0,
            poll: PollConfig::default(),
        }
    }
}

impl VmConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> VmConfigBuilder {
        VmConfigBuilder::new()
    }

    /// Single CPU device, aggressive polling.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            resource: Resource {
                machine_num: 1,
                cpu_device_num: 1,
                gpu_device_num: 0,
            },
            machine_id: 0,
            poll: PollConfig {
                spin_iterations: 16,
                ..PollConfig::default()
            },
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.resource.machine_num == 0 {
            return Err(VmError::InvalidConfig(
                "machine_num must be at least 1".to_string(),
            ));
        }
        if self.machine_id < 0 || self.machine_id as usize >= self.resource.machine_num {
            return Err(VmError::InvalidConfig(format!(
                "machine_id {} outside 0..{}",
                self.machine_id, self.resource.machine_num
            )));
        }
        if self.poll.timeout_ms == 0 {
            return Err(VmError::InvalidConfig(
                "poll timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How the scheduler waits for in-flight instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Polls to spin before yielding the thread.
    #[serde(default = "default_spin_iterations")]
    pub spin_iterations: u32,
    /// Give up draining after this many milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_spin_iterations() -> u32 {
    128
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            spin_iterations: default_spin_iterations(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollConfig {
    /// Drain timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Builder for [`VmConfig`].
#[derive(Debug, Default)]
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl VmConfigBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the minimal configuration.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            config: VmConfig::minimal(),
        }
    }

    /// Set the full resource description.
    #[must_use]
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.config.resource = resource;
        self
    }

    /// Set the number of CPU devices.
    #[must_use]
    pub fn with_cpu_devices(mut self, count: usize) -> Self {
        self.config.resource.cpu_device_num = count;
        self
    }

    /// Set the number of GPU devices.
    #[must_use]
    pub fn with_gpu_devices(mut self, count: usize) -> Self {
        self.config.resource.gpu_device_num = count;
        self
    }

    /// Set the number of machines.
    #[must_use]
    pub fn with_machines(mut self, count: usize) -> Self {
        self.config.resource.machine_num = count;
        self
    }

    /// Set this machine's id.
    #[must_use]
    pub fn with_machine_id(mut self, machine_id: i64) -> Self {
        self.config.machine_id = machine_id;
        self
    }

    /// Set the spin count.
    #[must_use]
    pub fn with_spin_iterations(mut self, spins: u32) -> Self {
        self.config.poll.spin_iterations = spins;
        self
    }

    /// Set the drain timeout. Durations past `u64::MAX` milliseconds saturate.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<VmConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
