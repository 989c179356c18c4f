//! Cluster resources and stream descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;
use crate::role::StreamRole;

/// Devices available to each machine of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Number of machines.
    #[serde(default = "default_machine_num")]
    pub machine_num: usize,
    /// CPU devices per machine.
    #[serde(default = "default_cpu_device_num")]
    pub cpu_device_num: usize,
    /// GPU devices per machine.
    #[serde(default)]
    pub gpu_device_num: usize,
}

fn default_machine_num() -> usize {
    1
}

fn default_cpu_device_num() -> usize {
    1
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            machine_num: default_machine_num(),
            cpu_device_num: default_cpu_device_num(),
            gpu_device_num: 0,
        }
    }
}

impl Resource {
    /// Number of devices of `kind` on one machine.
    pub fn device_num(&self, kind: DeviceKind) -> usize {
        match kind {
            DeviceKind::Cpu => self.cpu_device_num,
            DeviceKind::Cuda => self.gpu_device_num,
        }
    }

    /// Largest device count over all kinds.
    pub fn max_device_num(&self) -> usize {
        self.cpu_device_num.max(self.gpu_device_num)
    }
}

/// How many streams of one stream type to create and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Device tag of the stream type.
    pub device_tag: &'static str,
    /// Role the streams serve.
    pub role: StreamRole,
    /// Device kind the streams bind to.
    pub device_kind: DeviceKind,
    /// Machines the descriptor spans.
    pub num_machines: usize,
    /// Streams created on each machine.
    pub num_streams_per_machine: usize,
    /// Streams grouped under one thread context.
    pub num_streams_per_thread: usize,
    /// Global id of the first device on this machine.
    pub start_global_device_id: i64,
}

impl StreamDescriptor {
    /// Number of thread contexts needed on one machine.
    pub fn num_threads(&self) -> usize {
        if self.num_streams_per_thread == 0 {
            return 0;
        }
        self.num_streams_per_machine.div_ceil(self.num_streams_per_thread)
    }

    /// Device ids used on this machine, in order.
    pub fn device_ids(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.num_streams_per_machine as i64).map(move |i| self.start_global_device_id + i)
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} on {}: {} streams/machine, {} streams/thread, first device {}",
            self.device_tag,
            self.role,
            self.device_kind,
            self.num_streams_per_machine,
            self.num_streams_per_thread,
            self.start_global_device_id
        )
    }
}
