//! # RingVM
//!
//! Stream-based instruction execution engine with pluggable device backends.
//!
//! A RingVM instance owns a pool of [`Stream`]s, one per `(role, device)`
//! as sized by each backend's [`StreamDescriptor`]. Instructions are
//! submitted to a stream, executed by the stream's backend and reaped by
//! polling their status buffers without blocking.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ringvm::prelude::*;
//!
//! fn main() -> Result<()> {
//!     let vm = RingVm::builder()
//!         .config(VmConfig::builder().with_cpu_devices(2).build()?)
//!         .build()?;
//!
//!     let stream = vm.stream(StreamRole::Compute, DeviceKind::Cpu, 0).unwrap();
//!     vm.submit(&stream, InstructionPayload::launch(|| {
//!         println!("running on the CPU worker");
//!         Ok(())
//!     }))?;
//!
//!     vm.run_until_idle()?;
//!     vm.shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       RingVm                             │
//! │  ┌────────────┐   ┌──────────────────────────────────┐   │
//! │  │ Scheduler  │──►│ ThreadCtx 0: [Stream] [Stream] …  │   │
//! │  │ (poller)   │   │ ThreadCtx 1: [Stream] …           │   │
//! │  └────────────┘   └──────────────┬───────────────────┘   │
//! └──────────────────────────────────┼───────────────────────┘
//!                                    │ Box<dyn StreamType>
//!        ┌───────────────────────────┼─────────────────────┐
//!        ▼                           ▼                     ▼
//!  CpuStreamType              HostStreamType      DeviceHelperStreamType
//!  (worker thread)            (inline)            (pinned host memory)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

pub use ringvm_core::*;
pub use ringvm_cpu as cpu;

use ringvm_core::config::VmConfig;
use ringvm_core::metrics::SchedulerStats;
use ringvm_core::resource::StreamDescriptor;
use ringvm_core::scheduler::{Drain, PollOutcome};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{RingVm, RingVmBuilder};
    pub use ringvm_core::prelude::*;
    pub use ringvm_cpu::{default_registry, StreamTypeKind};
}

/// A running VM: a sized stream pool plus the scheduler driving it.
pub struct RingVm {
    config: VmConfig,
    registry: Arc<StreamTypeRegistry>,
    thread_ctxs: Vec<Arc<ThreadCtx>>,
    streams: BTreeMap<(StreamRole, DeviceKind), Vec<Arc<Stream>>>,
    scheduler: Mutex<Scheduler>,
}

impl RingVm {
    /// Create a new builder.
    pub fn builder() -> RingVmBuilder {
        RingVmBuilder::new()
    }

    /// Create a VM with the default configuration and the CPU backends.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Active configuration.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Registry the streams were resolved from.
    pub fn registry(&self) -> &Arc<StreamTypeRegistry> {
        &self.registry
    }

    /// Thread contexts, in creation order.
    pub fn thread_ctxs(&self) -> &[Arc<ThreadCtx>] {
        &self.thread_ctxs
    }

    /// All streams serving `role` on `kind`, ordered by device id.
    pub fn streams(&self, role: StreamRole, kind: DeviceKind) -> &[Arc<Stream>] {
        self.streams
            .get(&(role, kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The stream serving `role` on device `device_id` of `kind`.
    pub fn stream(&self, role: StreamRole, kind: DeviceKind, device_id: i64) -> Option<Arc<Stream>> {
        self.streams(role, kind)
            .iter()
            .find(|s| s.device_id() == device_id)
            .cloned()
    }

    /// Total number of streams.
    pub fn stream_count(&self) -> usize {
        self.streams.values().map(Vec::len).sum()
    }

    /// Submit a payload to a stream.
    pub fn submit(&self, stream: &Arc<Stream>, payload: InstructionPayload) -> Result<InstructionId> {
        self.scheduler.lock().submit(stream, payload)
    }

    /// Reap every instruction that finished, without blocking.
    pub fn poll(&self) -> PollOutcome {
        self.scheduler.lock().poll()
    }

    /// Poll until nothing is in flight.
    ///
    /// The scheduler lock is taken once per polling pass and released in
    /// between, so a payload may submit follow-up work to this VM while the
    /// drain is running. That work is drained too.
    pub fn run_until_idle(&self) -> Result<Vec<InstructionId>> {
        let mut drain = Drain::new(&self.config.poll);
        loop {
            let (outcome, in_flight) = {
                let mut scheduler = self.scheduler.lock();
                let outcome = scheduler.poll();
                (outcome, scheduler.in_flight())
            };
            drain.record(outcome);
            if in_flight == 0 {
                break;
            }
            drain.check_timeout(in_flight)?;
        }
        drain.finish()
    }

    /// Instructions awaiting completion.
    pub fn in_flight(&self) -> usize {
        self.scheduler.lock().in_flight()
    }

    /// Scheduler counters.
    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.lock().stats()
    }

    /// Drain in-flight work and tear down every stream.
    ///
    /// Streams are dropped even if draining fails; the drain error is
    /// returned afterwards.
    pub fn shutdown(self) -> Result<()> {
        let drained = self.run_until_idle();
        let stats = self.stats();

        for thread_ctx in &self.thread_ctxs {
            thread_ctx.clear();
        }
        drop(self.scheduler);
        drop(self.streams);

        info!(
            submitted = stats.submitted,
            completed = stats.completed,
            failed = stats.failed,
            "RingVM shut down"
        );
        drained.map(|_| ())
    }
}

impl std::fmt::Debug for RingVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingVm")
            .field("config", &self.config)
            .field("thread_ctxs", &self.thread_ctxs.len())
            .field("streams", &self.stream_count())
            .finish()
    }
}

/// Builder for [`RingVm`].
pub struct RingVmBuilder {
    config: VmConfig,
    registry: Option<StreamTypeRegistry>,
}

impl RingVmBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: VmConfig::default(),
            registry: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: VmConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom registry instead of the CPU defaults.
    pub fn registry(mut self, registry: StreamTypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the VM.
    ///
    /// Fails if the configuration is invalid, or if the resource declares
    /// devices of a kind that no registered stream type serves.
    pub fn build(self) -> Result<RingVm> {
        self.config.validate()?;
        let registry = Arc::new(self.registry.unwrap_or_else(ringvm_cpu::default_registry));
        let resource = &self.config.resource;

        for kind in DeviceKind::ALL {
            let served = registry.entries().any(|(_, k)| k == kind);
            if resource.device_num(kind) > 0 && !served {
                return Err(VmError::InvalidConfig(format!(
                    "{} {kind} devices declared but no stream type serves {kind}",
                    resource.device_num(kind)
                )));
            }
        }

        let mut devices: HashMap<(DeviceKind, i64), Arc<Device>> = HashMap::new();
        let mut thread_ctxs = Vec::new();
        let mut streams = BTreeMap::new();

        for (role, kind) in registry.entries() {
            if resource.device_num(kind) == 0 {
                debug!(%role, %kind, "No devices for stream type, skipping");
                continue;
            }
            let descriptor = registry
                .resolve(role, kind)?
                .make_stream_descriptor(resource, self.config.machine_id);
            debug!(%descriptor, "Sizing streams");

            let created = build_streams(&registry, &descriptor, &mut devices, &mut thread_ctxs)?;
            streams.insert((role, kind), created);
        }

        info!(
            machine_id = self.config.machine_id,
            threads = thread_ctxs.len(),
            streams = streams.values().map(Vec::len).sum::<usize>(),
            "RingVM started"
        );

        Ok(RingVm {
            scheduler: Mutex::new(Scheduler::new(self.config.poll.clone())),
            config: self.config,
            registry,
            thread_ctxs,
            streams,
        })
    }
}

impl Default for RingVmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_streams(
    registry: &Arc<StreamTypeRegistry>,
    descriptor: &StreamDescriptor,
    devices: &mut HashMap<(DeviceKind, i64), Arc<Device>>,
    thread_ctxs: &mut Vec<Arc<ThreadCtx>>,
) -> Result<Vec<Arc<Stream>>> {
    let device_ids: Vec<i64> = descriptor.device_ids().collect();
    let per_thread = descriptor.num_streams_per_thread.max(1);
    let mut streams = Vec::with_capacity(device_ids.len());

    for chunk in device_ids.chunks(per_thread) {
        let thread_ctx = ThreadCtx::new(thread_ctxs.len(), Arc::clone(registry));
        for &device_id in chunk {
            let device = devices
                .entry((descriptor.device_kind, device_id))
                .or_insert_with(|| Device::new(descriptor.device_kind, device_id));
            streams.push(thread_ctx.add_stream(Arc::clone(device), descriptor.role)?);
        }
        thread_ctxs.push(thread_ctx);
    }

    Ok(streams)
}
