//! Coordinating poller for in-flight instructions.
//!
//! The scheduler owns the instruction lifecycle: it initializes a status
//! buffer, hands the instruction to the stream, polls the status without
//! blocking and deletes it once done. One coordinating thread can cycle
//! through any number of streams this way.
//!
//! ```text
//! submit ──► init status ──► compute ──► [in-flight FIFO per stream]
//!                                              │ poll (non-blocking)
//!                                              ▼
//!                                        done? ──► delete status ──► reaped
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::config::PollConfig;
use crate::error::{Result, VmError};
use crate::instruction::{Instruction, InstructionId, InstructionPayload};
use crate::metrics::SchedulerStats;
use crate::stream::{Stream, StreamId};

/// Result of one polling pass.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Instructions reaped successfully, in per-stream submission order.
    pub completed: Vec<InstructionId>,
    /// Instructions whose backend reported a failure.
    pub failed: Vec<(InstructionId, VmError)>,
}

impl PollOutcome {
    /// Check if nothing was reaped.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }

    /// Completed ids, or the first failure.
    pub fn into_result(self) -> Result<Vec<InstructionId>> {
        match self.failed.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(self.completed),
        }
    }
}

/// Bookkeeping for polling until idle.
///
/// Separates the wait policy from the scheduler so a caller that shares the
/// scheduler behind a lock can release it between polls:
///
/// ```ignore
/// let mut drain = Drain::new(&poll_config);
/// loop {
///     let (outcome, in_flight) = {
///         let mut scheduler = shared.lock();
///         let outcome = scheduler.poll();
///         (outcome, scheduler.in_flight())
///     };
///     drain.record(outcome);
///     if in_flight == 0 {
///         break;
///     }
///     drain.check_timeout(in_flight)?;
/// }
/// drain.finish()
/// ```
#[derive(Debug)]
pub struct Drain {
    started: Instant,
    timeout: Duration,
    spin_iterations: u32,
    idle_polls: u32,
    completed: Vec<InstructionId>,
    first_failure: Option<VmError>,
}

impl Drain {
    /// Start draining now.
    pub fn new(poll_config: &PollConfig) -> Self {
        Self {
            started: Instant::now(),
            timeout: poll_config.timeout(),
            spin_iterations: poll_config.spin_iterations,
            idle_polls: 0,
            completed: Vec::new(),
            first_failure: None,
        }
    }

    /// Account for one polling pass, yielding the thread after
    /// `spin_iterations` empty passes in a row.
    pub fn record(&mut self, outcome: PollOutcome) {
        if outcome.is_empty() {
            self.idle_polls += 1;
            if self.idle_polls >= self.spin_iterations {
                std::thread::yield_now();
                self.idle_polls = 0;
            }
        } else {
            self.idle_polls = 0;
        }

        self.completed.extend(outcome.completed);
        if self.first_failure.is_none() {
            self.first_failure = outcome.failed.into_iter().next().map(|(_, e)| e);
        }
    }

    /// Fail if work is still in flight past the timeout.
    pub fn check_timeout(&self, in_flight: usize) -> Result<()> {
        if in_flight > 0 && self.started.elapsed() >= self.timeout {
            warn!(in_flight, timeout = ?self.timeout, "Timed out draining instructions");
            return Err(VmError::Timeout(self.timeout));
        }
        Ok(())
    }

    /// Every reaped id, or the first failure seen.
    pub fn finish(self) -> Result<Vec<InstructionId>> {
        match self.first_failure {
            Some(err) => Err(err),
            None => Ok(self.completed),
        }
    }
}

struct StreamQueue {
    stream: Arc<Stream>,
    in_flight: VecDeque<Instruction>,
}

/// Submits instructions to streams and reaps them once done.
pub struct Scheduler {
    poll_config: PollConfig,
    queues: Vec<StreamQueue>,
    queue_index: HashMap<StreamId, usize>,
    next_instruction: u64,
    submitted: u64,
    completed: u64,
    failed: u64,
}

impl Scheduler {
    /// Create a scheduler.
    pub fn new(poll_config: PollConfig) -> Self {
        Self {
            poll_config,
            queues: Vec::new(),
            queue_index: HashMap::new(),
            next_instruction: 1,
            submitted: 0,
            completed: 0,
            failed: 0,
        }
    }

    /// Start tracking a stream. Submitting to an untracked stream tracks it
    /// implicitly.
    pub fn track(&mut self, stream: &Arc<Stream>) {
        if self.queue_index.contains_key(&stream.id()) {
            return;
        }
        self.queue_index.insert(stream.id(), self.queues.len());
        self.queues.push(StreamQueue {
            stream: Arc::clone(stream),
            in_flight: VecDeque::new(),
        });
    }

    /// Submit a payload to a stream.
    ///
    /// The instruction is executed (or enqueued, for asynchronous backends)
    /// before this returns; its completion is observed by [`poll`](Self::poll).
    pub fn submit(&mut self, stream: &Arc<Stream>, payload: InstructionPayload) -> Result<InstructionId> {
        self.track(stream);

        let id = InstructionId::new(self.next_instruction);
        self.next_instruction += 1;
        self.submitted += 1;

        let mut instruction = Instruction::new(id, payload);
        if let Err(e) = stream.launch(&mut instruction) {
            self.failed += 1;
            error!(stream = %stream.id(), instruction = %id, error = %e, "Instruction launch failed");
            return Err(e);
        }

        let slot = self.queue_index[&stream.id()];
        self.queues[slot].in_flight.push_back(instruction);
        Ok(id)
    }

    /// Reap every instruction whose status reports done.
    ///
    /// Per stream, instructions are reaped strictly in submission order.
    pub fn poll(&mut self) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        for queue in &mut self.queues {
            while let Some(front) = queue.in_flight.front_mut() {
                match queue.stream.poll(front) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        // Lifecycle bug; drop the instruction rather than spin on it.
                        let id = front.id();
                        queue.in_flight.pop_front();
                        self.failed += 1;
                        outcome.failed.push((id, e));
                        continue;
                    }
                }

                let Some(mut instruction) = queue.in_flight.pop_front() else {
                    break;
                };
                let id = instruction.id();
                match queue.stream.release(&mut instruction) {
                    Ok(()) => {
                        self.completed += 1;
                        debug!(stream = %queue.stream.id(), instruction = %id, "Instruction done");
                        outcome.completed.push(id);
                    }
                    Err(e) => {
                        self.failed += 1;
                        error!(stream = %queue.stream.id(), instruction = %id, error = %e, "Instruction failed");
                        outcome.failed.push((id, e));
                    }
                }
            }
        }

        outcome
    }

    /// Poll until nothing is in flight.
    ///
    /// Returns every reaped id, or the first failure once all in-flight work
    /// has drained. Fails with [`VmError::Timeout`] if the configured timeout
    /// elapses first.
    pub fn run_until_idle(&mut self) -> Result<Vec<InstructionId>> {
        let mut drain = Drain::new(&self.poll_config);
        while self.in_flight() > 0 {
            let outcome = self.poll();
            drain.record(outcome);
            drain.check_timeout(self.in_flight())?;
        }
        drain.finish()
    }

    /// Instructions awaiting completion across all streams.
    pub fn in_flight(&self) -> usize {
        self.queues.iter().map(|q| q.in_flight.len()).sum()
    }

    /// Instructions awaiting completion on one stream.
    pub fn in_flight_on(&self, stream: StreamId) -> usize {
        self.queue_index
            .get(&stream)
            .map(|&slot| self.queues[slot].in_flight.len())
            .unwrap_or(0)
    }

    /// Polling configuration.
    pub fn poll_config(&self) -> &PollConfig {
        &self.poll_config
    }

    /// Counters snapshot.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.submitted,
            completed: self.completed,
            failed: self.failed,
            in_flight: self.in_flight(),
            streams: self.queues.iter().map(|q| q.stream.metrics()).collect(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(PollConfig::default())
    }
}
