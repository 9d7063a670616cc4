// Frame synchronization - the CPU/GPU fence handshake
//
// One fence, one always-advancing counter. After every submission the queue
// signals the next value and the recording thread blocks until the GPU has
// written it back. Only then may the command allocator and list be reset.
//
// Frame states:
//   Recording -> Closed -> Submitted -> Signaled -> Waited -> ReadyForReuse
//
// A per-slot fence value array would let the CPU record one frame ahead;
// this handshake keeps the CPU one frame behind the GPU instead.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use crate::backend::{Backend, BackendError, CommandQueue, Device, Fence, WaitStatus};
use crate::error::{RenderError, RenderResult};

/// Where the command allocator/list pair is in its per-frame cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// List open, commands may be appended
    Recording,
    /// List closed, not yet handed to the queue
    Closed,
    /// Handed to the queue, no fence value yet
    Submitted,
    /// Queue will write `target` once the work completes
    Signaled { target: u64 },
    /// The GPU reached `target`
    Waited { target: u64 },
    /// Allocator and list were reset after `target` completed
    ReadyForReuse { target: u64 },
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recording => f.write_str("recording"),
            Self::Closed => f.write_str("closed"),
            Self::Submitted => f.write_str("submitted"),
            Self::Signaled { target } => write!(f, "signaled ({})", target),
            Self::Waited { target } => write!(f, "waited ({})", target),
            Self::ReadyForReuse { target } => write!(f, "ready for reuse ({})", target),
        }
    }
}

/// How long the recording thread may block on the fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    Unbounded,
    Bounded(Duration),
}

impl WaitPolicy {
    /// 0 means unbounded
    pub fn from_millis(millis: u64) -> Self {
        if millis == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(Duration::from_millis(millis))
        }
    }

    fn timeout(self) -> Option<Duration> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(timeout) => Some(timeout),
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::Bounded(Duration::from_secs(5))
    }
}

/// Observation taken when the allocator/list pair was reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRecord {
    /// 1-based count of resets
    pub sequence: u64,
    pub last_signaled_target: u64,
    pub completed_at_reset: u64,
}

/// Result of waiting on a frame's fence value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCompletion {
    pub target: u64,
    pub completed: u64,
    /// `false` when the GPU had already finished and no OS wait was needed
    pub blocked: bool,
    pub waited: Duration,
}

pub struct FrameSynchronizer<B: Backend> {
    fence: B::Fence,
    last_signaled: u64,
    last_completed: u64,
    policy: WaitPolicy,
    resets: u64,
    history: VecDeque<ResetRecord>,
    history_len: usize,
    /// Latched once a wait hung or the fence read as removed
    device_lost: bool,
}

impl<B: Backend> FrameSynchronizer<B> {
    /// Create the fence at 0. `history_len` bounds the kept reset records.
    pub fn new(device: &B::Device, policy: WaitPolicy, history_len: usize) -> RenderResult<Self> {
        let fence = device.create_fence(0).map_err(RenderError::startup("fence"))?;

        log::debug!("Frame synchronizer ready (wait policy {:?})", policy);

        Ok(Self {
            fence,
            last_signaled: 0,
            last_completed: 0,
            policy,
            resets: 0,
            history: VecDeque::with_capacity(history_len),
            history_len,
            device_lost: false,
        })
    }

    /// Highest value handed to `queue.signal`
    pub fn last_signaled(&self) -> u64 {
        self.last_signaled
    }

    /// Read the GPU's completed value. Never goes backwards; reading
    /// `u64::MAX` means the device was removed.
    pub fn completed_value(&mut self) -> RenderResult<u64> {
        let value = self.fence.completed_value();

        if value == u64::MAX {
            self.device_lost = true;
            return Err(RenderError::DeviceRemoved(format!(
                "fence completed value reads u64::MAX (last signaled {})",
                self.last_signaled
            )));
        }

        if value < self.last_completed {
            log::warn!(
                "Fence completed value went backwards ({} -> {}), keeping {}",
                self.last_completed,
                value,
                self.last_completed
            );
            return Ok(self.last_completed);
        }

        self.last_completed = value;
        Ok(value)
    }

    /// Increment the counter and have `queue` signal it after all work
    /// submitted so far.
    pub fn signal(&mut self, queue: &B::CommandQueue) -> RenderResult<u64> {
        let target = self.last_signaled + 1;
        self.signal_value(queue, target)?;
        Ok(target)
    }

    pub(crate) fn signal_value(&mut self, queue: &B::CommandQueue, value: u64) -> RenderResult<()> {
        if value <= self.last_signaled {
            return Err(RenderError::NonMonotonicFence { value, last: self.last_signaled });
        }

        queue.signal(&self.fence, value)?;
        self.last_signaled = value;
        log::trace!("Signaled fence value {}", value);
        Ok(())
    }

    /// Block until the GPU reaches `target`, within the wait policy
    pub fn wait(&mut self, target: u64) -> RenderResult<FrameCompletion> {
        let start = Instant::now();

        let completed = self.completed_value()?;
        if completed >= target {
            return Ok(FrameCompletion { target, completed, blocked: false, waited: Duration::ZERO });
        }

        match self.fence.wait_for_value(target, self.policy.timeout()) {
            Ok(WaitStatus::Reached) => {}
            Ok(WaitStatus::TimedOut) | Err(BackendError::NeverSignaled { .. }) => {
                let completed = self.completed_value()?;
                log::error!(
                    "GPU did not reach fence value {} after {:?} (completed {})",
                    target,
                    start.elapsed(),
                    completed
                );
                self.device_lost = true;
                return Err(RenderError::DeviceHung { target, completed, waited: start.elapsed() });
            }
            Err(e) => return Err(e.into()),
        }

        let completed = self.completed_value()?;
        if completed < target {
            // Event fired but the value is short; treat like a stall
            self.device_lost = true;
            return Err(RenderError::DeviceHung { target, completed, waited: start.elapsed() });
        }

        Ok(FrameCompletion { target, completed, blocked: true, waited: start.elapsed() })
    }

    /// Check that everything signaled so far has completed and log the reset
    pub fn record_reset(&mut self) -> RenderResult<ResetRecord> {
        let completed = self.completed_value()?;
        if completed < self.last_signaled {
            return Err(RenderError::PrematureReset { target: self.last_signaled, completed });
        }

        self.resets += 1;
        let record = ResetRecord {
            sequence: self.resets,
            last_signaled_target: self.last_signaled,
            completed_at_reset: completed,
        };

        if self.history_len > 0 {
            if self.history.len() == self.history_len {
                self.history.pop_front();
            }
            self.history.push_back(record);
        }
        Ok(record)
    }

    /// Most recent resets, oldest first
    pub fn reset_history(&self) -> impl Iterator<Item = &ResetRecord> {
        self.history.iter()
    }

    pub fn reset_count(&self) -> u64 {
        self.resets
    }

    /// A wait hung or the device was removed; further waits cannot succeed
    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    /// Latch a loss reported by a call outside the fence (present, signal)
    pub(crate) fn mark_device_lost(&mut self) {
        self.device_lost = true;
    }

    /// Signal a fresh value and wait for it: the queue is idle afterwards
    pub fn flush(&mut self, queue: &B::CommandQueue) -> RenderResult<FrameCompletion> {
        let target = self.signal(queue)?;
        self.wait(target)
    }
}
