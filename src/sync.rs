//! Command-stream completion tracking shared by the backends.
//!
//! GPU work is asynchronous relative to CPU issue order: commands are
//! recorded into a list and only take effect once submitted and
//! executed, possibly frames later. [`FenceTimeline`] models that
//! relationship as monotonically increasing write points so a backend
//! can answer "has the work that wrote this resource retired yet"
//! and decide between submit-now, block-on-fence, and no-op.

/// State of a recorded write point relative to GPU execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStreamState {
    /// Still being recorded; not yet handed to the GPU. Reading the
    /// data requires submitting first.
    Open,
    /// Submitted and possibly executing. Reading requires blocking on
    /// the fence.
    Submitted,
    /// The fence has signaled past this point; CPU reads are safe.
    Completed,
}

/// Monotonic submit/complete counters for a single command stream.
///
/// Points are handed out by [`record`](Self::record); `submit` marks
/// everything recorded so far as in flight and returns the fence value
/// to wait on; `complete_to` is called when the fence observes that
/// value signaled.
#[derive(Clone, Copy, Debug)]
pub struct FenceTimeline {
    next_point: u64,
    last_submitted: u64,
    last_completed: u64,
}

impl FenceTimeline {
    pub fn new() -> Self {
        Self {
            next_point: 1,
            last_submitted: 0,
            last_completed: 0,
        }
    }

    /// Record a write into the open command list and return its point.
    pub fn record(&mut self) -> u64 {
        let point = self.next_point;
        self.next_point += 1;
        point
    }

    /// Whether anything has been recorded since the last submit.
    pub fn has_open_work(&self) -> bool {
        self.next_point - 1 > self.last_submitted
    }

    /// Mark all recorded work submitted; returns the fence value that
    /// covers it. Idempotent when nothing new was recorded.
    pub fn submit(&mut self) -> u64 {
        self.last_submitted = self.next_point - 1;
        self.last_submitted
    }

    /// The fence observed `value` signaled.
    pub fn complete_to(&mut self, value: u64) {
        debug_assert!(value <= self.last_submitted);
        if value > self.last_completed {
            self.last_completed = value;
        }
    }

    pub fn state_of(&self, point: u64) -> CommandStreamState {
        if point > self.last_submitted {
            CommandStreamState::Open
        } else if point > self.last_completed {
            CommandStreamState::Submitted
        } else {
            CommandStreamState::Completed
        }
    }

    /// The newest point that still needs a fence wait, if any.
    pub fn pending_submitted(&self) -> Option<u64> {
        (self.last_submitted > self.last_completed).then_some(self.last_submitted)
    }
}

impl Default for FenceTimeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timeline_has_nothing_pending() {
        let timeline = FenceTimeline::new();
        assert!(!timeline.has_open_work());
        assert_eq!(timeline.pending_submitted(), None);
    }

    #[test]
    fn recorded_work_is_open_until_submitted() {
        let mut timeline = FenceTimeline::new();
        let point = timeline.record();
        assert_eq!(timeline.state_of(point), CommandStreamState::Open);
        assert!(timeline.has_open_work());

        let fence_value = timeline.submit();
        assert_eq!(fence_value, point);
        assert_eq!(timeline.state_of(point), CommandStreamState::Submitted);
        assert!(!timeline.has_open_work());
    }

    #[test]
    fn completion_retires_submitted_points() {
        let mut timeline = FenceTimeline::new();
        let first = timeline.record();
        let second = timeline.record();
        let fence_value = timeline.submit();
        assert_eq!(fence_value, second);

        timeline.complete_to(fence_value);
        assert_eq!(timeline.state_of(first), CommandStreamState::Completed);
        assert_eq!(timeline.state_of(second), CommandStreamState::Completed);
        assert_eq!(timeline.pending_submitted(), None);
    }

    #[test]
    fn completion_is_monotonic() {
        let mut timeline = FenceTimeline::new();
        timeline.record();
        let v1 = timeline.submit();
        timeline.complete_to(v1);

        let p2 = timeline.record();
        let v2 = timeline.submit();
        // A stale (lower) completion must not regress the timeline.
        timeline.complete_to(v1);
        assert_eq!(timeline.state_of(p2), CommandStreamState::Submitted);
        timeline.complete_to(v2);
        assert_eq!(timeline.state_of(p2), CommandStreamState::Completed);
    }

    #[test]
    fn submit_with_no_new_work_is_idempotent() {
        let mut timeline = FenceTimeline::new();
        timeline.record();
        let v1 = timeline.submit();
        assert_eq!(timeline.submit(), v1);
    }
}
