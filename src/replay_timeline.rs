use crate::{
    breakpoint_set::BreakpointSet,
    log::LogLevel::{LogDebug, LogInfo},
    trace::cpu_trace::{CpuTrace, RetiredInsn},
};

/// Why a resume request stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StopReason {
    /// Stopped on an instruction, like a breakpoint or single-step trap.
    Trap,
    /// A single step tried to move past the last retired instruction.
    Terminated,
}

/// A cursor into the retirement trace standing in for the CPU's program
/// counter. Always positioned on an existing instruction.
pub struct ReplayTimeline {
    trace: CpuTrace,
    current: usize,
}

impl ReplayTimeline {
    /// `None` if `trace` is empty: there is nothing to position on.
    pub fn new(trace: CpuTrace) -> Option<ReplayTimeline> {
        if trace.is_empty() {
            return None;
        }
        Some(ReplayTimeline { trace, current: 0 })
    }

    pub fn current(&self) -> RetiredInsn {
        self.trace.insns()[self.current]
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn trace(&self) -> &CpuTrace {
        &self.trace
    }

    fn last_index(&self) -> usize {
        self.trace.len() - 1
    }

    pub fn at_end(&self) -> bool {
        self.current == self.last_index()
    }

    /// Advance by one retired instruction. Stepping off the end leaves the
    /// cursor on the last instruction and reports `Terminated`.
    pub fn step(&mut self) -> StopReason {
        if self.at_end() {
            log!(LogInfo, "Step past the end of the trace");
            return StopReason::Terminated;
        }
        self.current += 1;
        log!(LogDebug, "step -> {:?}", self.current());
        StopReason::Trap
    }

    /// Advance at least once, then until the pc is in `breakpoints` or the
    /// trace is exhausted. Always reports `Trap`, even at the end: a client
    /// treats that as a breakpoint-like halt and does not keep resuming.
    pub fn continue_forward(&mut self, breakpoints: &BreakpointSet) -> StopReason {
        while !self.at_end() {
            self.current += 1;
            if breakpoints.contains(self.current().pc) {
                log!(LogInfo, "Breakpoint hit at {:#x}", self.current().pc);
                return StopReason::Trap;
            }
        }
        log!(LogInfo, "Continued to the end of the trace");
        StopReason::Trap
    }

    pub fn restart(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline() -> ReplayTimeline {
        let insns = [(10, 0x100), (20, 0x104), (30, 0x108)]
            .iter()
            .map(|&(time, pc)| RetiredInsn { time, pc })
            .collect();
        ReplayTimeline::new(CpuTrace::from_insns(insns)).unwrap()
    }

    #[test]
    fn empty_trace_has_no_timeline() {
        assert!(ReplayTimeline::new(CpuTrace::default()).is_none());
    }

    #[test]
    fn continue_without_breakpoints_runs_to_end() {
        let mut t = timeline();
        let stop = t.continue_forward(&BreakpointSet::default());
        assert_eq!(StopReason::Trap, stop);
        assert_eq!(2, t.index());
        assert_eq!(0x108, t.current().pc);
    }

    #[test]
    fn continue_stops_at_breakpoint() {
        let mut t = timeline();
        let mut bps = BreakpointSet::default();
        bps.add(0x104);
        assert_eq!(StopReason::Trap, t.continue_forward(&bps));
        assert_eq!(1, t.index());
        assert_eq!(0x104, t.current().pc);
        // Resuming from a breakpoint makes progress.
        assert_eq!(StopReason::Trap, t.continue_forward(&bps));
        assert_eq!(2, t.index());
    }

    #[test]
    fn continue_at_end_is_idempotent() {
        let mut t = timeline();
        let bps = BreakpointSet::default();
        t.continue_forward(&bps);
        for _ in 0..3 {
            assert_eq!(StopReason::Trap, t.continue_forward(&bps));
            assert_eq!(0x108, t.current().pc);
        }
    }

    #[test]
    fn step_at_end_terminates() {
        let mut t = timeline();
        assert_eq!(StopReason::Trap, t.step());
        assert_eq!(StopReason::Trap, t.step());
        assert_eq!(0x108, t.current().pc);
        assert_eq!(StopReason::Terminated, t.step());
        assert_eq!(0x108, t.current().pc);
        assert_eq!(2, t.index());
    }

    #[test]
    fn restart_goes_back_to_first() {
        let mut t = timeline();
        t.step();
        t.step();
        t.restart();
        assert_eq!(0, t.index());
        assert_eq!(RetiredInsn { time: 10, pc: 0x100 }, t.current());
    }
}
