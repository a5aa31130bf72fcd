use crate::{
    breakpoint_set::BreakpointSet,
    log::LogLevel::LogInfo,
    registers::Registers,
    replay_timeline::{ReplayTimeline, StopReason},
    trace::{
        cpu_trace::RetiredInsn, mem_trace::MemTrace, reg_file_trace::RegFileTrace, TraceError,
        Traces,
    },
};

/// Everything one debugging session works on: the traces, the cursor into
/// them and the breakpoints the debugger has set.
pub struct ReplaySession {
    reg_file: RegFileTrace,
    mem: MemTrace,
    timeline: ReplayTimeline,
    breakpoints: BreakpointSet,
    last_stop: StopReason,
}

impl ReplaySession {
    pub fn new(traces: Traces) -> Result<ReplaySession, TraceError> {
        let Traces { cpu, reg_file, mem } = traces;
        let timeline = ReplayTimeline::new(cpu).ok_or(TraceError::NoRetirements)?;
        Ok(ReplaySession {
            reg_file,
            mem,
            timeline,
            breakpoints: BreakpointSet::default(),
            last_stop: StopReason::Trap,
        })
    }

    pub fn current(&self) -> RetiredInsn {
        self.timeline.current()
    }

    pub fn timeline(&self) -> &ReplayTimeline {
        &self.timeline
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn last_stop(&self) -> StopReason {
        self.last_stop
    }

    pub fn registers(&self) -> Registers {
        let insn = self.current();
        Registers::at(&self.reg_file, insn.time, insn.pc)
    }

    /// Up to `len` bytes at `addr` as of the current instruction. Stops at the
    /// first byte with no known value, so the result may be shorter.
    pub fn read_mem(&self, addr: u64, len: usize) -> Vec<u8> {
        let time = self.current().time;
        let mut bytes = Vec::with_capacity(len);
        for i in 0..len as u64 {
            let a = match addr.checked_add(i) {
                Some(a) => a,
                None => break,
            };
            match self.mem.value_at(time, a) {
                Some(v) => bytes.push(v as u8),
                None => break,
            }
        }
        bytes
    }

    pub fn step(&mut self) -> StopReason {
        self.last_stop = self.timeline.step();
        self.last_stop
    }

    pub fn cont(&mut self) -> StopReason {
        self.last_stop = self.timeline.continue_forward(&self.breakpoints);
        self.last_stop
    }

    pub fn restart(&mut self) {
        self.timeline.restart();
        self.last_stop = StopReason::Trap;
    }

    pub fn add_breakpoint(&mut self, addr: u64) {
        self.breakpoints.add(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u64) {
        self.breakpoints.remove(addr);
    }

    /// A new debugger starts from the first instruction with no breakpoints.
    pub fn reset_for_new_connection(&mut self) {
        log!(
            LogInfo,
            "Resetting session; dropping {} breakpoints",
            self.breakpoints.len()
        );
        self.restart();
        self.breakpoints.clear();
    }
}
