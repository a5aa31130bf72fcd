use crate::{
    config::CpuSignals,
    log::LogLevel::{LogDebug, LogInfo},
    waveform::{decode, ValueChangeHandler, WaveformError, WaveformReader},
};
use serde::Serialize;

/// An instruction that retired at `time`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetiredInsn {
    pub time: u64,
    pub pc: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuRole {
    Clk,
    PcValid,
    Pc,
}

/// Retired instructions, oldest first.
#[derive(Clone, Debug, Default)]
pub struct CpuTrace {
    insns: Vec<RetiredInsn>,
}

#[derive(Default)]
struct CpuTraceBuilder {
    cur_pc: u64,
    cur_pc_valid: bool,
    insns: Vec<RetiredInsn>,
}

impl ValueChangeHandler for CpuTraceBuilder {
    type Role = CpuRole;

    fn value_changed(&mut self, time: u64, role: CpuRole, value: u64) {
        match role {
            CpuRole::Pc => self.cur_pc = value,
            CpuRole::PcValid => self.cur_pc_valid = value != 0,
            // Signals are stable on the falling edge.
            CpuRole::Clk => {
                if value == 0 && self.cur_pc_valid {
                    log!(LogDebug, "retired pc {:#x} at {}", self.cur_pc, time);
                    self.insns.push(RetiredInsn {
                        time,
                        pc: self.cur_pc,
                    });
                }
            }
        }
    }
}

impl CpuTrace {
    pub fn build(
        reader: &mut dyn WaveformReader,
        signals: &CpuSignals,
    ) -> Result<CpuTrace, WaveformError> {
        let mut roles = [
            (signals.clk.clone(), CpuRole::Clk),
            (signals.retired_pc_valid.clone(), CpuRole::PcValid),
            (signals.retired_pc.clone(), CpuRole::Pc),
        ];
        let mut builder = CpuTraceBuilder::default();
        decode(reader, &mut roles, &mut builder)?;
        log!(LogInfo, "{} retired instructions", builder.insns.len());
        Ok(CpuTrace::from_insns(builder.insns))
    }

    pub fn from_insns(insns: Vec<RetiredInsn>) -> CpuTrace {
        CpuTrace { insns }
    }

    pub fn insns(&self) -> &[RetiredInsn] {
        &self.insns
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }
}
