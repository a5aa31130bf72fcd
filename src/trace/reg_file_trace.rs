use super::write_trace::{WriteEvent, WriteTrace};
use crate::{
    config::RegFileSignals,
    log::LogLevel::{LogDebug, LogInfo},
    waveform::{decode, SignalRef, ValueChangeHandler, WaveformError, WaveformReader},
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegFileRole {
    Clk,
    WrValid,
    WrAddr,
    WrData,
}

/// Register file writes. Addresses are register numbers.
#[derive(Clone, Debug, Default)]
pub struct RegFileTrace {
    writes: WriteTrace,
}

#[derive(Default)]
struct RegFileTraceBuilder {
    wr_valid: bool,
    wr_addr: u64,
    wr_data: u64,
    writes: WriteTrace,
}

impl ValueChangeHandler for RegFileTraceBuilder {
    type Role = RegFileRole;

    fn value_changed(&mut self, time: u64, role: RegFileRole, value: u64) {
        match role {
            RegFileRole::WrValid => self.wr_valid = value != 0,
            RegFileRole::WrAddr => self.wr_addr = value,
            RegFileRole::WrData => self.wr_data = value,
            RegFileRole::Clk => {
                if value == 0 && self.wr_valid {
                    log!(
                        LogDebug,
                        "x{} <- {:#x} at {}",
                        self.wr_addr,
                        self.wr_data,
                        time
                    );
                    self.writes.push(WriteEvent {
                        time,
                        addr: self.wr_addr,
                        value: self.wr_data,
                    });
                }
            }
        }
    }
}

impl RegFileTrace {
    pub fn build(
        reader: &mut dyn WaveformReader,
        clk: &SignalRef,
        signals: &RegFileSignals,
    ) -> Result<RegFileTrace, WaveformError> {
        let mut roles = [
            (clk.clone(), RegFileRole::Clk),
            (signals.write_valid.clone(), RegFileRole::WrValid),
            (signals.write_addr.clone(), RegFileRole::WrAddr),
            (signals.write_data.clone(), RegFileRole::WrData),
        ];
        let mut builder = RegFileTraceBuilder::default();
        decode(reader, &mut roles, &mut builder)?;
        log!(LogInfo, "{} register file writes", builder.writes.len());
        Ok(RegFileTrace {
            writes: builder.writes,
        })
    }

    pub fn writes(&self) -> &WriteTrace {
        &self.writes
    }

    /// Register `reg` as of `time`, `None` if never written.
    pub fn value_at(&self, time: u64, reg: u64) -> Option<u64> {
        self.writes.value_at(time, reg)
    }
}
