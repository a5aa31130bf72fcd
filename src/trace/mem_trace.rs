use super::write_trace::{WriteEvent, WriteTrace};
use crate::{
    config::MemSignals,
    log::LogLevel::{LogDebug, LogInfo},
    waveform::{decode, SignalRef, ValueChangeHandler, WaveformError, WaveformReader},
};
use bit_field::BitField;
use std::{fs, io, path::Path};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemRole {
    Clk,
    CmdValid,
    CmdReady,
    CmdAddr,
    CmdSize,
    CmdWr,
    CmdWrData,
    RspValid,
    RspRdData,
}

bitflags! {
    /// Byte lanes of the 32-bit memory bus.
    pub struct ByteLanes: u8 {
        const LANE0 = 0b0001;
        const LANE1 = 0b0010;
        const LANE2 = 0b0100;
        const LANE3 = 0b1000;
    }
}

impl ByteLanes {
    /// Lanes written by a command of encoded `size` (0: byte, 1: half word,
    /// otherwise word) at `addr`.
    pub fn for_write(size: u64, addr: u64) -> ByteLanes {
        let offset = addr & 3;
        let mask: u64 = match size {
            0 => 0b1 << offset,
            1 => 0b11 << offset,
            _ => 0b1111,
        };
        ByteLanes::from_bits_truncate(mask as u8)
    }

    pub fn lanes(self) -> impl Iterator<Item = u64> {
        (0..4u64).filter(move |lane| self.bits().get_bit(*lane as usize))
    }
}

/// Memory contents before the first recorded write.
#[derive(Clone, Debug, Default)]
pub struct MemInit {
    pub base: u64,
    pub contents: Vec<u8>,
}

impl MemInit {
    pub fn load(path: &Path, base: u64) -> io::Result<MemInit> {
        let contents = fs::read(path)?;
        log!(
            LogInfo,
            "Loaded {} bytes of initial memory at {:#x} from {:?}",
            contents.len(),
            base,
            path
        );
        Ok(MemInit { base, contents })
    }

    pub fn byte_at(&self, addr: u64) -> Option<u8> {
        let offset = addr.checked_sub(self.base)?;
        if offset >= self.contents.len() as u64 {
            return None;
        }
        Some(self.contents[offset as usize])
    }
}

/// Byte-granular memory writes plus an optional initial image.
#[derive(Clone, Debug, Default)]
pub struct MemTrace {
    writes: WriteTrace,
    init: Option<MemInit>,
}

#[derive(Default)]
struct MemTraceBuilder {
    cmd_valid: bool,
    cmd_ready: bool,
    cmd_addr: u64,
    cmd_size: u64,
    cmd_wr: bool,
    cmd_wr_data: u64,
    // Read responses are only counted. Writes are the whole trace.
    rsp_valid: bool,
    rsp_rd_data: u64,
    read_responses: u64,
    writes: WriteTrace,
}

impl MemTraceBuilder {
    fn commit_write(&mut self, time: u64) {
        let lanes = ByteLanes::for_write(self.cmd_size, self.cmd_addr);
        log!(
            LogDebug,
            "write {:#x} to {:#x} (size {}, lanes {:?}) at {}",
            self.cmd_wr_data,
            self.cmd_addr,
            self.cmd_size,
            lanes,
            time
        );
        let word_addr = self.cmd_addr & !3;
        for lane in lanes.lanes() {
            let bit = (lane * 8) as usize;
            self.writes.push(WriteEvent {
                time,
                addr: word_addr | lane,
                value: self.cmd_wr_data.get_bits(bit..bit + 8),
            });
        }
    }
}

impl ValueChangeHandler for MemTraceBuilder {
    type Role = MemRole;

    fn value_changed(&mut self, time: u64, role: MemRole, value: u64) {
        match role {
            MemRole::CmdValid => self.cmd_valid = value != 0,
            MemRole::CmdReady => self.cmd_ready = value != 0,
            MemRole::CmdAddr => self.cmd_addr = value,
            MemRole::CmdSize => self.cmd_size = value,
            MemRole::CmdWr => self.cmd_wr = value != 0,
            MemRole::CmdWrData => self.cmd_wr_data = value,
            MemRole::RspValid => self.rsp_valid = value != 0,
            MemRole::RspRdData => self.rsp_rd_data = value,
            MemRole::Clk if value == 0 => {
                if self.cmd_valid && self.cmd_ready && self.cmd_wr {
                    self.commit_write(time);
                }
                if self.rsp_valid {
                    log!(LogDebug, "read response {:#x} at {}", self.rsp_rd_data, time);
                    self.read_responses += 1;
                }
            }
            MemRole::Clk => (),
        }
    }
}

impl MemTrace {
    pub fn new(writes: WriteTrace, init: Option<MemInit>) -> MemTrace {
        MemTrace { writes, init }
    }

    pub fn build(
        reader: &mut dyn WaveformReader,
        clk: &SignalRef,
        signals: &MemSignals,
        init: Option<MemInit>,
    ) -> Result<MemTrace, WaveformError> {
        let mut roles = [
            (clk.clone(), MemRole::Clk),
            (signals.cmd_valid.clone(), MemRole::CmdValid),
            (signals.cmd_ready.clone(), MemRole::CmdReady),
            (signals.cmd_addr.clone(), MemRole::CmdAddr),
            (signals.cmd_size.clone(), MemRole::CmdSize),
            (signals.cmd_wr.clone(), MemRole::CmdWr),
            (signals.cmd_wr_data.clone(), MemRole::CmdWrData),
            (signals.rsp_valid.clone(), MemRole::RspValid),
            (signals.rsp_rd_data.clone(), MemRole::RspRdData),
        ];
        let mut builder = MemTraceBuilder::default();
        decode(reader, &mut roles, &mut builder)?;
        log!(
            LogInfo,
            "{} memory byte writes, {} read responses",
            builder.writes.len(),
            builder.read_responses
        );
        Ok(MemTrace::new(builder.writes, init))
    }

    pub fn writes(&self) -> &WriteTrace {
        &self.writes
    }

    pub fn init(&self) -> Option<&MemInit> {
        self.init.as_ref()
    }

    /// Byte at `addr` as of `time`: the initial image, overridden by every
    /// write at or before `time`.
    pub fn value_at(&self, time: u64, addr: u64) -> Option<u64> {
        let seed = self
            .init
            .as_ref()
            .and_then(|init| init.byte_at(addr))
            .map(u64::from);
        self.writes.value_at_seeded(time, addr, seed)
    }
}
