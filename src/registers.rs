use crate::{
    gdb_register::{GdbRegister, DREG_NUM_REGISTERS, DREG_PC, DREG_X0},
    trace::reg_file_trace::RegFileTrace,
};
use std::convert::TryFrom;

/// Every register is 4 bytes wide on the wire.
pub const REG_SIZE_BYTES: usize = 4;

/// The debugger-visible register file at one point of the timeline. A derived
/// view: recomputed from the traces whenever it is asked for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Registers {
    values: [u32; DREG_NUM_REGISTERS],
}

impl Registers {
    /// Registers as of `time`. GPRs never written read as 0, and so does x0.
    pub fn at(reg_file: &RegFileTrace, time: u64, pc: u64) -> Registers {
        let values = array_init::array_init(|i| {
            let r = match GdbRegister::try_from(i as u64) {
                Ok(r) => r,
                Err(()) => return 0,
            };
            if r == DREG_X0 {
                0
            } else if r == DREG_PC {
                pc as u32
            } else {
                reg_file.value_at(time, i as u64).unwrap_or(0) as u32
            }
        });
        Registers { values }
    }

    pub fn get(&self, r: GdbRegister) -> u32 {
        self.values[r.as_usize()]
    }

    pub fn pc(&self) -> u32 {
        self.get(DREG_PC)
    }

    /// Little-endian bytes of `r`, as sent in a `p` reply.
    pub fn reg_bytes(&self, r: GdbRegister) -> [u8; REG_SIZE_BYTES] {
        self.get(r).to_le_bytes()
    }

    /// All registers in gdb order, as sent in a `g` reply.
    pub fn to_gdb_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes().to_vec()).collect()
    }
}
