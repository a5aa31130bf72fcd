use std::{
    convert::TryFrom,
    fmt::{Display, Formatter, Result},
    result,
};

/// A register number in the rv32 gdb register layout: x0..x31, then pc.
///
/// The inner u32 is deliberately NOT pub. Construct through `TryFrom` or the
/// constants so the number is always in range.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct GdbRegister(u32);

pub const DREG_X0: GdbRegister = GdbRegister(0);
pub const DREG_PC: GdbRegister = GdbRegister(32);
pub const DREG_NUM_REGISTERS: usize = 33;

impl Display for GdbRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if *self == DREG_PC {
            write!(f, "pc")
        } else {
            write!(f, "x{}", self.0)
        }
    }
}

impl GdbRegister {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn is_gpr(&self) -> bool {
        *self < DREG_PC
    }
}

impl TryFrom<u64> for GdbRegister {
    type Error = ();

    fn try_from(regno: u64) -> result::Result<Self, Self::Error> {
        if regno < DREG_NUM_REGISTERS as u64 {
            Ok(Self(regno as u32))
        } else {
            Err(())
        }
    }
}

impl From<GdbRegister> for usize {
    fn from(r: GdbRegister) -> usize {
        r.as_usize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_checked() {
        assert_eq!(Ok(DREG_PC), GdbRegister::try_from(32u64));
        assert_eq!(Err(()), GdbRegister::try_from(33u64));
        assert!(GdbRegister::try_from(31u64).unwrap().is_gpr());
        assert!(!DREG_PC.is_gpr());
    }

    #[test]
    fn names() {
        assert_eq!("x2", GdbRegister::try_from(2u64).unwrap().to_string());
        assert_eq!("pc", DREG_PC.to_string());
    }
}
