//! Typed gdb requests, parsed from packet payloads.

use crate::{
    gdb_connection::{decode_binary, decode_hex},
    gdb_register::GdbRegister,
};
use std::{convert::TryFrom, str};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("unexpected end of packet at offset {offset}")]
    UnexpectedEnd { offset: usize },
    #[error("expected `{expected}' at offset {offset}")]
    MissingSeparator { expected: char, offset: usize },
    #[error("bad hex number at offset {offset}")]
    BadHex { offset: usize },
    #[error("no such register: {0}")]
    BadRegister(u64),
    #[error("reply of {len} bytes does not fit the {limit} byte packet buffer")]
    ReplyTooLarge { len: usize, limit: usize },
}

/// `Z`/`z` type field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BreakpointKind {
    Software,
    Hardware,
    /// Write, read or access watchpoint: not supported on a trace.
    Watch(u8),
}

impl BreakpointKind {
    fn from_type(t: u64) -> Option<BreakpointKind> {
        match t {
            0 => Some(BreakpointKind::Software),
            1 => Some(BreakpointKind::Hardware),
            2..=4 => Some(BreakpointKind::Watch(t as u8)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GdbRequest {
    GetRegs,
    GetReg(GdbRegister),
    SetReg { reg: GdbRegister, value: Vec<u8> },
    GetMem { addr: u64, len: u64 },
    SetMem { addr: u64, data: Vec<u8> },
    SetBreakpoint { kind: BreakpointKind, addr: u64 },
    RemoveBreakpoint { kind: BreakpointKind, addr: u64 },
    Continue,
    Step,
    /// `vCont?`
    ResumeActions,
    Restart,
    Kill,
    GetStopReason,
    IsThreadAlive,
    SetThread,
    Supported,
    ReadFeatures { annex: String, offset: u64, len: u64 },
    Attached,
    CurrentThread,
    ThreadListFirst,
    ThreadListNext,
    StartNoAckMode,
    ExtendedMode,
    Detach,
    /// Anything else. Answered with the empty reply.
    Unsupported,
}

/// A cursor over a payload that consumes hex arguments and separators.
pub struct PayloadParser<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PayloadParser<'a> {
    pub fn new(payload: &'a [u8]) -> PayloadParser<'a> {
        PayloadParser { payload, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.payload.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.payload.get(self.pos).copied()
    }

    pub fn next_byte(&mut self) -> Result<u8, RequestError> {
        let b = self.peek().ok_or(RequestError::UnexpectedEnd { offset: self.pos })?;
        self.pos += 1;
        Ok(b)
    }

    /// A run of at least one hex digit, as an integer.
    pub fn hex_arg(&mut self) -> Result<u64, RequestError> {
        let start = self.pos;
        let len = self.payload[start..]
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if len == 0 {
            return Err(if self.at_end() {
                RequestError::UnexpectedEnd { offset: start }
            } else {
                RequestError::BadHex { offset: start }
            });
        }
        self.pos += len;
        str::from_utf8(&self.payload[start..self.pos])
            .ok()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or(RequestError::BadHex { offset: start })
    }

    pub fn expect_separator(&mut self, sep: u8) -> Result<(), RequestError> {
        match self.peek() {
            Some(b) if b == sep => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(RequestError::MissingSeparator {
                expected: sep as char,
                offset: self.pos,
            }),
            None => Err(RequestError::UnexpectedEnd { offset: self.pos }),
        }
    }

    /// Everything not consumed yet.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.payload[self.pos.min(self.payload.len())..];
        self.pos = self.payload.len();
        rest
    }

    /// `addr,len`
    fn addr_len(&mut self) -> Result<(u64, u64), RequestError> {
        let addr = self.hex_arg()?;
        self.expect_separator(b',')?;
        let len = self.hex_arg()?;
        Ok((addr, len))
    }

    fn register(&mut self) -> Result<GdbRegister, RequestError> {
        let n = self.hex_arg()?;
        GdbRegister::try_from(n).map_err(|_| RequestError::BadRegister(n))
    }
}

impl GdbRequest {
    pub fn parse(payload: &[u8]) -> Result<GdbRequest, RequestError> {
        let mut p = PayloadParser::new(payload);
        let cmd = match p.next_byte() {
            Ok(c) => c,
            Err(_) => return Ok(GdbRequest::Unsupported),
        };
        let req = match cmd {
            b'g' => GdbRequest::GetRegs,
            b'p' => GdbRequest::GetReg(p.register()?),
            b'P' => {
                let reg = p.register()?;
                p.expect_separator(b'=')?;
                let value = decode_hex(p.rest()).ok_or(RequestError::BadHex { offset: 0 })?;
                GdbRequest::SetReg { reg, value }
            }
            b'm' => {
                let (addr, len) = p.addr_len()?;
                GdbRequest::GetMem { addr, len }
            }
            b'M' => {
                let (addr, len) = p.addr_len()?;
                p.expect_separator(b':')?;
                let offset = p.pos;
                let data = decode_hex(p.rest()).ok_or(RequestError::BadHex { offset })?;
                if data.len() as u64 != len {
                    return Err(RequestError::BadHex { offset });
                }
                GdbRequest::SetMem { addr, data }
            }
            b'X' => {
                let (addr, _len) = p.addr_len()?;
                p.expect_separator(b':')?;
                GdbRequest::SetMem {
                    addr,
                    data: decode_binary(p.rest()),
                }
            }
            b'Z' | b'z' => {
                let t = p.hex_arg()?;
                p.expect_separator(b',')?;
                let addr = p.hex_arg()?;
                // The kind (instruction size) that follows is irrelevant here.
                match BreakpointKind::from_type(t) {
                    Some(kind) if cmd == b'Z' => GdbRequest::SetBreakpoint { kind, addr },
                    Some(kind) => GdbRequest::RemoveBreakpoint { kind, addr },
                    None => GdbRequest::Unsupported,
                }
            }
            // Resume addresses and signals are ignored: the trace decides
            // where execution goes.
            b'c' | b'C' => GdbRequest::Continue,
            b's' | b'S' => GdbRequest::Step,
            b'R' => GdbRequest::Restart,
            b'k' => GdbRequest::Kill,
            b'?' => GdbRequest::GetStopReason,
            b'T' => GdbRequest::IsThreadAlive,
            b'H' => GdbRequest::SetThread,
            b'!' => GdbRequest::ExtendedMode,
            b'D' => GdbRequest::Detach,
            b'v' => parse_vpacket(payload),
            b'q' | b'Q' => parse_query(payload)?,
            _ => GdbRequest::Unsupported,
        };
        Ok(req)
    }
}

fn parse_vpacket(payload: &[u8]) -> GdbRequest {
    if payload == b"vCont?" {
        return GdbRequest::ResumeActions;
    }
    if let Some(actions) = payload.strip_prefix(b"vCont;") {
        // Only the first action matters with a single thread.
        return match actions.first() {
            Some(b'c') | Some(b'C') => GdbRequest::Continue,
            Some(b's') | Some(b'S') => GdbRequest::Step,
            _ => GdbRequest::Unsupported,
        };
    }
    GdbRequest::Unsupported
}

fn parse_query(payload: &[u8]) -> Result<GdbRequest, RequestError> {
    const XFER_FEATURES: &[u8] = b"qXfer:features:read:";

    let name_end = payload
        .iter()
        .position(|&b| b == b':' || b == b',' || b == b';')
        .unwrap_or(payload.len());
    let req = match &payload[..name_end] {
        b"qSupported" => GdbRequest::Supported,
        b"qAttached" => GdbRequest::Attached,
        b"qC" => GdbRequest::CurrentThread,
        b"qfThreadInfo" => GdbRequest::ThreadListFirst,
        b"qsThreadInfo" => GdbRequest::ThreadListNext,
        b"QStartNoAckMode" => GdbRequest::StartNoAckMode,
        b"qXfer" if payload.starts_with(XFER_FEATURES) => {
            let args = &payload[XFER_FEATURES.len()..];
            let annex_end = args
                .iter()
                .position(|&b| b == b':')
                .ok_or(RequestError::MissingSeparator {
                    expected: ':',
                    offset: payload.len(),
                })?;
            let annex = String::from_utf8_lossy(&args[..annex_end]).into_owned();
            let mut p = PayloadParser::new(&args[annex_end + 1..]);
            let (offset, len) = p.addr_len()?;
            GdbRequest::ReadFeatures { annex, offset, len }
        }
        _ => GdbRequest::Unsupported,
    };
    Ok(req)
}

/// Refuse replies that do not fit the packet buffer.
pub fn check_reply_size(len: usize, limit: usize) -> Result<(), RequestError> {
    if len > limit {
        return Err(RequestError::ReplyTooLarge { len, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb_register::DREG_PC;

    fn parse(s: &str) -> Result<GdbRequest, RequestError> {
        GdbRequest::parse(s.as_bytes())
    }

    #[test]
    fn registers() {
        assert_eq!(Ok(GdbRequest::GetRegs), parse("g"));
        assert_eq!(Ok(GdbRequest::GetReg(DREG_PC)), parse("p20"));
        assert_eq!(Err(RequestError::BadRegister(0x21)), parse("p21"));
        assert_eq!(
            Ok(GdbRequest::SetReg {
                reg: DREG_PC,
                value: vec![0, 1, 0, 0]
            }),
            parse("P20=00010000")
        );
        assert!(matches!(
            parse("P20:00"),
            Err(RequestError::MissingSeparator { expected: '=', .. })
        ));
    }

    #[test]
    fn memory() {
        assert_eq!(
            Ok(GdbRequest::GetMem {
                addr: 0x8000_0000,
                len: 4
            }),
            parse("m80000000,4")
        );
        assert!(matches!(
            parse("m80000000"),
            Err(RequestError::UnexpectedEnd { .. })
        ));
        assert!(matches!(
            parse("m8000;4"),
            Err(RequestError::MissingSeparator { expected: ',', .. })
        ));
        assert!(matches!(parse("m,4"), Err(RequestError::BadHex { offset: 1 })));
        assert_eq!(
            Ok(GdbRequest::SetMem {
                addr: 0x100,
                data: vec![0xab, 0xcd]
            }),
            parse("M100,2:abcd")
        );
        assert!(parse("M100,2:ab").is_err());
        assert_eq!(
            Ok(GdbRequest::SetMem {
                addr: 0x100,
                data: vec![b'#', 1]
            }),
            GdbRequest::parse(b"X100,2:}\x03\x01")
        );
    }

    #[test]
    fn breakpoints() {
        assert_eq!(
            Ok(GdbRequest::SetBreakpoint {
                kind: BreakpointKind::Software,
                addr: 0x104
            }),
            parse("Z0,104,4")
        );
        assert_eq!(
            Ok(GdbRequest::RemoveBreakpoint {
                kind: BreakpointKind::Hardware,
                addr: 0x104
            }),
            parse("z1,104,2")
        );
        assert_eq!(
            Ok(GdbRequest::SetBreakpoint {
                kind: BreakpointKind::Watch(2),
                addr: 0x2000
            }),
            parse("Z2,2000,4")
        );
        assert_eq!(Ok(GdbRequest::Unsupported), parse("Z9,2000,4"));
    }

    #[test]
    fn resume() {
        assert_eq!(Ok(GdbRequest::Continue), parse("c"));
        assert_eq!(Ok(GdbRequest::Continue), parse("c80000000"));
        assert_eq!(Ok(GdbRequest::Step), parse("S05"));
        assert_eq!(Ok(GdbRequest::ResumeActions), parse("vCont?"));
        assert_eq!(Ok(GdbRequest::Step), parse("vCont;s:1;c"));
        assert_eq!(Ok(GdbRequest::Continue), parse("vCont;c"));
        assert_eq!(Ok(GdbRequest::Unsupported), parse("vMustReplyEmpty"));
    }

    #[test]
    fn queries() {
        assert_eq!(
            Ok(GdbRequest::Supported),
            parse("qSupported:multiprocess+;swbreak+")
        );
        assert_eq!(Ok(GdbRequest::Attached), parse("qAttached"));
        assert_eq!(Ok(GdbRequest::CurrentThread), parse("qC"));
        assert_eq!(Ok(GdbRequest::ThreadListFirst), parse("qfThreadInfo"));
        assert_eq!(Ok(GdbRequest::ThreadListNext), parse("qsThreadInfo"));
        assert_eq!(Ok(GdbRequest::StartNoAckMode), parse("QStartNoAckMode"));
        assert_eq!(
            Ok(GdbRequest::ReadFeatures {
                annex: "target.xml".into(),
                offset: 0,
                len: 0xffb
            }),
            parse("qXfer:features:read:target.xml:0,ffb")
        );
        assert_eq!(Ok(GdbRequest::Unsupported), parse("qXfer:auxv:read::0,100"));
        assert_eq!(Ok(GdbRequest::Unsupported), parse("qTStatus"));
    }

    #[test]
    fn misc() {
        assert_eq!(Ok(GdbRequest::Unsupported), parse(""));
        assert_eq!(Ok(GdbRequest::GetStopReason), parse("?"));
        assert_eq!(Ok(GdbRequest::SetThread), parse("Hg0"));
        assert_eq!(Ok(GdbRequest::IsThreadAlive), parse("T1"));
        assert_eq!(Ok(GdbRequest::Detach), parse("D"));
        assert_eq!(Ok(GdbRequest::Restart), parse("R00"));
    }

    #[test]
    fn reply_size() {
        assert!(check_reply_size(512, 512).is_ok());
        assert_eq!(
            Err(RequestError::ReplyTooLarge {
                len: 513,
                limit: 512
            }),
            check_reply_size(513, 512)
        );
    }
}
