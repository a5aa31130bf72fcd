//! Serves a replay session to a debugger over the gdb remote serial protocol.

use crate::{
    gdb_connection::{encode_binary, GdbConnection, ReceivedPacket, PACKET_BUF_SIZE},
    gdb_request::{check_reply_size, BreakpointKind, GdbRequest, RequestError},
    log::LogLevel::{LogError, LogInfo, LogWarn},
    replay_timeline::StopReason,
    scoped_fd::ScopedFd,
    session::ReplaySession,
};
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, InetAddr, SockAddr, SockFlag,
    SockType,
};
use std::{
    cmp::min,
    io::{self, Read, Write},
    net::{Ipv4Addr, SocketAddr, TcpListener},
    os::unix::io::FromRawFd,
};

const SIGTRAP: u8 = 5;
/// Malformed request.
const ERR_BAD_REQUEST: u8 = 0;
/// Well-formed request the trace cannot satisfy.
const ERR_FAILED: u8 = 1;

const SUPPORTED_FEATURES: &str = "PacketSize=200;qXfer:features:read+;QStartNoAckMode+";
const VCONT_ACTIONS: &str = "vCont;c;C;s;S";

const TARGET_XML: &str = r#"<?xml version="1.0"?>
<!DOCTYPE target SYSTEM "gdb-target.dtd">
<target version="1.0">
  <architecture>riscv:rv32</architecture>
</target>
"#;

/// What to send back for one request.
#[derive(Debug, Eq, PartialEq)]
enum Reply {
    Ok,
    Error(u8),
    Unsupported,
    Text(String),
    Hex(Vec<u8>),
    /// A `qXfer` chunk: `m` or `l`, then escaped binary data.
    Binary(u8, Vec<u8>),
    Stop(StopReason),
    /// `R` and `k` are never answered.
    Silent,
}

impl Reply {
    fn encoded_len(&self) -> usize {
        match self {
            Reply::Ok => 2,
            Reply::Error(_) => 3,
            Reply::Unsupported | Reply::Silent => 0,
            Reply::Text(s) => s.len(),
            Reply::Hex(data) => data.len() * 2,
            Reply::Binary(_, data) => 1 + encode_binary(data).len(),
            Reply::Stop(_) => 3,
        }
    }
}

pub struct GdbServer<'s, S: Read + Write> {
    conn: GdbConnection<S>,
    session: &'s mut ReplaySession,
    detached: bool,
}

impl<'s, S: Read + Write> GdbServer<'s, S> {
    pub fn new(stream: S, session: &'s mut ReplaySession) -> GdbServer<'s, S> {
        GdbServer {
            conn: GdbConnection::new(stream),
            session,
            detached: false,
        }
    }

    /// Answer requests until the debugger detaches or hangs up.
    pub fn serve(&mut self) -> io::Result<()> {
        while self.conn.is_connection_alive() && !self.detached {
            match self.conn.recv_packet()? {
                ReceivedPacket::Packet(payload) => self.process_packet(&payload)?,
                ReceivedPacket::BadChecksum => continue,
                ReceivedPacket::Closed => break,
            }
        }
        log!(LogInfo, "Debugger session finished");
        Ok(())
    }

    fn process_packet(&mut self, payload: &[u8]) -> io::Result<()> {
        let req = match GdbRequest::parse(payload) {
            Ok(req) => req,
            Err(e) => {
                log!(
                    LogWarn,
                    "Bad request `{}': {}",
                    String::from_utf8_lossy(payload),
                    e
                );
                return self.conn.reply_error(ERR_BAD_REQUEST);
            }
        };
        log!(LogInfo, "Request: {:?}", req);

        let reply = self.process_request(&req).and_then(|reply| {
            check_reply_size(reply.encoded_len(), PACKET_BUF_SIZE)?;
            Ok(reply)
        });
        match reply {
            Ok(reply) => self.send(reply)?,
            Err(e) => {
                log!(LogWarn, "{:?} failed: {}", req, e);
                self.conn.reply_error(ERR_BAD_REQUEST)?;
            }
        }

        match req {
            GdbRequest::StartNoAckMode => self.conn.set_no_ack(),
            GdbRequest::Detach => self.detached = true,
            _ => (),
        }
        Ok(())
    }

    fn process_request(&mut self, req: &GdbRequest) -> Result<Reply, RequestError> {
        let reply = match req {
            GdbRequest::GetRegs => Reply::Hex(self.session.registers().to_gdb_bytes()),
            GdbRequest::GetReg(r) => Reply::Hex(self.session.registers().reg_bytes(*r).to_vec()),
            GdbRequest::GetMem { addr, len } => {
                // Never read more than could possibly be sent.
                let len = min(*len, PACKET_BUF_SIZE as u64) as usize;
                let bytes = self.session.read_mem(*addr, len);
                if bytes.is_empty() && len > 0 {
                    Reply::Error(ERR_FAILED)
                } else {
                    Reply::Hex(bytes)
                }
            }
            // The trace is read-only.
            GdbRequest::SetReg { .. } | GdbRequest::SetMem { .. } => Reply::Error(ERR_FAILED),
            GdbRequest::SetBreakpoint { kind, addr } | GdbRequest::RemoveBreakpoint { kind, addr } => {
                match kind {
                    BreakpointKind::Software | BreakpointKind::Hardware => {
                        if let GdbRequest::SetBreakpoint { .. } = req {
                            self.session.add_breakpoint(*addr);
                        } else {
                            self.session.remove_breakpoint(*addr);
                        }
                        Reply::Ok
                    }
                    BreakpointKind::Watch(t) => {
                        log!(LogInfo, "Watchpoint type {} is not supported", t);
                        Reply::Unsupported
                    }
                }
            }
            GdbRequest::Continue => Reply::Stop(self.session.cont()),
            GdbRequest::Step => Reply::Stop(self.session.step()),
            GdbRequest::ResumeActions => Reply::Text(VCONT_ACTIONS.into()),
            GdbRequest::Restart | GdbRequest::Kill => {
                self.session.restart();
                Reply::Silent
            }
            GdbRequest::GetStopReason => {
                log!(LogInfo, "Last stop: {:?}", self.session.last_stop());
                Reply::Stop(StopReason::Trap)
            }
            GdbRequest::IsThreadAlive | GdbRequest::SetThread => Reply::Ok,
            GdbRequest::Supported => Reply::Text(SUPPORTED_FEATURES.into()),
            GdbRequest::ReadFeatures {
                annex,
                offset,
                len,
            } => {
                if annex != "target.xml" {
                    Reply::Error(ERR_BAD_REQUEST)
                } else {
                    xfer_chunk(TARGET_XML.as_bytes(), *offset, *len)
                }
            }
            GdbRequest::Attached => Reply::Text("1".into()),
            GdbRequest::CurrentThread => Reply::Text("QC1".into()),
            GdbRequest::ThreadListFirst => Reply::Text("m1".into()),
            GdbRequest::ThreadListNext => Reply::Text("l".into()),
            GdbRequest::StartNoAckMode | GdbRequest::ExtendedMode | GdbRequest::Detach => {
                Reply::Ok
            }
            GdbRequest::Unsupported => Reply::Unsupported,
        };
        Ok(reply)
    }

    fn send(&mut self, reply: Reply) -> io::Result<()> {
        match reply {
            Reply::Ok => self.conn.reply_ok(),
            Reply::Error(code) => self.conn.reply_error(code),
            Reply::Unsupported => self.conn.reply_unsupported(),
            Reply::Text(s) => self.conn.write_packet(s.as_bytes()),
            Reply::Hex(data) => self.conn.write_hex_bytes_packet(&data),
            Reply::Binary(prefix, data) => self.conn.write_binary_packet(&[prefix], &data),
            Reply::Stop(StopReason::Trap) => self.conn.notify_stop(SIGTRAP),
            Reply::Stop(StopReason::Terminated) => self.conn.notify_exit_code(0),
            Reply::Silent => Ok(()),
        }
    }
}

/// `len` bytes of `data` from `offset`: `m` if more remains, `l` if this is
/// the last chunk.
fn xfer_chunk(data: &[u8], offset: u64, len: u64) -> Reply {
    if offset > data.len() as u64 {
        return Reply::Error(ERR_BAD_REQUEST);
    }
    let start = offset as usize;
    let end = min(data.len() as u64, offset.saturating_add(len)) as usize;
    let prefix = if end == data.len() { b'l' } else { b'm' };
    Reply::Binary(prefix, data[start..end].to_vec())
}

fn nix_to_io(e: nix::Error) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Listen on `host:port` with `SO_REUSEADDR` and `SO_REUSEPORT` set, so a
/// restarted server can take the port over immediately.
pub fn open_listener(host: &str, port: u16) -> io::Result<TcpListener> {
    let ip: Ipv4Addr = host.parse().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Bad listen address `{}': {}", host, e),
        )
    })?;
    let mut fd = ScopedFd::from_raw(
        socket(
            AddressFamily::Inet,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(nix_to_io)?,
    );
    debug_assert!(fd.is_open());
    setsockopt(fd.as_raw(), sockopt::ReuseAddr, &true).map_err(nix_to_io)?;
    setsockopt(fd.as_raw(), sockopt::ReusePort, &true).map_err(nix_to_io)?;
    let addr = SockAddr::new_inet(InetAddr::from_std(&SocketAddr::new(ip.into(), port)));
    bind(fd.as_raw(), &addr).map_err(nix_to_io)?;
    listen(fd.as_raw(), 1).map_err(nix_to_io)?;
    // The listener owns the descriptor from here on.
    Ok(unsafe { TcpListener::from_raw_fd(fd.extract()) })
}

/// Accept debuggers on `listener` one at a time. Each one gets a fresh view of
/// the session. Without `keep_listening` only the first is served.
pub fn serve_listener(
    listener: &TcpListener,
    session: &mut ReplaySession,
    keep_listening: bool,
) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept()?;
        log!(LogInfo, "Debugger connected from {}", peer);
        stream.set_nodelay(true)?;
        session.reset_for_new_connection();

        let mut server = GdbServer::new(stream, session);
        if let Err(e) = server.serve() {
            log!(LogError, "Connection to {} failed: {}", peer, e);
        }
        if !keep_listening {
            return Ok(());
        }
        log!(LogInfo, "Waiting for the next debugger connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        gdb_connection::{checksum, test_util::Duplex},
        session::test_util,
        trace::{
            cpu_trace::{CpuTrace, RetiredInsn},
            mem_trace::{MemInit, MemTrace},
            reg_file_trace::RegFileTrace,
            write_trace::WriteTrace,
            Traces,
        },
    };
    use std::{net::TcpStream, thread};

    fn frame(payload: &str) -> String {
        format!("${}#{:02x}", payload, checksum(payload.as_bytes()))
    }

    /// Send `requests`; return everything the server wrote.
    fn converse(session: &mut ReplaySession, requests: &[&str]) -> String {
        let input: String = requests.iter().map(|r| frame(r)).collect();
        let mut server = GdbServer::new(Duplex::new(input.as_bytes()), session);
        server.serve().unwrap();
        server.conn.stream().output_str()
    }

    fn acked(replies: &[&str]) -> String {
        replies
            .iter()
            .map(|r| format!("+{}", frame(r)))
            .collect()
    }

    #[test]
    fn breakpoint_continue_step_detach() {
        let mut session = test_util::session();
        let out = converse(
            &mut session,
            &["?", "Z0,104,4", "c", "p20", "c", "s", "s", "D", "g"],
        );
        assert_eq!(
            acked(&["S05", "OK", "S05", "04010000", "S05", "W00", "W00", "OK"]),
            out
        );
        assert_eq!(0x108, session.current().pc);
    }

    #[test]
    fn restart_and_kill_are_silent() {
        let mut session = test_util::session();
        let out = converse(&mut session, &["s", "R00", "p20", "s", "k"]);
        let expected = format!(
            "{}+{}{}",
            acked(&["S05"]),
            acked(&["00010000", "S05"]),
            "+"
        );
        assert_eq!(expected, out);
        assert_eq!(0x100, session.current().pc);
    }

    #[test]
    fn memory_requests() {
        let mut session = test_util::session();
        let out = converse(
            &mut session,
            &["m1000,4", "m1002,8", "m2000,4", "M1000,1:ff", "X1000,1:a", "m,4"],
        );
        assert_eq!(
            acked(&["01020304", "0304", "E01", "E01", "E01", "E00"]),
            out
        );
    }

    #[test]
    fn queries_and_unsupported() {
        let mut session = test_util::session();
        let out = converse(
            &mut session,
            &[
                "qSupported:swbreak+",
                "qAttached",
                "qC",
                "qfThreadInfo",
                "qsThreadInfo",
                "Hg0",
                "T1",
                "vCont?",
                "Z2,1000,4",
                "vMustReplyEmpty",
                "p21",
            ],
        );
        assert_eq!(
            acked(&[
                SUPPORTED_FEATURES,
                "1",
                "QC1",
                "m1",
                "l",
                "OK",
                "OK",
                VCONT_ACTIONS,
                "",
                "",
                "E00",
            ]),
            out
        );
    }

    #[test]
    fn no_ack_mode() {
        let mut session = test_util::session();
        let out = converse(&mut session, &["QStartNoAckMode", "?"]);
        assert_eq!(format!("+{}{}", frame("OK"), frame("S05")), out);
    }

    #[test]
    fn target_description_in_chunks() {
        let mut session = test_util::session();
        let xml = TARGET_XML;
        let out = converse(
            &mut session,
            &[
                "qXfer:features:read:target.xml:0,10",
                &format!("qXfer:features:read:target.xml:10,{:x}", xml.len()),
                "qXfer:features:read:other.xml:0,10",
            ],
        );
        let first = format!("m{}", &xml[..0x10]);
        let rest = format!("l{}", &xml[0x10..]);
        assert_eq!(acked(&[first.as_str(), rest.as_str(), "E00"]), out);
    }

    #[test]
    fn oversized_reply_is_refused() {
        let traces = Traces {
            cpu: CpuTrace::from_insns(vec![RetiredInsn { time: 0, pc: 0 }]),
            reg_file: RegFileTrace::default(),
            mem: MemTrace::new(
                WriteTrace::default(),
                Some(MemInit {
                    base: 0,
                    contents: vec![0x5a; 1024],
                }),
            ),
        };
        let mut session = ReplaySession::new(traces).unwrap();
        let out = converse(&mut session, &["m0,100", "m0,200"]);
        let full = "5a".repeat(0x100);
        assert_eq!(acked(&[full.as_str(), "E00"]), out);
    }

    #[test]
    fn serves_one_tcp_connection() {
        let listener = open_listener("127.0.0.1", 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream.write_all(b"$?#3f$D#44").unwrap();
            let mut out = String::new();
            stream.read_to_string(&mut out).unwrap();
            out
        });

        let mut session = test_util::session();
        session.add_breakpoint(0x104);
        serve_listener(&listener, &mut session, false).unwrap();
        assert_eq!("+$S05#b8+$OK#9a", client.join().unwrap());
        // The connection started from a clean slate.
        assert!(session.breakpoints().is_empty());
    }

    #[test]
    fn bad_listen_address() {
        let err = open_listener("not-an-ip", 0).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidInput, err.kind());
    }
}
