//! Packet framing for the gdb remote serial protocol.

use crate::log::LogLevel::{LogDebug, LogWarn};
use memchr::memchr;
use std::{
    fmt::Write as FmtWrite,
    io::{self, Read, Write},
    str,
};

/// Largest reply payload we are prepared to send. Advertised to the client as
/// `PacketSize` (in hex).
pub const PACKET_BUF_SIZE: usize = 0x200;

const INTERRUPT_CHAR: u8 = 0x03;

pub enum ReceivedPacket {
    Packet(Vec<u8>),
    /// The packet was dropped and a `-` sent; the client will resend.
    BadChecksum,
    /// End of stream.
    Closed,
}

/// This struct wraps up the state of the gdb protocol on one connection.
pub struct GdbConnection<S: Read + Write> {
    stream: S,
    /// buffered input from gdb
    inbuf: Vec<u8>,
    /// true when "no-ack mode" enabled, in which we don't have
    /// to send ack packets back to gdb.
    no_ack: bool,
    connection_alive: bool,
}

impl<S: Read + Write> GdbConnection<S> {
    pub fn new(stream: S) -> GdbConnection<S> {
        GdbConnection {
            stream,
            inbuf: Vec::new(),
            no_ack: false,
            connection_alive: true,
        }
    }

    /// Returns false if the connection has been closed
    pub fn is_connection_alive(&self) -> bool {
        self.connection_alive
    }

    pub fn set_no_ack(&mut self) {
        self.no_ack = true;
    }

    /// read() incoming data exactly one time. May block. Returns false at end
    /// of stream.
    fn read_data_once(&mut self) -> io::Result<bool> {
        let mut buf = [0u8; 4096];
        let nread = loop {
            match self.stream.read(&mut buf) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.connection_alive = false;
                    return Err(e);
                }
            }
        };
        if nread == 0 {
            log!(LogDebug, "Connection closed by peer");
            self.connection_alive = false;
            return Ok(false);
        }
        self.inbuf.extend_from_slice(&buf[..nread]);
        Ok(true)
    }

    /// Consume bytes in the input buffer until start-of-packet ('$'). Acks and
    /// interrupts in front of it are dropped. Return true if seen.
    fn skip_to_packet_start(&mut self) -> bool {
        let end = memchr(b'$', &self.inbuf).unwrap_or(self.inbuf.len());
        for &b in &self.inbuf[..end] {
            match b {
                b'+' => (),
                b'-' => log!(LogWarn, "Client asked for a resend; ignoring"),
                INTERRUPT_CHAR => log!(LogDebug, "Ignoring interrupt: the trace is not running"),
                other => log!(LogDebug, "Skipping stray byte {:#04x}", other),
            }
        }
        self.inbuf.drain(..end);
        !self.inbuf.is_empty()
    }

    /// Block until a complete `$...#cs` packet has been read, then ack or
    /// nack it.
    pub fn recv_packet(&mut self) -> io::Result<ReceivedPacket> {
        loop {
            if self.skip_to_packet_start() {
                if let Some(hash) = memchr(b'#', &self.inbuf) {
                    if self.inbuf.len() >= hash + 3 {
                        return self.take_packet(hash);
                    }
                }
            }
            if !self.read_data_once()? {
                return Ok(ReceivedPacket::Closed);
            }
        }
    }

    fn take_packet(&mut self, hash: usize) -> io::Result<ReceivedPacket> {
        let packet: Vec<u8> = self.inbuf.drain(..hash + 3).collect();
        let payload = &packet[1..hash];
        let received = hex_byte(&packet[hash + 1..]);
        let computed = checksum(payload);
        if is_logging!(LogDebug) {
            log!(LogDebug, "<- ${}", String::from_utf8_lossy(&packet[1..]));
        }

        if received != Some(computed) {
            log!(
                LogWarn,
                "Bad checksum on packet: computed {:02x}, received {:?}",
                computed,
                received
            );
            if !self.no_ack {
                self.write_data_raw(b"-")?;
            }
            return Ok(ReceivedPacket::BadChecksum);
        }

        if !self.no_ack {
            self.write_data_raw(b"+")?;
        }
        Ok(ReceivedPacket::Packet(payload.to_vec()))
    }

    fn write_data_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)?;
        self.stream.flush()
    }

    /// Send `payload` framed as `$payload#cs`. The payload must already be
    /// escaped if it contains binary data.
    pub fn write_packet(&mut self, payload: &[u8]) -> io::Result<()> {
        let mut out = Vec::with_capacity(payload.len() + 4);
        out.push(b'$');
        out.extend_from_slice(payload);
        out.push(b'#');
        out.extend_from_slice(format!("{:02x}", checksum(payload)).as_bytes());
        if is_logging!(LogDebug) {
            log!(LogDebug, "-> {}", String::from_utf8_lossy(&out));
        }
        self.write_data_raw(&out)
    }

    pub fn write_hex_bytes_packet(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_packet(encode_hex(data).as_bytes())
    }

    pub fn write_binary_packet(&mut self, prefix: &[u8], data: &[u8]) -> io::Result<()> {
        let mut payload = prefix.to_vec();
        payload.extend_from_slice(&encode_binary(data));
        self.write_packet(&payload)
    }

    pub fn reply_ok(&mut self) -> io::Result<()> {
        self.write_packet(b"OK")
    }

    pub fn reply_error(&mut self, code: u8) -> io::Result<()> {
        self.write_packet(format!("E{:02x}", code).as_bytes())
    }

    /// The empty reply: "this request is not supported".
    pub fn reply_unsupported(&mut self) -> io::Result<()> {
        self.write_packet(b"")
    }

    /// The target has stopped with signal `sig`.
    pub fn notify_stop(&mut self, sig: u8) -> io::Result<()> {
        self.write_packet(format!("S{:02x}", sig).as_bytes())
    }

    /// The target has exited with `code`.
    pub fn notify_exit_code(&mut self, code: u8) -> io::Result<()> {
        self.write_packet(format!("W{:02x}", code).as_bytes())
    }
}

#[cfg(test)]
impl<S: Read + Write> GdbConnection<S> {
    pub fn stream(&self) -> &S {
        &self.stream
    }
}

/// 8-bit sum of the payload bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

pub fn encode_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        write!(s, "{:02x}", b).unwrap_or(());
    }
    s
}

pub fn decode_hex(hex: &[u8]) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chunks(2).map(hex_byte).collect()
}

/// Two hex digits. Unlike `from_str_radix` this rejects a sign.
fn hex_byte(pair: &[u8]) -> Option<u8> {
    if pair.len() != 2 || !pair.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    str::from_utf8(pair)
        .ok()
        .and_then(|s| u8::from_str_radix(s, 16).ok())
}

fn needs_escape(b: u8) -> bool {
    matches!(b, b'$' | b'#' | b'}' | b'*')
}

/// Escape `$`, `#`, `}` and `*` as `}` followed by the byte XOR 0x20.
pub fn encode_binary(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        if needs_escape(b) {
            out.push(b'}');
            out.push(b ^ 0x20);
        } else {
            out.push(b);
        }
    }
    out
}

pub fn decode_binary(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut it = data.iter();
    while let Some(&b) = it.next() {
        if b == b'}' {
            if let Some(&escaped) = it.next() {
                out.push(escaped ^ 0x20);
            }
        } else {
            out.push(b);
        }
    }
    out
}
