//! A [`LinkAdapter`] over a line-oriented AT-command UART, generalizing the
//! register-poll style of the teacher's `pi::uart::MiniUart` to the modem
//! transports this board actually has: a Wi-Fi module and a cellular modem,
//! each reachable only through `AT+...` chat and an asynchronously filled
//! receive FIFO.
//!
//! This module owns the one piece of genuinely unsafe code in the crate:
//! raw register access to a memory-mapped UART. Everything above it
//! (`ota_core::link::LinkAdapter`) is safe.

use core::fmt::Write as _;

use heapless::{String, Vec};
use ota_core::error::LinkError;
use ota_core::link::LinkAdapter;
use ota_core::tftp::FULL_DATAGRAM_LEN;

/// Receive buffer capacity: one full TFTP datagram plus chat slack.
const RX_CAPACITY: usize = 640;

/// Scratch buffer for composing one `AT+...` command line at a time.
const SCRATCH_CAPACITY: usize = 80;

/// How long to wait for an AT command's `OK`/`>` reply before giving up.
const AT_COMMAND_TIMEOUT_MS: u32 = 5_000;

/// Minimum spacing between `AT+CIFSR`/`AT+CGPADDR` retries while `has_ip()`
/// is false.
const IP_RECHECK_INTERVAL_MS: u32 = 5_000;

#[repr(C)]
struct UartRegisters {
    data: u32,
    status: u32,
}

const STATUS_RX_READY: u32 = 1 << 0;
const STATUS_TX_READY: u32 = 1 << 1;

/// Which modem this instance chats with. Only affects the idle-gap
/// threshold `LinkAdapter::idle_gap_ms` reports, per §6: the cellular path
/// frames datagrams by idle gap because its AT firmware delivers them as
/// unsolicited `+IPD`-style notifications rather than a clean byte stream.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Wifi,
    Cellular,
}

/// A single opened TCP/UDP socket's local bookkeeping. The AT firmware
/// tracks the actual connection; this is just our view of it.
#[derive(Clone, Copy)]
pub struct AtSocket {
    id: u8,
    remote_port: u16,
}

/// One complete `+IPD,<id>,<len>,<remote_ip>,<remote_port>:<payload>`
/// notification, as the ESP-AT-style Wi-Fi/cellular firmware this board
/// assumes reports inbound UDP/TCP data (`AT+CIPDINFO=1`).
struct IpdFrame<'a> {
    remote_port: u16,
    payload: &'a [u8],
}

/// A datagram copied out of a link's receive buffer, sized for one full
/// TFTP DATA/ACK exchange.
pub type Datagram = Vec<u8, FULL_DATAGRAM_LEN>;

/// Scan `buf` for one complete `+IPD,...` notification and return it plus
/// how many leading bytes of `buf` it consumed. Returns `None` if the
/// marker, a required field, or the full payload hasn't arrived yet —
/// replaces ad hoc `"recv"`-marker scanning with a single parser (§9).
fn parse_ipd_frame(buf: &[u8]) -> Option<(IpdFrame<'_>, usize)> {
    const MARKER: &[u8] = b"+IPD,";
    let marker_at = find(buf, MARKER)?;
    let rest = &buf[marker_at + MARKER.len()..];

    let (_link_id, rest) = take_field(rest, b',')?;
    let (len_bytes, rest) = take_field(rest, b',')?;
    let len = parse_decimal(len_bytes)?;
    let (_remote_ip, rest) = take_field(rest, b',')?;
    let (port_bytes, rest) = take_field(rest, b':')?;
    let port = parse_decimal(port_bytes)? as u16;

    if rest.len() < len {
        return None;
    }

    let payload = &rest[..len];
    let consumed = buf.len() - (rest.len() - len);
    Some((IpdFrame { remote_port: port, payload }, consumed))
}

/// Split `s` at the first occurrence of `sep`, returning the bytes before it
/// and the remainder after it.
fn take_field(s: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
    let pos = s.iter().position(|&b| b == sep)?;
    Some((&s[..pos], &s[pos + 1..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_decimal(bytes: &[u8]) -> Option<usize> {
    if bytes.is_empty() {
        return None;
    }
    let mut v: usize = 0;
    for &b in bytes {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as usize)?;
    }
    Some(v)
}

/// AT-chat [`LinkAdapter`] over a memory-mapped UART.
pub struct SerialLink {
    registers: &'static mut UartRegisters,
    transport: Transport,
    has_ip: bool,
    ip_recheck_due: bool,
    last_ip_check_ms: u32,
    rx: Vec<u8, RX_CAPACITY>,
    last_rx_growth_ms: u32,
    now_ms: u32,
    next_socket_id: u8,
    last_source_port: Option<u16>,
    scratch: String<SCRATCH_CAPACITY>,
}

impl SerialLink {
    /// # Safety
    /// `base_addr` must be the real base address of a UART peripheral with
    /// the `data`/`status` register layout this module assumes, mapped for
    /// the lifetime of the returned value.
    pub unsafe fn new(base_addr: usize, transport: Transport) -> Self {
        SerialLink {
            registers: &mut *(base_addr as *mut UartRegisters),
            transport,
            has_ip: false,
            ip_recheck_due: true,
            last_ip_check_ms: 0,
            rx: Vec::new(),
            last_rx_growth_ms: 0,
            now_ms: 0,
            next_socket_id: 0,
            last_source_port: None,
            scratch: String::new(),
        }
    }

    /// Fed by the foreground's 1 ms tick so `idle_gap_ms` and the IP-recheck
    /// cadence have a clock to measure against.
    pub fn on_tick_ms(&mut self, dt: u32) {
        self.now_ms = self.now_ms.wrapping_add(dt);
    }

    fn status(&self) -> u32 {
        unsafe { core::ptr::read_volatile(&self.registers.status) }
    }

    fn write_byte(&mut self, byte: u8) {
        while self.status() & STATUS_TX_READY == 0 {}
        unsafe { core::ptr::write_volatile(&mut self.registers.data, byte as u32) };
    }

    /// Write out whatever command line is currently sitting in `scratch`.
    /// Copies it to a local buffer first so the loop doesn't hold a borrow
    /// of `self.scratch` across the `&mut self` calls to `write_byte`.
    fn write_scratch(&mut self) {
        let mut buf = [0u8; SCRATCH_CAPACITY];
        let len = self.scratch.len();
        buf[..len].copy_from_slice(self.scratch.as_bytes());
        for &b in &buf[..len] {
            self.write_byte(b);
        }
    }

    /// Drain whatever bytes the UART has ready into the receive buffer.
    /// Called once per foreground loop iteration, ahead of any
    /// `receive_buffer_snapshot`/`take_datagram` call.
    pub fn poll(&mut self) {
        let mut grew = false;
        while self.status() & STATUS_RX_READY != 0 {
            let byte = unsafe { core::ptr::read_volatile(&self.registers.data) & 0xFF } as u8;
            if self.rx.push(byte).is_err() {
                break;
            }
            grew = true;
        }
        if grew {
            self.last_rx_growth_ms = self.now_ms;
        }
    }

    /// Blocking AT chat that brings up this link's IP (Wi-Fi DHCP lease, or
    /// cellular PDP context) and records whether it succeeded. The exact
    /// command is a representative stand-in for whichever vendor AT set the
    /// real module speaks; `UpdateController::select_link` only ever
    /// consults the resulting `has_ip()` flag, not how it got there.
    fn bring_up_ip(&mut self) {
        self.scratch.clear();
        let cmd = match self.transport {
            Transport::Wifi => "AT+CIFSR\r\n",
            Transport::Cellular => "AT+CGPADDR=1\r\n",
        };
        let _ = self.scratch.push_str(cmd);
        self.write_scratch();

        let probe = AtSocket { id: 0, remote_port: 0 };
        let replied = self.wait_for_token(probe, b"OK", AT_COMMAND_TIMEOUT_MS);
        self.has_ip = replied && find(&self.rx, b"0.0.0.0").is_none();
        self.rx.clear();
    }

    /// Retry `bring_up_ip` at a fixed cadence until it succeeds. Called
    /// once per foreground loop iteration so `has_ip()` eventually goes true
    /// once the module actually associates (§4.8: "each link is asked
    /// ... when its link becomes steady").
    pub fn poll_ip_ready(&mut self) {
        if self.has_ip {
            return;
        }
        if !self.ip_recheck_due && self.now_ms.wrapping_sub(self.last_ip_check_ms) < IP_RECHECK_INTERVAL_MS {
            return;
        }
        self.ip_recheck_due = false;
        self.last_ip_check_ms = self.now_ms;
        self.bring_up_ip();
    }

    /// Attempt to extract one complete `+IPD,...` datagram from the receive
    /// buffer, consuming exactly the bytes the frame occupied. Wi-Fi frames
    /// are length-prefixed and can be parsed as soon as header and payload
    /// have both arrived; cellular's async delivery additionally needs
    /// `idle_gap_ms` to have quiesced past `idle_gap_threshold_ms` before
    /// the buffered bytes are trusted to be a complete notification (§6).
    pub fn take_datagram(&mut self, socket: AtSocket, idle_gap_threshold_ms: u32) -> Option<Datagram> {
        if self.transport == Transport::Cellular && self.idle_gap_ms(socket) < idle_gap_threshold_ms {
            return None;
        }
        let (frame, consumed) = parse_ipd_frame(&self.rx)?;
        self.last_source_port = Some(frame.remote_port);
        let mut datagram: Datagram = Vec::new();
        let _ = datagram.extend_from_slice(frame.payload);
        self.consume_receive_buffer(socket, consumed);
        Some(datagram)
    }
}

impl LinkAdapter for SerialLink {
    type Socket = AtSocket;

    fn has_ip(&self) -> bool {
        self.has_ip
    }

    fn open_tcp(&mut self, host: &str, port: u16) -> Result<Self::Socket, LinkError> {
        if !self.has_ip {
            return Err(LinkError::NoIp);
        }
        self.scratch.clear();
        let _ = write!(self.scratch, "AT+CIPSTART=\"TCP\",\"{host}\",{port}\r\n");
        self.write_scratch();

        let id = self.next_socket_id;
        self.next_socket_id = self.next_socket_id.wrapping_add(1);
        let socket = AtSocket { id, remote_port: port };

        if self.wait_for_token(socket, b"OK", AT_COMMAND_TIMEOUT_MS) {
            self.rx.clear();
            Ok(socket)
        } else {
            Err(LinkError::OpenFailed)
        }
    }

    fn open_udp(&mut self, host: &str, port: u16, local_port: u16) -> Result<Self::Socket, LinkError> {
        if !self.has_ip {
            return Err(LinkError::NoIp);
        }
        self.scratch.clear();
        let _ = write!(self.scratch, "AT+CIPSTART=\"UDP\",\"{host}\",{port},{local_port}\r\n");
        self.write_scratch();

        let id = self.next_socket_id;
        self.next_socket_id = self.next_socket_id.wrapping_add(1);
        let socket = AtSocket { id, remote_port: port };

        if self.wait_for_token(socket, b"OK", AT_COMMAND_TIMEOUT_MS) {
            self.rx.clear();
            Ok(socket)
        } else {
            Err(LinkError::OpenFailed)
        }
    }

    fn send(&mut self, socket: Self::Socket, bytes: &[u8]) -> Result<(), LinkError> {
        self.scratch.clear();
        let _ = write!(self.scratch, "AT+CIPSEND={},{}\r\n", socket.id, bytes.len());
        self.write_scratch();
        if !self.wait_for_token(socket, b">", AT_COMMAND_TIMEOUT_MS) {
            return Err(LinkError::SendFailed);
        }
        self.rx.clear();
        for &b in bytes {
            self.write_byte(b);
        }
        Ok(())
    }

    fn close(&mut self, socket: Self::Socket) {
        self.scratch.clear();
        let _ = write!(self.scratch, "AT+CIPCLOSE={}\r\n", socket.id);
        self.write_scratch();
        self.rx.clear();
    }

    fn receive_buffer_snapshot(&self, _socket: Self::Socket) -> &[u8] {
        &self.rx
    }

    fn consume_receive_buffer(&mut self, _socket: Self::Socket, len: usize) {
        let len = len.min(self.rx.len());
        let mut remaining: Vec<u8, RX_CAPACITY> = Vec::new();
        let _ = remaining.extend_from_slice(&self.rx[len..]);
        self.rx = remaining;
    }

    fn wait_for_token(&mut self, socket: Self::Socket, token: &[u8], timeout_ms: u32) -> bool {
        let deadline = self.now_ms.wrapping_add(timeout_ms);
        loop {
            crate::board::refresh_watchdog();
            self.poll();
            if self.rx.windows(token.len().max(1)).any(|w| w == token) {
                return true;
            }
            if self.now_ms >= deadline {
                return false;
            }
            let _ = socket;
        }
    }

    fn idle_gap_ms(&self, _socket: Self::Socket) -> u32 {
        match self.transport {
            Transport::Cellular => self.now_ms.saturating_sub(self.last_rx_growth_ms),
            // The Wi-Fi module's AT firmware frames datagrams itself, so
            // there is no idle-gap heuristic to report.
            Transport::Wifi => 0,
        }
    }

    fn last_datagram_source_port(&self, _socket: Self::Socket) -> Option<u16> {
        self.last_source_port
    }

    fn retarget_remote_port(&mut self, socket: Self::Socket, port: u16) {
        self.last_source_port = Some(port);
        let _ = socket;
    }
}
