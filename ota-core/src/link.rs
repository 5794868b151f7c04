//! The capability surface the CORE consumes from a network transport.
//!
//! Concrete adapters (Wi-Fi, cellular) own their AT-chat, baud negotiation
//! and buffer bookkeeping; the CORE only ever calls through this trait, the
//! same way the teacher's `xmodem`/`kmain` code only calls through
//! `io::Read`/`io::Write` and never touches `MiniUart`'s registers directly.

use crate::error::LinkError;

/// Uniform send/receive/open/close surface over a Wi-Fi or cellular modem.
pub trait LinkAdapter {
    /// Transport-specific socket handle (e.g. an AT "link ID").
    type Socket: Copy;

    /// `true` once this link has a usable IP address (DHCP lease / PDP
    /// context up). [`crate::update_controller::UpdateController`] only
    /// queries a link once this returns `true`.
    fn has_ip(&self) -> bool;

    fn open_tcp(&mut self, host: &str, port: u16) -> Result<Self::Socket, LinkError>;

    fn open_udp(&mut self, host: &str, port: u16, local_port: u16) -> Result<Self::Socket, LinkError>;

    fn send(&mut self, socket: Self::Socket, bytes: &[u8]) -> Result<(), LinkError>;

    fn close(&mut self, socket: Self::Socket);

    /// Current contents of the socket's receive buffer. Returns an empty
    /// slice if nothing has arrived since the last snapshot was consumed.
    fn receive_buffer_snapshot(&self, socket: Self::Socket) -> &[u8];

    /// Discard the bytes returned by the last [`Self::receive_buffer_snapshot`].
    fn consume_receive_buffer(&mut self, socket: Self::Socket, len: usize);

    /// Busy-wait (refreshing the watchdog internally is the caller's job)
    /// until `token` appears in the receive stream, or `timeout_ms` elapses.
    fn wait_for_token(&mut self, socket: Self::Socket, token: &[u8], timeout_ms: u32) -> bool;

    /// Milliseconds since the receive buffer for `socket` last grew. Used by
    /// the cellular adapter as a framing signal (idle gap >= 10 ms means a
    /// complete datagram notification has landed).
    fn idle_gap_ms(&self, socket: Self::Socket) -> u32;

    /// Remote UDP port the most recently received datagram arrived from, if
    /// the transport can report it. Used to discover the TFTP server's
    /// ephemeral data port from its first response to the RRQ (the "first-
    /// response-port" rule): the initial RRQ goes to port 69, but every
    /// subsequent ACK must target the port the server actually replies from.
    fn last_datagram_source_port(&self, socket: Self::Socket) -> Option<u16>;

    /// Re-point `socket` so that subsequent `send` calls go to `port`.
    fn retarget_remote_port(&mut self, socket: Self::Socket, port: u16);
}

/// Idle-gap threshold (ms) the cellular transport uses as a framing signal
/// that a complete datagram notification has been delivered into the buffer.
pub const CELLULAR_IDLE_GAP_MS: u32 = 10;
