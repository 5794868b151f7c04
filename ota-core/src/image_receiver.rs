//! Orchestrates a single TFTP download: the one-block-delayed CRC pipeline,
//! word-at-a-time flash programming of the staging region, and the
//! promotion finalizer.
//!
//! # The one-block delay
//!
//! The trailing CRC32 lives inside the payload of whichever block turns out
//! to be the *last* one — and a receiver can't know a block is last until
//! the *next* datagram fails to arrive full. So this state machine always
//! commits the block held in `prev_block`, one step behind `curr`: by the
//! time `prev` is flashed, whether it was the terminal block is already
//! known from the datagram that followed it.
//!
//! The spec's prose also has each "mid" commit fold `prev`'s payload *minus
//! its trailing 4 bytes* into the CRC, "to remain symmetric with the
//! terminal case" — taken literally that would permanently drop 4 real
//! payload bytes at every block boundary, which can't be squared with
//! Testable Property 4 (`crc32(payload without its last 4 bytes)` must
//! match exactly for *any* payload). This implementation instead folds a
//! block's full payload whenever that block is provably non-terminal (every
//! `prev` in the `Mid` case, and `prev` in the `Last`/`len>4` case), and only
//! ever excludes the last 4 bytes of whichever block is actually terminal.
//! See `DESIGN.md` for the full resolution of this open question.

use heapless::Vec;

use crate::crc32;
use crate::error::{SessionError, UpdateError};
use crate::flash_map::{FlashDevice, FlashMap, Region, VERSION_LEN};
use crate::link::LinkAdapter;
use crate::system::SystemControl;
use crate::tftp::{self, BlockKind, FULL_DATAGRAM_LEN};

/// Outcome of feeding one datagram to [`ImageReceiver::on_datagram`].
///
/// There is no `Promoted` or `Rejected` variant: both the CRC-match and
/// CRC-mismatch endings of the terminal block call through
/// [`SystemControl::system_reset`] and never return to the caller. A test
/// observes those endings by wrapping the call in `catch_unwind` against the
/// mock `SystemControl` and then inspecting flash/mock state, the same way a
/// flashed board is observed only by what it does after the next boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// A duplicate/out-of-order block; the previous ACK was resent verbatim.
    Retransmitted,
    /// Block `n` was accepted (and, for n >= 2, its predecessor committed
    /// to flash); ACK `n` was sent.
    Accepted(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Receiving,
}

/// Drives one TFTP download into the staging region of a [`FlashMap`].
pub struct ImageReceiver<F> {
    flash: FlashMap<F>,
    state: State,
    ack: [u8; 4],
    prev_block: Vec<u8, FULL_DATAGRAM_LEN>,
    expected_block_no: u16,
    crc_running: u32,
    stage_write_cursor: u32,
    pending_version: [u8; VERSION_LEN],
    tftp_timeout_ms: u32,
    connection_elapsed_ms: u32,
    /// Set once the server's ephemeral data port has been discovered from
    /// its first response and the socket retargeted to it (§6's
    /// "first-response-port" rule). The RRQ itself goes to port 69; every
    /// ACK after the first response must go to the port the server actually
    /// replied from.
    port_locked: bool,
}

/// Inter-block timeout: no DATA datagram arrived within this long after the
/// last ACK. Default per spec §4.8/§6.
pub const TFTP_TIMEOUT_MS: u32 = 40_000;

impl<F: FlashDevice> ImageReceiver<F> {
    pub fn new(flash: FlashMap<F>) -> Self {
        ImageReceiver {
            flash,
            state: State::Idle,
            ack: [0x00, 0x04, 0x00, 0x00],
            prev_block: Vec::new(),
            expected_block_no: 1,
            crc_running: crc32::INITIAL,
            stage_write_cursor: 0,
            pending_version: [0; VERSION_LEN],
            tftp_timeout_ms: 0,
            connection_elapsed_ms: 0,
            port_locked: false,
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.state == State::Receiving
    }

    /// Erase the staging region, send the RRQ, and enter the `Receiving`
    /// state. `new_version` is staged now so the promotion finalizer can
    /// write it once the download verifies.
    pub fn begin<L: LinkAdapter>(
        &mut self,
        link: &mut L,
        socket: L::Socket,
        filename: &[u8],
        new_version: [u8; VERSION_LEN],
    ) -> Result<(), UpdateError> {
        self.flash.erase_stage()?;

        let rrq = tftp::build_rrq(filename).ok_or(UpdateError::Link(crate::error::LinkError::SendFailed))?;
        link.send(socket, &rrq).map_err(UpdateError::Link)?;

        self.state = State::Receiving;
        self.ack = [0x00, 0x04, 0x00, 0x00];
        self.prev_block.clear();
        self.expected_block_no = 1;
        self.crc_running = crc32::INITIAL;
        self.stage_write_cursor = self.flash.stage_base();
        self.pending_version = new_version;
        self.tftp_timeout_ms = 0;
        self.connection_elapsed_ms = 0;
        self.port_locked = false;
        Ok(())
    }

    pub fn tick_ms(&mut self, dt: u32) {
        if self.state == State::Receiving {
            self.tftp_timeout_ms += dt;
            self.connection_elapsed_ms += dt;
        }
    }

    pub fn connection_elapsed_ms(&self) -> u32 {
        self.connection_elapsed_ms
    }

    pub fn tftp_timeout_elapsed_ms(&self) -> u32 {
        self.tftp_timeout_ms
    }

    /// Advance the state machine with one received datagram.
    pub fn on_datagram<L: LinkAdapter>(
        &mut self,
        link: &mut L,
        socket: L::Socket,
        system: &mut dyn SystemControl,
        datagram: &[u8],
    ) -> Result<Outcome, UpdateError> {
        debug_assert_eq!(self.state, State::Receiving);
        self.tftp_timeout_ms = 0;

        if !self.port_locked {
            if let Some(port) = link.last_datagram_source_port(socket) {
                link.retarget_remote_port(socket, port);
            }
            self.port_locked = true;
        }

        match tftp::classify(datagram, self.expected_block_no) {
            BlockKind::OutOfOrder => {
                link.send(socket, &self.ack).map_err(UpdateError::Link)?;
                Ok(Outcome::Retransmitted)
            }
            BlockKind::FirstBlock => {
                self.store_prev(datagram);
                self.send_next_ack(link, socket)?;
                self.expected_block_no = 2;
                Ok(Outcome::Accepted(1))
            }
            BlockKind::Mid => {
                // `prev` is provably not the terminal block: something full
                // arrived after it. Commit and fold it in full.
                self.commit(self.prev_payload_owned(), true)?;
                self.store_prev(datagram);
                self.send_next_ack(link, socket)?;
                let n = self.expected_block_no;
                self.expected_block_no += 1;
                Ok(Outcome::Accepted(n))
            }
            BlockKind::Last => {
                let embedded_crc = if datagram.len() == tftp::DATA_HEADER_LEN {
                    self.finish_with_crc_in_prev()?
                } else {
                    self.finish_with_crc_in_curr(datagram)?
                };
                self.send_next_ack(link, socket)?;

                let computed = crc32::finalize(self.crc_running);
                if computed == embedded_crc {
                    self.promote(system)
                } else {
                    self.flash.erase_stage()?;
                    system.save_energy_registers();
                    system.system_reset()
                }
            }
        }
    }

    fn prev_payload_owned(&self) -> Vec<u8, FULL_DATAGRAM_LEN> {
        self.prev_block.clone()
    }

    fn store_prev(&mut self, datagram: &[u8]) {
        self.prev_block.clear();
        let _ = self.prev_block.extend_from_slice(datagram);
    }

    fn send_next_ack<L: LinkAdapter>(&mut self, link: &mut L, socket: L::Socket) -> Result<(), UpdateError> {
        tftp::increment_ack(&mut self.ack);
        link.send(socket, &self.ack).map_err(UpdateError::Link)
    }

    /// Program `payload` (header already stripped) a word at a time,
    /// advancing `stage_write_cursor`. Partial trailing bytes (< 4) are
    /// never present in a well-formed image and are silently dropped, the
    /// same truncation the spec's `i = 1..tftpBufferIndex/4` loop performs.
    fn flash_payload(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        for word in payload.chunks_exact(4) {
            let w = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.flash
                .program_word(self.stage_write_cursor, w)
                .map_err(|_| SessionError::FlashProgramFailed)?;
            self.stage_write_cursor += 4;
        }
        Ok(())
    }

    /// Flash `block`'s payload (optionally its full 512 bytes, or minus its
    /// trailing 4 bytes when `block` is the terminal one) and fold the same
    /// span into the running CRC.
    fn commit(&mut self, block: Vec<u8, FULL_DATAGRAM_LEN>, full: bool) -> Result<(), UpdateError> {
        let payload = &block[tftp::DATA_HEADER_LEN..];
        let span = if full {
            payload
        } else {
            &payload[..payload.len().saturating_sub(4)]
        };
        self.flash_payload(span).map_err(UpdateError::Session)?;
        self.crc_running = crc32::update(self.crc_running, span);
        Ok(())
    }

    /// Terminal datagram carried no payload bytes (`len == 4`): the embedded
    /// CRC is the last 4 bytes of `prev`.
    fn finish_with_crc_in_prev(&mut self) -> Result<u32, UpdateError> {
        let prev = self.prev_payload_owned();
        let payload = &prev[tftp::DATA_HEADER_LEN..];
        if payload.len() < 4 {
            return Err(UpdateError::Session(SessionError::CrcMismatch));
        }
        let crc_bytes = &payload[payload.len() - 4..];
        let embedded = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        self.commit(prev, false)?;
        Ok(embedded)
    }

    /// Terminal datagram carried payload bytes: `prev` is fully committed
    /// (it is provably not terminal), and the embedded CRC is the last 4
    /// bytes of `curr`.
    fn finish_with_crc_in_curr(&mut self, curr: &[u8]) -> Result<u32, UpdateError> {
        let prev = self.prev_payload_owned();
        self.commit(prev, true)?;

        let payload = &curr[tftp::DATA_HEADER_LEN..];
        if payload.len() < 4 {
            return Err(UpdateError::Session(SessionError::CrcMismatch));
        }
        let crc_bytes = &payload[payload.len() - 4..];
        let embedded = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);

        let mut owned: Vec<u8, FULL_DATAGRAM_LEN> = Vec::new();
        let _ = owned.extend_from_slice(curr);
        self.commit(owned, false)?;
        Ok(embedded)
    }

    /// Promotion finalizer (§4.6): approval word last, then reset.
    fn promote(&mut self, system: &mut dyn SystemControl) -> ! {
        let version = self.pending_version;
        // Any programming failure here still ends in a reset: the next boot
        // observes "data present in stage, approval word not set" and erases
        // stage per BootDecider rule R2 (§4.7).
        let _ = self.flash.approve(Region::Stage, &version);
        self.state = State::Idle;
        system.system_reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash_map::sim::SimFlash;
    use crate::link::mock::{MockLink, MockSocket};
    use crate::system::mock::MockSystem;
    use std::panic;

    const REGION_SIZE: u32 = 4096;
    const LIVE_BASE: u32 = 0x0800_0000;
    const STAGE_BASE: u32 = LIVE_BASE + REGION_SIZE;

    fn new_receiver() -> ImageReceiver<SimFlash> {
        let device = SimFlash::new(LIVE_BASE, REGION_SIZE * 2);
        let map = FlashMap::new(device, LIVE_BASE, STAGE_BASE, REGION_SIZE);
        ImageReceiver::new(map)
    }

    fn full_block(block_no: u16, payload: &[u8]) -> std::vec::Vec<u8> {
        let mut datagram = std::vec::Vec::with_capacity(4 + payload.len());
        datagram.extend_from_slice(&tftp::OPCODE_DATA);
        datagram.extend_from_slice(&block_no.to_be_bytes());
        datagram.extend_from_slice(payload);
        datagram
    }

    fn pattern(byte: u8) -> std::vec::Vec<u8> {
        (0..512).map(|i| byte.wrapping_add(i as u8)).collect()
    }

    /// S1: a clean 1028-byte image (two full blocks + a 4-byte CRC trailer).
    #[test]
    fn clean_three_block_update_promotes() {
        let payload1 = pattern(0x10);
        let payload2 = pattern(0x90);
        let mut whole = payload1.clone();
        whole.extend_from_slice(&payload2);
        let crc = crc32::crc32(&whole);

        let mut receiver = new_receiver();
        let mut link = MockLink::new();
        let socket = MockSocket(0);
        let mut system = MockSystem::new();

        receiver.begin(&mut link, socket, b"fw.bin", *b"1.2.4").unwrap();

        let outcome = receiver
            .on_datagram(&mut link, socket, &mut system, &full_block(1, &payload1))
            .unwrap();
        assert_eq!(outcome, Outcome::Accepted(1));

        let outcome = receiver
            .on_datagram(&mut link, socket, &mut system, &full_block(2, &payload2))
            .unwrap();
        assert_eq!(outcome, Outcome::Accepted(2));
        // Block 1 is now one block behind: committed to flash, folded into
        // the running CRC, but block 2 itself is still only buffered.
        assert_eq!(receiver.flash.read_u32(STAGE_BASE), u32::from_le_bytes([
            payload1[0], payload1[1], payload1[2], payload1[3]
        ]));

        let trailer = full_block(3, &crc.to_be_bytes());
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            receiver.on_datagram(&mut link, socket, &mut system, &trailer)
        }));

        assert!(result.is_err(), "promotion must reset, never return");
        assert!(system.reset_requested);
        assert!(receiver.flash.is_approved(Region::Stage));
        assert_eq!(&receiver.flash.read_version(Region::Stage), b"1.2.4");
        assert_eq!(
            receiver.flash.read_u32(STAGE_BASE + 508),
            u32::from_le_bytes([payload2[508], payload2[509], payload2[510], payload2[511]])
        );
    }

    /// S4: a terminal block whose embedded CRC does not match resets and
    /// erases stage without ever approving it.
    #[test]
    fn crc_mismatch_erases_stage_and_resets() {
        let payload1 = pattern(0x01);
        let mut receiver = new_receiver();
        let mut link = MockLink::new();
        let socket = MockSocket(0);
        let mut system = MockSystem::new();

        receiver.begin(&mut link, socket, b"fw.bin", *b"1.2.4").unwrap();
        receiver
            .on_datagram(&mut link, socket, &mut system, &full_block(1, &payload1))
            .unwrap();

        let bogus_crc = 0xDEAD_BEEFu32.to_be_bytes();
        let trailer = full_block(2, &bogus_crc);
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            receiver.on_datagram(&mut link, socket, &mut system, &trailer)
        }));

        assert!(result.is_err());
        assert!(system.reset_requested);
        assert!(!receiver.flash.is_approved(Region::Stage));
        assert!(!receiver.flash.has_data(Region::Stage));
    }

    #[test]
    fn out_of_order_block_retransmits_previous_ack_without_advancing() {
        let payload1 = pattern(0x22);
        let mut receiver = new_receiver();
        let mut link = MockLink::new();
        let socket = MockSocket(0);
        let mut system = MockSystem::new();

        receiver.begin(&mut link, socket, b"fw.bin", *b"1.2.4").unwrap();
        receiver
            .on_datagram(&mut link, socket, &mut system, &full_block(1, &payload1))
            .unwrap();

        // Block 1 arrives again (e.g. the ACK was lost in transit).
        let outcome = receiver
            .on_datagram(&mut link, socket, &mut system, &full_block(1, &payload1))
            .unwrap();

        assert_eq!(outcome, Outcome::Retransmitted);
        assert_eq!(receiver.expected_block_no, 2);
        let last_two_sent = &link.sent[link.sent.len() - 2..];
        assert_eq!(last_two_sent[0], last_two_sent[1]);
    }

    /// The RRQ goes to port 69; the first DATA response's source port (the
    /// server's ephemeral data port) must be latched for every ACK after it.
    #[test]
    fn first_response_retargets_socket_to_server_ephemeral_port() {
        let payload1 = pattern(0x33);
        let mut receiver = new_receiver();
        let mut link = MockLink::new();
        link.server_port = 54321;
        let socket = MockSocket(0);
        let mut system = MockSystem::new();

        receiver.begin(&mut link, socket, b"fw.bin", *b"1.2.4").unwrap();
        receiver
            .on_datagram(&mut link, socket, &mut system, &full_block(1, &payload1))
            .unwrap();

        assert_eq!(link.server_port, 54321);
        assert!(receiver.port_locked);
    }
}
