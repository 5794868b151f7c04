//! Error kinds for the CORE, composed into a single [`UpdateError`].
//!
//! No `std::error::Error` is available in `no_std`; each kind instead
//! implements [`core::fmt::Display`] directly, the same minimal contract the
//! teacher's own `std::error::Error` trait builds on (`description` plus an
//! optional `Display` impl), adapted to a crate with no allocator.

use core::fmt;

/// Failures surfaced by a [`crate::flash_map::FlashDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// The controller reported a program/erase failure after retrying.
    ProgramFailed,
    /// A `program_word` targeted a byte that was not in the erased state.
    NotErased,
    /// The controller did not settle before a bounded wait expired.
    Timeout,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::ProgramFailed => write!(f, "flash program/erase failed"),
            FlashError::NotErased => write!(f, "target word was not erased"),
            FlashError::Timeout => write!(f, "flash controller timed out"),
        }
    }
}

/// Failures surfaced by a [`crate::link::LinkAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    OpenFailed,
    SendFailed,
    ResponseTimeout,
    NoIp,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::OpenFailed => write!(f, "link open failed"),
            LinkError::SendFailed => write!(f, "link send failed"),
            LinkError::ResponseTimeout => write!(f, "link response timed out"),
            LinkError::NoIp => write!(f, "link has no usable IP"),
        }
    }
}

/// Failures that end an [`crate::image_receiver::ImageReceiver`] session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// Recoverable: block arrived out of order; previous ACK was resent.
    BlockOutOfOrder,
    /// Fatal: a flash program call failed mid-session.
    FlashProgramFailed,
    /// Fatal: embedded CRC did not match the computed CRC.
    CrcMismatch,
    /// Fatal: inter-block timeout elapsed.
    SessionTimeout,
    /// Fatal: total connection time cap elapsed.
    GlobalCapExceeded,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::BlockOutOfOrder => write!(f, "block out of order"),
            SessionError::FlashProgramFailed => write!(f, "flash program failed"),
            SessionError::CrcMismatch => write!(f, "CRC mismatch"),
            SessionError::SessionTimeout => write!(f, "inter-block timeout"),
            SessionError::GlobalCapExceeded => write!(f, "connection cap exceeded"),
        }
    }
}

/// Top-level error for all fallible CORE operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum UpdateError {
    Flash(FlashError),
    Link(LinkError),
    Session(SessionError),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::Flash(e) => write!(f, "{}", e),
            UpdateError::Link(e) => write!(f, "{}", e),
            UpdateError::Session(e) => write!(f, "{}", e),
        }
    }
}

impl From<FlashError> for UpdateError {
    fn from(e: FlashError) -> Self {
        UpdateError::Flash(e)
    }
}

impl From<LinkError> for UpdateError {
    fn from(e: LinkError) -> Self {
        UpdateError::Link(e)
    }
}

impl From<SessionError> for UpdateError {
    fn from(e: SessionError) -> Self {
        UpdateError::Session(e)
    }
}
