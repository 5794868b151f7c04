//! CORE of the over-the-air firmware update subsystem: flash layout, the
//! streaming CRC32 engine, the TFTP datagram state machine, the
//! one-block-delayed image receiver, the boot-time promotion decider, the
//! periodic update-check controller, and the DFU escape hatch.
//!
//! Hardware is reached only through the [`flash_map::FlashDevice`],
//! [`link::LinkAdapter`], [`system::SystemControl`] and
//! [`dfu_trigger::SramSentinel`] traits; this crate never touches a
//! register directly; the `ota-bootloader` binary crate supplies the
//! concrete implementations and the foreground loop that drives them.
#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod boot_decider;
pub mod config;
pub mod crc32;
pub mod dfu_trigger;
pub mod error;
pub mod flash_map;
pub mod image_receiver;
pub mod link;
pub mod system;
pub mod tftp;
pub mod update_controller;
pub mod version;

pub use boot_decider::{BootDecider, Decision};
pub use config::UpdateConfig;
pub use error::UpdateError;
pub use flash_map::{FlashDevice, FlashMap, Region};
pub use image_receiver::{ImageReceiver, Outcome};
pub use link::LinkAdapter;
pub use system::SystemControl;
pub use update_controller::{LinkChoice, UpdateController};
