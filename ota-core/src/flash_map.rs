//! Address/sector layout of the live and staging image regions, and the
//! metadata slots reserved at the tail of each.
//!
//! `FlashMap` never touches a register directly; it drives a [`FlashDevice`]
//! supplied by the board-support layer, the same separation the teacher draws
//! between a capability trait (`io::Read`/`io::Write`) and the concrete
//! peripheral (`pi::uart::MiniUart`) that implements it. Tests drive a
//! software flash simulator through the same trait.

use crate::error::FlashError;

/// Number of trailing bytes in a region reserved for metadata (version string
/// + approval sentinel).
pub const METADATA_SIZE: u32 = 24;

/// Number of ASCII version characters stored per region.
pub const VERSION_LEN: usize = 5;

/// Approval sentinel written once a region's image has been CRC-verified.
pub const APPROVED: u32 = 0x0000_0001;

/// Value read back from erased flash words.
pub const ERASED: u32 = 0xFFFF_FFFF;

/// How many times `program_word` is retried before surfacing a hardware
/// failure. The spec calls for "retrying until hardware reports success";
/// a bounded retry count turns a wedged flash controller into a prompt
/// `FlashProgramFailed` rather than a hang.
const PROGRAM_RETRIES: u8 = 3;

/// Which of the two image regions an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    Live,
    Stage,
}

/// Capability surface a concrete flash controller provides. `erase_sector`
/// and `program_word` must enforce "no `1 -> 0` transition without an erase"
/// at the hardware level (or, for the test double, simulate it).
pub trait FlashDevice {
    /// Unlock the flash controller for programming. Must be idempotent:
    /// the CORE calls it once per public entry point without tracking state.
    fn unlock(&mut self);

    /// Erase the 4 KiB-or-larger sector containing `addr`. The region sizes
    /// used by this crate are always sector-aligned.
    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError>;

    /// Program a single 32-bit word at `addr`. `addr` must be 4-byte aligned.
    fn program_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError>;

    /// Read a 32-bit word at `addr` without side effects.
    fn read_u32(&self, addr: u32) -> u32;
}

/// Abstract view of the two same-sized image regions and their metadata.
pub struct FlashMap<D> {
    device: D,
    live_base: u32,
    stage_base: u32,
    region_size: u32,
}

impl<D: FlashDevice> FlashMap<D> {
    pub fn new(device: D, live_base: u32, stage_base: u32, region_size: u32) -> Self {
        FlashMap {
            device,
            live_base,
            stage_base,
            region_size,
        }
    }

    pub fn live_base(&self) -> u32 {
        self.live_base
    }

    pub fn stage_base(&self) -> u32 {
        self.stage_base
    }

    pub fn region_size(&self) -> u32 {
        self.region_size
    }

    fn base(&self, region: Region) -> u32 {
        match region {
            Region::Live => self.live_base,
            Region::Stage => self.stage_base,
        }
    }

    /// Address of the 4 image bytes immediately preceding the metadata area
    /// (where the embedded CRC32 lives for a fully-written image).
    pub fn image_end(&self, region: Region) -> u32 {
        self.base(region) + self.region_size - METADATA_SIZE
    }

    pub fn approval_word_addr(&self, region: Region) -> u32 {
        self.base(region) + self.region_size - 4
    }

    pub fn version_word_addr(&self, region: Region, index: usize) -> u32 {
        debug_assert!(index < VERSION_LEN);
        self.base(region) + self.region_size - METADATA_SIZE + (index as u32) * 4
    }

    /// `true` iff the first word of the region is not the erased sentinel.
    pub fn has_data(&self, region: Region) -> bool {
        self.device.read_u32(self.base(region)) != ERASED
    }

    pub fn is_approved(&self, region: Region) -> bool {
        self.device.read_u32(self.approval_word_addr(region)) == APPROVED
    }

    pub fn read_u32(&self, addr: u32) -> u32 {
        self.device.read_u32(addr)
    }

    pub fn unlock(&mut self) {
        self.device.unlock();
    }

    pub fn erase_live(&mut self) -> Result<(), FlashError> {
        self.unlock();
        self.device.erase_sector(self.live_base)
    }

    pub fn erase_stage(&mut self) -> Result<(), FlashError> {
        self.unlock();
        self.device.erase_sector(self.stage_base)
    }

    /// Program `word` at `addr`, retrying transient failures. The approval
    /// word of a region must be programmed last (invariant 4/5); callers are
    /// responsible for that ordering, not this method.
    pub fn program_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError> {
        self.unlock();
        let mut attempt = 0;
        loop {
            match self.device.program_word(addr, word) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if attempt >= PROGRAM_RETRIES {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Read the five version characters stored at `region`'s metadata.
    pub fn read_version(&self, region: Region) -> [u8; VERSION_LEN] {
        let mut version = [0u8; VERSION_LEN];
        for (i, slot) in version.iter_mut().enumerate() {
            *slot = (self.device.read_u32(self.version_word_addr(region, i)) & 0xFF) as u8;
        }
        version
    }

    /// Write the approval sentinel and five version characters for `region`,
    /// approval word last (invariant: approval-word-last).
    pub fn approve(&mut self, region: Region, version: &[u8; VERSION_LEN]) -> Result<(), FlashError> {
        for (i, &ch) in version.iter().enumerate() {
            self.program_word(self.version_word_addr(region, i), ch as u32)?;
        }
        self.program_word(self.approval_word_addr(region), APPROVED)
    }

    /// Word-copy `stage` into `live` across the whole region, used only by
    /// the promotion path (`BootDecider`), after `live` has been erased.
    pub fn copy_stage_to_live(&mut self) -> Result<(), FlashError> {
        let words = self.region_size / 4;
        for i in 0..words {
            let offset = i * 4;
            let word = self.device.read_u32(self.stage_base + offset);
            self.program_word(self.live_base + offset, word)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod sim {
    //! In-memory flash simulator used by the rest of the test suite. Enforces
    //! the "no `1 -> 0` transition without an erase" rule so a test that
    //! tries to program over un-erased flash fails the same way real
    //! hardware would.
    use super::*;
    use std::vec;
    use std::vec::Vec;

    pub struct SimFlash {
        memory: Vec<u8>,
        base: u32,
        pub unlocked: bool,
        pub fail_next_program: bool,
    }

    impl SimFlash {
        pub fn new(base: u32, size: u32) -> Self {
            SimFlash {
                memory: vec![0xFF; size as usize],
                base,
                unlocked: false,
                fail_next_program: false,
            }
        }

        fn index(&self, addr: u32) -> usize {
            (addr - self.base) as usize
        }
    }

    impl FlashDevice for SimFlash {
        fn unlock(&mut self) {
            self.unlocked = true;
        }

        fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
            let start = self.index(addr);
            for b in &mut self.memory[start..] {
                *b = 0xFF;
            }
            Ok(())
        }

        fn program_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError> {
            if self.fail_next_program {
                self.fail_next_program = false;
                return Err(FlashError::ProgramFailed);
            }
            let start = self.index(addr);
            let bytes = word.to_le_bytes();
            for (i, &b) in bytes.iter().enumerate() {
                let existing = self.memory[start + i];
                // A `1 -> 0` bit transition without an erase corrupts the cell
                // on real NOR flash; the simulator instead rejects it outright
                // so a buggy erase-before-write ordering fails loudly.
                if existing & b != b {
                    return Err(FlashError::NotErased);
                }
                self.memory[start + i] = b;
            }
            Ok(())
        }

        fn read_u32(&self, addr: u32) -> u32 {
            let start = self.index(addr);
            u32::from_le_bytes(self.memory[start..start + 4].try_into().unwrap())
        }
    }

    #[test]
    fn erase_then_program_roundtrips() {
        let mut flash = SimFlash::new(0x1000_0000, 4096);
        flash.erase_sector(0x1000_0000).unwrap();
        flash.program_word(0x1000_0000, 0xDEAD_BEEF).unwrap();
        assert_eq!(flash.read_u32(0x1000_0000), 0xDEAD_BEEF);
    }

    #[test]
    fn program_without_erase_rejected() {
        let mut flash = SimFlash::new(0x1000_0000, 4096);
        flash.erase_sector(0x1000_0000).unwrap();
        flash.program_word(0x1000_0000, 0x0000_0000).unwrap();
        // 0 -> 1 bits would require an erase; rejected without one.
        assert!(flash.program_word(0x1000_0000, 0xFFFF_FFFF).is_err());
    }

    #[test]
    fn flash_map_approval_roundtrip() {
        let region_size = 4096;
        let flash = SimFlash::new(0x1000_0000, region_size * 2);
        let mut map = FlashMap::new(flash, 0x1000_0000, 0x1000_0000 + region_size, region_size);
        map.erase_stage().unwrap();
        assert!(!map.is_approved(Region::Stage));
        map.approve(Region::Stage, b"1.2.3").unwrap();
        assert!(map.is_approved(Region::Stage));
        assert_eq!(&map.read_version(Region::Stage), b"1.2.3");
    }
}
