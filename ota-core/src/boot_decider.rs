//! The five-row decision table executed as the first action after reset,
//! before any peripheral beyond flash is brought up.
//!
//! Every row is driven purely by what is already sitting in flash — there is
//! no session state to consult — which is what makes the whole promotion
//! protocol idempotent across an arbitrary number of power cuts: whatever
//! the decider sees is exactly what the previous boot (or download session)
//! left behind.

use crate::flash_map::{FlashDevice, FlashMap, Region};

/// What [`BootDecider::decide`] determined should happen. `JumpLive` is the
/// only action that hands control to the application image; every other
/// action leaves the device resident in the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decision {
    /// Row 1: stage has an approved image. Live was erased and overwritten
    /// with a word-copy of stage, stage was then erased, and `jump_live`
    /// should be called next.
    Promoted,
    /// Row 2: stage has data but was never approved. It has been erased.
    AbortedPartialUpdate,
    /// Row 3: live holds an approved image and nothing is staged. The
    /// caller should call `jump_live` next.
    RunLive,
    /// Row 4: live has data but was never approved, and nothing is staged.
    /// Live has been erased.
    RejectedUnverifiedLive,
    /// Row 5: neither region holds data. Stay resident.
    StayInBootloader,
}

impl Decision {
    /// `true` for the two outcomes that call for handing control to the
    /// application image.
    pub fn should_jump_live(self) -> bool {
        matches!(self, Decision::Promoted | Decision::RunLive)
    }
}

/// Runs the boot-time decision table against a [`FlashMap`].
pub struct BootDecider;

impl BootDecider {
    /// Inspect both regions and act. Never reads or writes anything outside
    /// the two regions' data and metadata words.
    pub fn decide<D: FlashDevice>(flash: &mut FlashMap<D>) -> Decision {
        let stage_has_data = flash.has_data(Region::Stage);
        let stage_approved = stage_has_data && flash.is_approved(Region::Stage);
        let live_has_data = flash.has_data(Region::Live);
        let live_approved = live_has_data && flash.is_approved(Region::Live);

        if stage_has_data && stage_approved {
            // Row 1. Order matters: live must be erased before the copy
            // (erase-before-write), and stage only after the copy lands.
            let _ = flash.erase_live();
            let _ = flash.copy_stage_to_live();
            let _ = flash.erase_stage();
            Decision::Promoted
        } else if stage_has_data {
            // Row 2.
            let _ = flash.erase_stage();
            Decision::AbortedPartialUpdate
        } else if live_has_data && live_approved {
            // Row 3.
            Decision::RunLive
        } else if live_has_data {
            // Row 4.
            let _ = flash.erase_live();
            Decision::RejectedUnverifiedLive
        } else {
            // Row 5.
            Decision::StayInBootloader
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash_map::sim::SimFlash;

    const REGION_SIZE: u32 = 4096;
    const LIVE_BASE: u32 = 0x0800_0000;
    const STAGE_BASE: u32 = LIVE_BASE + REGION_SIZE;

    fn new_map() -> FlashMap<SimFlash> {
        let device = SimFlash::new(LIVE_BASE, REGION_SIZE * 2);
        FlashMap::new(device, LIVE_BASE, STAGE_BASE, REGION_SIZE)
    }

    #[test]
    fn promotes_approved_stage() {
        let mut map = new_map();
        map.erase_stage().unwrap();
        map.program_word(STAGE_BASE, 0xDEAD_BEEF).unwrap();
        map.approve(Region::Stage, b"1.0.1").unwrap();

        let decision = BootDecider::decide(&mut map);

        assert_eq!(decision, Decision::Promoted);
        assert!(decision.should_jump_live());
        assert_eq!(map.read_u32(LIVE_BASE), 0xDEAD_BEEF);
        assert!(map.is_approved(Region::Live));
        assert!(!map.has_data(Region::Stage));
    }

    #[test]
    fn aborts_unapproved_stage() {
        let mut map = new_map();
        map.erase_stage().unwrap();
        map.program_word(STAGE_BASE, 0xAAAA_AAAA).unwrap();

        let decision = BootDecider::decide(&mut map);

        assert_eq!(decision, Decision::AbortedPartialUpdate);
        assert!(!decision.should_jump_live());
        assert!(!map.has_data(Region::Stage));
    }

    #[test]
    fn runs_approved_live_when_stage_empty() {
        let mut map = new_map();
        map.erase_live().unwrap();
        map.program_word(LIVE_BASE, 0x1234_5678).unwrap();
        map.approve(Region::Live, b"1.0.0").unwrap();

        let decision = BootDecider::decide(&mut map);

        assert_eq!(decision, Decision::RunLive);
        assert!(decision.should_jump_live());
    }

    #[test]
    fn rejects_unverified_live_when_stage_empty() {
        let mut map = new_map();
        map.erase_live().unwrap();
        map.program_word(LIVE_BASE, 0x1234_5678).unwrap();

        let decision = BootDecider::decide(&mut map);

        assert_eq!(decision, Decision::RejectedUnverifiedLive);
        assert!(!decision.should_jump_live());
        assert!(!map.has_data(Region::Live));
    }

    #[test]
    fn stays_resident_with_nothing_programmed() {
        let mut map = new_map();
        map.erase_live().unwrap();
        map.erase_stage().unwrap();

        assert_eq!(BootDecider::decide(&mut map), Decision::StayInBootloader);
    }

    #[test]
    fn approved_stage_wins_even_with_approved_live() {
        let mut map = new_map();
        map.erase_live().unwrap();
        map.program_word(LIVE_BASE, 0x1111_1111).unwrap();
        map.approve(Region::Live, b"1.0.0").unwrap();
        map.erase_stage().unwrap();
        map.program_word(STAGE_BASE, 0x2222_2222).unwrap();
        map.approve(Region::Stage, b"1.0.1").unwrap();

        let decision = BootDecider::decide(&mut map);

        assert_eq!(decision, Decision::Promoted);
        assert_eq!(map.read_u32(LIVE_BASE), 0x2222_2222);
        assert_eq!(&map.read_version(Region::Live), b"1.0.1");
    }
}
