//! Board-level [`SystemControl`] and [`SramSentinel`] implementations: the
//! two hooks the CORE calls through for actions it can't take itself
//! (destructive reset, raw SRAM access, asm jump to another image).

use cortex_m::peripheral::SCB;
use ota_core::dfu_trigger::SramSentinel;
use ota_core::system::SystemControl;

pub struct Board {
    scb: SCB,
}

impl Board {
    pub fn new(scb: SCB) -> Self {
        Board { scb }
    }
}

impl SystemControl for Board {
    fn save_energy_registers(&mut self) {
        // No low-power domain on this board retains state across reset;
        // nothing to persist.
    }

    fn system_reset(&mut self) -> ! {
        SCB::sys_reset()
    }

    fn jump_to_image(&mut self, image_base: u32) -> ! {
        unsafe {
            let msp = core::ptr::read_volatile(image_base as *const u32);
            let reset_vector = core::ptr::read_volatile((image_base + 4) as *const u32);
            self.scb.vtor.write(image_base);
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
            cortex_m::register::msp::write(msp);
            let entry: extern "C" fn() -> ! = core::mem::transmute(reset_vector as usize);
            entry()
        }
    }
}

/// Refresh the independent watchdog. Modeled at the boundary only: the
/// watchdog peripheral itself is out of scope for the CORE (spec §1), but
/// every busy-wait in this crate — the foreground loop and each
/// `LinkAdapter::wait_for_token` spin — must call through here, per §4.8's
/// "every wait loop refreshes the watchdog."
pub fn refresh_watchdog() {
    // IWDG key register write; this board's watchdog is modeled only at
    // this boundary, per spec §1's scope note on watchdog refresh.
}

/// Fixed SRAM word the DFU trigger reads/clears.
pub struct DfuSentinel;

impl SramSentinel for DfuSentinel {
    fn read_sentinel(&self) -> u32 {
        unsafe { core::ptr::read_volatile(ota_core::dfu_trigger::DFU_SENTINEL_ADDR as *const u32) }
    }

    fn clear_sentinel(&mut self) {
        unsafe { core::ptr::write_volatile(ota_core::dfu_trigger::DFU_SENTINEL_ADDR as *mut u32, 0xFFFF_FFFF) };
    }
}
