//! Concrete [`FlashDevice`] over the board's memory-mapped flash controller.
//! The actual unlock/erase/program sequence is vendor-specific; this models
//! a generic Cortex-M-class controller with a key register, a status
//! register, and direct word writes into the memory-mapped flash array —
//! the same shape STM32's FLASH peripheral and most of its clones expose.

use ota_core::error::FlashError;
use ota_core::flash_map::FlashDevice;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

const CR_PG: u32 = 1 << 0;
const CR_SER: u32 = 1 << 1;
const CR_STRT: u32 = 1 << 16;
const SR_BSY: u32 = 1 << 16;

#[repr(C)]
struct Registers {
    key: u32,
    cr: u32,
    sr: u32,
    addr: u32,
}

pub struct McuFlash {
    registers: &'static mut Registers,
    unlocked: bool,
}

impl McuFlash {
    /// # Safety
    /// `base_addr` must be the flash controller's real register base,
    /// mapped for the lifetime of the returned value.
    pub unsafe fn new(base_addr: usize) -> Self {
        McuFlash {
            registers: &mut *(base_addr as *mut Registers),
            unlocked: false,
        }
    }

    fn wait_not_busy(&self) {
        while unsafe { core::ptr::read_volatile(&self.registers.sr) } & SR_BSY != 0 {}
    }
}

impl FlashDevice for McuFlash {
    fn unlock(&mut self) {
        if self.unlocked {
            return;
        }
        unsafe {
            core::ptr::write_volatile(&mut self.registers.key, KEY1);
            core::ptr::write_volatile(&mut self.registers.key, KEY2);
        }
        self.unlocked = true;
    }

    fn erase_sector(&mut self, addr: u32) -> Result<(), FlashError> {
        self.wait_not_busy();
        unsafe {
            core::ptr::write_volatile(&mut self.registers.addr, addr);
            core::ptr::write_volatile(&mut self.registers.cr, CR_SER);
            core::ptr::write_volatile(&mut self.registers.cr, CR_SER | CR_STRT);
        }
        self.wait_not_busy();
        if unsafe { core::ptr::read_volatile(addr as *const u32) } != 0xFFFF_FFFF {
            return Err(FlashError::ProgramFailed);
        }
        Ok(())
    }

    fn program_word(&mut self, addr: u32, word: u32) -> Result<(), FlashError> {
        self.wait_not_busy();
        unsafe {
            core::ptr::write_volatile(&mut self.registers.cr, CR_PG);
            core::ptr::write_volatile(addr as *mut u32, word);
        }
        self.wait_not_busy();
        if unsafe { core::ptr::read_volatile(addr as *const u32) } != word {
            return Err(FlashError::NotErased);
        }
        Ok(())
    }

    fn read_u32(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }
}
