//! Hooks delegated to the board-support layer: energy-register save before a
//! destructive reset, and the reset itself. Neither is meaningful to
//! simulate in software, so the CORE never performs them directly — it only
//! calls through this trait at the points the spec calls for them.

/// Board-level reset and pre-reset bookkeeping, implemented by the concrete
/// platform (e.g. `cortex_m::peripheral::SCB::sys_reset`).
pub trait SystemControl {
    /// Persist any registers that should survive the reset (the spec calls
    /// this "save energy registers"); a no-op is a valid implementation.
    fn save_energy_registers(&mut self);

    /// Issue `NVIC_SystemReset` (or the target's equivalent). Never returns.
    fn system_reset(&mut self) -> !;

    /// Set MSP from the word at `image_base` and branch to the reset vector
    /// stored at `image_base + 4`, de-initializing clocks/peripherals first
    /// to match the cold-boot assumptions of the application image. Never
    /// returns. Used for both `BootDecider`'s "jump live" action and
    /// `DFUTrigger`'s hand-off to the vendor DFU ROM.
    fn jump_to_image(&mut self, image_base: u32) -> !;
}

#[cfg(test)]
pub(crate) mod mock {
    use super::SystemControl;

    /// Test double that records a reset/jump instead of actually performing
    /// one, so a scripted session can assert "the session ended in a reset"
    /// (or "tried to jump to address X") without tearing down the test
    /// process. Both `system_reset` and `jump_to_image` panic after
    /// recording, to be caught with `std::panic::catch_unwind` at the call
    /// site the same way a real reset never returns control to the caller.
    pub struct MockSystem {
        pub energy_saved: bool,
        pub reset_requested: bool,
        pub jumped_to: Option<u32>,
    }

    impl MockSystem {
        pub fn new() -> Self {
            MockSystem {
                energy_saved: false,
                reset_requested: false,
                jumped_to: None,
            }
        }
    }

    impl SystemControl for MockSystem {
        fn save_energy_registers(&mut self) {
            self.energy_saved = true;
        }

        fn system_reset(&mut self) -> ! {
            self.reset_requested = true;
            panic!("system_reset");
        }

        fn jump_to_image(&mut self, image_base: u32) -> ! {
            self.jumped_to = Some(image_base);
            panic!("jump_to_image({:#x})", image_base);
        }
    }
}
