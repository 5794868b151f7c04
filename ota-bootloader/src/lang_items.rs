//! Generalizes the teacher's `bootloader/lang_items.rs`: that stub spins
//! forever on panic; a firmware updater must not simply hang, since a
//! wedged bootloader with a staged-but-unapproved image would never trigger
//! `BootDecider`'s recovery path. This logs the panic (when `defmt`'s RTT
//! transport is attached) and resets instead.

use cortex_m::peripheral::SCB;

#[defmt::panic_handler]
fn defmt_panic() -> ! {
    cortex_m::interrupt::disable();
    SCB::sys_reset()
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("panic: {}", defmt::Display2Format(info));
    defmt::panic!()
}
