//! Entry point: DFU escape check, boot-time promotion decision, then the
//! foreground loop that drives the configured links' update checks and
//! downloads.
//!
//! Generalizes the teacher's `bootloader/main.rs` `kmain`: where the
//! teacher's loop waits on one UART for an Xmodem transfer and jumps to a
//! fixed load address on success, this loop waits on two AT-command links
//! for a TFTP transfer, via [`ota_core::image_receiver::ImageReceiver`], and
//! leaves the reboot-driven jump to [`ota_core::boot_decider::BootDecider`].
#![no_std]
#![no_main]

mod board;
mod flash_driver;
mod lang_items;
mod serial_link;

use defmt_rtt as _;

use core::cell::Cell;

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::Peripherals as CorePeripherals;
use cortex_m_rt::entry;
use critical_section::Mutex;
use defmt::info;
use heapless::{String, Vec};
use ota_core::config::UpdateConfig;
use ota_core::flash_map::{FlashMap, Region, VERSION_LEN};
use ota_core::image_receiver::ImageReceiver;
use ota_core::link::LinkAdapter;
use ota_core::system::SystemControl;
use ota_core::update_controller::{LinkChoice, UpdateController};
use ota_core::version;
use ota_core::{BootDecider, Decision};

use crate::board::{refresh_watchdog, Board, DfuSentinel};
use crate::flash_driver::McuFlash;
use crate::serial_link::{AtSocket, SerialLink, Transport};

const LIVE_BASE: u32 = 0x0801_0000;
const STAGE_BASE: u32 = 0x0805_0000;
const REGION_SIZE: u32 = 256 * 1024;

const FLASH_CTRL_BASE: usize = 0x4002_2000;
const WIFI_UART_BASE: usize = 0x4000_4400;
const CELLULAR_UART_BASE: usize = 0x4000_4800;

/// SysTick reload value for a ~1 ms tick at this board's assumed 8 MHz core
/// clock (the core clock SysTick defaults to before any PLL is configured).
const SYST_RELOAD_1MS: u32 = 8_000 - 1;

/// Written by the SysTick handler, read by the foreground loop. This is the
/// only state shared between an ISR and the foreground in this crate, so it
/// is the only place a `critical_section::Mutex` is needed — every other
/// access to flash or a link happens exclusively on the foreground.
static TICK_MS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

/// Which link a download session is bound to, and that link's socket. Both
/// variants carry the same `AtSocket` type (wifi and cellular are both
/// `SerialLink`s); the variant only records which instance owns it.
#[derive(Clone, Copy)]
enum ActiveSession {
    Wifi(AtSocket),
    Cellular(AtSocket),
}

/// Open the version-query socket, run the request/response exchange, and —
/// if the server offers a newer image — start the TFTP download. Mirrors
/// the teacher's `kmain` invoking `Xmodem::receive` directly inline rather
/// than deferring it: every step here is a plain `ota_core` library call.
fn run_update_check<L: LinkAdapter>(
    link: &mut L,
    config: &UpdateConfig,
    current_version: &[u8; VERSION_LEN],
    receiver: &mut ImageReceiver<McuFlash>,
) -> Option<L::Socket> {
    let socket = link
        .open_tcp(config.version_server_host, config.version_server_port)
        .ok()?;
    let request = UpdateController::build_request(config, current_version)?;

    let target = match UpdateController::query(link, socket, request.as_bytes(), config.tftp_timeout_ms) {
        Ok(Some(target)) => target,
        _ => {
            link.close(socket);
            return None;
        }
    };

    let mut host: String<64> = String::new();
    for &b in target.ip {
        let _ = host.push(b as char);
    }
    let port = version::parse_port(target.port).unwrap_or(config.version_server_port);
    let mut filename: Vec<u8, 64> = Vec::new();
    let _ = filename.extend_from_slice(target.file);
    let new_version = target.new_version.and_then(|v| {
        if v.len() == VERSION_LEN {
            let mut arr = [0u8; VERSION_LEN];
            arr.copy_from_slice(v);
            Some(arr)
        } else {
            None
        }
    });

    link.close(socket);

    let new_version = new_version?;
    let data_socket = link.open_udp(&host, port, 0).ok()?;

    match receiver.begin(link, data_socket, &filename, new_version) {
        Ok(()) => Some(data_socket),
        Err(_) => {
            link.close(data_socket);
            None
        }
    }
}

fn take_elapsed_ms() -> u32 {
    critical_section::with(|cs| {
        let cell = TICK_MS.borrow(cs);
        let elapsed = cell.get();
        cell.set(0);
        elapsed
    })
}

#[cortex_m_rt::exception]
fn SysTick() {
    critical_section::with(|cs| {
        let cell = TICK_MS.borrow(cs);
        cell.set(cell.get() + 1);
    });
}

#[entry]
fn main() -> ! {
    let mut core_peripherals = CorePeripherals::take().unwrap();

    let mut flash_device = unsafe { McuFlash::new(FLASH_CTRL_BASE) };
    flash_device.unlock();
    let mut flash = FlashMap::new(flash_device, LIVE_BASE, STAGE_BASE, REGION_SIZE);

    let mut board = Board::new(core_peripherals.SCB);
    let mut sentinel = DfuSentinel;

    ota_core::dfu_trigger::DfuTrigger::check(&mut sentinel, &mut flash, &mut board);

    let decision = BootDecider::decide(&mut flash);
    if decision.should_jump_live() {
        info!("boot decider: jumping to live image");
        board.jump_to_image(LIVE_BASE);
    }
    match decision {
        Decision::AbortedPartialUpdate => info!("boot decider: aborted partial update, staying resident"),
        Decision::RejectedUnverifiedLive => info!("boot decider: rejected unverified live image"),
        Decision::StayInBootloader => info!("boot decider: nothing staged, staying resident"),
        Decision::Promoted | Decision::RunLive => unreachable!("handled above"),
    }

    let current_version = flash.read_version(Region::Live);

    core_peripherals.SYST.set_clock_source(SystClkSource::Core);
    core_peripherals.SYST.set_reload(SYST_RELOAD_1MS);
    core_peripherals.SYST.clear_current();
    core_peripherals.SYST.enable_counter();
    core_peripherals.SYST.enable_interrupt();

    let mut wifi = unsafe { SerialLink::new(WIFI_UART_BASE, Transport::Wifi) };
    let mut cellular = unsafe { SerialLink::new(CELLULAR_UART_BASE, Transport::Cellular) };

    let config = UpdateConfig::new("updates.example.com", 80);
    let mut controller = UpdateController::new(&config);
    let mut receiver = ImageReceiver::new(flash);
    let mut active_session: Option<ActiveSession> = None;

    loop {
        let dt = take_elapsed_ms();
        controller.tick_ms(dt);
        receiver.tick_ms(dt);
        wifi.on_tick_ms(dt);
        cellular.on_tick_ms(dt);
        refresh_watchdog();

        wifi.poll();
        cellular.poll();
        wifi.poll_ip_ready();
        cellular.poll_ip_ready();

        if receiver.is_receiving() {
            if receiver.tftp_timeout_elapsed_ms() >= config.tftp_timeout_ms
                || receiver.connection_elapsed_ms() >= config.connection_cap_ms
            {
                info!("session timed out, resetting");
                board.save_energy_registers();
                board.system_reset();
            }

            match active_session {
                Some(ActiveSession::Wifi(socket)) => {
                    if let Some(datagram) = wifi.take_datagram(socket, config.idle_gap_ms) {
                        let _ = receiver.on_datagram(&mut wifi, socket, &mut board, &datagram);
                    }
                }
                Some(ActiveSession::Cellular(socket)) => {
                    if let Some(datagram) = cellular.take_datagram(socket, config.idle_gap_ms) {
                        let _ = receiver.on_datagram(&mut cellular, socket, &mut board, &datagram);
                    }
                }
                None => {}
            }
            continue;
        }

        if let Some(link) = controller.select_link(&wifi, &cellular) {
            info!("update check due over {}", match link {
                LinkChoice::Wifi => "wifi",
                LinkChoice::Cellular => "cellular",
            });
            controller.record_check_ran(link);

            active_session = match link {
                LinkChoice::Wifi => {
                    run_update_check(&mut wifi, &config, &current_version, &mut receiver).map(ActiveSession::Wifi)
                }
                LinkChoice::Cellular => run_update_check(&mut cellular, &config, &current_version, &mut receiver)
                    .map(ActiveSession::Cellular),
            };
        }
    }
}
