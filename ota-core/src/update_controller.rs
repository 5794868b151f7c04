//! Periodic "check for new firmware" scheduler: link selection, the
//! version-query HTTP exchange, and handing a discovered update target to
//! an [`ImageReceiver`].
//!
//! Link-layer failures in this phase are absorbed locally (§7's
//! propagation policy): a failed open/send/response here just abandons the
//! check until the next periodic tick. Only [`ImageReceiver`] failures
//! after a session has started committing flash escalate to a reset.

use heapless::String;

use crate::config::UpdateConfig;
use crate::error::LinkError;
use crate::flash_map::VERSION_LEN;
use crate::link::LinkAdapter;
use crate::version::{self, UpdateTarget};

/// Longest request line this crate will build: method, path, query string
/// (host + version are bounded), and the two header lines.
const REQUEST_CAPACITY: usize = 256;

/// Which configured link last ran (or is running) a version-query / TFTP
/// session. Wi-Fi takes precedence whenever both links report a usable IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkChoice {
    Wifi,
    Cellular,
}

/// Drives the start-triggered and periodic version-query schedule.
pub struct UpdateController {
    periodic_check_ms: u32,
    elapsed_since_check_ms: u32,
    wifi_start_check_done: bool,
    cellular_start_check_done: bool,
}

impl UpdateController {
    pub fn new(config: &UpdateConfig) -> Self {
        UpdateController {
            periodic_check_ms: config.periodic_check_ms,
            elapsed_since_check_ms: 0,
            wifi_start_check_done: false,
            cellular_start_check_done: false,
        }
    }

    pub fn tick_ms(&mut self, dt: u32) {
        self.elapsed_since_check_ms += dt;
    }

    /// Pick which link a check should run over right now, given both
    /// links' current IP readiness, or `None` if no check is due and no
    /// link just became ready for its start-triggered check.
    ///
    /// Wi-Fi is preferred: if it has an IP, it is chosen even when
    /// cellular also has one.
    pub fn select_link<W: LinkAdapter, C: LinkAdapter>(&mut self, wifi: &W, cellular: &C) -> Option<LinkChoice> {
        let periodic_due = self.elapsed_since_check_ms >= self.periodic_check_ms;

        if wifi.has_ip() {
            if !self.wifi_start_check_done || periodic_due {
                return Some(LinkChoice::Wifi);
            }
        } else if cellular.has_ip() {
            if !self.cellular_start_check_done || periodic_due {
                return Some(LinkChoice::Cellular);
            }
        }
        None
    }

    /// Record that a check ran over `link`, resetting the periodic timer
    /// and that link's start-triggered flag.
    pub fn record_check_ran(&mut self, link: LinkChoice) {
        self.elapsed_since_check_ms = 0;
        match link {
            LinkChoice::Wifi => self.wifi_start_check_done = true,
            LinkChoice::Cellular => self.cellular_start_check_done = true,
        }
    }

    /// Build the version-query `GET` request line + headers for
    /// `current_version` against `config`'s host.
    pub fn build_request(
        config: &UpdateConfig,
        current_version: &[u8; VERSION_LEN],
    ) -> Option<String<REQUEST_CAPACITY>> {
        let mut req: String<REQUEST_CAPACITY> = String::new();
        req.push_str("GET /api/Installer/checkFirmware?version=").ok()?;
        for &b in current_version {
            req.push(b as char).ok()?;
        }
        req.push_str(" HTTP/1.1\r\nHost: ").ok()?;
        req.push_str(config.version_server_host).ok()?;
        req.push_str("\r\ncache-control: no-cache\r\n\r\n").ok()?;
        Some(req)
    }

    /// Send the version-query request over `socket` and, once `wait_for_token`
    /// reports the response terminator has arrived, parse it straight out of
    /// the link's own receive buffer.
    ///
    /// The returned `UpdateTarget` borrows from `link` itself (there is no
    /// separate response buffer to hand in — a real link only knows its
    /// response after the round trip completes), so callers must copy out
    /// whatever fields they need before borrowing `link` mutably again.
    ///
    /// Returns `Ok(None)` when the server answered but offered no update
    /// (empty `file`); returns `Err` only for link-layer failures, which the
    /// caller absorbs and retries on the next periodic tick.
    pub fn query<'l, L: LinkAdapter>(
        link: &'l mut L,
        socket: L::Socket,
        request: &[u8],
        timeout_ms: u32,
    ) -> Result<Option<UpdateTarget<'l>>, LinkError> {
        link.send(socket, request)?;
        if !link.wait_for_token(socket, b"\r\n\r\n", timeout_ms) {
            return Err(LinkError::ResponseTimeout);
        }
        let response_buf = link.receive_buffer_snapshot(socket);
        let body = http_body(response_buf).unwrap_or(response_buf);
        match version::parse_update_target(body) {
            Some(target) if !target.file.is_empty() => Ok(Some(target)),
            _ => Ok(None),
        }
    }
}

/// Split an HTTP response into its body, i.e. everything after the first
/// blank line. Returns `None` if no header/body separator is present yet.
fn http_body(response: &[u8]) -> Option<&[u8]> {
    let sep = b"\r\n\r\n";
    let pos = response
        .windows(sep.len())
        .position(|w| w == sep)?;
    Some(&response[pos + sep.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockLink;

    fn config() -> UpdateConfig<'static> {
        UpdateConfig::new("updates.example.com", 80)
    }

    #[test]
    fn wifi_preferred_over_cellular_when_both_have_ip() {
        let mut controller = UpdateController::new(&config());
        let wifi = MockLink::new();
        let cellular = MockLink::new();
        assert_eq!(controller.select_link(&wifi, &cellular), Some(LinkChoice::Wifi));
    }

    #[test]
    fn cellular_used_when_wifi_has_no_ip() {
        let mut controller = UpdateController::new(&config());
        let mut wifi = MockLink::new();
        wifi.has_ip = false;
        let cellular = MockLink::new();
        assert_eq!(controller.select_link(&wifi, &cellular), Some(LinkChoice::Cellular));
    }

    #[test]
    fn no_check_due_after_start_check_recorded_and_before_period_elapses() {
        let mut controller = UpdateController::new(&config());
        let wifi = MockLink::new();
        let cellular = MockLink::new();
        controller.record_check_ran(LinkChoice::Wifi);
        assert_eq!(controller.select_link(&wifi, &cellular), None);
    }

    #[test]
    fn periodic_check_fires_again_once_interval_elapses() {
        let mut controller = UpdateController::new(&config());
        let wifi = MockLink::new();
        let cellular = MockLink::new();
        controller.record_check_ran(LinkChoice::Wifi);
        controller.tick_ms(DEFAULT_PERIODIC_CHECK_MS_FOR_TEST);
        assert_eq!(controller.select_link(&wifi, &cellular), Some(LinkChoice::Wifi));
    }

    const DEFAULT_PERIODIC_CHECK_MS_FOR_TEST: u32 = 16 * 60 * 60 * 1000;

    #[test]
    fn build_request_embeds_version_and_host() {
        let cfg = config();
        let req = UpdateController::build_request(&cfg, b"1.0.0").unwrap();
        assert!(req.contains("version=1.0.0"));
        assert!(req.contains("Host: updates.example.com"));
    }

    #[test]
    fn query_parses_update_target_from_response() {
        let mut link = MockLink::new();
        let response =
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n{\"ip\":\"10.0.0.5\",\"port\":\"69\",\"file\":\"rx-1.2.4bin\"}";
        link.deliver(response);

        let target = UpdateController::query(&mut link, crate::link::mock::MockSocket(0), b"GET ...", 1_000)
            .unwrap()
            .unwrap();
        assert_eq!(target.ip, b"10.0.0.5");
        assert_eq!(target.new_version, Some(&b"1.2.4"[..]));
    }

    #[test]
    fn query_returns_none_when_no_file_offered() {
        let mut link = MockLink::new();
        let response = b"HTTP/1.1 200 OK\r\n\r\n{\"ip\":\"10.0.0.5\",\"port\":\"69\",\"file\":\"\"}";
        link.deliver(response);

        let outcome = UpdateController::query(&mut link, crate::link::mock::MockSocket(0), b"GET ...", 1_000)
            .unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn query_surfaces_response_timeout_without_resetting() {
        let mut link = MockLink::new();
        let outcome = UpdateController::query(&mut link, crate::link::mock::MockSocket(0), b"GET ...", 1_000);
        assert_eq!(outcome, Err(LinkError::ResponseTimeout));
    }
}
