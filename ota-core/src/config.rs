//! Tunables aggregated into a single struct constructed once at startup,
//! the same shape `hpm-hal` uses for its per-peripheral `Config` types
//! (e.g. `sysctl::Config`) rather than scattered `const`s.

/// Periodic "check for new firmware" cadence: 16 hours, in milliseconds.
pub const DEFAULT_PERIODIC_CHECK_MS: u32 = 16 * 60 * 60 * 1000;

/// TFTP inter-block timeout, per spec default.
pub const DEFAULT_TFTP_TIMEOUT_MS: u32 = 40_000;

/// Total per-session connection time cap, per spec default.
pub const DEFAULT_CONNECTION_CAP_MS: u32 = 5_000_000;

/// Cellular link idle-gap framing threshold.
pub const DEFAULT_IDLE_GAP_MS: u32 = 10;

/// Version-query server, TFTP timing, and link-framing tunables.
#[derive(Debug, Clone)]
pub struct UpdateConfig<'a> {
    /// Host the version-query `GET` and the TFTP RRQ are issued against.
    pub version_server_host: &'a str,
    pub version_server_port: u16,
    /// Milliseconds between unprompted re-checks once the first check (at
    /// each link's IP-ready transition) has run.
    pub periodic_check_ms: u32,
    /// Inter-block silence that ends a download session with a reset.
    pub tftp_timeout_ms: u32,
    /// Wall-clock cap on a single download session.
    pub connection_cap_ms: u32,
    /// Cellular receive-buffer idle gap treated as "a datagram has landed".
    pub idle_gap_ms: u32,
}

impl<'a> UpdateConfig<'a> {
    pub fn new(version_server_host: &'a str, version_server_port: u16) -> Self {
        UpdateConfig {
            version_server_host,
            version_server_port,
            periodic_check_ms: DEFAULT_PERIODIC_CHECK_MS,
            tftp_timeout_ms: DEFAULT_TFTP_TIMEOUT_MS,
            connection_cap_ms: DEFAULT_CONNECTION_CAP_MS,
            idle_gap_ms: DEFAULT_IDLE_GAP_MS,
        }
    }
}
