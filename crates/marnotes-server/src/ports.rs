//! Port arbitration.
//!
//! Before a listener binds, its requested address is probed with a transient
//! bind. A busy port is replaced by the first free port above it within a
//! bounded window. When the window is exhausted the original address is kept
//! so the real bind fails loudly instead of searching forever.
//!
//! Resolution is best effort: another process can take the port between the
//! probe and the real bind, in which case the bind error is fatal.

use std::net::{SocketAddr, TcpListener};

use tracing::{debug, warn};

/// Number of ports above the requested one probed on conflict.
pub const DEFAULT_PORT_SCAN_WINDOW: u16 = 100;

/// Outcome of resolving a requested listen address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortResolution {
    /// The address the operator asked for.
    pub requested: SocketAddr,
    /// The address the listener should bind.
    pub resolved: SocketAddr,
}

impl PortResolution {
    /// Whether a different port was substituted for the requested one.
    #[must_use]
    pub fn substituted(&self) -> bool {
        self.requested != self.resolved
    }
}

/// Whether `addr` can be bound right now. The probe socket is dropped
/// immediately.
#[must_use]
pub fn is_port_available(addr: SocketAddr) -> bool {
    match TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) => {
            debug!(%addr, error = %e, "port probe failed");
            false
        }
    }
}

/// Resolve `requested` to a bindable address.
///
/// Scans `requested.port() + 1 ..= requested.port() + window` (clamped to
/// the port space) and logs a warning when a substitute is chosen or when
/// the window is exhausted. Ports in `reserved` were already handed to
/// another listener of this process that has not bound yet; they are never
/// chosen, even though a probe would find them free.
#[must_use]
pub fn ensure_available_port(requested: SocketAddr, window: u16, reserved: &[u16]) -> PortResolution {
    let usable = |addr: SocketAddr| !reserved.contains(&addr.port()) && is_port_available(addr);

    if usable(requested) {
        return PortResolution {
            requested,
            resolved: requested,
        };
    }

    let base = requested.port();
    let resolved = (1..=window)
        .map_while(|offset| base.checked_add(offset))
        .map(|port| SocketAddr::new(requested.ip(), port))
        .find(|candidate| usable(*candidate));

    match resolved {
        Some(resolved) => {
            warn!(%requested, %resolved, "port is unavailable, using substitute");
            PortResolution {
                requested,
                resolved,
            }
        }
        None => {
            warn!(
                %requested,
                window,
                "no free port found in scan window, keeping requested address"
            );
            PortResolution {
                requested,
                resolved: requested,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupied() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn free_port_is_reported_available() {
        let (listener, addr) = occupied();
        drop(listener);
        assert!(is_port_available(addr));
    }

    #[test]
    fn occupied_port_is_reported_unavailable() {
        let (_guard, addr) = occupied();
        assert!(!is_port_available(addr));
    }

    #[test]
    fn free_requested_port_is_kept() {
        let (listener, addr) = occupied();
        drop(listener);

        let resolution = ensure_available_port(addr, DEFAULT_PORT_SCAN_WINDOW, &[]);
        assert_eq!(resolution.resolved, addr);
        assert!(!resolution.substituted());
    }

    #[test]
    fn occupied_port_is_substituted_within_window() {
        let (_guard, addr) = occupied();

        let resolution = ensure_available_port(addr, DEFAULT_PORT_SCAN_WINDOW, &[]);
        assert!(resolution.substituted());
        assert_eq!(resolution.requested, addr);
        assert_eq!(resolution.resolved.ip(), addr.ip());
        assert!(resolution.resolved.port() > addr.port());
        assert!(resolution.resolved.port() - addr.port() <= DEFAULT_PORT_SCAN_WINDOW);
        assert!(is_port_available(resolution.resolved));
    }

    #[test]
    fn exhausted_window_falls_back_to_requested() {
        let (_guard, addr) = occupied();

        let resolution = ensure_available_port(addr, 0, &[]);
        assert_eq!(resolution.resolved, addr);
        assert!(!resolution.substituted());
    }

    #[test]
    fn scan_stops_at_end_of_port_space() {
        let addr = SocketAddr::from(([127, 0, 0, 1], u16::MAX));
        // Whatever the probe says, the scan must not wrap around.
        let resolution = ensure_available_port(addr, DEFAULT_PORT_SCAN_WINDOW, &[]);
        assert_eq!(resolution.resolved, addr);
    }

    #[test]
    fn reserved_ports_are_skipped_even_when_free() {
        let (listener, addr) = occupied();
        drop(listener);

        let resolution = ensure_available_port(addr, DEFAULT_PORT_SCAN_WINDOW, &[addr.port()]);
        assert!(resolution.substituted());
        assert_ne!(resolution.resolved.port(), addr.port());
        assert!(resolution.resolved.port() > addr.port());
    }

    #[test]
    fn scan_skips_reserved_substitutes() {
        let (_guard, addr) = occupied();
        let next = addr.port() + 1;

        let resolution = ensure_available_port(addr, DEFAULT_PORT_SCAN_WINDOW, &[next]);
        assert!(resolution.substituted());
        assert!(resolution.resolved.port() > next);
    }
}
