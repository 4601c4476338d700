//! Free TCP port lookup.
//!
//! Out of scope per the system's external-collaborator boundary: this is
//! intentionally the simplest thing that works (bind to port 0, read back
//! what the OS assigned, drop the listener) rather than a hardened
//! cross-platform free-port service. There is an inherent TOCTOU race
//! against a third party grabbing the port between this call returning and
//! the adapter actually binding it; real free-port finders accept the same
//! race, and so do we.

use std::io;
use std::net::TcpListener;

/// Ask the OS for a currently-free TCP port on localhost.
pub fn allocate() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    listener.local_addr().map(|addr| addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_a_nonzero_port() {
        let port = allocate().expect("port allocation should succeed in tests");
        assert_ne!(port, 0);
    }

    #[test]
    fn repeated_allocations_are_usually_distinct() {
        let a = allocate().unwrap();
        let b = allocate().unwrap();
        // Not a hard guarantee (the OS may reuse a just-freed port), but in
        // practice back-to-back calls get different ports.
        assert_ne!(a, b, "back-to-back allocations unexpectedly collided");
    }
}
