//! `"<MARKER> <ipv4> <port>"` broadcast announcements.

use core::net::{Ipv4Addr, SocketAddrV4};

/// Largest announcement accepted; longer datagrams are ignored.
pub const ANNOUNCEMENT_MAX_BYTES: usize = 128;

/// Extracts the endpoint from one announcement datagram.
///
/// The address sits between the first and second space; the port is the
/// leading decimal digits after the second space. Anything else yields
/// `None`.
pub fn parse_announcement(payload: &[u8], marker: &str) -> Option<SocketAddrV4> {
    if payload.len() >= ANNOUNCEMENT_MAX_BYTES {
        return None;
    }
    let text = core::str::from_utf8(payload).ok()?;
    let text = text.trim_end_matches(['\0', '\r', '\n', ' ']);

    let rest = text.strip_prefix(marker)?;
    if !rest.starts_with(' ') {
        return None;
    }

    let first = text.find(' ')?;
    let second = first + 1 + text[first + 1..].find(' ')?;
    let address: Ipv4Addr = text[first + 1..second].parse().ok()?;

    let digits = text[second + 1..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    let port: u16 = text[second + 1..second + 1 + digits].parse().ok()?;
    if port == 0 {
        return None;
    }

    Some(SocketAddrV4::new(address, port))
}
