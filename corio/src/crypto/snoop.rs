//! Recognizes a TLS ClientHello from the first bytes of a connection.

/// Number of bytes [`snoop`] needs for a verdict.
pub const SNOOP_SIZE: usize = 8;

/// TLS record content type for handshake messages.
const HANDSHAKE: u8 = 22;

/// Handshake message type of a ClientHello.
const CLIENT_HELLO: u8 = 1;

/// Largest legal TLS record body (RFC 8446 section 5.2).
const MAX_RECORD_LEN: usize = 16384 + 2048;

/// Verdict on a connection prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnoopResult {
    /// Every byte seen so far matches; more are needed.
    NeedMoreData,

    /// A TLS handshake record carrying a ClientHello.
    ClientHello,

    /// Not TLS.
    NotTls,
}

/// Classifies up to [`SNOOP_SIZE`] leading bytes.
///
/// The prefix must be a handshake record (type 22) with major version 3,
/// minor version 1 to 3, a record length within protocol limits, and
/// carry a ClientHello (type 1) whose 24-bit length has a zero high byte.
pub fn snoop(prefix: &[u8]) -> SnoopResult {
    let checks: [(usize, fn(&[u8]) -> bool); 5] = [
        (1, |b| b[0] == HANDSHAKE),
        (2, |b| b[1] == 3),
        (3, |b| (1..=3).contains(&b[2])),
        (5, |b| {
            let len = usize::from(u16::from_be_bytes([b[3], b[4]]));
            len > 0 && len <= MAX_RECORD_LEN
        }),
        (7, |b| b[5] == CLIENT_HELLO && b[6] == 0),
    ];

    for (needed, check) in checks {
        if prefix.len() < needed {
            return SnoopResult::NeedMoreData;
        }
        if !check(prefix) {
            return SnoopResult::NotTls;
        }
    }

    if prefix.len() < SNOOP_SIZE {
        SnoopResult::NeedMoreData
    } else {
        SnoopResult::ClientHello
    }
}

#[cfg(test)]
mod tests {
    use super::{SnoopResult, snoop};

    const HELLO: [u8; 8] = [22, 3, 1, 0x02, 0x00, 1, 0, 0x01];

    #[test]
    fn recognizes_a_client_hello() {
        assert_eq!(snoop(&HELLO), SnoopResult::ClientHello);

        let mut tls13 = HELLO;
        tls13[2] = 3;
        assert_eq!(snoop(&tls13), SnoopResult::ClientHello);
    }

    #[test]
    fn plaintext_is_not_tls() {
        assert_eq!(snoop(b"GET / HTTP/1.1"), SnoopResult::NotTls);
        assert_eq!(snoop(b"hello wo"), SnoopResult::NotTls);
    }

    #[test]
    fn short_matching_prefix_needs_more() {
        assert_eq!(snoop(&[]), SnoopResult::NeedMoreData);
        assert_eq!(snoop(&HELLO[..4]), SnoopResult::NeedMoreData);
        assert_eq!(snoop(&HELLO[..7]), SnoopResult::NeedMoreData);
    }

    #[test]
    fn rejects_bad_versions_and_types() {
        let mut bad_minor = HELLO;
        bad_minor[2] = 4;
        assert_eq!(snoop(&bad_minor), SnoopResult::NotTls);

        let mut server_hello = HELLO;
        server_hello[5] = 2;
        assert_eq!(snoop(&server_hello), SnoopResult::NotTls);

        let mut huge = HELLO;
        huge[3] = 0xff;
        assert_eq!(snoop(&huge), SnoopResult::NotTls);

        let mut long_hello = HELLO;
        long_hello[6] = 1;
        assert_eq!(snoop(&long_hello), SnoopResult::NotTls);
    }
}
