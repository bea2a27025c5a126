//! Protocol messages and the block-type wire translation tables.
//!
//! Messages are either requests (client → server, `T` prefix) or responses
//! (server → client, `R` prefix). For every request kind the matching
//! response has `id = request id + 1`; `Rerror` answers any request.

use std::fmt::{self, Display};

use bytes::Bytes;
use cask_types::{BlockType, Score};

/// Message ids as they appear on the wire.
pub mod ids {
    pub const RERROR: u8 = 1;
    pub const TPING: u8 = 2;
    pub const RPING: u8 = 3;
    pub const THELLO: u8 = 4;
    pub const RHELLO: u8 = 5;
    pub const TGOODBYE: u8 = 6;
    pub const TREAD: u8 = 12;
    pub const RREAD: u8 = 13;
    pub const TWRITE: u8 = 14;
    pub const RWRITE: u8 = 15;
    pub const TSYNC: u8 = 16;
    pub const RSYNC: u8 = 17;
}

/// A protocol message body.
///
/// Each variant carries exactly the fields its kind uses. The tag is not
/// part of the call; it belongs to the frame and is supplied when packing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Error reply to any request.
    Rerror { ename: String },
    Tping,
    Rping,
    /// Connection setup. `strength`, `crypto` and `codec` are opaque
    /// pass-through; this implementation sends zero/empty values.
    Thello {
        version: String,
        uid: String,
        strength: u8,
        crypto: Bytes,
        codec: Bytes,
    },
    Rhello {
        sid: String,
        rcrypto: u8,
        rcodec: u8,
    },
    /// Farewell; the server sends no reply.
    Tgoodbye,
    Tread {
        score: Score,
        btype: BlockType,
        count: u16,
    },
    Rread { data: Bytes },
    Twrite { btype: BlockType, data: Bytes },
    Rwrite { score: Score },
    Tsync,
    Rsync,
}

impl Call {
    /// Returns the wire id of this message kind.
    #[must_use]
    pub fn id(&self) -> u8 {
        match self {
            Call::Rerror { .. } => ids::RERROR,
            Call::Tping => ids::TPING,
            Call::Rping => ids::RPING,
            Call::Thello { .. } => ids::THELLO,
            Call::Rhello { .. } => ids::RHELLO,
            Call::Tgoodbye => ids::TGOODBYE,
            Call::Tread { .. } => ids::TREAD,
            Call::Rread { .. } => ids::RREAD,
            Call::Twrite { .. } => ids::TWRITE,
            Call::Rwrite { .. } => ids::RWRITE,
            Call::Tsync => ids::TSYNC,
            Call::Rsync => ids::RSYNC,
        }
    }

    /// Returns `true` for client-originated (T) messages.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Call::Tping
                | Call::Thello { .. }
                | Call::Tgoodbye
                | Call::Tread { .. }
                | Call::Twrite { .. }
                | Call::Tsync
        )
    }
}

// ============================================================================
// Block-type wire translation
// ============================================================================

/// Wire code for an illegal block type.
const WIRE_CORRUPT: u8 = 0xff;

/// Forward table: in-memory type → wire code.
///
/// The wire does not distinguish data-pointer from directory-pointer
/// blocks; both families share the pointer codes.
const TO_WIRE: [u8; 17] = [
    13, // data
    3, 4, 5, 6, 7, 8, 9, // data pointers, depths 1-7
    2, // directory
    3, 4, 5, 6, 7, 8, 9, // directory pointers, depths 1-7
    1, // root
];

/// Reverse table: wire code → in-memory type. Codes 0 and 10-12 are
/// reserved and decode to the corrupt sentinel.
const FROM_WIRE: [BlockType; 14] = [
    BlockType::CORRUPT,
    BlockType::ROOT,
    BlockType(8),  // directory
    BlockType(9),  // pointer depths decode into the directory family
    BlockType(10),
    BlockType(11),
    BlockType(12),
    BlockType(13),
    BlockType(14),
    BlockType(15),
    BlockType::CORRUPT,
    BlockType::CORRUPT,
    BlockType::CORRUPT,
    BlockType::DATA,
];

/// Translates an in-memory block type to its wire code.
///
/// Types outside the table become the corrupt wire code, which the peer
/// rejects when unpacking.
#[must_use]
pub fn block_type_to_wire(btype: BlockType) -> u8 {
    match TO_WIRE.get(btype.0 as usize) {
        Some(&code) => code,
        None => WIRE_CORRUPT,
    }
}

/// Translates a wire code to an in-memory block type.
///
/// Every out-of-range code maps to [`BlockType::CORRUPT`].
#[must_use]
pub fn block_type_from_wire(code: u8) -> BlockType {
    match FROM_WIRE.get(code as usize) {
        Some(&btype) => btype,
        None => BlockType::CORRUPT,
    }
}

// ============================================================================
// Display
// ============================================================================

fn fmt_data(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
    let shown = &data[..data.len().min(32)];
    for b in shown {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Call::Rerror { ename } => write!(f, "Rerror '{ename}'"),
            Call::Tping => write!(f, "Tping"),
            Call::Rping => write!(f, "Rping"),
            Call::Thello {
                version,
                uid,
                strength,
                crypto,
                codec,
            } => write!(
                f,
                "Thello version '{version}' uid '{uid}' strength {strength} crypto {crypto:?} codec {codec:?}"
            ),
            Call::Rhello {
                sid,
                rcrypto,
                rcodec,
            } => write!(f, "Rhello sid '{sid}' rcrypto {rcrypto} rcodec {rcodec}"),
            Call::Tgoodbye => write!(f, "Tgoodbye"),
            Call::Tread {
                score,
                btype,
                count,
            } => write!(f, "Tread score {score} type {btype:?} count {count}"),
            Call::Rread { data } => {
                write!(f, "Rread count {} data ", data.len())?;
                fmt_data(f, data)
            }
            Call::Twrite { btype, data } => {
                write!(f, "Twrite type {btype:?} count {} data ", data.len())?;
                fmt_data(f, data)
            }
            Call::Rwrite { score } => write!(f, "Rwrite score {score}"),
            Call::Tsync => write!(f, "Tsync"),
            Call::Rsync => write!(f, "Rsync"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_id_is_request_id_plus_one() {
        assert_eq!(ids::RPING, ids::TPING + 1);
        assert_eq!(ids::RHELLO, ids::THELLO + 1);
        assert_eq!(ids::RREAD, ids::TREAD + 1);
        assert_eq!(ids::RWRITE, ids::TWRITE + 1);
        assert_eq!(ids::RSYNC, ids::TSYNC + 1);
    }

    #[test]
    fn wire_tables_cover_the_catalog() {
        assert_eq!(block_type_to_wire(BlockType::DATA), 13);
        assert_eq!(block_type_to_wire(BlockType::DIR), 2);
        assert_eq!(block_type_to_wire(BlockType::ROOT), 1);
        assert_eq!(block_type_from_wire(13), BlockType::DATA);
        assert_eq!(block_type_from_wire(2), BlockType::DIR);
        assert_eq!(block_type_from_wire(1), BlockType::ROOT);
        for depth in 0..7u8 {
            assert_eq!(
                block_type_from_wire(3 + depth),
                BlockType::DIR.at_depth(depth + 1)
            );
        }
    }

    #[test]
    fn reserved_and_out_of_range_codes_are_corrupt() {
        for code in [0u8, 10, 11, 12] {
            assert_eq!(block_type_from_wire(code), BlockType::CORRUPT);
        }
        for code in 14..=255u8 {
            assert_eq!(block_type_from_wire(code), BlockType::CORRUPT);
        }
        assert_eq!(block_type_to_wire(BlockType(17)), WIRE_CORRUPT);
        assert_eq!(block_type_to_wire(BlockType::CORRUPT), WIRE_CORRUPT);
    }

    #[test]
    fn display_truncates_long_payloads() {
        let call = Call::Rread {
            data: Bytes::from(vec![0xab; 100]),
        };
        let shown = call.to_string();
        assert!(shown.starts_with("Rread count 100 data "));
        // 32 bytes of hex, not 100
        assert!(shown.ends_with(&"ab".repeat(32)));
    }
}
