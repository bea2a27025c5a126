//! Frame packing and unpacking.
//!
//! Every message is framed as `size[2] id[1] tag[1] body[...]` where
//! `size` counts the bytes after the size field. Integers are big-endian.
//!
//! Packing writes into a caller-provided buffer so that send loops can
//! batch many frames into one write; a buffer that cannot hold the frame
//! yields [`WireError::BufferTooSmall`] and the caller flushes and
//! retries. Unpacking consumes from a receive buffer: an incomplete frame
//! yields `Ok(None)`, and once a complete frame is present it is consumed
//! whether or not its body parses.

use bytes::{Bytes, BytesMut};
use cask_types::{BlockType, MAX_BLOCK, SCORE_SIZE};

use crate::codec::{
    get_score, get_str, get_u16, get_u8, get_var, put_score, put_str, put_u16, put_u8, put_var,
};
use crate::error::{WireError, WireResult};
use crate::message::{block_type_from_wire, block_type_to_wire, ids, Call};

/// Bytes of framing before the body: size[2] id[1] tag[1].
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum total frame size. A received frame announcing more than this is
/// a protocol violation and the connection is closed.
pub const MAX_FRAME: usize = MAX_BLOCK;

/// A decoded frame: the one-byte routing tag plus the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Per-connection tag matching the reply to its request.
    pub tag: u8,
    /// The decoded message.
    pub call: Call,
    /// Total bytes the frame occupied on the wire.
    pub len: usize,
}

fn body_size(call: &Call) -> usize {
    match call {
        Call::Rerror { ename } => 2 + ename.len(),
        Call::Tping | Call::Rping | Call::Tgoodbye | Call::Tsync | Call::Rsync => 0,
        Call::Thello {
            version,
            uid,
            crypto,
            codec,
            ..
        } => 7 + version.len() + uid.len() + crypto.len() + codec.len(),
        Call::Rhello { sid, .. } => 4 + sid.len(),
        Call::Tread { .. } => SCORE_SIZE + 4,
        Call::Rread { data } => data.len(),
        Call::Twrite { data, .. } => 4 + data.len(),
        Call::Rwrite { .. } => SCORE_SIZE,
    }
}

/// Packs one framed message into `buf`, returning the bytes written.
///
/// # Errors
///
/// - [`WireError::BufferTooSmall`] if `buf` cannot hold the frame; `buf`
///   is not modified.
/// - [`WireError::Packet`] if a field exceeds its length prefix.
pub fn pack(call: &Call, tag: u8, buf: &mut [u8]) -> WireResult<usize> {
    let body = body_size(call);
    let total = FRAME_HEADER_SIZE + body;
    if total - 2 > u16::MAX as usize {
        return Err(WireError::Packet);
    }
    if buf.len() < total {
        return Err(WireError::BufferTooSmall {
            needed: total,
            available: buf.len(),
        });
    }

    let mut b: &mut [u8] = &mut buf[..total];
    put_u16(&mut b, (total - 2) as u16);
    put_u8(&mut b, call.id());
    put_u8(&mut b, tag);

    match call {
        Call::Rerror { ename } => {
            put_str(&mut b, ename);
        }
        Call::Tping | Call::Rping | Call::Tgoodbye | Call::Tsync | Call::Rsync => {}
        Call::Thello {
            version,
            uid,
            strength,
            crypto,
            codec,
        } => {
            if crypto.len() > u8::MAX as usize || codec.len() > u8::MAX as usize {
                return Err(WireError::Packet);
            }
            put_str(&mut b, version);
            put_str(&mut b, uid);
            put_u8(&mut b, *strength);
            put_var(&mut b, crypto);
            put_var(&mut b, codec);
        }
        Call::Rhello {
            sid,
            rcrypto,
            rcodec,
        } => {
            put_str(&mut b, sid);
            put_u8(&mut b, *rcrypto);
            put_u8(&mut b, *rcodec);
        }
        Call::Tread {
            score,
            btype,
            count,
        } => {
            put_score(&mut b, score);
            put_u8(&mut b, block_type_to_wire(*btype));
            put_u8(&mut b, 0);
            put_u16(&mut b, *count);
        }
        Call::Rread { data } => {
            b.copy_from_slice(data);
        }
        Call::Twrite { btype, data } => {
            put_u8(&mut b, block_type_to_wire(*btype));
            put_u8(&mut b, 0);
            put_u16(&mut b, 0);
            b.copy_from_slice(data);
        }
        Call::Rwrite { score } => {
            put_score(&mut b, score);
        }
    }

    Ok(total)
}

/// Peeks the total size of the next frame, if the size prefix has arrived.
///
/// Receive loops call this before [`unpack`] to enforce [`MAX_FRAME`]
/// without buffering an oversized frame.
#[must_use]
pub fn frame_size(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]) as usize + 2)
}

/// Unpacks one frame from the front of `buf`.
///
/// Returns `Ok(None)` if the frame is incomplete. Once a complete frame is
/// present it is consumed from `buf` even when the body is malformed, so
/// a server can answer with the frame's tag and keep the connection.
///
/// # Errors
///
/// - [`WireError::Packet`] for an unknown id, short body, or trailing bytes.
/// - [`WireError::BlockType`] for a wire block type outside the tables.
pub fn unpack(buf: &mut BytesMut) -> WireResult<Option<Frame>> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let total = frame_size(buf).expect("length checked above");
    if buf.len() < total {
        return Ok(None);
    }

    let frame: Bytes = buf.split_to(total).freeze();
    let id = frame[2];
    let tag = frame[3];
    let body = frame.slice(FRAME_HEADER_SIZE..);
    let mut rd: &[u8] = &body;

    let call = match id {
        ids::RERROR => Call::Rerror {
            ename: get_str(&mut rd)?,
        },
        ids::TPING => Call::Tping,
        ids::RPING => Call::Rping,
        ids::THELLO => {
            let version = get_str(&mut rd)?;
            let uid = get_str(&mut rd)?;
            let strength = get_u8(&mut rd)?;
            let crypto = Bytes::from(get_var(&mut rd)?);
            let codec = Bytes::from(get_var(&mut rd)?);
            Call::Thello {
                version,
                uid,
                strength,
                crypto,
                codec,
            }
        }
        ids::RHELLO => {
            let sid = get_str(&mut rd)?;
            let rcrypto = get_u8(&mut rd)?;
            let rcodec = get_u8(&mut rd)?;
            Call::Rhello {
                sid,
                rcrypto,
                rcodec,
            }
        }
        ids::TGOODBYE => Call::Tgoodbye,
        ids::TREAD => {
            let score = get_score(&mut rd)?;
            let btype = block_type_from_wire(get_u8(&mut rd)?);
            if btype == BlockType::CORRUPT {
                return Err(WireError::BlockType);
            }
            let _pad = get_u8(&mut rd)?;
            let count = get_u16(&mut rd)?;
            Call::Tread {
                score,
                btype,
                count,
            }
        }
        ids::RREAD => {
            let data = body.clone();
            rd = &[];
            Call::Rread { data }
        }
        ids::TWRITE => {
            let btype = block_type_from_wire(get_u8(&mut rd)?);
            if btype == BlockType::CORRUPT {
                return Err(WireError::BlockType);
            }
            let _pad = get_u8(&mut rd)?;
            let _pad = get_u16(&mut rd)?;
            let data = body.slice(4..);
            rd = &[];
            Call::Twrite { btype, data }
        }
        ids::RWRITE => Call::Rwrite {
            score: get_score(&mut rd)?,
        },
        ids::TSYNC => Call::Tsync,
        ids::RSYNC => Call::Rsync,
        _ => return Err(WireError::Packet),
    };

    if !rd.is_empty() {
        return Err(WireError::Packet);
    }

    Ok(Some(Frame {
        tag,
        call,
        len: total,
    }))
}
