//! Primitive field encoding: big-endian integers, length-prefixed strings,
//! short byte strings, and raw scores.
//!
//! The put helpers advance a `&mut [u8]` cursor and assume the caller has
//! already reserved enough space (the frame packer computes sizes up
//! front). The get helpers advance a `&[u8]` cursor and fail with
//! [`WireError::Packet`] on short input.

use bytes::{Buf, BufMut};
use cask_types::{Score, SCORE_SIZE};

use crate::error::{WireError, WireResult};

pub fn put_u8(buf: &mut &mut [u8], val: u8) {
    buf.put_u8(val);
}

pub fn put_u16(buf: &mut &mut [u8], val: u16) {
    buf.put_u16(val);
}

pub fn put_u32(buf: &mut &mut [u8], val: u32) {
    buf.put_u32(val);
}

pub fn put_u48(buf: &mut &mut [u8], val: u64) {
    buf.put_uint(val, 6);
}

pub fn put_u64(buf: &mut &mut [u8], val: u64) {
    buf.put_u64(val);
}

/// Writes a string with a u16 length prefix.
pub fn put_str(buf: &mut &mut [u8], val: &str) {
    buf.put_u16(val.len() as u16);
    buf.put_slice(val.as_bytes());
}

/// Writes a short byte string with a u8 length prefix.
pub fn put_var(buf: &mut &mut [u8], val: &[u8]) {
    buf.put_u8(val.len() as u8);
    buf.put_slice(val);
}

/// Writes the 20 raw bytes of a score.
pub fn put_score(buf: &mut &mut [u8], val: &Score) {
    buf.put_slice(val.as_bytes());
}

pub fn get_u8(buf: &mut &[u8]) -> WireResult<u8> {
    if buf.remaining() < 1 {
        return Err(WireError::Packet);
    }
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut &[u8]) -> WireResult<u16> {
    if buf.remaining() < 2 {
        return Err(WireError::Packet);
    }
    Ok(buf.get_u16())
}

pub fn get_u32(buf: &mut &[u8]) -> WireResult<u32> {
    if buf.remaining() < 4 {
        return Err(WireError::Packet);
    }
    Ok(buf.get_u32())
}

pub fn get_u48(buf: &mut &[u8]) -> WireResult<u64> {
    if buf.remaining() < 6 {
        return Err(WireError::Packet);
    }
    Ok(buf.get_uint(6))
}

pub fn get_u64(buf: &mut &[u8]) -> WireResult<u64> {
    if buf.remaining() < 8 {
        return Err(WireError::Packet);
    }
    Ok(buf.get_u64())
}

/// Reads a u16-length-prefixed string.
///
/// The protocol does not interpret string contents, but this
/// implementation requires them to be valid UTF-8.
pub fn get_str(buf: &mut &[u8]) -> WireResult<String> {
    let n = get_u16(buf)? as usize;
    if buf.remaining() < n {
        return Err(WireError::Packet);
    }
    let s = std::str::from_utf8(&buf[..n]).map_err(|_| WireError::Packet)?;
    let s = s.to_owned();
    buf.advance(n);
    Ok(s)
}

/// Reads a u8-length-prefixed byte string.
pub fn get_var(buf: &mut &[u8]) -> WireResult<Vec<u8>> {
    let n = get_u8(buf)? as usize;
    if buf.remaining() < n {
        return Err(WireError::Packet);
    }
    let v = buf[..n].to_vec();
    buf.advance(n);
    Ok(v)
}

/// Reads the 20 raw bytes of a score.
pub fn get_score(buf: &mut &[u8]) -> WireResult<Score> {
    if buf.remaining() < SCORE_SIZE {
        return Err(WireError::Packet);
    }
    let score = Score::from_slice(&buf[..SCORE_SIZE]).expect("length checked above");
    buf.advance(SCORE_SIZE);
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut storage = [0u8; 22];
        let mut buf: &mut [u8] = &mut storage;
        put_u8(&mut buf, 0x01);
        put_u16(&mut buf, 0x0203);
        put_u32(&mut buf, 0x0405_0607);
        put_u48(&mut buf, 0x0809_0a0b_0c0d);
        put_u64(&mut buf, 0x0e0f_1011_1213_1415);
        assert_eq!(
            storage,
            [
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
                0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x00
            ][..22]
        );

        let mut rd: &[u8] = &storage;
        assert_eq!(get_u8(&mut rd).unwrap(), 0x01);
        assert_eq!(get_u16(&mut rd).unwrap(), 0x0203);
        assert_eq!(get_u32(&mut rd).unwrap(), 0x0405_0607);
        assert_eq!(get_u48(&mut rd).unwrap(), 0x0809_0a0b_0c0d);
        assert_eq!(get_u64(&mut rd).unwrap(), 0x0e0f_1011_1213_1415);
    }

    #[test]
    fn strings_carry_u16_prefix() {
        let mut storage = [0u8; 16];
        let mut buf: &mut [u8] = &mut storage;
        put_str(&mut buf, "cask");
        assert_eq!(&storage[..6], &[0x00, 0x04, b'c', b'a', b's', b'k']);

        let mut rd: &[u8] = &storage[..6];
        assert_eq!(get_str(&mut rd).unwrap(), "cask");
        assert!(rd.is_empty());
    }

    #[test]
    fn vars_carry_u8_prefix() {
        let mut storage = [0u8; 8];
        let mut buf: &mut [u8] = &mut storage;
        put_var(&mut buf, &[0xaa, 0xbb]);
        assert_eq!(&storage[..3], &[0x02, 0xaa, 0xbb]);

        let mut rd: &[u8] = &storage[..3];
        assert_eq!(get_var(&mut rd).unwrap(), vec![0xaa, 0xbb]);
    }

    #[test]
    fn short_input_is_a_packet_error() {
        let mut rd: &[u8] = &[0x00];
        assert!(matches!(get_u16(&mut rd), Err(WireError::Packet)));

        // length prefix claims more bytes than remain
        let mut rd: &[u8] = &[0x00, 0x05, b'a'];
        assert!(matches!(get_str(&mut rd), Err(WireError::Packet)));

        let mut rd: &[u8] = &[0x03, 0xaa];
        assert!(matches!(get_var(&mut rd), Err(WireError::Packet)));

        let mut rd: &[u8] = &[0u8; 19];
        assert!(matches!(get_score(&mut rd), Err(WireError::Packet)));
    }
}
