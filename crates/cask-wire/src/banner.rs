//! Banner handshake.
//!
//! Before any framed message each side writes one text line announcing the
//! protocol versions it speaks. A peer line is accepted when it starts
//! with `venti-` and its second dash-separated field, a colon-separated
//! version list, contains `02`. The third field names the implementation
//! and is not interpreted. A rejected banner closes the connection before
//! any framing.

use std::io::{Read, Write};

use crate::error::{WireError, WireResult};

/// The banner this implementation sends.
pub const BANNER: &str = "venti-02-cask\n";

/// Upper bound on a peer banner line.
pub const MAX_BANNER: usize = 1024;

/// Checks whether a peer banner line is acceptable.
#[must_use]
pub fn check_banner(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("venti-") else {
        return false;
    };
    let Some((versions, _impl_name)) = rest.split_once('-') else {
        return false;
    };
    versions.split(':').any(|v| v == "02")
}

/// Performs the banner exchange on a fresh connection.
///
/// Writes [`BANNER`], then reads the peer's line one byte at a time up to
/// [`MAX_BANNER`] bytes. Single-byte reads matter here: nothing past the
/// newline may be consumed, since framed messages follow immediately.
///
/// # Errors
///
/// - [`WireError::Io`] on a transport failure or EOF.
/// - [`WireError::Banner`] if the line is too long or not accepted.
pub fn exchange_banner<S: Read + Write>(stream: &mut S) -> WireResult<()> {
    stream.write_all(BANNER.as_bytes())?;
    stream.flush()?;

    let mut line = Vec::with_capacity(32);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Err(WireError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() >= MAX_BANNER {
            return Err(WireError::Banner(String::from_utf8_lossy(&line).into_owned()));
        }
    }

    let line = String::from_utf8_lossy(&line).into_owned();
    if !check_banner(&line) {
        return Err(WireError::Banner(line));
    }
    Ok(())
}
