//! LZO1X decompression for compressed history blobs.
//!
//! The pump compresses history with LZO1X-1 and announces the uncompressed
//! length in the blob header, so only the decompression side exists here. The
//! instruction decoding follows the published LZO1X stream format: literal
//! runs and four match forms (M1–M4), with the trailing-literal state carried
//! between instructions and the stream terminated by the distance-16384 M4
//! marker.

use crate::error::CnlError;

fn lzo_err(message: &str) -> CnlError {
    CnlError::InvalidHistoryBlob(format!("lzo: {message}"))
}

/// Decompress an LZO1X stream to exactly `expected_len` bytes.
pub fn decompress(src: &[u8], expected_len: usize) -> Result<Vec<u8>, CnlError> {
    let mut out: Vec<u8> = Vec::with_capacity(expected_len);
    let mut ip = 0usize;

    let byte = |ip: &mut usize| -> Result<usize, CnlError> {
        let b = *src.get(*ip).ok_or_else(|| lzo_err("input overrun"))?;
        *ip += 1;
        Ok(b as usize)
    };

    // Zero bytes extend a run length by 255 each; a nonzero byte ends it.
    fn extended_len(
        src: &[u8],
        ip: &mut usize,
        base: usize,
        limit: usize,
    ) -> Result<usize, CnlError> {
        let mut len = base;
        loop {
            let b = *src.get(*ip).ok_or_else(|| lzo_err("input overrun"))? as usize;
            *ip += 1;
            if b == 0 {
                len += 255;
                if len > limit {
                    return Err(lzo_err("run length overflow"));
                }
            } else {
                return Ok(len + b);
            }
        }
    }

    fn copy_literals(
        out: &mut Vec<u8>,
        src: &[u8],
        ip: &mut usize,
        len: usize,
        expected_len: usize,
    ) -> Result<(), CnlError> {
        let end = ip.checked_add(len).ok_or_else(|| lzo_err("input overrun"))?;
        let chunk = src.get(*ip..end).ok_or_else(|| lzo_err("input overrun"))?;
        if out.len() + len > expected_len {
            return Err(lzo_err("output overrun"));
        }
        out.extend_from_slice(chunk);
        *ip = end;
        Ok(())
    }

    fn copy_match(
        out: &mut Vec<u8>,
        distance: usize,
        len: usize,
        expected_len: usize,
    ) -> Result<(), CnlError> {
        if distance == 0 || distance > out.len() {
            return Err(lzo_err("match distance out of range"));
        }
        if out.len() + len > expected_len {
            return Err(lzo_err("output overrun"));
        }
        // matches may overlap their own output, so copy byte-wise
        let mut pos = out.len() - distance;
        for _ in 0..len {
            let b = out[pos];
            out.push(b);
            pos += 1;
        }
        Ok(())
    }

    // literals copied by the previous instruction (0, 1..=3, or 4 for "many")
    let mut state = 0usize;

    let mut t = byte(&mut ip)?;
    if t > 17 {
        // stream-leading literal run
        let len = t - 17;
        copy_literals(&mut out, src, &mut ip, len, expected_len)?;
        state = len.min(4);
        t = byte(&mut ip)?;
    }

    loop {
        let match_len;
        let distance;
        let trailing;

        if t >= 64 {
            // M2: two-byte instruction, distance up to 2048
            let h = byte(&mut ip)?;
            match_len = if t >= 128 {
                5 + ((t >> 5) & 3)
            } else {
                3 + ((t >> 5) & 1)
            };
            distance = (h << 3) + ((t >> 2) & 7) + 1;
            trailing = t & 3;
        } else if t >= 32 {
            // M3: distance up to 16384, extensible length
            let len = match t & 31 {
                0 => extended_len(src, &mut ip, 31, expected_len)?,
                l => l,
            };
            let d = byte(&mut ip)? | (byte(&mut ip)? << 8);
            match_len = len + 2;
            distance = (d >> 2) + 1;
            trailing = d & 3;
        } else if t >= 16 {
            // M4: distance 16384..49151; distance exactly 16384 ends the stream
            let len = match t & 7 {
                0 => extended_len(src, &mut ip, 7, expected_len)?,
                l => l,
            };
            let d = byte(&mut ip)? | (byte(&mut ip)? << 8);
            distance = 16384 + ((t & 8) << 11) + (d >> 2);
            if distance == 16384 {
                break;
            }
            match_len = len + 2;
            trailing = d & 3;
        } else if state == 0 {
            // literal run
            let len = match t {
                0 => extended_len(src, &mut ip, 15, expected_len)?,
                l => l,
            };
            copy_literals(&mut out, src, &mut ip, len + 3, expected_len)?;
            state = 4;
            t = byte(&mut ip)?;
            continue;
        } else {
            // M1: short match right after a literal run
            let h = byte(&mut ip)?;
            if state == 4 {
                match_len = 3;
                distance = (h << 2) + (t >> 2) + 2049;
            } else {
                match_len = 2;
                distance = (h << 2) + (t >> 2) + 1;
            }
            trailing = t & 3;
        }

        copy_match(&mut out, distance, match_len, expected_len)?;
        copy_literals(&mut out, src, &mut ip, trailing, expected_len)?;
        state = trailing;
        t = byte(&mut ip)?;
    }

    if out.len() != expected_len {
        return Err(lzo_err("unexpected decompressed length"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const END_MARKER: [u8; 3] = [0x11, 0x00, 0x00];

    #[test]
    fn literal_only_stream() {
        // leading literal run of 5, then end marker
        let mut src = vec![5 + 17];
        src.extend_from_slice(b"hello");
        src.extend_from_slice(&END_MARKER);
        assert_eq!(decompress(&src, 5).unwrap(), b"hello");
    }

    #[test]
    fn m2_match_extends_a_run() {
        // "aaaa" literals, then an M2 match of 3 bytes at distance 1
        let src = [21, b'a', b'a', b'a', b'a', 64, 0, 0x11, 0x00, 0x00];
        assert_eq!(decompress(&src, 7).unwrap(), b"aaaaaaa");
    }

    #[test]
    fn m3_match_copies_from_farther_back() {
        // "abcd" literals, then an M3 match of 3 bytes at distance 4
        let src = [21, b'a', b'b', b'c', b'd', 33, 12, 0, 0x11, 0x00, 0x00];
        assert_eq!(decompress(&src, 7).unwrap(), b"abcdabc");
    }

    #[test]
    fn long_literal_run_via_length_extension() {
        // a single literal-run instruction covering 4096 bytes:
        // 3 + 15 + 15*255 + 253 = 4096
        let payload = vec![0x5Au8; 4096];
        let mut src = vec![0x00];
        src.extend_from_slice(&[0x00; 15]);
        src.push(253);
        src.extend_from_slice(&payload);
        src.extend_from_slice(&END_MARKER);
        assert_eq!(decompress(&src, 4096).unwrap(), payload);
    }

    #[test]
    fn wrong_declared_length_is_rejected() {
        let mut src = vec![5 + 17];
        src.extend_from_slice(b"hello");
        src.extend_from_slice(&END_MARKER);
        assert!(decompress(&src, 6).is_err());
        assert!(decompress(&src, 4).is_err());
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let src = [21, b'a', b'b'];
        assert!(decompress(&src, 4).is_err());
    }

    #[test]
    fn bad_match_distance_is_rejected() {
        // M2 match at distance 9 with only 4 bytes of output so far
        let src = [21, b'a', b'b', b'c', b'd', 64, 1, 0x11, 0x00, 0x00];
        assert!(decompress(&src, 7).is_err());
    }
}
