//! Framing of a received byte stream into packets.
//!
//! Decoding is resumable: when `buf` does not yet hold a whole packet the
//! functions return `Ok(None)` and consume nothing, so the caller appends more
//! bytes and calls again from the start of the same buffer.

use crate::{
    packet::Packet,
    protocol::{FixedHeader, PacketType},
};

/// Decodes the first packet in `buf`, returning it with the number of bytes it spans.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet, usize)>, crate::Error> {
    let Some((header, header_len)) = parse_fixed_header(buf)? else {
        return Ok(None);
    };

    let end = header_len + header.remaining_len;
    if buf.len() < end {
        return Ok(None);
    }

    let packet = Packet::decode(&header, &buf[header_len..end])?;

    Ok(Some((packet, end)))
}

/// Parses the type byte and remaining length, returning the header and its size.
pub fn parse_fixed_header(buf: &[u8]) -> Result<Option<(FixedHeader, usize)>, crate::Error> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    let (packet_type, flags) = parse_first_byte(first)?;

    let Some((remaining_len, len_bytes)) = parse_remaining_len(&buf[1..])? else {
        return Ok(None);
    };

    let header = FixedHeader {
        packet_type,
        flags,
        remaining_len,
    };

    Ok(Some((header, 1 + len_bytes)))
}

fn parse_first_byte(byte: u8) -> Result<(PacketType, u8), crate::Error> {
    let packet_type = PacketType::try_from(byte >> 4)?;
    let flags = byte & 0x0F;

    if !packet_type.validate_flags(flags) {
        return Err(crate::Error::InvalidFlags);
    }

    Ok((packet_type, flags))
}

fn parse_remaining_len(buf: &[u8]) -> Result<Option<(usize, usize)>, crate::Error> {
    let mut remaining_len: usize = 0;
    let mut multiplier = 1;

    for (i, byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(crate::Error::MalformedRemainingLength);
        }

        remaining_len += (byte & 0x7F) as usize * multiplier;

        if (byte & 0x80) == 0 {
            return Ok(Some((remaining_len, i + 1)));
        }

        multiplier *= 128;
    }

    // A fifth length byte can never be valid, no need to wait for it.
    if buf.len() >= 4 {
        return Err(crate::Error::MalformedRemainingLength);
    }

    Ok(None)
}
