use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::ParseError;

/// Parse a (possibly compressed) domain name starting at `start` in the raw
/// packet buffer. Returns the labels and the offset just past the name.
pub fn parse_name_at(data: &[u8], start: usize) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut offset = start;
    let mut jumps = 0;
    let mut end_after_pointer = None;

    loop {
        if offset >= data.len() {
            return Err(ParseError::InvalidLabel);
        }

        let len = data[offset];

        if (len & 0xC0) == 0xC0 {
            if offset + 1 >= data.len() {
                return Err(ParseError::InvalidLabel);
            }

            // The in-place encoding ends right after the two pointer bytes;
            // the name itself continues at the pointer target.
            if end_after_pointer.is_none() {
                end_after_pointer = Some(offset + 2);
            }

            jumps += 1;
            if jumps > 5 {
                return Err(ParseError::InvalidLabel);
            }

            offset = u16::from_be_bytes([data[offset] & 0x3F, data[offset + 1]]) as usize;
            continue;
        }

        if len == 0 {
            return Ok((labels, end_after_pointer.unwrap_or(offset + 1)));
        }

        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }

        offset += 1;
        let label_end = offset + len as usize;
        if label_end > data.len() {
            return Err(ParseError::InvalidLabel);
        }

        let label = String::from_utf8(data[offset..label_end].to_vec())
            .map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        offset = label_end;
    }
}

/// Wire-format serialization for packet sections. Parsing is positional
/// (`parse_name_at` and the per-section `parse_at` functions) because
/// compression pointers need absolute packet offsets.
pub trait PacketComponent {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError>;

    fn write_labels<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
        labels: &[String],
    ) -> Result<(), ParseError> {
        for label in labels {
            if label.is_empty() {
                continue;
            }
            if label.len() > 63 {
                return Err(ParseError::InvalidLabel);
            }
            writer.write_var::<u8>(8, label.len() as u8)?;
            writer.write_bytes(label.as_bytes())?;
        }
        writer.write_var::<u8>(8, 0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_plain() {
        // "bl.example" followed by trailing bytes
        let buf = [2, b'b', b'l', 7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0, 0xFF];
        let (labels, next) = parse_name_at(&buf, 0).unwrap();
        assert_eq!(labels, vec!["bl".to_string(), "example".to_string()]);
        assert_eq!(next, 12);
    }

    #[test]
    fn test_parse_name_with_pointer() {
        // Name at 0: "example"; name at 9: "bl" + pointer to 0.
        let mut buf = vec![7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 0];
        buf.extend_from_slice(&[2, b'b', b'l', 0xC0, 0x00]);
        let (labels, next) = parse_name_at(&buf, 9).unwrap();
        assert_eq!(labels, vec!["bl".to_string(), "example".to_string()]);
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_parse_name_pointer_loop_rejected() {
        // Pointer to itself
        let buf = [0xC0, 0x00];
        assert!(parse_name_at(&buf, 0).is_err());
    }
}
