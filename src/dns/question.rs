use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, parse_name_at},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: DNSResourceType,
    pub qclass: DNSResourceClass,
}

impl DNSQuestion {
    pub fn new(qname: &str, qtype: DNSResourceType) -> Self {
        Self {
            labels: qname
                .trim_end_matches('.')
                .split('.')
                .map(|s| s.to_string())
                .collect(),
            qtype,
            qclass: DNSResourceClass::IN,
        }
    }

    /// Query name as a lowercase dotted string without the trailing root dot.
    pub fn qname(&self) -> String {
        self.labels
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_lowercase())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Parse a question entry at `offset`, returning it and the offset just
    /// past the entry.
    pub fn parse_at(packet_buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (labels, pos) = parse_name_at(packet_buf, offset)?;

        if pos + 4 > packet_buf.len() {
            return Err(ParseError::InvalidLabel);
        }

        let qtype = u16::from_be_bytes([packet_buf[pos], packet_buf[pos + 1]]).into();
        let qclass = u16::from_be_bytes([packet_buf[pos + 2], packet_buf[pos + 3]]).into();

        Ok((
            Self {
                labels,
                qtype,
                qclass,
            },
            pos + 4,
        ))
    }
}

impl PacketComponent for DNSQuestion {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.qtype.into())?;
        writer.write_var::<u16>(16, self.qclass.into())?;
        Ok(())
    }
}
