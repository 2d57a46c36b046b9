use std::net::{Ipv4Addr, Ipv6Addr};

use bitstream_io::{BitWrite, BitWriter, Endianness};

use super::{
    ParseError,
    common::{PacketComponent, parse_name_at},
    enums::{DNSResourceClass, DNSResourceType},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSResource {
    pub labels: Vec<String>,
    pub rtype: DNSResourceType,
    pub rclass: DNSResourceClass,
    pub ttl: u32,
    pub rdlength: u16,
    /// Resource data, stored with any compression pointers already expanded
    /// so the record can be re-serialized into a different packet.
    pub rdata: Vec<u8>,
}

impl DNSResource {
    fn name_labels(qname: &str) -> Vec<String> {
        qname
            .trim_end_matches('.')
            .split('.')
            .map(|s| s.to_string())
            .collect()
    }

    /// Build an A record.
    pub fn new_a(qname: &str, addr: Ipv4Addr, ttl: u32) -> Self {
        Self {
            labels: Self::name_labels(qname),
            rtype: DNSResourceType::A,
            rclass: DNSResourceClass::IN,
            ttl,
            rdlength: 4,
            rdata: addr.octets().to_vec(),
        }
    }

    /// Build an AAAA record.
    pub fn new_aaaa(qname: &str, addr: Ipv6Addr, ttl: u32) -> Self {
        Self {
            labels: Self::name_labels(qname),
            rtype: DNSResourceType::AAAA,
            rclass: DNSResourceClass::IN,
            ttl,
            rdlength: 16,
            rdata: addr.octets().to_vec(),
        }
    }

    /// Build a TXT record. The text is split into 255-byte character strings
    /// as the wire format requires.
    pub fn new_txt(qname: &str, text: &str, ttl: u32) -> Self {
        let mut rdata = Vec::with_capacity(text.len() + 1);
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            rdata.push(0);
        } else {
            for chunk in bytes.chunks(255) {
                rdata.push(chunk.len() as u8);
                rdata.extend_from_slice(chunk);
            }
        }

        Self {
            labels: Self::name_labels(qname),
            rtype: DNSResourceType::TXT,
            rclass: DNSResourceClass::IN,
            ttl,
            rdlength: rdata.len() as u16,
            rdata,
        }
    }

    /// The IPv4 address of an A record, if this is one.
    pub fn a_addr(&self) -> Option<Ipv4Addr> {
        if self.rtype != DNSResourceType::A || self.rdata.len() != 4 {
            return None;
        }
        Some(Ipv4Addr::new(
            self.rdata[0],
            self.rdata[1],
            self.rdata[2],
            self.rdata[3],
        ))
    }

    /// The character strings of a TXT record, concatenated per string.
    pub fn txt_strings(&self) -> Vec<String> {
        let mut strings = Vec::new();
        if self.rtype != DNSResourceType::TXT {
            return strings;
        }

        let mut offset = 0;
        while offset < self.rdata.len() {
            let len = self.rdata[offset] as usize;
            offset += 1;
            let end = (offset + len).min(self.rdata.len());
            strings.push(String::from_utf8_lossy(&self.rdata[offset..end]).into_owned());
            offset = end;
        }
        strings
    }

    /// Re-encode rdata that embeds domain names so compression pointers into
    /// the source packet are expanded. Other record types pass through as-is.
    fn expand_rdata(
        rtype: DNSResourceType,
        rdata: &[u8],
        rdata_offset: usize,
        packet_buf: &[u8],
    ) -> Result<Vec<u8>, ParseError> {
        let encode_name = |labels: &[String], out: &mut Vec<u8>| {
            for label in labels {
                out.push(label.len() as u8);
                out.extend_from_slice(label.as_bytes());
            }
            out.push(0);
        };

        // Names inside rdata are parsed against the full packet so pointer
        // targets resolve; rdata_offset anchors the slice within the packet.
        let name_at = |pos: usize| parse_name_at(packet_buf, rdata_offset + pos);

        match rtype {
            DNSResourceType::NS | DNSResourceType::CNAME | DNSResourceType::PTR => {
                let (labels, _) = name_at(0)?;
                let mut out = Vec::new();
                encode_name(&labels, &mut out);
                Ok(out)
            }
            DNSResourceType::MX => {
                if rdata.len() < 3 {
                    return Err(ParseError::InvalidResourceRecord);
                }
                let (labels, _) = name_at(2)?;
                let mut out = rdata[..2].to_vec();
                encode_name(&labels, &mut out);
                Ok(out)
            }
            DNSResourceType::SRV => {
                if rdata.len() < 7 {
                    return Err(ParseError::InvalidResourceRecord);
                }
                let (labels, _) = name_at(6)?;
                let mut out = rdata[..6].to_vec();
                encode_name(&labels, &mut out);
                Ok(out)
            }
            DNSResourceType::SOA => {
                let (mname, after_mname) = name_at(0)?;
                let (rname, after_rname) = parse_name_at(packet_buf, after_mname)?;
                let fixed_start = after_rname - rdata_offset;
                if fixed_start + 20 > rdata.len() {
                    return Err(ParseError::InvalidResourceRecord);
                }
                let mut out = Vec::new();
                encode_name(&mname, &mut out);
                encode_name(&rname, &mut out);
                out.extend_from_slice(&rdata[fixed_start..fixed_start + 20]);
                Ok(out)
            }
            _ => Ok(rdata.to_vec()),
        }
    }

    /// Parse a resource record directly from the packet buffer at `offset`,
    /// returning the record and the offset just past it.
    pub fn parse_at(packet_buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (labels, mut pos) = parse_name_at(packet_buf, offset)?;

        if pos + 10 > packet_buf.len() {
            return Err(ParseError::InvalidResourceRecord);
        }

        let rtype: DNSResourceType =
            u16::from_be_bytes([packet_buf[pos], packet_buf[pos + 1]]).into();
        let rclass: DNSResourceClass =
            u16::from_be_bytes([packet_buf[pos + 2], packet_buf[pos + 3]]).into();
        let ttl = u32::from_be_bytes([
            packet_buf[pos + 4],
            packet_buf[pos + 5],
            packet_buf[pos + 6],
            packet_buf[pos + 7],
        ]);
        let rdlength = u16::from_be_bytes([packet_buf[pos + 8], packet_buf[pos + 9]]) as usize;
        pos += 10;

        if pos + rdlength > packet_buf.len() {
            return Err(ParseError::InvalidResourceRecord);
        }

        let raw_rdata = &packet_buf[pos..pos + rdlength];
        let rdata = Self::expand_rdata(rtype, raw_rdata, pos, packet_buf)?;
        pos += rdlength;

        Ok((
            Self {
                labels,
                rtype,
                rclass,
                ttl,
                rdlength: rdata.len() as u16,
                rdata,
            },
            pos,
        ))
    }
}

impl PacketComponent for DNSResource {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        self.write_labels(writer, &self.labels)?;
        writer.write_var::<u16>(16, self.rtype.into())?;
        writer.write_var::<u16>(16, self.rclass.into())?;
        writer.write_var::<u32>(32, self.ttl)?;
        writer.write_var::<u16>(16, self.rdata.len() as u16)?;
        writer.write_bytes(&self.rdata)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitstream_io::BigEndian;

    #[test]
    fn test_a_record_roundtrip() {
        let record = DNSResource::new_a("2.0.0.127.zen.spamhaus.org", Ipv4Addr::new(127, 0, 0, 2), 900);
        assert_eq!(record.a_addr(), Some(Ipv4Addr::new(127, 0, 0, 2)));
        assert_eq!(record.rdata, vec![127, 0, 0, 2]);

        let mut buf = Vec::new();
        {
            let mut writer = BitWriter::<_, BigEndian>::new(&mut buf);
            record.write(&mut writer).unwrap();
        }

        let (parsed, consumed) = DNSResource::parse_at(&buf, 0).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(parsed.a_addr(), Some(Ipv4Addr::new(127, 0, 0, 2)));
        assert_eq!(parsed.ttl, 900);
        assert_eq!(parsed.labels, record.labels);
    }

    #[test]
    fn test_txt_record_strings() {
        let record = DNSResource::new_txt("multi.example.com", "Listed on 2/2 RBLs", 300);
        assert_eq!(record.txt_strings(), vec!["Listed on 2/2 RBLs".to_string()]);
        assert_eq!(record.rdata[0] as usize, "Listed on 2/2 RBLs".len());
    }

    #[test]
    fn test_txt_record_long_text_chunks() {
        let text = "x".repeat(300);
        let record = DNSResource::new_txt("multi.example.com", &text, 300);
        let strings = record.txt_strings();
        assert_eq!(strings.len(), 2);
        assert_eq!(strings[0].len(), 255);
        assert_eq!(strings[1].len(), 45);
    }
}
