use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter, Endianness};

use super::{ParseError, common::PacketComponent};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

/// Size of the fixed DNS header in bytes.
pub const DNS_HEADER_SIZE: usize = 12;

impl DNSHeader {
    /// Parse the fixed 12-byte header at the front of a packet.
    pub fn parse(packet_buf: &[u8]) -> Result<Self, ParseError> {
        if packet_buf.len() < DNS_HEADER_SIZE {
            return Err(ParseError::InvalidHeader);
        }

        let mut reader = BitReader::<_, BigEndian>::new(&packet_buf[..DNS_HEADER_SIZE]);
        let mut header = DNSHeader::default();
        header.id = reader.read_var::<u16>(16)?;
        header.qr = reader.read_var::<u8>(1)? == 1;
        header.opcode = reader.read_var::<u8>(4)?;
        header.aa = reader.read_var::<u8>(1)? == 1;
        header.tc = reader.read_var::<u8>(1)? == 1;
        header.rd = reader.read_var::<u8>(1)? == 1;
        header.ra = reader.read_var::<u8>(1)? == 1;
        header.z = reader.read_var::<u8>(3)?;
        header.rcode = reader.read_var::<u8>(4)?;
        header.qdcount = reader.read_var::<u16>(16)?;
        header.ancount = reader.read_var::<u16>(16)?;
        header.nscount = reader.read_var::<u16>(16)?;
        header.arcount = reader.read_var::<u16>(16)?;
        Ok(header)
    }
}

impl PacketComponent for DNSHeader {
    fn write<E: Endianness>(
        &self,
        writer: &mut BitWriter<&mut Vec<u8>, E>,
    ) -> Result<(), ParseError> {
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }
}
