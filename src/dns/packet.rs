use bitstream_io::{BigEndian, BitWriter};

use super::{
    ParseError,
    common::PacketComponent,
    enums::{DNSResourceType, ResponseCode},
    header::{DNS_HEADER_SIZE, DNSHeader},
    question::DNSQuestion,
    resource::DNSResource,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSResource>,
    pub authorities: Vec<DNSResource>,
    pub resources: Vec<DNSResource>,
}

impl DNSPacket {
    /// Parse a complete DNS message from wire format.
    pub fn parse(packet_buf: &[u8]) -> Result<Self, ParseError> {
        let header = DNSHeader::parse(packet_buf)?;
        let mut pos = DNS_HEADER_SIZE;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (question, next) = DNSQuestion::parse_at(packet_buf, pos)?;
            questions.push(question);
            pos = next;
        }

        let mut parse_records = |count: u16, pos: &mut usize| -> Result<Vec<DNSResource>, ParseError> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (record, next) = DNSResource::parse_at(packet_buf, *pos)?;
                records.push(record);
                *pos = next;
            }
            Ok(records)
        };

        let answers = parse_records(header.ancount, &mut pos)?;
        let authorities = parse_records(header.nscount, &mut pos)?;
        let resources = parse_records(header.arcount, &mut pos)?;

        Ok(DNSPacket {
            header,
            questions,
            answers,
            authorities,
            resources,
        })
    }

    /// Serialize to wire format. Section counts are refreshed first.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut packet = self.clone();
        packet.update_counts();

        let mut buf = Vec::with_capacity(512);
        let mut writer = BitWriter::<_, BigEndian>::new(&mut buf);

        packet.header.write(&mut writer)?;
        for question in &packet.questions {
            question.write(&mut writer)?;
        }
        for answer in &packet.answers {
            answer.write(&mut writer)?;
        }
        for authority in &packet.authorities {
            authority.write(&mut writer)?;
        }
        for resource in &packet.resources {
            resource.write(&mut writer)?;
        }

        Ok(buf)
    }

    /// Synchronize header counts with the actual section lengths.
    pub fn update_counts(&mut self) {
        self.header.qdcount = self.questions.len() as u16;
        self.header.ancount = self.answers.len() as u16;
        self.header.nscount = self.authorities.len() as u16;
        self.header.arcount = self.resources.len() as u16;
    }

    /// Whether this packet is a query (QR bit clear).
    pub fn is_query(&self) -> bool {
        !self.header.qr
    }

    pub fn first_question(&self) -> Option<&DNSQuestion> {
        self.questions.first()
    }

    /// Build an outbound query for an upstream server.
    pub fn new_query(id: u16, qname: &str, qtype: DNSResourceType) -> Self {
        let mut packet = DNSPacket {
            header: DNSHeader {
                id,
                rd: true,
                ..DNSHeader::default()
            },
            questions: vec![DNSQuestion::new(qname, qtype)],
            ..DNSPacket::default()
        };
        packet.update_counts();
        packet
    }

    /// Start a response for `query`: id, opcode and RD copied, question
    /// echoed, QR set. Flags and records are filled in by the caller.
    pub fn response_to(query: &DNSPacket) -> Self {
        let mut response = DNSPacket {
            header: DNSHeader {
                id: query.header.id,
                qr: true,
                opcode: query.header.opcode,
                rd: query.header.rd,
                rcode: ResponseCode::NoError.to_u8(),
                ..DNSHeader::default()
            },
            questions: query.questions.clone(),
            ..DNSPacket::default()
        };
        response.update_counts();
        response
    }

    /// Authoritative response skeleton for zones this server owns.
    pub fn authoritative_response(query: &DNSPacket) -> Self {
        let mut response = Self::response_to(query);
        response.header.aa = true;
        response.header.ra = false;
        response
    }

    /// Response with the given rcode and no records.
    pub fn rcode_response(query: &DNSPacket, rcode: ResponseCode) -> Self {
        let mut response = Self::authoritative_response(query);
        response.header.rcode = rcode.to_u8();
        response
    }

    /// Empty response with TC=1; the client is expected to retry over TCP.
    pub fn truncated_response(query: &DNSPacket) -> Self {
        let mut response = Self::response_to(query);
        response.header.tc = true;
        response
    }
}
