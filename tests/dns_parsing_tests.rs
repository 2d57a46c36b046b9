//! Wire-format edge cases beyond the unit tests.

use std::net::Ipv4Addr;

use mimir::dns::enums::{DNSResourceClass, DNSResourceType};
use mimir::dns::{DNSPacket, DNSResource};

#[test]
fn test_garbage_input_is_rejected() {
    assert!(DNSPacket::parse(&[]).is_err());
    assert!(DNSPacket::parse(&[0x12, 0x34, 0x01]).is_err());

    // A header promising questions that are not there.
    let mut buf = vec![0u8; 12];
    buf[5] = 3; // qdcount = 3
    assert!(DNSPacket::parse(&buf).is_err());
}

#[test]
fn test_label_longer_than_63_bytes_is_rejected() {
    let mut buf = vec![0u8; 12];
    buf[5] = 1; // qdcount = 1
    buf.push(80); // label length over the limit
    buf.extend_from_slice(&[b'a'; 80]);
    buf.push(0);
    buf.extend_from_slice(&[0, 1, 0, 1]);
    assert!(DNSPacket::parse(&buf).is_err());
}

#[test]
fn test_multi_answer_roundtrip() {
    let query = DNSPacket::new_query(0xBEEF, "2.0.0.127.multi.example.com", DNSResourceType::TXT);
    let mut response = DNSPacket::authoritative_response(&query);
    response.answers.push(DNSResource::new_txt(
        "2.0.0.127.multi.example.com",
        "Listed on 2/2 RBLs (2/3 checked in 21ms)",
        300,
    ));
    response.answers.push(DNSResource::new_txt(
        "2.0.0.127.multi.example.com",
        "Spamhaus ZEN: LISTED",
        300,
    ));
    response.answers.push(DNSResource::new_a(
        "2.0.0.127.multi.example.com",
        Ipv4Addr::new(127, 0, 0, 2),
        300,
    ));

    let bytes = response.serialize().unwrap();
    let parsed = DNSPacket::parse(&bytes).unwrap();

    assert_eq!(parsed.header.ancount, 3);
    assert_eq!(
        parsed.answers[0].txt_strings(),
        vec!["Listed on 2/2 RBLs (2/3 checked in 21ms)".to_string()]
    );
    assert_eq!(
        parsed.answers[1].txt_strings(),
        vec!["Spamhaus ZEN: LISTED".to_string()]
    );
    assert_eq!(parsed.answers[2].a_addr(), Some(Ipv4Addr::new(127, 0, 0, 2)));
}

#[test]
fn test_compressed_cname_rdata_is_expanded() {
    // Question: www.example.com; answer CNAME whose rdata is a pointer back
    // into the question name (offset 12 + "www" label = 16).
    let query = DNSPacket::new_query(0x11, "www.example.com", DNSResourceType::A);
    let mut bytes = query.serialize().unwrap();
    bytes[2] |= 0x80; // QR
    bytes[7] = 1; // ancount

    bytes.extend_from_slice(&[0xC0, 0x0C]); // name -> offset 12
    bytes.extend_from_slice(&[0x00, 0x05, 0x00, 0x01]); // CNAME IN
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x3C]); // ttl 60
    bytes.extend_from_slice(&[0x00, 0x02, 0xC0, 0x10]); // rdlength 2, pointer to "example.com"

    let parsed = DNSPacket::parse(&bytes).unwrap();
    assert_eq!(parsed.answers.len(), 1);
    assert_eq!(parsed.answers[0].rtype, DNSResourceType::CNAME);

    // Re-serializing into a fresh packet must not carry the pointer.
    let reserialized = parsed.serialize().unwrap();
    let reparsed = DNSPacket::parse(&reserialized).unwrap();
    assert_eq!(reparsed.answers[0].labels.join("."), "www.example.com");
    assert_eq!(
        reparsed.answers[0].rdata,
        [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0
        ]
    );
}

#[test]
fn test_question_class_and_type_survive_roundtrip() {
    let query = DNSPacket::new_query(0x1, "example.com", DNSResourceType::AAAA);
    let parsed = DNSPacket::parse(&query.serialize().unwrap()).unwrap();
    assert_eq!(parsed.questions[0].qtype, DNSResourceType::AAAA);
    assert_eq!(parsed.questions[0].qclass, DNSResourceClass::IN);
}

#[test]
fn test_packet_with_no_question_parses() {
    let buf = vec![0u8; 12];
    let parsed = DNSPacket::parse(&buf).unwrap();
    assert!(parsed.questions.is_empty());
    assert!(parsed.is_query());
}
