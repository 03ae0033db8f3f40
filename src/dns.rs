//! DNS message parsing and construction.

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 12;

pub const TYPE_A: u16 = 1;
pub const CLASS_IN: u16 = 1;

/// Upper bound on compression pointers followed while decoding one name.
const MAX_POINTER_HOPS: usize = 128;
const MAX_LABEL_LEN: usize = 63;
/// Longest dotted name whose wire form still fits in 255 bytes.
const MAX_NAME_LEN: usize = 253;
const MAX_WIRE_NAME_LEN: usize = 255;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
/// Response code carried by failure responses. This is NXDOMAIN, not SERVFAIL.
const RCODE_FAILURE: u16 = 0x0003;

/// The fixed 12-byte message header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub is_response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub response_code: u8,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A DNS resource record. The record data is carried opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// Parse a client query: the header followed by a single question.
pub fn parse_query(data: &[u8]) -> Result<(DnsHeader, DnsQuestion)> {
    let mut reader = Reader::new(data);
    let header = reader.header()?;
    let question = reader.question()?;

    Ok((header, question))
}

/// Parse an upstream reply into its header, questions and answer records.
///
/// Authority and additional sections are not decoded.
pub fn parse_response(data: &[u8]) -> Result<(DnsHeader, Vec<DnsQuestion>, Vec<DnsRecord>)> {
    let mut reader = Reader::new(data);
    let header = reader.header()?;

    let questions = (0..header.question_count)
        .map(|_| reader.question())
        .collect::<Result<Vec<_>>>()?;
    let answers = (0..header.answer_count)
        .map(|_| reader.record())
        .collect::<Result<Vec<_>>>()?;

    Ok((header, questions, answers))
}

/// Build a recursion-desired A/IN query for `domain` with a random id.
pub fn build_query(domain: &str) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(HEADER_LEN + domain.len() + 6);

    data.extend_from_slice(&rand::random::<u16>().to_be_bytes());
    data.extend_from_slice(&FLAG_RD.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    write_name(&mut data, domain)?;
    data.extend_from_slice(&TYPE_A.to_be_bytes());
    data.extend_from_slice(&CLASS_IN.to_be_bytes());

    Ok(data)
}

/// Build a response to `request` echoing its id and `question`.
///
/// When `failure` is set the response code is NXDOMAIN and `answers` is
/// ignored entirely.
pub fn build_response(
    request: &DnsHeader,
    question: &DnsQuestion,
    answers: &[DnsRecord],
    authoritative: bool,
    failure: bool,
) -> Result<Vec<u8>> {
    let answers = if failure { &[][..] } else { answers };
    let ancount = u16::try_from(answers.len())
        .map_err(|_| Error::MalformedPacket("too many answer records"))?;

    let mut flags = FLAG_QR;
    if authoritative {
        flags |= FLAG_AA;
    }
    if failure {
        flags |= RCODE_FAILURE;
    }

    let mut data = Vec::with_capacity(512);

    // Header
    data.extend_from_slice(&request.id.to_be_bytes());
    data.extend_from_slice(&flags.to_be_bytes());
    data.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    data.extend_from_slice(&ancount.to_be_bytes());
    data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    // Question
    write_name(&mut data, &question.domain)?;
    data.extend_from_slice(&question.qtype.to_be_bytes());
    data.extend_from_slice(&question.qclass.to_be_bytes());

    // Answers
    for record in answers {
        let rdlength = u16::try_from(record.rdata.len())
            .map_err(|_| Error::MalformedPacket("record data longer than 65535 bytes"))?;

        write_name(&mut data, &record.name)?;
        data.extend_from_slice(&record.rtype.to_be_bytes());
        data.extend_from_slice(&record.class.to_be_bytes());
        data.extend_from_slice(&record.ttl.to_be_bytes());
        data.extend_from_slice(&rdlength.to_be_bytes());
        data.extend_from_slice(&record.rdata);
    }

    Ok(data)
}

/// Write `name` as length-prefixed labels terminated by the root label.
fn write_name(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(name.to_string()));
    }

    if !name.is_empty() {
        for label in name.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(Error::InvalidName(name.to_string()));
            }
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
    }
    buf.push(0);

    Ok(())
}

/// Cursor over a received message.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(Error::MalformedPacket("truncated message"))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn header(&mut self) -> Result<DnsHeader> {
        if self.buf.len() < HEADER_LEN {
            return Err(Error::MalformedPacket("shorter than header"));
        }

        let id = self.u16()?;
        let flags = self.u16()?;

        Ok(DnsHeader {
            id,
            is_response: flags & FLAG_QR != 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            authoritative: flags & FLAG_AA != 0,
            truncated: flags & FLAG_TC != 0,
            recursion_desired: flags & FLAG_RD != 0,
            recursion_available: flags & FLAG_RA != 0,
            response_code: (flags & 0x000F) as u8,
            question_count: self.u16()?,
            answer_count: self.u16()?,
            authority_count: self.u16()?,
            additional_count: self.u16()?,
        })
    }

    fn question(&mut self) -> Result<DnsQuestion> {
        Ok(DnsQuestion {
            domain: self.name()?,
            qtype: self.u16()?,
            qclass: self.u16()?,
        })
    }

    fn record(&mut self) -> Result<DnsRecord> {
        let name = self.name()?;
        let rtype = self.u16()?;
        let class = self.u16()?;
        let ttl = self.u32()?;
        let rdlength = self.u16()? as usize;
        let rdata = self
            .bytes(rdlength)
            .map_err(|_| Error::MalformedPacket("record data exceeds message"))?
            .to_vec();

        Ok(DnsRecord {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }

    /// Decode a possibly compressed name.
    ///
    /// The cursor resumes after the first compression pointer, or after the
    /// terminating zero label when the name is not compressed.
    fn name(&mut self) -> Result<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut wire_len = 1;
        let mut offset = self.pos;
        let mut resume = None;
        let mut hops = 0;

        loop {
            let len = *self
                .buf
                .get(offset)
                .ok_or(Error::MalformedPacket("name runs past end of message"))?;

            match len & 0xC0 {
                0xC0 => {
                    let low = *self
                        .buf
                        .get(offset + 1)
                        .ok_or(Error::MalformedPacket("truncated compression pointer"))?;
                    hops += 1;
                    if hops > MAX_POINTER_HOPS {
                        return Err(Error::MalformedPacket("too many compression pointers"));
                    }
                    resume.get_or_insert(offset + 2);
                    offset = (usize::from(len & 0x3F) << 8) | usize::from(low);
                }
                0x00 if len == 0 => {
                    resume.get_or_insert(offset + 1);
                    break;
                }
                0x00 => {
                    let start = offset + 1;
                    let end = start + usize::from(len);
                    let label = self
                        .buf
                        .get(start..end)
                        .ok_or(Error::MalformedPacket("label runs past end of message"))?;
                    wire_len += label.len() + 1;
                    if wire_len > MAX_WIRE_NAME_LEN {
                        return Err(Error::MalformedPacket("name longer than 255 bytes"));
                    }
                    labels.push(decode_label(label));
                    offset = end;
                }
                _ => return Err(Error::MalformedPacket("reserved label type")),
            }
        }

        if let Some(resume) = resume {
            self.pos = resume;
        }
        Ok(labels.join("."))
    }
}

/// One char per byte, so a decoded name always re-encodes to the same length.
/// Non-ASCII bytes and dots inside a label become `?`.
fn decode_label(label: &[u8]) -> String {
    label
        .iter()
        .map(|&b| if b.is_ascii() && b != b'.' { char::from(b) } else { '?' })
        .collect()
}
