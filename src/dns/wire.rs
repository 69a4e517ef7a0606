//! DNS wire codec: a subset of RFC 1035 (+ EDNS0/ECS) — one question
//! per request, answer records of type A (1), AAAA (28), and CNAME (5).
//!
//! Free functions rather than a trait pair, since decode here has to
//! follow DNS compression pointers and carry a cursor position across
//! calls.
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

pub const QTYPE_A: u16 = 1;
pub const QTYPE_CNAME: u16 = 5;
pub const QTYPE_AAAA: u16 = 28;
pub const QTYPE_OPT: u16 = 41;

const FLAG_QUERY_RD: u16 = 0x0100;
const FLAG_RESPONSE: u16 = 0x8180;
const ANSWER_TTL: u32 = 0x0000_0e10;
const COMPRESSION_POINTER: u16 = 0xC00C;
const HEADER_LEN: usize = 12;

/// Buffer cap shared by every transport. Oversized replies
/// are silently dropped rather than erroring.
pub const MAX_PACKET_SIZE: usize = 1024;

/// Guards against pointer loops when following DNS name compression.
const MAX_INDIRECTIONS: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.write_u16::<BigEndian>(self.id).unwrap();
        buf.write_u16::<BigEndian>(self.flags).unwrap();
        buf.write_u16::<BigEndian>(self.qdcount).unwrap();
        buf.write_u16::<BigEndian>(self.ancount).unwrap();
        buf.write_u16::<BigEndian>(self.nscount).unwrap();
        buf.write_u16::<BigEndian>(self.arcount).unwrap();
    }

    fn decode(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        if (cur.get_ref().len() as u64).saturating_sub(cur.position()) < HEADER_LEN as u64 {
            return Err(Error::wire("truncated header"));
        }
        Ok(Header {
            id: cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?,
            flags: cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?,
            qdcount: cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?,
            ancount: cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?,
            nscount: cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?,
            arcount: cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?,
        })
    }
}

/// Encode a dotted name into DNS label form, terminated by a zero byte.
///
/// ```
/// use phantomrelay::dns::wire::pack_qname;
///
/// let mut buf = Vec::new();
/// pack_qname("www.example.com", &mut buf);
/// assert_eq!(buf.last(), Some(&0u8));
/// assert_eq!(buf[0], 3); // "www"
/// ```
pub fn pack_qname(name: &str, buf: &mut Vec<u8>) {
    if name.is_empty() {
        buf.push(0);
        return;
    }
    for label in name.split('.') {
        let label = label.as_bytes();
        // labels over 63 octets can't be represented; truncate defensively
        // rather than emit a malformed packet.
        let len = label.len().min(63) as u8;
        buf.push(len);
        buf.extend_from_slice(&label[..len as usize]);
    }
    buf.push(0);
}

/// Decode a dotted name starting at the cursor's current position,
/// following compression pointers. Any truncation or pointer loop yields
/// `Error::WireFormat` rather than panicking.
pub fn decode_qname(cur: &mut Cursor<&[u8]>) -> Result<String> {
    let buf = *cur.get_ref();
    let mut pos = cur.position() as usize;
    let mut labels: Vec<String> = Vec::new();
    let mut indirections = 0u8;
    let mut jumped = false;
    let mut resume_pos = pos;

    loop {
        if pos >= buf.len() {
            return Err(Error::wire("qname read past end of buffer"));
        }
        let len = buf[pos];

        if len == 0 {
            pos += 1;
            if !jumped {
                resume_pos = pos;
            }
            break;
        }

        if len & 0xC0 == 0xC0 {
            if pos + 1 >= buf.len() {
                return Err(Error::wire("truncated compression pointer"));
            }
            indirections += 1;
            if indirections > MAX_INDIRECTIONS {
                return Err(Error::wire("too many compression indirections"));
            }
            let pointer = (((len as u16) & 0x3F) << 8) | buf[pos + 1] as u16;
            if !jumped {
                resume_pos = pos + 2;
            }
            jumped = true;
            pos = pointer as usize;
            continue;
        }

        let start = pos + 1;
        let end = start + len as usize;
        if end > buf.len() {
            return Err(Error::wire("label overruns buffer"));
        }
        labels.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end;
    }

    cur.set_position(resume_pos as u64);
    Ok(labels.join("."))
}

/// EDNS Client Subnet option (code 8) RDATA for the OPT pseudo-record.
fn pack_ecs(ip: std::net::IpAddr) -> Vec<u8> {
    let mut opt = Vec::new();
    match ip {
        std::net::IpAddr::V4(v4) => {
            opt.write_u16::<BigEndian>(8).unwrap(); // OPTION-CODE
            let prefix_bits: u8 = 24;
            let addr_bytes = &v4.octets()[..(prefix_bits as usize + 7) / 8];
            opt.write_u16::<BigEndian>(4 + addr_bytes.len() as u16).unwrap();
            opt.write_u16::<BigEndian>(1).unwrap(); // FAMILY = IPv4
            opt.push(prefix_bits);
            opt.push(0); // SCOPE PREFIX-LENGTH
            opt.extend_from_slice(addr_bytes);
        }
        std::net::IpAddr::V6(v6) => {
            opt.write_u16::<BigEndian>(8).unwrap();
            let prefix_bits: u8 = 56;
            let addr_bytes = &v6.octets()[..(prefix_bits as usize + 7) / 8];
            opt.write_u16::<BigEndian>(4 + addr_bytes.len() as u16).unwrap();
            opt.write_u16::<BigEndian>(2).unwrap(); // FAMILY = IPv6
            opt.push(prefix_bits);
            opt.push(0);
            opt.extend_from_slice(addr_bytes);
        }
    }
    opt
}

fn pack_opt_pseudo_record(ecs: Option<std::net::IpAddr>, buf: &mut Vec<u8>) {
    buf.push(0); // root name
    buf.write_u16::<BigEndian>(QTYPE_OPT).unwrap();
    buf.write_u16::<BigEndian>(4096).unwrap(); // "class": requestor's UDP payload size
    buf.push(0); // extended RCODE
    buf.push(0); // EDNS version
    buf.write_u16::<BigEndian>(0x0800).unwrap(); // Z

    let rdata = ecs.map(pack_ecs).unwrap_or_default();
    buf.write_u16::<BigEndian>(rdata.len() as u16).unwrap();
    buf.extend_from_slice(&rdata);
}

/// Build a query: ID=0, flags=0x0100 (RD), QDCount=1, ANCount=NSCount=0;
/// ARCount=1 iff `ecs` is `Some`.
pub fn pack_request(name: &str, qtype: u16, ecs: Option<std::net::IpAddr>) -> Vec<u8> {
    let header = Header {
        id: 0,
        flags: FLAG_QUERY_RD,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: if ecs.is_some() { 1 } else { 0 },
    };

    let mut buf = Vec::new();
    header.encode(&mut buf);
    pack_qname(name, &mut buf);
    buf.write_u16::<BigEndian>(qtype).unwrap();
    buf.write_u16::<BigEndian>(1).unwrap(); // QCLASS = IN

    if ecs.is_some() {
        pack_opt_pseudo_record(ecs, &mut buf);
    }

    buf
}

/// Decode the first question's name and qtype from a request. Returns
/// `Err` on any buffer underrun; callers treat that as "no question".
pub fn get_qname(buf: &[u8]) -> Result<(String, u16)> {
    if buf.len() < HEADER_LEN {
        return Err(Error::wire("request shorter than header"));
    }
    let mut cur = Cursor::new(buf);
    let header = Header::decode(&mut cur)?;
    if header.qdcount == 0 {
        return Err(Error::wire("no question in request"));
    }
    let name = decode_qname(&mut cur)?;
    let qtype = cur
        .read_u16::<BigEndian>()
        .map_err(|e| Error::wire(e.to_string()))?;
    Ok((name, qtype))
}

#[derive(Debug, Default, Clone)]
pub struct Answers {
    pub a: Vec<Ipv4Addr>,
    pub aaaa: Vec<Ipv6Addr>,
    pub cnames: Vec<String>,
}

/// Decode all answer records of a response, accumulating A and AAAA
/// addresses. CNAMEs are surfaced via a log hook but never chased.
pub fn get_answers(resp: &[u8]) -> Result<Answers> {
    let mut cur = Cursor::new(resp);
    let header = Header::decode(&mut cur)?;

    // skip the question section
    for _ in 0..header.qdcount {
        decode_qname(&mut cur)?;
        cur.set_position(cur.position() + 4); // qtype + qclass
    }

    let mut answers = Answers::default();
    for _ in 0..header.ancount {
        let _name = decode_qname(&mut cur)?;
        let rtype = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let _class = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let _ttl = cur.read_u32::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let rdlength = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;

        let rdata_start = cur.position() as usize;
        let rdata_end = rdata_start + rdlength as usize;
        if rdata_end > resp.len() {
            return Err(Error::wire("rdata overruns buffer"));
        }

        match rtype {
            QTYPE_A if rdlength == 4 => {
                let octets = &resp[rdata_start..rdata_end];
                answers.a.push(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]));
            }
            QTYPE_AAAA if rdlength == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&resp[rdata_start..rdata_end]);
                answers.aaaa.push(Ipv6Addr::from(octets));
            }
            QTYPE_CNAME => {
                let mut name_cur = Cursor::new(resp);
                name_cur.set_position(rdata_start as u64);
                if let Ok(cname) = decode_qname(&mut name_cur) {
                    log::debug!("answer carries CNAME to {cname}, not chased");
                    answers.cnames.push(cname);
                }
            }
            _ => {}
        }

        cur.set_position(rdata_end as u64);
    }

    Ok(answers)
}

fn clone_question_section(req: &[u8]) -> Result<(Header, Vec<u8>)> {
    if req.len() < HEADER_LEN {
        return Err(Error::wire("request shorter than header"));
    }
    let mut cur = Cursor::new(req);
    let header = Header::decode(&mut cur)?;
    for _ in 0..header.qdcount {
        decode_qname(&mut cur)?;
        cur.set_position(cur.position() + 4);
    }
    let question_end = cur.position() as usize;
    Ok((header, req[HEADER_LEN..question_end].to_vec()))
}

fn append_answer_rdata(buf: &mut Vec<u8>, qtype: u16, rdata: &[u8]) {
    buf.write_u16::<BigEndian>(COMPRESSION_POINTER).unwrap();
    buf.write_u16::<BigEndian>(qtype).unwrap();
    buf.write_u16::<BigEndian>(1).unwrap(); // QCLASS = IN
    buf.write_u32::<BigEndian>(ANSWER_TTL).unwrap();
    buf.write_u16::<BigEndian>(rdata.len() as u16).unwrap();
    buf.extend_from_slice(rdata);
}

/// Clone the request, set response flags (QR|RD|RA), set ANCount, and
/// append one synthesized answer record per IP of the requested family.
pub fn build_response(req: &[u8], ips: &[std::net::IpAddr], qtype: u16) -> Result<Vec<u8>> {
    let (mut header, question) = clone_question_section(req)?;
    header.flags = FLAG_RESPONSE;
    header.ancount = ips.len() as u16;
    header.nscount = 0;
    header.arcount = 0;

    let mut buf = Vec::new();
    header.encode(&mut buf);
    buf.extend_from_slice(&question);

    for ip in ips {
        match ip {
            std::net::IpAddr::V4(v4) if qtype == QTYPE_A => {
                append_answer_rdata(&mut buf, QTYPE_A, &v4.octets());
            }
            std::net::IpAddr::V6(v6) if qtype == QTYPE_AAAA => {
                append_answer_rdata(&mut buf, QTYPE_AAAA, &v6.octets());
            }
            _ => {}
        }
    }

    Ok(buf)
}

/// Encode a Nose index as the sentinel A RDATA: `6.0.<hi>.<lo>`.
fn lie_a_rdata(id: usize) -> [u8; 4] {
    let id = id as u16;
    [6, 0, (id >> 8) as u8, (id & 0xFF) as u8]
}

/// Encode a Nose index as the sentinel AAAA RDATA: `2000::<id>` with `id`
/// stored as a 32-bit big-endian suffix.
fn lie_aaaa_rdata(id: usize) -> [u8; 16] {
    let mut rdata = [0u8; 16];
    rdata[0] = 0x20;
    rdata[1] = 0x00;
    rdata[12..16].copy_from_slice(&(id as u32).to_be_bytes());
    rdata
}

/// Same as [`build_response`], but produces exactly one record whose RDATA
/// encodes the Nose `id`.
pub fn build_lie(req: &[u8], id: usize, qtype: u16) -> Result<Vec<u8>> {
    let (mut header, question) = clone_question_section(req)?;
    header.flags = FLAG_RESPONSE;
    header.ancount = 1;
    header.nscount = 0;
    header.arcount = 0;

    let mut buf = Vec::new();
    header.encode(&mut buf);
    buf.extend_from_slice(&question);

    match qtype {
        QTYPE_AAAA => append_answer_rdata(&mut buf, QTYPE_AAAA, &lie_aaaa_rdata(id)),
        _ => append_answer_rdata(&mut buf, QTYPE_A, &lie_a_rdata(id)),
    }

    Ok(buf)
}

/// Decode a Nose index back out of a lie RDATA, the inverse of
/// [`lie_a_rdata`]/[`lie_aaaa_rdata`]. Used by tests and by callers that
/// need to recover the hostname a sentinel answer points at.
pub fn decode_lie_index(ip: &std::net::IpAddr) -> Option<usize> {
    match ip {
        std::net::IpAddr::V4(v4) => {
            let o = v4.octets();
            if o[0] == 6 && o[1] == 0 {
                Some(((o[2] as usize) << 8) | o[3] as usize)
            } else {
                None
            }
        }
        std::net::IpAddr::V6(v6) => {
            let o = v6.octets();
            if o[0] == 0x20 && o[1] == 0x00 {
                Some(u32::from_be_bytes([o[12], o[13], o[14], o[15]]) as usize)
            } else {
                None
            }
        }
    }
}

/// DNS64-like rewrite: issues a rewritten query forcing qtype A (the caller
/// is responsible for sending `pack_request(name, QTYPE_A, ecs)`), then
/// walks the response's answer section and, for each A answer, emits an
/// AAAA answer in a parallel buffer whose RDATA is `prefix` followed by the
/// 4 A-record octets. Other records are copied verbatim. The returned
/// buffer carries the rewritten question qtype (28).
pub fn rewrite_dns64(resp: &[u8], prefix: &[u8; 12]) -> Result<Vec<u8>> {
    let mut cur = Cursor::new(resp);
    let header = Header::decode(&mut cur)?;

    let mut out = Vec::new();
    let mut out_header = header;
    out_header.encode(&mut out);

    // question section, with qtype rewritten to AAAA
    for _ in 0..header.qdcount {
        let start = cur.position() as usize;
        decode_qname(&mut cur)?;
        let name_end = cur.position() as usize;
        out.extend_from_slice(&resp[start..name_end]);
        let _orig_qtype = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let qclass = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        out.write_u16::<BigEndian>(QTYPE_AAAA).unwrap();
        out.write_u16::<BigEndian>(qclass).unwrap();
    }

    for _ in 0..header.ancount {
        let rr_start = cur.position() as usize;
        let _name = decode_qname(&mut cur)?;
        let name_end = cur.position() as usize;
        let rtype = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let class = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let ttl = cur.read_u32::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let rdlength = cur.read_u16::<BigEndian>().map_err(|e| Error::wire(e.to_string()))?;
        let rdata_start = cur.position() as usize;
        let rdata_end = rdata_start + rdlength as usize;
        if rdata_end > resp.len() {
            return Err(Error::wire("rdata overruns buffer"));
        }

        if rtype == QTYPE_A && rdlength == 4 {
            out.extend_from_slice(&resp[rr_start..name_end]);
            out.write_u16::<BigEndian>(QTYPE_AAAA).unwrap();
            out.write_u16::<BigEndian>(class).unwrap();
            out.write_u32::<BigEndian>(ttl).unwrap();
            out.write_u16::<BigEndian>(16).unwrap();
            out.extend_from_slice(prefix);
            out.extend_from_slice(&resp[rdata_start..rdata_end]);
        } else {
            out.extend_from_slice(&resp[rr_start..rdata_end]);
        }

        cur.set_position(rdata_end as u64);
    }

    // authority + additional sections copied verbatim
    out.extend_from_slice(&resp[cur.position() as usize..]);

    Ok(out)
}
