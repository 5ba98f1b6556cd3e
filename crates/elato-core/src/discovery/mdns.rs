//! Minimal mDNS wire codec: one-question queries and answer lookup.
//!
//! Queries are sent with the unicast-response bit set so a plain UDP socket
//! on an ephemeral port receives the reply without joining the multicast
//! group.

use core::fmt::Write as _;
use core::net::Ipv4Addr;

use heapless::String;

pub const MDNS_PORT: u16 = 5353;
pub const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// Longest presentation-form name a packet can carry.
pub const MAX_NAME_BYTES: usize = 255;
/// Receive buffer large enough for typical single-service responses.
pub const MAX_PACKET_BYTES: usize = 512;

const HEADER_LEN: usize = 12;
const FLAG_RESPONSE: u16 = 0x8000;
const CLASS_IN: u16 = 0x0001;
const CLASS_UNICAST_RESPONSE: u16 = 0x8000;
const MAX_POINTER_HOPS: u8 = 16;

const TYPE_A: u16 = 1;
const TYPE_PTR: u16 = 12;
const TYPE_SRV: u16 = 33;

pub type Name = String<MAX_NAME_BYTES>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MdnsError {
    BufferTooSmall,
    LabelTooLong,
    Truncated,
    BadLabel,
    PointerLoop,
    NameTooLong,
    NotAResponse,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Question<'a> {
    /// PTR query for `_<service>._<protocol>.local`.
    Service { service: &'a str, protocol: &'a str },
    /// A query for `<host>.local`.
    Host(&'a str),
}

/// SRV data for the first advertised instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceAnswer {
    pub port: u16,
    pub target: Name,
    /// Present when the responder attached the target's A record.
    pub address: Option<Ipv4Addr>,
}

pub fn encode_query(question: Question<'_>, id: u16, out: &mut [u8]) -> Result<usize, MdnsError> {
    let mut writer = Writer { out, pos: 0 };
    writer.u16(id)?;
    writer.u16(0)?;
    writer.u16(1)?;
    writer.u16(0)?;
    writer.u16(0)?;
    writer.u16(0)?;

    let qtype = match question {
        Question::Service { service, protocol } => {
            writer.label_prefixed(service)?;
            writer.label_prefixed(protocol)?;
            writer.label("local")?;
            TYPE_PTR
        }
        Question::Host(host) => {
            for label in strip_local(host).split('.') {
                writer.label(label)?;
            }
            writer.label("local")?;
            TYPE_A
        }
    };
    writer.u8(0)?;
    writer.u16(qtype)?;
    writer.u16(CLASS_IN | CLASS_UNICAST_RESPONSE)?;
    Ok(writer.pos)
}

/// Finds the first instance of `_<service>._<protocol>.local` in a response.
///
/// Follows PTR -> SRV -> A. When no PTR answer is present, an SRV record
/// owned by any instance of the service is accepted.
pub fn find_service(
    packet: &[u8],
    service: &str,
    protocol: &str,
) -> Result<Option<ServiceAnswer>, MdnsError> {
    let mut fqdn = Name::new();
    write!(fqdn, "_{}._{}.local", service, protocol).map_err(|_| MdnsError::NameTooLong)?;
    fqdn.make_ascii_lowercase();

    let mut instance: Option<Name> = None;
    for_each_record(packet, |record| {
        if record.rtype == TYPE_PTR && record.owner == fqdn.as_str() {
            let mut name = Name::new();
            read_name(packet, record.rdata_start, &mut name)?;
            instance = Some(name);
            return Ok(true);
        }
        Ok(false)
    })?;

    let mut found: Option<(u16, Name)> = None;
    for_each_record(packet, |record| {
        if record.rtype != TYPE_SRV {
            return Ok(false);
        }
        let owned_by_instance = match &instance {
            Some(name) => record.owner == name.as_str(),
            None => {
                record.owner.len() > fqdn.len()
                    && record.owner.ends_with(fqdn.as_str())
                    && record.owner.as_bytes()[record.owner.len() - fqdn.len() - 1] == b'.'
            }
        };
        if !owned_by_instance {
            return Ok(false);
        }
        let rdata = record.rdata(packet)?;
        if rdata.len() < 7 {
            return Err(MdnsError::Truncated);
        }
        let port = u16::from_be_bytes([rdata[4], rdata[5]]);
        let mut target = Name::new();
        read_name(packet, record.rdata_start + 6, &mut target)?;
        found = Some((port, target));
        Ok(true)
    })?;

    let Some((port, target)) = found else {
        return Ok(None);
    };
    let address = find_address(packet, &target)?;
    Ok(Some(ServiceAnswer {
        port,
        target,
        address,
    }))
}

/// Looks up the A record for `<host>.local` (or `host` if already qualified).
pub fn find_host(packet: &[u8], host: &str) -> Result<Option<Ipv4Addr>, MdnsError> {
    let mut fqdn = Name::new();
    write!(fqdn, "{}.local", strip_local(host)).map_err(|_| MdnsError::NameTooLong)?;
    fqdn.make_ascii_lowercase();
    find_address(packet, &fqdn)
}

fn find_address(packet: &[u8], owner: &str) -> Result<Option<Ipv4Addr>, MdnsError> {
    let mut address = None;
    for_each_record(packet, |record| {
        if record.rtype != TYPE_A || !record.owner.eq_ignore_ascii_case(owner) {
            return Ok(false);
        }
        let rdata = record.rdata(packet)?;
        if rdata.len() != 4 {
            return Err(MdnsError::Truncated);
        }
        address = Some(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3]));
        Ok(true)
    })?;
    Ok(address)
}

fn strip_local(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    match host.len().checked_sub(".local".len()) {
        Some(split) => match host.get(split..) {
            Some(suffix) if suffix.eq_ignore_ascii_case(".local") => &host[..split],
            _ => host,
        },
        None => host,
    }
}

struct RecordView<'n> {
    owner: &'n str,
    rtype: u16,
    rdata_start: usize,
    rdata_len: usize,
}

impl RecordView<'_> {
    fn rdata<'p>(&self, packet: &'p [u8]) -> Result<&'p [u8], MdnsError> {
        packet
            .get(self.rdata_start..self.rdata_start + self.rdata_len)
            .ok_or(MdnsError::Truncated)
    }
}

/// Walks every resource record of a response, answers and additionals alike,
/// until `visit` returns `true`.
fn for_each_record<F>(packet: &[u8], mut visit: F) -> Result<(), MdnsError>
where
    F: FnMut(&RecordView<'_>) -> Result<bool, MdnsError>,
{
    let header = packet.get(..HEADER_LEN).ok_or(MdnsError::Truncated)?;
    let flags = u16::from_be_bytes([header[2], header[3]]);
    if flags & FLAG_RESPONSE == 0 {
        return Err(MdnsError::NotAResponse);
    }
    let count = |at: usize| u16::from_be_bytes([header[at], header[at + 1]]) as usize;
    let questions = count(4);
    let records = count(6) + count(8) + count(10);

    let mut owner = Name::new();
    let mut pos = HEADER_LEN;
    for _ in 0..questions {
        owner.clear();
        pos = read_name(packet, pos, &mut owner)? + 4;
    }

    for _ in 0..records {
        owner.clear();
        pos = read_name(packet, pos, &mut owner)?;
        let fixed = packet.get(pos..pos + 10).ok_or(MdnsError::Truncated)?;
        let rtype = u16::from_be_bytes([fixed[0], fixed[1]]);
        let rdata_len = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
        let rdata_start = pos + 10;
        if rdata_start + rdata_len > packet.len() {
            return Err(MdnsError::Truncated);
        }
        let view = RecordView {
            owner: owner.as_str(),
            rtype,
            rdata_start,
            rdata_len,
        };
        if visit(&view)? {
            return Ok(());
        }
        pos = rdata_start + rdata_len;
    }
    Ok(())
}

/// Decodes a possibly compressed name at `start` into lowercase dotted form
/// and returns the offset just past it in the original byte stream.
fn read_name(packet: &[u8], start: usize, out: &mut Name) -> Result<usize, MdnsError> {
    let mut pos = start;
    let mut resume: Option<usize> = None;
    let mut hops = 0u8;

    loop {
        let len = *packet.get(pos).ok_or(MdnsError::Truncated)?;
        match len & 0xC0 {
            0x00 if len == 0 => {
                return Ok(resume.unwrap_or(pos + 1));
            }
            0x00 => {
                let len = len as usize;
                let label = packet
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(MdnsError::Truncated)?;
                let label = core::str::from_utf8(label).map_err(|_| MdnsError::BadLabel)?;
                if !out.is_empty() {
                    out.push('.').map_err(|_| MdnsError::NameTooLong)?;
                }
                for ch in label.chars() {
                    out.push(ch.to_ascii_lowercase())
                        .map_err(|_| MdnsError::NameTooLong)?;
                }
                pos += 1 + len;
            }
            0xC0 => {
                let low = *packet.get(pos + 1).ok_or(MdnsError::Truncated)?;
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(MdnsError::PointerLoop);
                }
                resume.get_or_insert(pos + 2);
                pos = (((len & 0x3F) as usize) << 8) | low as usize;
            }
            _ => return Err(MdnsError::BadLabel),
        }
    }
}

struct Writer<'b> {
    out: &'b mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn u8(&mut self, value: u8) -> Result<(), MdnsError> {
        let slot = self.out.get_mut(self.pos).ok_or(MdnsError::BufferTooSmall)?;
        *slot = value;
        self.pos += 1;
        Ok(())
    }

    fn u16(&mut self, value: u16) -> Result<(), MdnsError> {
        self.bytes(&value.to_be_bytes())
    }

    fn bytes(&mut self, bytes: &[u8]) -> Result<(), MdnsError> {
        let end = self.pos + bytes.len();
        self.out
            .get_mut(self.pos..end)
            .ok_or(MdnsError::BufferTooSmall)?
            .copy_from_slice(bytes);
        self.pos = end;
        Ok(())
    }

    fn label(&mut self, label: &str) -> Result<(), MdnsError> {
        if label.is_empty() || label.len() > 63 {
            return Err(MdnsError::LabelTooLong);
        }
        self.u8(label.len() as u8)?;
        self.bytes(label.as_bytes())
    }

    fn label_prefixed(&mut self, label: &str) -> Result<(), MdnsError> {
        let label = label.trim_start_matches('_');
        if label.is_empty() || label.len() > 62 {
            return Err(MdnsError::LabelTooLong);
        }
        self.u8(label.len() as u8 + 1)?;
        self.u8(b'_')?;
        self.bytes(label.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembles a response; names are written uncompressed unless a
    /// raw pointer is pushed explicitly.
    struct Packet(std::vec::Vec<u8>);

    impl Packet {
        fn response(answers: u16, additionals: u16) -> Self {
            let mut bytes = std::vec![0u8; HEADER_LEN];
            bytes[2] = 0x84;
            bytes[6..8].copy_from_slice(&answers.to_be_bytes());
            bytes[10..12].copy_from_slice(&additionals.to_be_bytes());
            Self(bytes)
        }

        fn name(&mut self, dotted: &str) -> &mut Self {
            for label in dotted.split('.') {
                self.0.push(label.len() as u8);
                self.0.extend_from_slice(label.as_bytes());
            }
            self.0.push(0);
            self
        }

        fn record(&mut self, owner: &str, rtype: u16, rdata: &[u8]) -> &mut Self {
            self.name(owner);
            self.0.extend_from_slice(&rtype.to_be_bytes());
            self.0.extend_from_slice(&1u16.to_be_bytes());
            self.0.extend_from_slice(&120u32.to_be_bytes());
            self.0.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
            self.0.extend_from_slice(rdata);
            self
        }
    }

    fn encoded_name(dotted: &str) -> std::vec::Vec<u8> {
        let mut packet = Packet(std::vec::Vec::new());
        packet.name(dotted);
        packet.0
    }

    fn srv_rdata(port: u16, target: &str) -> std::vec::Vec<u8> {
        let mut rdata = std::vec![0, 0, 0, 0];
        rdata.extend_from_slice(&port.to_be_bytes());
        rdata.extend_from_slice(&encoded_name(target));
        rdata
    }

    #[test]
    fn service_query_sets_unicast_response_bit() {
        let mut buf = [0u8; 64];
        let len = encode_query(
            Question::Service {
                service: "elato",
                protocol: "tcp",
            },
            0x1234,
            &mut buf,
        )
        .unwrap();

        let mut expected = std::vec![0x12, 0x34, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0];
        expected.extend_from_slice(&encoded_name("_elato._tcp.local"));
        expected.extend_from_slice(&[0x00, 0x0C, 0x80, 0x01]);
        assert_eq!(&buf[..len], expected.as_slice());
    }

    #[test]
    fn host_query_accepts_qualified_names() {
        let mut short = [0u8; 64];
        let mut qualified = [0u8; 64];
        let a = encode_query(Question::Host("elato"), 7, &mut short).unwrap();
        let b = encode_query(Question::Host("elato.local."), 7, &mut qualified).unwrap();
        assert_eq!(&short[..a], &qualified[..b]);
        assert_eq!(&short[a - 4..a], &[0x00, 0x01, 0x80, 0x01]);
    }

    #[test]
    fn query_fails_cleanly_on_small_buffer() {
        let mut buf = [0u8; 16];
        assert_eq!(
            encode_query(Question::Host("elato"), 0, &mut buf),
            Err(MdnsError::BufferTooSmall)
        );
    }

    #[test]
    fn follows_ptr_srv_and_a_records() {
        let mut packet = Packet::response(1, 2);
        packet
            .record("_elato._tcp.local", TYPE_PTR, &encoded_name("Kitchen._elato._tcp.local"))
            .record("kitchen._elato._tcp.local", TYPE_SRV, &srv_rdata(8000, "server-1.local"))
            .record("server-1.local", TYPE_A, &[192, 168, 1, 50]);

        let answer = find_service(&packet.0, "elato", "tcp").unwrap().unwrap();
        assert_eq!(answer.port, 8000);
        assert_eq!(answer.target.as_str(), "server-1.local");
        assert_eq!(answer.address, Some(Ipv4Addr::new(192, 168, 1, 50)));
    }

    #[test]
    fn srv_without_address_is_still_reported() {
        let mut packet = Packet::response(1, 0);
        packet.record("box._elato._tcp.local", TYPE_SRV, &srv_rdata(9000, "box.local"));

        let answer = find_service(&packet.0, "elato", "tcp").unwrap().unwrap();
        assert_eq!(answer.port, 9000);
        assert_eq!(answer.address, None);
    }

    #[test]
    fn other_services_are_ignored() {
        let mut packet = Packet::response(2, 0);
        packet
            .record("_ipp._tcp.local", TYPE_PTR, &encoded_name("printer._ipp._tcp.local"))
            .record("printer._ipp._tcp.local", TYPE_SRV, &srv_rdata(631, "printer.local"));

        assert_eq!(find_service(&packet.0, "elato", "tcp").unwrap(), None);
    }

    #[test]
    fn compressed_names_are_followed() {
        let mut packet = Packet::response(1, 0);
        // Owner "elato" + pointer to the "local" label of a previous name.
        packet.record("x.local", 16, &[]);
        let local_offset = (HEADER_LEN + 2) as u8;
        packet.0.extend_from_slice(&[5, b'e', b'l', b'a', b't', b'o', 0xC0, local_offset]);
        packet.0.extend_from_slice(&TYPE_A.to_be_bytes());
        packet.0.extend_from_slice(&1u16.to_be_bytes());
        packet.0.extend_from_slice(&120u32.to_be_bytes());
        packet.0.extend_from_slice(&4u16.to_be_bytes());
        packet.0.extend_from_slice(&[10, 0, 0, 5]);
        packet.0[7] = 2;

        assert_eq!(
            find_host(&packet.0, "elato").unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 5))
        );
    }

    #[test]
    fn pointer_loops_are_rejected() {
        let mut packet = Packet::response(1, 0);
        packet.0.extend_from_slice(&[0xC0, HEADER_LEN as u8]);
        packet.0.extend_from_slice(&[0, 1, 0, 1, 0, 0, 0, 0, 0, 4, 1, 2, 3, 4]);

        assert_eq!(find_host(&packet.0, "elato"), Err(MdnsError::PointerLoop));
    }

    #[test]
    fn queries_and_truncated_packets_are_not_answers() {
        let mut query = [0u8; 64];
        let len = encode_query(Question::Host("elato"), 1, &mut query).unwrap();
        assert_eq!(find_host(&query[..len], "elato"), Err(MdnsError::NotAResponse));

        let mut packet = Packet::response(1, 0);
        packet.record("elato.local", TYPE_A, &[10, 0, 0, 5]);
        let cut = packet.0.len() - 2;
        assert_eq!(find_host(&packet.0[..cut], "elato"), Err(MdnsError::Truncated));
    }
}
