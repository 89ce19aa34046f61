use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::options::{DhcpOption, DhcpOptions, DhcpType, OptionCode};

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const HEADER_SIZE: usize = 236;
const MIN_PACKET_SIZE: usize = 240;
const MIN_FRAME_SIZE: usize = 300;
const CHADDR_FIELD_SIZE: usize = 16;
const SNAME_FIELD_SIZE: usize = 64;
const FILE_FIELD_SIZE: usize = 128;

pub const HTYPE_ETHERNET: u8 = 1;
pub const BROADCAST_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootpOperation {
    Request = 1,
    Reply = 2,
}

/// A DHCP message: the fixed BOOTP header plus the typed option map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpMessage {
    pub operation: BootpOperation,
    pub hw_type: u8,
    pub hops: u8,
    pub transaction_id: u32,
    pub seconds: Duration,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    /// Client hardware address, 1 to 16 octets. The length is recorded
    /// in the wire header's hlen field.
    pub chaddr: Vec<u8>,
    pub sname: String,
    pub file: String,
    pub options: DhcpOptions,
}

fn read_ipv4(data: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(data[0], data[1], data[2], data[3])
}

fn read_padded_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn write_padded(buffer: &mut Vec<u8>, bytes: &[u8], width: usize) {
    let used = bytes.len().min(width);
    buffer.extend_from_slice(&bytes[..used]);
    buffer.resize(buffer.len() + width - used, 0);
}

impl DhcpMessage {
    /// Decodes a wire-format DHCP packet.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_PACKET_SIZE || data[HEADER_SIZE..MIN_PACKET_SIZE] != DHCP_MAGIC_COOKIE {
            return Err(Error::BadCookie);
        }

        let operation = match data[0] {
            1 => BootpOperation::Request,
            2 => BootpOperation::Reply,
            _ => return Err(Error::BadOperation),
        };

        let hlen = data[2] as usize;
        if hlen < 1 || hlen > CHADDR_FIELD_SIZE {
            return Err(Error::BadHwLen);
        }

        let options = DhcpOptions::decode(&data[MIN_PACKET_SIZE..])?;

        Ok(Self {
            operation,
            hw_type: data[1],
            hops: data[3],
            transaction_id: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            seconds: Duration::from_secs(u64::from(u16::from_be_bytes([data[8], data[9]]))),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: read_ipv4(&data[12..16]),
            yiaddr: read_ipv4(&data[16..20]),
            siaddr: read_ipv4(&data[20..24]),
            giaddr: read_ipv4(&data[24..28]),
            chaddr: data[28..28 + hlen].to_vec(),
            sname: read_padded_string(&data[44..108]),
            file: read_padded_string(&data[108..HEADER_SIZE]),
            options,
        })
    }

    /// Encodes the message to wire format, padded to the 300-octet BOOTP
    /// minimum frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.chaddr.is_empty() || self.chaddr.len() > CHADDR_FIELD_SIZE {
            return Err(Error::BadHwLen);
        }

        let mut buffer = Vec::with_capacity(MIN_FRAME_SIZE);

        buffer.push(self.operation as u8);
        buffer.push(self.hw_type);
        buffer.push(self.chaddr.len() as u8);
        buffer.push(self.hops);

        buffer.extend_from_slice(&self.transaction_id.to_be_bytes());
        let seconds = self.seconds.as_secs().min(u64::from(u16::MAX)) as u16;
        buffer.extend_from_slice(&seconds.to_be_bytes());
        buffer.extend_from_slice(&self.flags.to_be_bytes());

        buffer.extend_from_slice(&self.ciaddr.octets());
        buffer.extend_from_slice(&self.yiaddr.octets());
        buffer.extend_from_slice(&self.siaddr.octets());
        buffer.extend_from_slice(&self.giaddr.octets());

        write_padded(&mut buffer, &self.chaddr, CHADDR_FIELD_SIZE);
        write_padded(&mut buffer, self.sname.as_bytes(), SNAME_FIELD_SIZE);
        write_padded(&mut buffer, self.file.as_bytes(), FILE_FIELD_SIZE);

        buffer.extend_from_slice(&DHCP_MAGIC_COOKIE);
        buffer.extend_from_slice(&self.options.encode()?);

        if buffer.len() < MIN_FRAME_SIZE {
            buffer.resize(MIN_FRAME_SIZE, 0);
        }

        Ok(buffer)
    }

    /// The DHCP message type from option 53, or [`DhcpType::Unknown`] when
    /// the option is absent or empty.
    pub fn message_type(&self) -> DhcpType {
        match self.options.get(OptionCode::MessageType) {
            Some(DhcpOption::U8List(bytes)) => bytes
                .first()
                .map(|&value| DhcpType::from(value))
                .unwrap_or(DhcpType::Unknown),
            _ => DhcpType::Unknown,
        }
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        match self.options.get(OptionCode::RequestedIpAddress) {
            Some(DhcpOption::Ipv4List(addresses)) => addresses.first().copied(),
            _ => None,
        }
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        match self.options.get(OptionCode::ServerIdentifier) {
            Some(DhcpOption::Ipv4List(addresses)) => addresses.first().copied(),
            _ => None,
        }
    }

    pub fn client_identifier(&self) -> Option<Vec<u8>> {
        match self.options.get(OptionCode::ClientIdentifier) {
            Some(DhcpOption::U8List(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }

    /// The hardware address as colon-separated hex, for logging.
    pub fn mac_display(&self) -> String {
        self.chaddr
            .iter()
            .map(|byte| format!("{:02x}", byte))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Builds the common reply skeleton: a broadcast BOOTREPLY that echoes
    /// the request's htype, hops, xid, secs, and chaddr, carries the server
    /// address in siaddr, and starts with only the server-identifier option.
    pub fn basic_reply(request: &DhcpMessage, server_ip: Ipv4Addr) -> Self {
        let mut options = DhcpOptions::new();
        options.insert(
            OptionCode::ServerIdentifier,
            DhcpOption::Ipv4List(vec![server_ip]),
        );

        Self {
            operation: BootpOperation::Reply,
            hw_type: request.hw_type,
            hops: request.hops,
            transaction_id: request.transaction_id,
            seconds: request.seconds,
            flags: BROADCAST_FLAG,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: server_ip,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: request.chaddr.clone(),
            sname: String::new(),
            file: String::new(),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discover_bytes() -> Vec<u8> {
        let mut packet = vec![0u8; 300];

        packet[0] = BootpOperation::Request as u8;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = 6;
        packet[3] = 0;

        packet[4..8].copy_from_slice(&0xdeadbeefu32.to_be_bytes());
        packet[8..10].copy_from_slice(&5u16.to_be_bytes());
        packet[10..12].copy_from_slice(&BROADCAST_FLAG.to_be_bytes());

        packet[28..34].copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);

        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        packet[240] = OptionCode::MessageType as u8;
        packet[241] = 1;
        packet[242] = DhcpType::Discover as u8;
        packet[243] = OptionCode::End as u8;

        packet
    }

    #[test]
    fn decode_discover() {
        let message = DhcpMessage::decode(&discover_bytes()).unwrap();

        assert_eq!(message.operation, BootpOperation::Request);
        assert_eq!(message.hw_type, HTYPE_ETHERNET);
        assert_eq!(message.chaddr, vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(message.transaction_id, 0xdeadbeef);
        assert_eq!(message.seconds, Duration::from_secs(5));
        assert!(message.is_broadcast());
        assert_eq!(message.message_type(), DhcpType::Discover);
        assert_eq!(message.mac_display(), "01:02:03:04:05:06");
    }

    #[test]
    fn roundtrip_preserves_message() {
        let message = DhcpMessage::decode(&discover_bytes()).unwrap();
        let encoded = message.encode().unwrap();
        let reparsed = DhcpMessage::decode(&encoded).unwrap();
        assert_eq!(message, reparsed);
    }

    #[test]
    fn encoded_frame_meets_bootp_minimum() {
        let message = DhcpMessage::decode(&discover_bytes()).unwrap();
        assert!(message.encode().unwrap().len() >= 300);
    }

    #[test]
    fn decode_rejects_short_packet() {
        assert!(matches!(
            DhcpMessage::decode(&[0u8; 239]),
            Err(Error::BadCookie)
        ));
    }

    #[test]
    fn decode_rejects_bad_cookie() {
        let mut packet = discover_bytes();
        packet[236..240].copy_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(DhcpMessage::decode(&packet), Err(Error::BadCookie)));
    }

    #[test]
    fn decode_rejects_bad_operation() {
        let mut packet = discover_bytes();
        packet[0] = 3;
        assert!(matches!(
            DhcpMessage::decode(&packet),
            Err(Error::BadOperation)
        ));
    }

    #[test]
    fn decode_rejects_bad_hardware_length() {
        let mut packet = discover_bytes();
        packet[2] = 0;
        assert!(matches!(DhcpMessage::decode(&packet), Err(Error::BadHwLen)));

        packet[2] = 17;
        assert!(matches!(DhcpMessage::decode(&packet), Err(Error::BadHwLen)));
    }

    #[test]
    fn encode_rejects_bad_hardware_length() {
        let mut message = DhcpMessage::decode(&discover_bytes()).unwrap();
        message.chaddr = vec![0; 17];
        assert!(matches!(message.encode(), Err(Error::BadHwLen)));

        message.chaddr = Vec::new();
        assert!(matches!(message.encode(), Err(Error::BadHwLen)));
    }

    #[test]
    fn message_type_absent_is_unknown() {
        let mut packet = discover_bytes();
        packet[240] = OptionCode::End as u8;
        let message = DhcpMessage::decode(&packet).unwrap();
        assert_eq!(message.message_type(), DhcpType::Unknown);
    }

    #[test]
    fn sname_truncates_at_first_nul() {
        let mut packet = discover_bytes();
        packet[44..49].copy_from_slice(b"boot\0");
        packet[50] = b'x';
        let message = DhcpMessage::decode(&packet).unwrap();
        assert_eq!(message.sname, "boot");
    }

    #[test]
    fn basic_reply_template() {
        let request = DhcpMessage::decode(&discover_bytes()).unwrap();
        let server_ip = Ipv4Addr::new(192, 168, 99, 1);
        let reply = DhcpMessage::basic_reply(&request, server_ip);

        assert_eq!(reply.operation, BootpOperation::Reply);
        assert_eq!(reply.hw_type, request.hw_type);
        assert_eq!(reply.transaction_id, request.transaction_id);
        assert_eq!(reply.seconds, request.seconds);
        assert_eq!(reply.chaddr, request.chaddr);
        assert_eq!(reply.flags, BROADCAST_FLAG);
        assert_eq!(reply.siaddr, server_ip);
        assert_eq!(reply.ciaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.giaddr, Ipv4Addr::UNSPECIFIED);
        assert_eq!(reply.options.len(), 1);
        assert_eq!(reply.server_identifier(), Some(server_ip));
    }

    #[test]
    fn accessors_read_first_value() {
        let mut packet = discover_bytes();
        packet[240] = OptionCode::RequestedIpAddress as u8;
        packet[241] = 4;
        packet[242..246].copy_from_slice(&[192, 168, 99, 42]);
        packet[246] = OptionCode::ServerIdentifier as u8;
        packet[247] = 4;
        packet[248..252].copy_from_slice(&[192, 168, 99, 1]);
        packet[252] = OptionCode::End as u8;

        let message = DhcpMessage::decode(&packet).unwrap();
        assert_eq!(message.requested_ip(), Some(Ipv4Addr::new(192, 168, 99, 42)));
        assert_eq!(
            message.server_identifier(),
            Some(Ipv4Addr::new(192, 168, 99, 1))
        );
        assert_eq!(message.client_identifier(), None);
    }
}
