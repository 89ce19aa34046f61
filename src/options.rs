use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    TimeOffset = 2,
    Router = 3,
    TimeServer = 4,
    NameServer = 5,
    DomainNameServer = 6,
    HostName = 12,
    DomainName = 15,
    IpForwarding = 19,
    InterfaceMtu = 26,
    StaticRoute = 33,
    NtpServers = 42,
    RequestedIpAddress = 50,
    AddressLeaseTime = 51,
    OptionOverload = 52,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    Message = 56,
    MaxMessageSize = 57,
    RenewalTime = 58,
    RebindingTime = 59,
    VendorClassIdentifier = 60,
    ClientIdentifier = 61,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            2 => Ok(Self::TimeOffset),
            3 => Ok(Self::Router),
            4 => Ok(Self::TimeServer),
            5 => Ok(Self::NameServer),
            6 => Ok(Self::DomainNameServer),
            12 => Ok(Self::HostName),
            15 => Ok(Self::DomainName),
            19 => Ok(Self::IpForwarding),
            26 => Ok(Self::InterfaceMtu),
            33 => Ok(Self::StaticRoute),
            42 => Ok(Self::NtpServers),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::AddressLeaseTime),
            52 => Ok(Self::OptionOverload),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            55 => Ok(Self::ParameterRequestList),
            56 => Ok(Self::Message),
            57 => Ok(Self::MaxMessageSize),
            58 => Ok(Self::RenewalTime),
            59 => Ok(Self::RebindingTime),
            60 => Ok(Self::VendorClassIdentifier),
            61 => Ok(Self::ClientIdentifier),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpType {
    Unknown = 0,
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl From<u8> for DhcpType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Discover,
            2 => Self::Offer,
            3 => Self::Request,
            4 => Self::Decline,
            5 => Self::Ack,
            6 => Self::Nak,
            7 => Self::Release,
            8 => Self::Inform,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DhcpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A decoded DHCP option payload. Each recognised option code maps to
/// exactly one of these shapes; see [`DhcpOption::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    Ipv4List(Vec<Ipv4Addr>),
    U8List(Vec<u8>),
    U16List(Vec<u16>),
    Text(String),
    Duration(Duration),
}

impl DhcpOption {
    /// Parses the payload of a recognised option code.
    pub fn parse(code: OptionCode, data: &[u8]) -> Result<Self> {
        let malformed = || Error::BadOptionLength {
            code: code as u8,
            length: data.len(),
        };

        match code {
            OptionCode::SubnetMask
            | OptionCode::Router
            | OptionCode::TimeServer
            | OptionCode::NameServer
            | OptionCode::DomainNameServer
            | OptionCode::StaticRoute
            | OptionCode::NtpServers
            | OptionCode::RequestedIpAddress
            | OptionCode::ServerIdentifier => {
                if data.is_empty() || data.len() % 4 != 0 {
                    return Err(malformed());
                }
                let addresses = data
                    .chunks_exact(4)
                    .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
                    .collect();
                Ok(Self::Ipv4List(addresses))
            }
            OptionCode::TimeOffset
            | OptionCode::AddressLeaseTime
            | OptionCode::RenewalTime
            | OptionCode::RebindingTime => {
                if data.len() != 4 {
                    return Err(malformed());
                }
                let seconds = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                Ok(Self::Duration(Duration::from_secs(u64::from(seconds))))
            }
            OptionCode::IpForwarding
            | OptionCode::OptionOverload
            | OptionCode::MessageType
            | OptionCode::ParameterRequestList
            | OptionCode::ClientIdentifier => {
                if code == OptionCode::MessageType && data.len() != 1 {
                    return Err(malformed());
                }
                Ok(Self::U8List(data.to_vec()))
            }
            OptionCode::InterfaceMtu | OptionCode::MaxMessageSize => {
                if data.is_empty() || data.len() % 2 != 0 {
                    return Err(malformed());
                }
                let values = data
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect();
                Ok(Self::U16List(values))
            }
            OptionCode::HostName
            | OptionCode::DomainName
            | OptionCode::Message
            | OptionCode::VendorClassIdentifier => {
                Ok(Self::Text(String::from_utf8_lossy(data).into_owned()))
            }
            OptionCode::Pad | OptionCode::End => Err(malformed()),
        }
    }

    /// Encodes the payload bytes, without the leading code and length octets.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ipv4List(addresses) => {
                let mut payload = Vec::with_capacity(addresses.len() * 4);
                for address in addresses {
                    payload.extend_from_slice(&address.octets());
                }
                payload
            }
            Self::U8List(bytes) => bytes.clone(),
            Self::U16List(values) => {
                let mut payload = Vec::with_capacity(values.len() * 2);
                for value in values {
                    payload.extend_from_slice(&value.to_be_bytes());
                }
                payload
            }
            Self::Text(text) => text.as_bytes().to_vec(),
            Self::Duration(duration) => {
                let seconds = duration.as_secs().min(u64::from(u32::MAX)) as u32;
                seconds.to_be_bytes().to_vec()
            }
        }
    }
}

/// An ordered map of DHCP options, keyed by option code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhcpOptions(BTreeMap<OptionCode, DhcpOption>);

impl DhcpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, code: OptionCode, option: DhcpOption) {
        self.0.insert(code, option);
    }

    pub fn get(&self, code: OptionCode) -> Option<&DhcpOption> {
        self.0.get(&code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OptionCode, &DhcpOption)> {
        self.0.iter().map(|(&code, option)| (code, option))
    }

    /// Decodes a TLV option region. PAD bytes are skipped, unrecognised
    /// codes are consumed without producing an entry, and decoding stops
    /// at the first END octet.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut options = BTreeMap::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                return Ok(Self(options));
            }

            if index + 1 >= data.len() {
                return Err(Error::TruncatedOption(code));
            }

            let length = data[index + 1] as usize;
            if index + 2 + length > data.len() {
                return Err(Error::TruncatedOption(code));
            }

            let payload = &data[index + 2..index + 2 + length];
            if let Ok(known) = OptionCode::try_from(code) {
                options.insert(known, DhcpOption::parse(known, payload)?);
            }

            index += 2 + length;
        }

        Err(Error::UnterminatedOptions)
    }

    /// Encodes all options as TLV entries followed by a single END octet.
    /// PAD and END entries in the map are never emitted.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();

        for (&code, option) in &self.0 {
            if code == OptionCode::Pad || code == OptionCode::End {
                continue;
            }

            let payload = option.encode();
            if payload.len() > 255 {
                return Err(Error::OptionTooLarge(code as u8));
            }

            buffer.push(code as u8);
            buffer.push(payload.len() as u8);
            buffer.extend_from_slice(&payload);
        }

        buffer.push(OptionCode::End as u8);

        Ok(buffer)
    }
}
