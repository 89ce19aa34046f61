use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Packet shorter than 240 octets or magic cookie mismatch")]
    BadCookie,

    #[error("BOOTP operation is neither request nor reply")]
    BadOperation,

    #[error("Hardware address length must be between 1 and 16")]
    BadHwLen,

    #[error("Option {0} extends past the end of the packet")]
    TruncatedOption(u8),

    #[error("Option {code} has malformed payload of {length} octets")]
    BadOptionLength { code: u8, length: usize },

    #[error("Options not terminated with END")]
    UnterminatedOptions,

    #[error("Option {0} payload exceeds 255 octets")]
    OptionTooLarge(u8),

    #[error("Received datagram carries no packet-info control message")]
    MissingPktInfo,

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Address {0} is outside the configured pool range")]
    AddressOutOfRange(Ipv4Addr),

    #[error("Unknown interface: {0}")]
    UnknownInterface(String),
}

pub type Result<T> = std::result::Result<T, Error>;
