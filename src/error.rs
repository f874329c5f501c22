//! Speedwire error types.

use std::net::Ipv4Addr;

/// A Speedwire error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The outer packet framing is invalid.
    ///
    /// Packets failing with this error are discarded without further
    /// processing.
    Frame(FrameError),
    /// The packet carries a known protocol id but an impossible sub-layout.
    Protocol(ProtocolError),
    /// Authentication against a device failed.
    Auth(AuthError),
    /// A device did not answer within the allotted time.
    Timeout,
    /// A transport level send or receive problem.
    ///
    /// Transport errors are non-fatal for the operation as a whole; a send
    /// failure towards one device does not affect others.
    Transport(TransportError),
    /// Invalid configuration or socket setup.
    ///
    /// These are fatal for the socket factory and surface at startup.
    Config(ConfigError),
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Frame(e) => write!(f, "frame: {}", e),
            Error::Protocol(e) => write!(f, "protocol: {}", e),
            Error::Auth(e) => write!(f, "auth: {}", e),
            Error::Timeout => f.write_str("timeout"),
            Error::Transport(e) => write!(f, "transport: {}", e),
            Error::Config(e) => write!(f, "config: {}", e),
        }
    }
}

/// Outer packet framing error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FrameError {
    /// The packet does not start with the `"SMA\0"` signature.
    BadSignature,
    /// The group tag `0x02A0` with length 4 is missing at offset 4.
    BadGroupTag,
    /// The packet is too short to hold a field or tag.
    Truncated {
        /// Number of bytes required.
        required: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// A required tag is not present in the tag stream.
    MissingTag(u16),
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::BadSignature => f.write_str("missing SMA signature"),
            FrameError::BadGroupTag => f.write_str("missing group tag"),
            FrameError::Truncated {
                required,
                available,
            } => write!(
                f,
                "packet of {} bytes is too short, {} bytes required",
                available, required
            ),
            FrameError::MissingTag(id) => write!(f, "tag {:#06x} not found", id),
        }
    }
}

/// Sub-layout error within a known protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProtocolError {
    /// The Data2 protocol id is not one this crate understands.
    UnknownProtocol(u16),
    /// The long words field does not agree with the tag length.
    LongWordsMismatch {
        /// Long words field value.
        long_words: u8,
        /// Data2 tag length in bytes.
        tag_length: u16,
    },
    /// The inverter payload is too short to hold the fixed header fields.
    PayloadTooShort(u16),
    /// The record area of an inverter reply does not divide evenly into the
    /// announced register range.
    RecordLength {
        /// Payload bytes available for records.
        payload: usize,
        /// Number of registers announced by the reply.
        registers: u32,
    },
}

impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolError::UnknownProtocol(id) => write!(f, "unknown protocol id {:#06x}", id),
            ProtocolError::LongWordsMismatch {
                long_words,
                tag_length,
            } => write!(
                f,
                "long words {} does not match tag length {}",
                long_words, tag_length
            ),
            ProtocolError::PayloadTooShort(len) => {
                write!(f, "inverter payload of {} bytes is too short", len)
            }
            ProtocolError::RecordLength { payload, registers } => write!(
                f,
                "record payload of {} bytes does not divide into {} registers",
                payload, registers
            ),
        }
    }
}

/// Authentication error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum AuthError {
    /// The device rejected the password (error code `0x0100` on a login
    /// command).
    InvalidPassword,
    /// The device reports a lost session (error code `0x0017`). The command
    /// client raises its `needs_login` flag so the caller can re-authenticate
    /// on the next main loop iteration.
    NotAuthenticated,
    /// The device reported some other non-zero error code.
    LoginFailure(u16),
}

impl core::fmt::Display for AuthError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AuthError::InvalidPassword => f.write_str("invalid password"),
            AuthError::NotAuthenticated => f.write_str("not authenticated, login required"),
            AuthError::LoginFailure(code) => write!(f, "login failed with code {:#06x}", code),
        }
    }
}

/// Transport level error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The network is unreachable. Common transient condition while an
    /// interface is coming up; logged and otherwise ignored.
    Unreachable,
    /// Some other socket I/O error.
    Io(std::io::ErrorKind),
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Unreachable => f.write_str("network unreachable"),
            TransportError::Io(kind) => write!(f, "io: {:?}", kind),
        }
    }
}

/// Configuration or socket setup error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No local IPv4 interface could be enumerated.
    NoInterfaces,
    /// The given address is not a local interface address.
    InvalidInterface(Ipv4Addr),
    /// Creating or configuring a socket failed.
    SocketSetup(std::io::ErrorKind),
    /// The login password exceeds the 12 character wire limit.
    PasswordTooLong {
        /// Length of the supplied password.
        length: usize,
    },
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::NoInterfaces => f.write_str("no local IPv4 interfaces found"),
            ConfigError::InvalidInterface(ip) => write!(f, "{} is not a local interface", ip),
            ConfigError::SocketSetup(kind) => write!(f, "socket setup: {:?}", kind),
            ConfigError::PasswordTooLong { length } => {
                write!(f, "password of {} chars exceeds the 12 char limit", length)
            }
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<speedwire_wire::WireError> for FrameError {
    fn from(e: speedwire_wire::WireError) -> Self {
        match e {
            speedwire_wire::WireError::Truncated {
                required,
                available,
            } => Self::Truncated {
                required,
                available,
            },
        }
    }
}

impl From<speedwire_wire::WireError> for Error {
    fn from(e: speedwire_wire::WireError) -> Self {
        Self::Frame(e.into())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        if e.raw_os_error() == Some(libc::ENETUNREACH) {
            Self::Unreachable
        } else {
            Self::Io(e.kind())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.into())
    }
}
