//! Stream endpoints.
//!
//! An endpoint is parsed once from a stream path of the form
//! `kind://address[#format]` and is immutable afterwards. Supported paths:
//!
//! - `serial://port[:brate[:bsize[:parity[:stopb[:fctr]]]]]`
//! - `tcpsvr://:port`
//! - `tcpcli://addr:port`
//! - `ntrip://[user[:passwd]@]addr[:port][/mntpnt]`
//! - `ntrips://[:passwd@]addr[:port][/mntpnt[:str]]`
//! - `[file://]path[::T][::+start][::xspeed][::S=swap]`
//!
//! `Display` renders the canonical form of an endpoint, so parsing a rendered
//! endpoint yields the same value.

use std::fmt;
use std::str::FromStr;

use crate::error::EndpointError;
use crate::format::StreamFormat;

/// Default NTRIP caster port.
pub const NTRIP_DEFAULT_PORT: u16 = 2101;

/// Transport kind of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    File,
    Serial,
    TcpServer,
    TcpClient,
    NtripClient,
    NtripServer,
}

impl StreamKind {
    /// URL scheme used in stream paths.
    pub fn scheme(&self) -> &'static str {
        match self {
            StreamKind::File => "file",
            StreamKind::Serial => "serial",
            StreamKind::TcpServer => "tcpsvr",
            StreamKind::TcpClient => "tcpcli",
            StreamKind::NtripClient => "ntrip",
            StreamKind::NtripServer => "ntrips",
        }
    }

    /// Human readable name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::File => "file",
            StreamKind::Serial => "serial",
            StreamKind::TcpServer => "tcp server",
            StreamKind::TcpClient => "tcp client",
            StreamKind::NtripClient => "ntrip client",
            StreamKind::NtripServer => "ntrip server",
        }
    }

    /// Whether receiver command text may be written to this kind of stream.
    pub fn accepts_commands(&self) -> bool {
        matches!(
            self,
            StreamKind::Serial | StreamKind::TcpClient | StreamKind::TcpServer
        )
    }

    /// Whether an active connection of this kind is dropped after the
    /// inactivity timeout.
    pub fn has_inactivity_timeout(&self) -> bool {
        matches!(self, StreamKind::Serial | StreamKind::TcpServer)
    }

    fn from_scheme(scheme: &str) -> Result<Self, EndpointError> {
        match scheme {
            "file" => Ok(StreamKind::File),
            "serial" => Ok(StreamKind::Serial),
            "tcpsvr" => Ok(StreamKind::TcpServer),
            "tcpcli" => Ok(StreamKind::TcpClient),
            "ntrip" => Ok(StreamKind::NtripClient),
            "ntrips" => Ok(StreamKind::NtripServer),
            other => Err(EndpointError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Serial parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    fn code(&self) -> char {
        match self {
            Parity::None => 'n',
            Parity::Even => 'e',
            Parity::Odd => 'o',
        }
    }
}

/// Serial flow control setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Off,
    Rts,
    Xon,
}

impl FlowControl {
    fn name(&self) -> &'static str {
        match self {
            FlowControl::Off => "off",
            FlowControl::Rts => "rts",
            FlowControl::Xon => "xon",
        }
    }
}

/// `serial://port[:brate[:bsize[:parity[:stopb[:fctr]]]]]`
#[derive(Debug, Clone, PartialEq)]
pub struct SerialAddress {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub flow_control: FlowControl,
}

/// `tcpsvr://[bind]:port`
#[derive(Debug, Clone, PartialEq)]
pub struct TcpServerAddress {
    /// Optional bind address; all interfaces when absent.
    pub bind: Option<String>,
    pub port: u16,
}

/// `tcpcli://addr:port`
#[derive(Debug, Clone, PartialEq)]
pub struct TcpClientAddress {
    pub host: String,
    pub port: u16,
}

/// `ntrip://[user[:passwd]@]addr[:port][/mntpnt]`
#[derive(Debug, Clone, PartialEq)]
pub struct NtripClientAddress {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    /// Empty when the caster source table is requested.
    pub mountpoint: String,
}

/// `ntrips://[:passwd@]addr[:port][/mntpnt[:str]]`
#[derive(Debug, Clone, PartialEq)]
pub struct NtripServerAddress {
    pub password: Option<String>,
    pub host: String,
    pub port: u16,
    pub mountpoint: String,
    /// Source table `STR` entry sent with the handshake.
    pub source_entry: Option<String>,
}

/// `[file://]path[::T][::+start][::xspeed][::S=swap]`
#[derive(Debug, Clone, PartialEq)]
pub struct FileAddress {
    /// Path, possibly containing time keywords (`%Y`, `%m`, ...).
    pub path: String,
    /// Record (output) or honour (input) a time-tag sidecar file.
    pub time_tag: bool,
    /// Playback start offset in seconds.
    pub start: f64,
    /// Playback speed multiplier.
    pub speed: f64,
    /// Swap (rotation) period in hours, 0 for none.
    pub swap_hours: f64,
}

impl FileAddress {
    /// A plain file path with default options.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            time_tag: false,
            start: 0.0,
            speed: 1.0,
            swap_hours: 0.0,
        }
    }
}

/// Kind-specific address of an endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    File(FileAddress),
    Serial(SerialAddress),
    TcpServer(TcpServerAddress),
    TcpClient(TcpClientAddress),
    NtripClient(NtripClientAddress),
    NtripServer(NtripServerAddress),
}

/// A configured stream source or sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub address: Address,
    pub format: Option<StreamFormat>,
}

impl Endpoint {
    /// Parse a stream path.
    pub fn parse(path: &str) -> Result<Self, EndpointError> {
        let (body, format) = match path.rsplit_once('#') {
            Some((body, tag)) => (body, Some(tag.parse::<StreamFormat>()?)),
            None => (path, None),
        };

        let address = match body.split_once("://") {
            None => Address::File(parse_file(body)?),
            Some((scheme, rest)) => match StreamKind::from_scheme(scheme)? {
                StreamKind::File => Address::File(parse_file(rest)?),
                StreamKind::Serial => Address::Serial(parse_serial(rest)?),
                StreamKind::TcpServer => Address::TcpServer(parse_tcp_server(rest)?),
                StreamKind::TcpClient => Address::TcpClient(parse_tcp_client(rest)?),
                StreamKind::NtripClient => Address::NtripClient(parse_ntrip_client(rest)?),
                StreamKind::NtripServer => Address::NtripServer(parse_ntrip_server(rest)?),
            },
        };

        Ok(Self { address, format })
    }

    /// Transport kind of this endpoint.
    pub fn kind(&self) -> StreamKind {
        match &self.address {
            Address::File(_) => StreamKind::File,
            Address::Serial(_) => StreamKind::Serial,
            Address::TcpServer(_) => StreamKind::TcpServer,
            Address::TcpClient(_) => StreamKind::TcpClient,
            Address::NtripClient(_) => StreamKind::NtripClient,
            Address::NtripServer(_) => StreamKind::NtripServer,
        }
    }

    /// Check that the endpoint can act as the relay input.
    pub fn validate_input(&self) -> Result<(), EndpointError> {
        if self.kind() == StreamKind::NtripServer {
            return Err(EndpointError::UnsupportedRole {
                kind: self.kind().name(),
                role: "input",
            });
        }
        Ok(())
    }

    /// Check that the endpoint can act as a relay output.
    pub fn validate_output(&self) -> Result<(), EndpointError> {
        if self.kind() == StreamKind::NtripClient {
            return Err(EndpointError::UnsupportedRole {
                kind: self.kind().name(),
                role: "output",
            });
        }
        match self.format {
            Some(format) if !format.is_output_capable() => {
                Err(EndpointError::InputOnlyFormat(format.tag().to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.kind().scheme())?;
        match &self.address {
            Address::File(a) => {
                f.write_str(&a.path)?;
                if a.time_tag {
                    f.write_str("::T")?;
                }
                if a.start != 0.0 {
                    write!(f, "::+{}", a.start)?;
                }
                if a.speed != 1.0 {
                    write!(f, "::x{}", a.speed)?;
                }
                if a.swap_hours != 0.0 {
                    write!(f, "::S={}", a.swap_hours)?;
                }
            }
            Address::Serial(a) => write!(
                f,
                "{}:{}:{}:{}:{}:{}",
                a.port,
                a.baud_rate,
                a.data_bits,
                a.parity.code(),
                a.stop_bits,
                a.flow_control.name()
            )?,
            Address::TcpServer(a) => {
                write!(f, "{}:{}", a.bind.as_deref().unwrap_or(""), a.port)?
            }
            Address::TcpClient(a) => write!(f, "{}:{}", a.host, a.port)?,
            Address::NtripClient(a) => {
                match (&a.user, &a.password) {
                    (None, None) => {}
                    (user, None) => write!(f, "{}@", user.as_deref().unwrap_or(""))?,
                    (user, Some(password)) => {
                        write!(f, "{}:{}@", user.as_deref().unwrap_or(""), password)?
                    }
                }
                write!(f, "{}:{}", a.host, a.port)?;
                if !a.mountpoint.is_empty() {
                    write!(f, "/{}", a.mountpoint)?;
                }
            }
            Address::NtripServer(a) => {
                if let Some(password) = &a.password {
                    write!(f, ":{}@", password)?;
                }
                write!(f, "{}:{}", a.host, a.port)?;
                match &a.source_entry {
                    Some(entry) => write!(f, "/{}:{}", a.mountpoint, entry)?,
                    None if !a.mountpoint.is_empty() => write!(f, "/{}", a.mountpoint)?,
                    None => {}
                }
            }
        }
        if let Some(format) = self.format {
            write!(f, "#{}", format.tag())?;
        }
        Ok(())
    }
}

fn invalid(kind: StreamKind, address: &str, reason: impl Into<String>) -> EndpointError {
    EndpointError::InvalidAddress {
        kind: kind.name(),
        address: address.to_string(),
        reason: reason.into(),
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_port(kind: StreamKind, address: &str, port: &str) -> Result<u16, EndpointError> {
    port.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| invalid(kind, address, format!("invalid port '{}'", port)))
}

/// Split `host[:port]`, falling back to `default_port` when the port is absent.
fn parse_host_port(
    kind: StreamKind,
    address: &str,
    host_port: &str,
    default_port: Option<u16>,
) -> Result<(String, u16), EndpointError> {
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, parse_port(kind, address, port)?),
        None => match default_port {
            Some(port) => (host_port, port),
            None => return Err(invalid(kind, address, "missing port")),
        },
    };
    if host.is_empty() {
        return Err(invalid(kind, address, "missing host"));
    }
    Ok((host.to_string(), port))
}

fn parse_float(kind: StreamKind, address: &str, name: &str, value: &str) -> Result<f64, EndpointError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(kind, address, format!("invalid {} '{}'", name, value)))
}

fn parse_file(rest: &str) -> Result<FileAddress, EndpointError> {
    let kind = StreamKind::File;
    let mut parts = rest.split("::");
    let path = parts.next().unwrap_or_default();
    if path.is_empty() {
        return Err(invalid(kind, rest, "missing path"));
    }

    let mut address = FileAddress::new(path);
    for option in parts {
        if option == "T" {
            address.time_tag = true;
        } else if let Some(start) = option.strip_prefix('+') {
            address.start = parse_float(kind, rest, "start offset", start)?;
            if address.start < 0.0 {
                return Err(invalid(kind, rest, "negative start offset"));
            }
        } else if let Some(speed) = option.strip_prefix('x') {
            address.speed = parse_float(kind, rest, "speed", speed)?;
            if address.speed <= 0.0 {
                return Err(invalid(kind, rest, "speed must be positive"));
            }
        } else if let Some(swap) = option.strip_prefix("S=") {
            address.swap_hours = parse_float(kind, rest, "swap period", swap)?;
            if address.swap_hours < 0.0 {
                return Err(invalid(kind, rest, "negative swap period"));
            }
        } else {
            return Err(invalid(kind, rest, format!("unknown option '{}'", option)));
        }
    }
    Ok(address)
}

fn parse_serial(rest: &str) -> Result<SerialAddress, EndpointError> {
    let kind = StreamKind::Serial;
    let fields: Vec<&str> = rest.split(':').collect();
    if fields[0].is_empty() {
        return Err(invalid(kind, rest, "missing port"));
    }
    if fields.len() > 6 {
        return Err(invalid(kind, rest, "too many fields"));
    }

    let field = |i: usize| fields.get(i).copied().filter(|f| !f.is_empty());

    let baud_rate = match field(1) {
        Some(v) => v
            .parse::<u32>()
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| invalid(kind, rest, format!("invalid bit rate '{}'", v)))?,
        None => 9600,
    };
    let data_bits = match field(2) {
        Some(v) => v
            .parse::<u8>()
            .ok()
            .filter(|b| (5..=8).contains(b))
            .ok_or_else(|| invalid(kind, rest, format!("invalid byte size '{}'", v)))?,
        None => 8,
    };
    let parity = match field(3) {
        None | Some("n") | Some("N") => Parity::None,
        Some("e") | Some("E") => Parity::Even,
        Some("o") | Some("O") => Parity::Odd,
        Some(v) => return Err(invalid(kind, rest, format!("invalid parity '{}'", v))),
    };
    let stop_bits = match field(4) {
        None | Some("1") => 1,
        Some("2") => 2,
        Some(v) => return Err(invalid(kind, rest, format!("invalid stop bits '{}'", v))),
    };
    let flow_control = match field(5) {
        None | Some("off") => FlowControl::Off,
        Some("rts") => FlowControl::Rts,
        Some("xon") => FlowControl::Xon,
        Some(v) => return Err(invalid(kind, rest, format!("invalid flow control '{}'", v))),
    };

    Ok(SerialAddress {
        port: fields[0].to_string(),
        baud_rate,
        data_bits,
        parity,
        stop_bits,
        flow_control,
    })
}

fn parse_tcp_server(rest: &str) -> Result<TcpServerAddress, EndpointError> {
    let kind = StreamKind::TcpServer;
    let (bind, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| invalid(kind, rest, "missing port"))?;
    Ok(TcpServerAddress {
        bind: non_empty(bind),
        port: parse_port(kind, rest, port)?,
    })
}

fn parse_tcp_client(rest: &str) -> Result<TcpClientAddress, EndpointError> {
    let (host, port) = parse_host_port(StreamKind::TcpClient, rest, rest, None)?;
    Ok(TcpClientAddress { host, port })
}

fn parse_ntrip_client(rest: &str) -> Result<NtripClientAddress, EndpointError> {
    let kind = StreamKind::NtripClient;
    let (userinfo, location) = match rest.rsplit_once('@') {
        Some((userinfo, location)) => (Some(userinfo), location),
        None => (None, rest),
    };
    let (user, password) = match userinfo.map(|u| u.split_once(':').unwrap_or((u, ""))) {
        Some((user, password)) => (non_empty(user), non_empty(password)),
        None => (None, None),
    };
    let (host_port, mountpoint) = location.split_once('/').unwrap_or((location, ""));
    let (host, port) = parse_host_port(kind, rest, host_port, Some(NTRIP_DEFAULT_PORT))?;

    Ok(NtripClientAddress {
        user,
        password,
        host,
        port,
        mountpoint: mountpoint.to_string(),
    })
}

fn parse_ntrip_server(rest: &str) -> Result<NtripServerAddress, EndpointError> {
    let kind = StreamKind::NtripServer;
    let (userinfo, location) = match rest.rsplit_once('@') {
        Some((userinfo, location)) => (Some(userinfo), location),
        None => (None, rest),
    };
    // The user part is ignored by casters; only the password is used.
    let password = userinfo
        .map(|u| u.split_once(':').map(|(_, p)| p).unwrap_or(u))
        .and_then(non_empty);
    let (host_port, mount) = match location.split_once('/') {
        Some((host_port, mount)) => (host_port, Some(mount)),
        None => (location, None),
    };
    let (mountpoint, source_entry) = match mount {
        Some(mount) => match mount.split_once(':') {
            Some((mountpoint, entry)) => (mountpoint.to_string(), Some(entry.to_string())),
            None => (mount.to_string(), None),
        },
        None => (String::new(), None),
    };
    let (host, port) = parse_host_port(kind, rest, host_port, Some(NTRIP_DEFAULT_PORT))?;

    Ok(NtripServerAddress {
        password,
        host,
        port,
        mountpoint,
        source_entry,
    })
}
