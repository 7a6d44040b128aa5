use std::net::SocketAddr;

use tokio::{io::AsyncWriteExt, net::TcpStream};

/// Handshake banner sent by the robot controller when it re-accepts a client.
pub const REACCEPT_PREFIX: &str = "IP Accepted";

/// Robot response field separator.
const FIELD_SEPARATOR: char = ',';

/// Command value separator.
const VALUE_SEPARATOR: &str = ";";

/// Maximum size of a single robot response.
const MAX_RESPONSE_SIZE: usize = 1_024;

pub enum AdapterError {
    Connect(std::io::Error),
    Send(std::io::Error),
    Receive(std::io::Error),
    Closed,
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Send(e) | Self::Receive(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl std::fmt::Debug for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "Connect({:?})", e),
            Self::Send(e) => write!(f, "Send({:?})", e),
            Self::Receive(e) => write!(f, "Receive({:?})", e),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "robot connect failed: {}", e),
            Self::Send(e) => write!(f, "robot send failed: {}", e),
            Self::Receive(e) => write!(f, "robot receive failed: {}", e),
            Self::Closed => write!(f, "robot connection closed"),
        }
    }
}

/// Robot controller command kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandTag {
    /// Initialize the virtual controller.
    Init,
    /// Move to a discrete target configuration.
    DiscreteMove,
    /// Move to a streamed joint target.
    JointStream,
    /// End the session.
    Terminate,
}

impl CommandTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "I;",
            Self::DiscreteMove => "d;",
            Self::JointStream => "j;",
            Self::Terminate => "T;",
        }
    }

    /// Interpret a command tag as it appears on the wire.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "I;" => Some(Self::Init),
            "d;" => Some(Self::DiscreteMove),
            "j;" => Some(Self::JointStream),
            "T;" => Some(Self::Terminate),
            _ => None,
        }
    }
}

impl std::fmt::Display for CommandTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::DiscreteMove => write!(f, "discrete move"),
            Self::JointStream => write!(f, "joint stream"),
            Self::Terminate => write!(f, "terminate"),
        }
    }
}

/// Render a command in the robot controller text protocol.
///
/// The tag is followed by the values joined with `;`, without a trailing
/// separator.
pub fn format_command(values: &[f64], tag: CommandTag) -> String {
    let mut command = String::from(tag.as_str());
    command.push_str(
        &values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(VALUE_SEPARATOR),
    );
    command
}

/// Robot controller response.
///
/// Always exactly six numeric fields. The first field is the status code,
/// the remaining fields carry pose or joint data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RobotResponse {
    fields: [f64; 6],
}

impl RobotResponse {
    /// Status code for a completed motion.
    pub const STATUS_MOTION_COMPLETE: f64 = 9.0;
    /// Status code for a virtual controller ready for commands.
    pub const STATUS_READY: f64 = 1.0;

    pub fn new(fields: [f64; 6]) -> Self {
        Self { fields }
    }

    /// Parse a response from the controller text protocol.
    ///
    /// Returns `None` for anything that is not exactly six numeric fields.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

        let body = match text.strip_prefix(REACCEPT_PREFIX) {
            Some(remainder) => {
                log::info!("Robot controller re-accepted connection");
                remainder.trim_start_matches(|c: char| c.is_whitespace() || c == FIELD_SEPARATOR)
            }
            None => text,
        };

        let parts = body.split(FIELD_SEPARATOR).collect::<Vec<_>>();
        if parts.len() != 6 {
            return None;
        }

        let mut fields = [0.0; 6];
        for (field, part) in fields.iter_mut().zip(parts) {
            *field = part.trim().parse().ok()?;
        }

        Some(Self { fields })
    }

    #[inline]
    pub fn status(&self) -> f64 {
        self.fields[0]
    }

    #[inline]
    pub fn data(&self) -> &[f64] {
        &self.fields[1..]
    }

    #[inline]
    pub fn is_motion_complete(&self) -> bool {
        self.status() == Self::STATUS_MOTION_COMPLETE
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.status() == Self::STATUS_READY
    }

    /// Render the response in the controller text protocol.
    pub fn to_wire(&self) -> String {
        self.fields
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for RobotResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Status: {}; Data: {}",
            self.status(),
            self.data()
                .iter()
                .map(|v| format!("{:.2}", v))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

/// Duplex connection to a physical or simulated robot controller.
#[async_trait::async_trait]
pub trait RobotLink: Send {
    /// Send values as a tagged command.
    async fn send(&mut self, values: &[f64], tag: CommandTag) -> Result<(), AdapterError>;

    /// Attempt to read one response without blocking.
    ///
    /// Returns `None` when no data is available yet or when the data was not
    /// a well-formed response.
    fn receive(&mut self) -> Result<Option<RobotResponse>, AdapterError>;

    /// Release the connection. Calling this more than once is a no-op.
    fn close(&mut self);
}

/// Opens robot links.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn RobotLink>, AdapterError>;
}

/// Robot link over TCP.
pub struct TcpRobot {
    stream: Option<TcpStream>,
    address: SocketAddr,
    buffer: Vec<u8>,
}

impl TcpRobot {
    /// Start connecting to the robot controller.
    ///
    /// The connection is initiated without blocking. A connect that cannot
    /// complete right away is not an error, the connection settles in the
    /// background and its outcome surfaces on the first send or receive.
    pub fn connect(address: SocketAddr) -> Result<Self, AdapterError> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(AdapterError::Connect)?;

        socket.set_nonblocking(true).map_err(AdapterError::Connect)?;
        socket.set_nodelay(true).map_err(AdapterError::Connect)?;

        if let Err(e) = socket.connect(&address.into()) {
            log::trace!("Connection to {} pending: {}", address, e);
        }

        let stream = TcpStream::from_std(socket.into()).map_err(AdapterError::Connect)?;

        log::debug!("Connecting to robot controller at {}", address);

        Ok(Self {
            stream: Some(stream),
            address,
            buffer: vec![0u8; MAX_RESPONSE_SIZE],
        })
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

#[async_trait::async_trait]
impl RobotLink for TcpRobot {
    async fn send(&mut self, values: &[f64], tag: CommandTag) -> Result<(), AdapterError> {
        let stream = self.stream.as_mut().ok_or(AdapterError::Closed)?;

        let command = format_command(values, tag);
        log::trace!("Robot {} « {}", self.address, command);

        stream
            .write_all(command.as_bytes())
            .await
            .map_err(AdapterError::Send)
    }

    fn receive(&mut self) -> Result<Option<RobotResponse>, AdapterError> {
        let stream = self.stream.as_ref().ok_or(AdapterError::Closed)?;

        match stream.try_read(&mut self.buffer) {
            Ok(0) => Err(AdapterError::Closed),
            Ok(size) => match std::str::from_utf8(&self.buffer[..size]) {
                Ok(text) => {
                    log::trace!("Robot {} » {}", self.address, text);
                    Ok(RobotResponse::parse(text))
                }
                Err(_) => {
                    log::debug!("Discarding non-text response from {}", self.address);
                    Ok(None)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(None),
            Err(e) => Err(AdapterError::Receive(e)),
        }
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("Closed robot connection to {}", self.address);
        }
    }
}

/// Connector for robot controllers reachable over TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn RobotLink>, AdapterError> {
        let address = tokio::net::lookup_host(address)
            .await
            .map_err(AdapterError::Connect)?
            .next()
            .ok_or_else(|| {
                AdapterError::Connect(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Robot address did not resolve",
                ))
            })?;

        Ok(Box::new(TcpRobot::connect(address)?))
    }
}
