use std::time::Duration;

use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    adapter::{AdapterError, CommandTag, Connector, RobotLink},
    channel::Link,
    consts,
    lookup::{self, MotionTable},
    protocol::{Frame, ACK_MOTION_COMPLETE, ACK_SERVER_INIT, JOINT_STREAM_LEN, STATE_MOTION_LEN},
};

pub enum ControllerError {
    /// Internal channel failure.
    Channel(std::io::Error),
    /// Robot controller failure.
    Adapter(AdapterError),
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e),
            Self::Adapter(e) => Some(e),
        }
    }
}

impl std::fmt::Debug for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "Channel({:?})", e),
            Self::Adapter(e) => write!(f, "Adapter({:?})", e),
        }
    }
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "channel error: {}", e),
            Self::Adapter(e) => write!(f, "{}", e),
        }
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(e: std::io::Error) -> Self {
        Self::Channel(e)
    }
}

impl From<AdapterError> for ControllerError {
    fn from(e: AdapterError) -> Self {
        Self::Adapter(e)
    }
}

/// Robot rig served by a controller process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rig {
    /// Dual-arm MultiMove controller.
    MultiMove,
    /// Single-arm Cobot controller.
    Cobot,
}

impl std::str::FromStr for Rig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "multimove" | "mm" => Ok(Self::MultiMove),
            "cobot" | "cb" => Ok(Self::Cobot),
            _ => Err(format!("unknown rig: {}", s)),
        }
    }
}

impl std::fmt::Display for Rig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MultiMove => write!(f, "MultiMove"),
            Self::Cobot => write!(f, "Cobot"),
        }
    }
}

/// Operation mode of a controller process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Local simulated robot controller.
    Virtual = 1,
    /// Physical robot controller.
    Real = 2,
    /// No robot controller, commands are only acknowledged.
    Internal = 3,
}

impl Mode {
    /// Mode selector frame.
    pub fn selector(&self) -> [f64; 3] {
        [*self as u8 as f64; 3]
    }

    /// Interpret a mode selector frame.
    pub fn from_selector(frame: &Frame) -> Option<Self> {
        match frame.is_uniform_triple() {
            Some(v) if v == Self::Virtual as u8 as f64 => Some(Self::Virtual),
            Some(v) if v == Self::Real as u8 as f64 => Some(Self::Real),
            Some(v) if v == Self::Internal as u8 as f64 => Some(Self::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Virtual => write!(f, "virtual"),
            Self::Real => write!(f, "real"),
            Self::Internal => write!(f, "internal only"),
        }
    }
}

/// Controller process state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    AwaitingMode,
    Running(Mode),
    Terminated,
}

/// Command received by a running controller process.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Terminate,
    StateMotion {
        path: f64,
        sequence: f64,
        position: f64,
    },
    JointStream([f64; JOINT_STREAM_LEN]),
    Unknown(usize),
}

impl From<&Frame> for Command {
    fn from(frame: &Frame) -> Self {
        if frame.is(&crate::protocol::TERMINATE) {
            return Self::Terminate;
        }

        match frame.len() {
            STATE_MOTION_LEN => {
                let values = frame.values();
                Self::StateMotion {
                    path: values[0],
                    sequence: values[1],
                    position: values[2],
                }
            }
            JOINT_STREAM_LEN => {
                let mut joints = [0.0; JOINT_STREAM_LEN];
                joints.copy_from_slice(frame.values());
                Self::JointStream(joints)
            }
            len => Self::Unknown(len),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Internal channel receive timeout.
    pub recv_timeout: Duration,
    /// Interval between robot socket polls.
    pub poll_interval: Duration,
    /// Physical robot controller address.
    pub real_address: String,
    /// Simulated robot controller address.
    pub virtual_address: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            real_address: consts::DEFAULT_REAL_ADDRESS.to_owned(),
            virtual_address: consts::DEFAULT_MULTIMOVE_VIRTUAL.to_owned(),
        }
    }
}

/// Controller session.
///
/// Lives from mode selection until termination and holds everything the
/// process needs to remember between commands.
pub struct ControllerSession {
    mode: Mode,
    robot: Option<Box<dyn RobotLink>>,
    last_sequence: Option<f64>,
}

impl ControllerSession {
    pub fn new(mode: Mode, robot: Option<Box<dyn RobotLink>>) -> Self {
        Self {
            mode,
            robot,
            last_sequence: None,
        }
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Sequence id of the last dispatched state motion.
    #[inline]
    pub fn last_sequence(&self) -> Option<f64> {
        self.last_sequence
    }

    /// Whether the robot is already in this sequence.
    ///
    /// Only the sequence id is compared, not the path.
    #[inline]
    pub fn is_redundant(&self, sequence: f64) -> bool {
        self.last_sequence == Some(sequence)
    }

    #[inline]
    pub fn has_robot(&self) -> bool {
        self.robot.is_some()
    }

    /// Send a command and wait until the robot reports the motion complete.
    async fn execute(
        &mut self,
        values: &[f64],
        tag: CommandTag,
        poll_interval: Duration,
    ) -> Result<(), AdapterError> {
        let robot = match self.robot.as_mut() {
            Some(robot) => robot,
            None => return Ok(()),
        };

        robot.send(values, tag).await?;

        loop {
            match robot.receive()? {
                Some(response) if response.is_motion_complete() => {
                    log::debug!("Robot motion complete");
                    return Ok(());
                }
                Some(response) => log::trace!("Robot » {}", response),
                None => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    /// Tell the robot we are done and release the connection.
    async fn shutdown(&mut self) {
        if let Some(mut robot) = self.robot.take() {
            if let Err(e) = robot.send(&[0.0, 0.0, 0.0], CommandTag::Terminate).await {
                log::debug!("Failed to send terminate to robot: {}", e);
            }
            robot.close();
        }
    }
}

/// Controller process.
///
/// Bridges one internal channel pair to one robot controller. Commands are
/// handled one at a time and each handled command is answered on the
/// outbound channel. The shutdown signal is observed between receive
/// timeouts, so a command in progress always runs to completion.
pub struct ControllerProcess<L, C> {
    rig: Rig,
    link: L,
    connector: C,
    table: MotionTable,
    settings: ControllerSettings,
    state: State,
    shutdown: broadcast::Receiver<()>,
}

impl<L: Link, C: Connector> ControllerProcess<L, C> {
    pub fn new(
        rig: Rig,
        link: L,
        connector: C,
        table: MotionTable,
        settings: ControllerSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            rig,
            link,
            connector,
            table,
            settings,
            state: State::AwaitingMode,
            shutdown,
        }
    }

    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    fn is_shutdown(&mut self) -> bool {
        match self.shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => {
                log::info!("{} controller process interrupted", self.rig);
                true
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => false,
        }
    }

    /// Run the process until it is told to terminate or shut down.
    ///
    /// Any channel or robot failure ends the process with an error, after a
    /// best-effort robot shutdown.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        log::info!("{} controller process started", self.rig);

        self.link.send_frame(&ACK_SERVER_INIT).await?;

        let mut session = match self.select_mode().await? {
            Some(session) => session,
            None => {
                self.state = State::Terminated;
                return Ok(());
            }
        };

        let result = self.serve(&mut session).await;

        session.shutdown().await;
        self.state = State::Terminated;

        match &result {
            Ok(()) => log::info!("{} controller process terminated", self.rig),
            Err(e) => log::error!("{} controller process failed: {}", self.rig, e),
        }

        result
    }

    /// Wait for a mode selector and open the session.
    ///
    /// Returns `None` if termination was requested instead.
    async fn select_mode(&mut self) -> Result<Option<ControllerSession>, ControllerError> {
        loop {
            let frame = match self.link.recv_frame(self.settings.recv_timeout).await? {
                Some(frame) => frame,
                None => {
                    if self.is_shutdown() {
                        return Ok(None);
                    }

                    self.link.send_frame(&ACK_SERVER_INIT).await?;
                    continue;
                }
            };

            if frame.is(&crate::protocol::TERMINATE) {
                log::info!("Termination requested before mode selection");
                return Ok(None);
            }

            match Mode::from_selector(&frame) {
                Some(mode) => {
                    log::info!("{} selected {} mode", self.rig, mode);

                    let session = self.open_session(mode).await?;

                    // Same code as the announcement; the orchestrator may take
                    // a late announcement for this confirmation.
                    self.state = State::Running(mode);
                    self.link.send_frame(&ACK_SERVER_INIT).await?;

                    return Ok(Some(session));
                }
                None => log::warn!("Ignoring invalid mode selector: {}", frame),
            }
        }
    }

    async fn open_session(&mut self, mode: Mode) -> Result<ControllerSession, ControllerError> {
        match mode {
            Mode::Internal => {
                log::info!("Internal channel only, no robot connection");
                Ok(ControllerSession::new(mode, None))
            }
            Mode::Real => {
                log::info!("Connecting to robot controller at {}", self.settings.real_address);

                let robot = self.connector.connect(&self.settings.real_address).await?;

                Ok(ControllerSession::new(mode, Some(robot)))
            }
            Mode::Virtual => {
                log::info!(
                    "Connecting to virtual controller at {}",
                    self.settings.virtual_address
                );

                let mut robot = self
                    .connector
                    .connect(&self.settings.virtual_address)
                    .await?;

                if let Err(e) = Self::initialize(&mut *robot, self.settings.poll_interval).await
                {
                    robot.close();
                    return Err(e.into());
                }

                log::info!("Virtual controller ready");

                Ok(ControllerSession::new(mode, Some(robot)))
            }
        }
    }

    /// Virtual controller handshake.
    async fn initialize(robot: &mut dyn RobotLink, poll_interval: Duration) -> Result<(), AdapterError> {
        robot.send(&[0.0, 0.0, 0.0], CommandTag::Init).await?;

        loop {
            match robot.receive()? {
                Some(response) if response.is_ready() => return Ok(()),
                Some(response) => log::trace!("Robot » {}", response),
                None => tokio::time::sleep(poll_interval).await,
            }
        }
    }

    async fn serve(&mut self, session: &mut ControllerSession) -> Result<(), ControllerError> {
        loop {
            let frame = match self.link.recv_frame(self.settings.recv_timeout).await? {
                Some(frame) => frame,
                None if self.is_shutdown() => return Ok(()),
                None => continue,
            };

            match Command::from(&frame) {
                Command::Terminate => {
                    log::info!("Termination command received");
                    return Ok(());
                }
                Command::StateMotion {
                    path,
                    sequence,
                    position,
                } => {
                    log::info!(
                        "State motion; Path: {}; Sequence: {}; Position: {}",
                        self.path_name(path),
                        self.sequence_name(sequence),
                        position
                    );

                    self.state_motion(session, path, sequence).await?;
                    self.link.send_frame(&ACK_MOTION_COMPLETE).await?;
                }
                Command::JointStream(joints) => {
                    log::debug!("Joint stream: {:?}", joints);

                    session
                        .execute(&joints, CommandTag::JointStream, self.settings.poll_interval)
                        .await?;
                    self.link.send_frame(&ACK_MOTION_COMPLETE).await?;
                }
                Command::Unknown(len) => {
                    log::warn!("Ignoring frame with {} elements: {}", len, frame);
                }
            }
        }
    }

    fn path_name(&self, path: f64) -> String {
        match lookup::code(path).and_then(|code| self.table.path_name(code)) {
            Some(name) => name.to_owned(),
            None => path.to_string(),
        }
    }

    fn sequence_name(&self, sequence: f64) -> String {
        match lookup::code(sequence).and_then(|code| self.table.sequence_name(code)) {
            Some(name) => name.to_owned(),
            None => sequence.to_string(),
        }
    }

    async fn state_motion(
        &mut self,
        session: &mut ControllerSession,
        path: f64,
        sequence: f64,
    ) -> Result<(), ControllerError> {
        if session.is_redundant(sequence) {
            log::info!(
                "Sequence {} already satisfied, skipping motion",
                self.sequence_name(sequence)
            );
            return Ok(());
        }

        if !session.has_robot() {
            session.last_sequence = Some(sequence);
            return Ok(());
        }

        let data = match (lookup::code(path), lookup::code(sequence)) {
            (Some(path), Some(sequence)) => self.table.resolve(path, sequence).map(|d| d.to_vec()),
            _ => None,
        };

        match data {
            Some(data) => {
                log::info!("Robot motion: {:?}", data);

                session
                    .execute(&data, CommandTag::DiscreteMove, self.settings.poll_interval)
                    .await?;
                session.last_sequence = Some(sequence);
            }
            None => log::warn!(
                "No motion for path {} and sequence {}, nothing sent",
                self.path_name(path),
                self.sequence_name(sequence)
            ),
        }

        Ok(())
    }
}
