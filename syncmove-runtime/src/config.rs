use std::time::Duration;

use serde::Deserialize;

use crate::{
    consts,
    controller::{ControllerSettings, Mode, Rig},
    engine::EngineSettings,
    lookup::MotionTable,
    sequence::{Command, Position, Sequence},
    stream::StreamSettings,
};

pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl std::fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Io({:?})", e),
            Self::Parse(e) => write!(f, "Parse({:?})", e),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read configuration: {}", e),
            Self::Parse(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

/// Read a TOML configuration file.
pub fn from_file<T: serde::de::DeserializeOwned>(
    path: impl AsRef<std::path::Path>,
) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path)?;

    Ok(toml::from_str(&contents)?)
}

/// Operator choice of controller modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum OperationProfile {
    /// Physical MultiMove controller, Cobot internal only.
    RealMultiMove,
    /// Simulated MultiMove controller, Cobot internal only.
    VirtualMultiMove,
    /// Simulated Cobot controller, MultiMove internal only.
    VirtualCobot,
    /// Both controllers internal only.
    #[default]
    Internal,
}

impl OperationProfile {
    /// Interpret an operator choice, either its menu number or its name.
    ///
    /// Anything unrecognized selects the internal only profile.
    pub fn from_choice(choice: &str) -> Self {
        match choice.trim().to_lowercase().as_str() {
            "1" | "real-multimove" => Self::RealMultiMove,
            "2" | "virtual-multimove" => Self::VirtualMultiMove,
            "3" | "virtual-cobot" => Self::VirtualCobot,
            _ => Self::Internal,
        }
    }

    /// Modes for the MultiMove and the Cobot controller.
    pub fn modes(&self) -> (Mode, Mode) {
        match self {
            Self::RealMultiMove => (Mode::Real, Mode::Internal),
            Self::VirtualMultiMove => (Mode::Virtual, Mode::Internal),
            Self::VirtualCobot => (Mode::Internal, Mode::Virtual),
            Self::Internal => (Mode::Internal, Mode::Internal),
        }
    }
}

impl From<String> for OperationProfile {
    fn from(choice: String) -> Self {
        Self::from_choice(&choice)
    }
}

impl std::fmt::Display for OperationProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RealMultiMove => write!(f, "real-multimove"),
            Self::VirtualMultiMove => write!(f, "virtual-multimove"),
            Self::VirtualCobot => write!(f, "virtual-cobot"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Rig addresses as written in the configuration file.
///
/// Missing entries fall back to the defaults of the rig.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RigConfig {
    /// Orchestrator to controller process channel.
    pub command: Option<String>,
    /// Controller process to orchestrator channel.
    pub feedback: Option<String>,
    /// Physical robot controller.
    pub real: Option<String>,
    /// Simulated robot controller.
    #[serde(rename = "virtual")]
    pub virtual_address: Option<String>,
}

/// Resolved rig addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RigEndpoints {
    pub command: String,
    pub feedback: String,
    pub real: String,
    pub virtual_address: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Controller modes to select.
    pub profile: OperationProfile,
    /// Path name sent with every state motion.
    pub path: String,
    /// Barrier poll delay in milliseconds.
    pub retry_delay: u64,
    /// Pause between steps in milliseconds.
    pub loop_tick: u64,
    /// Handshake deadline in milliseconds.
    pub handshake_timeout: Option<u64>,
    /// Barrier deadline in milliseconds.
    pub barrier_timeout: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            profile: OperationProfile::default(),
            path: "1A".to_owned(),
            retry_delay: 100,
            loop_tick: 200,
            handshake_timeout: None,
            barrier_timeout: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic sine pattern.
    #[default]
    Sine,
    /// Operator input on stdin.
    Manual,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Acknowledgment timeout in milliseconds.
    pub ack_timeout: u64,
    /// Point period in milliseconds, zero disables pacing.
    pub period: u64,
    /// Points for standalone streaming, zero is unbounded.
    pub budget: usize,
    pub source: SourceKind,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ack_timeout: 500,
            period: 500,
            budget: 0,
            source: SourceKind::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Internal channel receive timeout in milliseconds.
    pub recv_timeout: u64,
    /// Robot socket poll interval in milliseconds.
    pub poll_interval: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            recv_timeout: 500,
            poll_interval: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    pub multimove: String,
    pub cobot: String,
    pub position: Position,
    #[serde(default)]
    pub budget: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MotionConfig {
    pub path: String,
    pub sequence: String,
    pub data: Vec<f64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// MultiMove rig addresses.
    pub multimove: RigConfig,
    /// Cobot rig addresses.
    pub cobot: RigConfig,
    /// Orchestrator configuration.
    pub orchestrator: OrchestratorConfig,
    /// Streaming configuration.
    pub stream: StreamConfig,
    /// Controller process configuration.
    pub controller: ControllerConfig,
    /// Sequence plan.
    #[serde(rename = "sequence")]
    pub steps: Vec<StepConfig>,
    /// Motion table overrides.
    #[serde(rename = "motion")]
    pub motions: Vec<MotionConfig>,
}

impl Config {
    /// Load the configuration file.
    ///
    /// Without an explicit path the default path is read if it exists,
    /// otherwise the defaults apply.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => from_file(path),
            None => {
                let path = std::path::Path::new(consts::DEFAULT_CONFIG_PATH);
                if path.exists() {
                    from_file(path)
                } else {
                    log::debug!("No configuration at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    /// Addresses of a rig.
    pub fn endpoints(&self, rig: Rig) -> RigEndpoints {
        let (config, command, feedback, virtual_address) = match rig {
            Rig::MultiMove => (
                &self.multimove,
                consts::DEFAULT_MULTIMOVE_COMMAND,
                consts::DEFAULT_MULTIMOVE_FEEDBACK,
                consts::DEFAULT_MULTIMOVE_VIRTUAL,
            ),
            Rig::Cobot => (
                &self.cobot,
                consts::DEFAULT_COBOT_COMMAND,
                consts::DEFAULT_COBOT_FEEDBACK,
                consts::DEFAULT_COBOT_VIRTUAL,
            ),
        };

        RigEndpoints {
            command: config.command.clone().unwrap_or(command.to_owned()),
            feedback: config.feedback.clone().unwrap_or(feedback.to_owned()),
            real: config
                .real
                .clone()
                .unwrap_or(consts::DEFAULT_REAL_ADDRESS.to_owned()),
            virtual_address: config
                .virtual_address
                .clone()
                .unwrap_or(virtual_address.to_owned()),
        }
    }

    /// Sequence plan, or the default plan when none is configured.
    pub fn sequence(&self) -> Sequence {
        let mut sequence = Sequence::new();

        if self.steps.is_empty() {
            sequence
                .append("Home", "Home", Position::Head, 0)
                .append("Standby", "Standby", Position::Middle, 0)
                .append("Home", "Standby", Position::Middle, 0)
                .append("Home", "Home", Position::Tail, 0);
        } else {
            for step in &self.steps {
                sequence.append(
                    Command::parse(&step.multimove),
                    &step.cobot,
                    step.position,
                    step.budget,
                );
            }
        }

        sequence
    }

    /// Default motion table with the configured overrides applied.
    pub fn motion_table(&self) -> MotionTable {
        let mut table = MotionTable::default();

        for motion in &self.motions {
            if !table.insert_by_name(&motion.path, &motion.sequence, motion.data.clone()) {
                log::warn!(
                    "Ignoring motion for unknown path {} or sequence {}",
                    motion.path,
                    motion.sequence
                );
            }
        }

        table
    }

    pub fn controller_settings(&self, rig: Rig) -> ControllerSettings {
        let endpoints = self.endpoints(rig);

        ControllerSettings {
            recv_timeout: Duration::from_millis(self.controller.recv_timeout),
            poll_interval: Duration::from_millis(self.controller.poll_interval),
            real_address: endpoints.real,
            virtual_address: endpoints.virtual_address,
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            ack_timeout: Duration::from_millis(self.stream.ack_timeout),
            period: match self.stream.period {
                0 => None,
                period => Some(Duration::from_millis(period)),
            },
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            retry_delay: Duration::from_millis(self.orchestrator.retry_delay),
            loop_tick: Duration::from_millis(self.orchestrator.loop_tick),
            barrier_timeout: self.orchestrator.barrier_timeout.map(Duration::from_millis),
            handshake_timeout: self
                .orchestrator
                .handshake_timeout
                .map(Duration::from_millis),
            stream: self.stream_settings(),
        }
    }
}
