// Copyright (C) 2024 Laixer Equipment B.V.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

/// The `syncmove` library coordinates two robot controllers through a shared
/// choreography.
///
/// An orchestrator walks a sequence of steps and dispatches each step to a
/// MultiMove and a Cobot controller process. A step only advances once both
/// controllers acknowledged the previous one. Controller processes bridge the
/// binary frame protocol on the internal channels to the text protocol of the
/// robot controller. A step may instead hand the MultiMove side to a joint
/// streaming session.
///
/// The `protocol` module defines the frame wire format, `channel` the internal
/// transports, `adapter` the robot controller connection and `engine` the
/// orchestrator itself.
pub mod adapter;
pub mod channel;
pub mod controller;
pub mod engine;
pub mod logger;
pub mod lookup;
pub mod protocol;
pub mod runtime;
pub mod sequence;
pub mod stream;

mod config;

pub use self::config::*;

pub use self::runtime::RuntimeContext;

/// Syncmove runtime module containing various constants.
pub mod consts {
    /// Syncmove runtime version.
    ///
    /// # Example
    ///
    /// ```
    /// use syncmove::consts::VERSION;
    ///
    /// println!("Syncmove runtime version: {}", VERSION);
    /// ```
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Syncmove default configuration path.
    pub const DEFAULT_CONFIG_PATH: &str = "/etc/syncmove.toml";

    /// Syncmove default queue size for in-memory frame channels.
    ///
    /// # Remarks
    ///
    /// A full queue makes the sender wait, frames are never dropped.
    pub const QUEUE_SIZE_FRAME: usize = 16;

    /// Default MultiMove command channel address.
    pub const DEFAULT_MULTIMOVE_COMMAND: &str = "127.0.0.1:8080";
    /// Default MultiMove feedback channel address.
    pub const DEFAULT_MULTIMOVE_FEEDBACK: &str = "127.0.0.1:8081";
    /// Default Cobot command channel address.
    pub const DEFAULT_COBOT_COMMAND: &str = "127.0.0.1:8082";
    /// Default Cobot feedback channel address.
    pub const DEFAULT_COBOT_FEEDBACK: &str = "127.0.0.1:8083";

    /// Default physical robot controller address.
    pub const DEFAULT_REAL_ADDRESS: &str = "192.168.0.100:5024";
    /// Default simulated MultiMove controller address.
    pub const DEFAULT_MULTIMOVE_VIRTUAL: &str = "127.0.0.1:5024";
    /// Default simulated Cobot controller address.
    pub const DEFAULT_COBOT_VIRTUAL: &str = "127.0.0.1:5025";
}
