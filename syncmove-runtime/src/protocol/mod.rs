pub mod frame;

pub use frame::{Frame, FrameError};

/// Size of the element count prefix.
pub const COUNT_SIZE: usize = std::mem::size_of::<u32>();

/// Size of a single frame element.
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f64>();

/// The maximum size of a raw message on an internal channel.
///
/// Every frame the system produces is a handful of elements, this bound is
/// only used to size receive buffers. Larger datagrams are truncated by the
/// transport and then rejected by the decoder as a size mismatch.
pub const MAX_PACKET_SIZE: usize = 1_024;

/// Terminate the receiving controller process.
pub const TERMINATE: [f64; 3] = [0.0, 0.0, 0.0];

/// Controller process is up, or has finished connecting to its robot.
pub const ACK_SERVER_INIT: [f64; 3] = [99.0, 99.0, 99.0];

/// Controller process completed the requested motion.
pub const ACK_MOTION_COMPLETE: [f64; 3] = [99.0, 99.0, 0.0];

/// Element count of a state-motion command.
pub const STATE_MOTION_LEN: usize = 3;

/// Element count of a joint-stream command.
pub const JOINT_STREAM_LEN: usize = 6;

/// Encode values into a wire frame.
#[inline]
pub fn encode(values: &[f64]) -> Vec<u8> {
    Frame::new(values.to_vec()).to_bytes()
}

/// Decode a wire frame into its values.
#[inline]
pub fn decode(buffer: &[u8]) -> Result<Vec<f64>, FrameError> {
    Frame::try_from(buffer).map(Frame::into_values)
}
