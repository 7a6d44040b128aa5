#[derive(Clone, Debug)]
pub struct SimConfig {
    /// Address to listen on.
    pub listen: String,
    /// Time a discrete move takes in milliseconds.
    pub motion_time: u64,
    /// Time a streamed joint target takes in milliseconds.
    pub stream_time: u64,
    /// Introduce jitter in the motion time.
    pub jitter: bool,
    /// Prefix the first response of a connection with the re-accept banner.
    pub reaccept: bool,
}
