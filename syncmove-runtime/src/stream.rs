use std::time::{Duration, Instant};

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{channel::Link, protocol::ACK_MOTION_COMPLETE};

/// Keyword that cancels manual input.
pub const QUIT_KEYWORD: &str = "quit";

/// Six joint targets in degrees.
pub type JointTarget = [f64; 6];

/// Source of streamed joint targets.
#[async_trait::async_trait]
pub trait PointSource: Send {
    /// Next joint target, or `None` to cancel the session.
    async fn next_point(&mut self) -> Option<JointTarget>;
}

/// Synthetic test pattern.
///
/// Holds every joint at its base position and oscillates joint 1 with a small
/// amplitude.
pub struct SineWave {
    base: JointTarget,
    amplitude: f64,
    step: f64,
    phase: f64,
}

impl SineWave {
    pub fn new(base: JointTarget, amplitude: f64, step: f64) -> Self {
        Self {
            base,
            amplitude,
            step,
            phase: 0.0,
        }
    }
}

impl Default for SineWave {
    fn default() -> Self {
        Self::new([0.0; 6], 5.0, 0.3)
    }
}

#[async_trait::async_trait]
impl PointSource for SineWave {
    async fn next_point(&mut self) -> Option<JointTarget> {
        let mut point = self.base;
        point[0] += self.amplitude * self.phase.sin();

        self.phase += self.step;

        Some(point)
    }
}

/// Joint targets typed in by an operator, one per line.
pub struct ManualInput<R> {
    reader: R,
}

impl<R> ManualInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl ManualInput<tokio::io::BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::BufReader::new(tokio::io::stdin()))
    }
}

/// Parse six joint values separated by commas or whitespace.
pub fn parse_point(line: &str) -> Option<JointTarget> {
    let values = line
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    values.try_into().ok()
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> PointSource for ManualInput<R> {
    async fn next_point(&mut self) -> Option<JointTarget> {
        let mut line = String::new();

        loop {
            line.clear();

            match self.reader.read_line(&mut line).await {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    log::error!("Failed to read input: {}", e);
                    return None;
                }
            }

            let input = line.trim();
            if input.eq_ignore_ascii_case(QUIT_KEYWORD) {
                return None;
            }
            if input.is_empty() {
                continue;
            }

            match parse_point(input) {
                Some(point) => return Some(point),
                None => log::warn!("Expected six joint values, got: {}", input),
            }
        }
    }
}

/// Joint targets pushed by another task.
pub struct Feed(tokio::sync::mpsc::Receiver<JointTarget>);

impl Feed {
    pub fn new(receiver: tokio::sync::mpsc::Receiver<JointTarget>) -> Self {
        Self(receiver)
    }
}

#[async_trait::async_trait]
impl PointSource for Feed {
    async fn next_point(&mut self) -> Option<JointTarget> {
        self.0.recv().await
    }
}

/// Fixed list of joint targets.
pub struct Waypoints(std::vec::IntoIter<JointTarget>);

impl Waypoints {
    pub fn new(points: Vec<JointTarget>) -> Self {
        Self(points.into_iter())
    }
}

#[async_trait::async_trait]
impl PointSource for Waypoints {
    async fn next_point(&mut self) -> Option<JointTarget> {
        self.0.next()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StreamSettings {
    /// How long to wait for each point to be acknowledged.
    pub ack_timeout: Duration,
    /// Minimum interval between points.
    pub period: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            period: None,
        }
    }
}

/// Streaming session outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Points sent to the controller.
    pub sent: usize,
    /// Points acknowledged in time.
    pub acknowledged: usize,
    /// Points whose acknowledgment timed out.
    pub timeouts: usize,
    /// Session ended on cancellation rather than on its budget.
    pub cancelled: bool,
}

impl StreamReport {
    /// Points sent whose acknowledgment is still outstanding.
    #[inline]
    pub fn pending(&self) -> usize {
        self.sent - self.acknowledged
    }
}

impl std::fmt::Display for StreamReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sent: {}; Acknowledged: {}; Timeouts: {}; Cancelled: {}",
            self.sent, self.acknowledged, self.timeouts, self.cancelled
        )
    }
}

/// Streaming session.
///
/// Feeds joint targets to one controller process, strictly one at a time.
/// Each point waits for its acknowledgment before the next one goes out. A
/// dropped acknowledgment is logged and the session moves on.
pub struct StreamSession<'a, L: Link> {
    link: &'a mut L,
    budget: usize,
    settings: StreamSettings,
}

impl<'a, L: Link> StreamSession<'a, L> {
    /// Construct a new session. A zero budget streams until cancelled.
    pub fn new(link: &'a mut L, budget: usize, settings: StreamSettings) -> Self {
        Self {
            link,
            budget,
            settings,
        }
    }

    pub async fn run(&mut self, source: &mut dyn PointSource) -> std::io::Result<StreamReport> {
        let mut report = StreamReport::default();

        if self.budget == 0 {
            log::info!("Streaming until cancelled");
        } else {
            log::info!("Streaming {} points", self.budget);
        }

        loop {
            if self.budget > 0 && report.sent == self.budget {
                break;
            }

            let started = Instant::now();

            let point = match source.next_point().await {
                Some(point) => point,
                None => {
                    log::info!("Streaming cancelled");
                    report.cancelled = true;
                    break;
                }
            };

            self.link.send_frame(&point).await?;
            report.sent += 1;

            log::debug!("Stream point {} » {:?}", report.sent, point);

            if self.wait_ack().await? {
                report.acknowledged += 1;
            } else {
                log::warn!("Stream point {} was not acknowledged", report.sent);
                report.timeouts += 1;
            }

            if let Some(period) = self.settings.period {
                let elapsed = started.elapsed();
                if elapsed < period {
                    tokio::time::sleep(period - elapsed).await;
                }
            }
        }

        log::info!("Streaming done; {}", report);

        Ok(report)
    }

    async fn wait_ack(&mut self) -> std::io::Result<bool> {
        let deadline = Instant::now() + self.settings.ack_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match self.link.recv_frame(remaining).await? {
                Some(frame) if frame.is(&ACK_MOTION_COMPLETE) => return Ok(true),
                Some(frame) => log::trace!("Ignoring frame during stream: {}", frame),
                None => {}
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }
}
