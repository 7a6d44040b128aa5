use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::{
    channel::Link,
    controller::{Mode, Rig},
    lookup::MotionTable,
    protocol::{ACK_MOTION_COMPLETE, ACK_SERVER_INIT, TERMINATE},
    sequence::{Command, Position, Sequence, SequenceError},
    stream::{PointSource, StreamReport, StreamSession, StreamSettings},
};

pub enum EngineError {
    /// Internal channel failure.
    Channel(std::io::Error),
    /// Command name has no sequence code.
    UnknownCommand { rig: Rig, name: String },
    /// Step reached before its predecessor completed.
    Locked(usize),
    /// Controller did not answer the handshake in time.
    HandshakeTimeout(Rig),
    /// Barrier not satisfied before the deadline.
    BarrierTimeout {
        step: usize,
        multimove: bool,
        cobot: bool,
    },
    /// Shutdown requested while waiting.
    Cancelled,
    /// Sequence is malformed.
    Sequence(SequenceError),
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e),
            Self::Sequence(e) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Debug for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "Channel({:?})", e),
            Self::UnknownCommand { rig, name } => {
                write!(f, "UnknownCommand {{ rig: {:?}, name: {:?} }}", rig, name)
            }
            Self::Locked(index) => write!(f, "Locked({})", index),
            Self::HandshakeTimeout(rig) => write!(f, "HandshakeTimeout({:?})", rig),
            Self::BarrierTimeout {
                step,
                multimove,
                cobot,
            } => write!(
                f,
                "BarrierTimeout {{ step: {}, multimove: {}, cobot: {} }}",
                step, multimove, cobot
            ),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Sequence(e) => write!(f, "Sequence({:?})", e),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "channel error: {}", e),
            Self::UnknownCommand { rig, name } => {
                write!(f, "unknown {} command: {}", rig, name)
            }
            Self::Locked(index) => write!(f, "step {} is locked", index),
            Self::HandshakeTimeout(rig) => write!(f, "{} controller did not answer", rig),
            Self::BarrierTimeout {
                step,
                multimove,
                cobot,
            } => write!(
                f,
                "step {} timed out; MultiMove done: {}; Cobot done: {}",
                step, multimove, cobot
            ),
            Self::Cancelled => write!(f, "run cancelled"),
            Self::Sequence(e) => write!(f, "{}", e),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Channel(e)
    }
}

impl From<SequenceError> for EngineError {
    fn from(e: SequenceError) -> Self {
        Self::Sequence(e)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EngineSettings {
    /// Delay between barrier polls.
    pub retry_delay: Duration,
    /// Pause between two steps.
    pub loop_tick: Duration,
    /// Abort the run when a barrier takes longer than this.
    pub barrier_timeout: Option<Duration>,
    /// Give up on a controller that does not answer the handshake.
    pub handshake_timeout: Option<Duration>,
    /// Streaming session settings.
    pub stream: StreamSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(100),
            loop_tick: Duration::from_millis(200),
            barrier_timeout: None,
            handshake_timeout: None,
            stream: StreamSettings::default(),
        }
    }
}

/// Outcome of a sequence run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Steps completed on both controllers.
    pub completed: usize,
    /// One report per streaming step.
    pub streams: Vec<StreamReport>,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Completed steps: {}", self.completed)?;
        for (i, stream) in self.streams.iter().enumerate() {
            write!(f, "; Stream {}: {}", i, stream)?;
        }
        Ok(())
    }
}

/// Acknowledgments still owed by each controller.
#[derive(Clone, Copy, Debug)]
struct Barrier {
    multimove: usize,
    cobot: usize,
}

impl Barrier {
    /// One state motion on each controller.
    fn step() -> Self {
        Self {
            multimove: 1,
            cobot: 1,
        }
    }

    #[inline]
    fn is_satisfied(&self) -> bool {
        self.multimove == 0 && self.cobot == 0
    }
}

/// Synchronization engine.
///
/// Walks a sequence head to tail and keeps both controllers in lock-step: a
/// step is only dispatched once both controllers acknowledged the previous
/// one.
pub struct Orchestrator<L> {
    multimove: L,
    cobot: L,
    table: MotionTable,
    path: u8,
    settings: EngineSettings,
    shutdown: broadcast::Receiver<()>,
}

impl<L: Link> Orchestrator<L> {
    pub fn new(
        multimove: L,
        cobot: L,
        settings: EngineSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            multimove,
            cobot,
            table: MotionTable::default(),
            path: 1,
            settings,
            shutdown,
        }
    }

    /// Resolve sequence names with this table.
    pub fn with_table(mut self, table: MotionTable) -> Self {
        self.table = table;
        self
    }

    /// Path code sent with every state-motion command.
    pub fn with_path(mut self, path: u8) -> Self {
        self.path = path;
        self
    }

    /// Select the operation mode of both controllers.
    ///
    /// Each controller announces itself with a server init acknowledgment.
    /// Stale frames are drained, the mode selector is sent and the controller
    /// confirms with a second server init acknowledgment.
    ///
    /// The controller repeats its announcement until it reads the selector,
    /// so a repeat still in flight can stand in for the confirmation. Frames
    /// sent after the handshake queue up in the controller's channel until
    /// its session is open, and the barrier ignores the late confirmation.
    pub async fn handshake(&mut self, modes: (Mode, Mode)) -> Result<(), EngineError> {
        let (multimove_mode, cobot_mode) = modes;

        Self::handshake_one(
            &mut self.multimove,
            &mut self.shutdown,
            Rig::MultiMove,
            multimove_mode,
            &self.settings,
        )
        .await?;
        Self::handshake_one(
            &mut self.cobot,
            &mut self.shutdown,
            Rig::Cobot,
            cobot_mode,
            &self.settings,
        )
        .await?;

        Ok(())
    }

    async fn handshake_one(
        link: &mut L,
        shutdown: &mut broadcast::Receiver<()>,
        rig: Rig,
        mode: Mode,
        settings: &EngineSettings,
    ) -> Result<(), EngineError> {
        log::info!("Waiting for {} controller", rig);

        if !wait_for(link, shutdown, &ACK_SERVER_INIT, settings).await? {
            return Err(EngineError::HandshakeTimeout(rig));
        }

        while link.recv(Duration::ZERO).await?.is_some() {}

        log::info!("Selecting {} mode for {} controller", mode, rig);

        link.send_frame(&mode.selector()).await?;

        if !wait_for(link, shutdown, &ACK_SERVER_INIT, settings).await? {
            return Err(EngineError::HandshakeTimeout(rig));
        }

        log::info!("{} controller answered mode selection", rig);

        Ok(())
    }

    /// Run the sequence to its tail.
    ///
    /// Streaming steps pull their joint targets from `source`.
    pub async fn run(
        &mut self,
        mut sequence: Sequence,
        source: &mut dyn PointSource,
    ) -> Result<RunReport, EngineError> {
        sequence.validate()?;

        let mut report = RunReport::default();
        let mut cursor = 0;

        while let Some(step) = sequence.get(cursor).cloned() {
            self.check_shutdown()?;

            if !step.is_unlocked() {
                return Err(EngineError::Locked(cursor));
            }

            log::info!("Step {}: {}", cursor, step);

            let cobot_code = self.resolve(Rig::Cobot, step.cobot())?;

            match step.multimove() {
                Command::Stream => {
                    self.dispatch(Rig::Cobot, cobot_code, step.position())
                        .await?;

                    self.wait_barrier(
                        cursor,
                        Barrier {
                            multimove: 0,
                            cobot: 1,
                        },
                    )
                    .await?;

                    let stream =
                        StreamSession::new(&mut self.multimove, step.budget(), self.settings.stream)
                            .run(source)
                            .await?;

                    // Late point acknowledgments carry no step, they must not
                    // complete a later barrier.
                    if stream.pending() > 0 {
                        log::info!(
                            "Waiting for {} outstanding stream acknowledgments",
                            stream.pending()
                        );
                    }

                    self.wait_barrier(
                        cursor,
                        Barrier {
                            multimove: stream.pending(),
                            cobot: 0,
                        },
                    )
                    .await?;

                    report.streams.push(stream);
                }
                Command::Motion(name) => {
                    let multimove_code = self.resolve(Rig::MultiMove, name)?;

                    self.dispatch(Rig::MultiMove, multimove_code, step.position())
                        .await?;
                    self.dispatch(Rig::Cobot, cobot_code, step.position())
                        .await?;

                    self.wait_barrier(cursor, Barrier::step()).await?;
                }
            }

            log::info!("Step {} complete", cursor);

            report.completed += 1;
            sequence.unlock(cursor + 1);

            if step.position() == Position::Tail {
                break;
            }

            tokio::time::sleep(self.settings.loop_tick).await;

            cursor += 1;
        }

        log::info!("Sequence done; {}", report);

        Ok(report)
    }

    /// Stream joint targets to the MultiMove controller outside of a sequence.
    pub async fn stream(
        &mut self,
        budget: usize,
        source: &mut dyn PointSource,
    ) -> Result<StreamReport, EngineError> {
        let report = StreamSession::new(&mut self.multimove, budget, self.settings.stream)
            .run(source)
            .await?;

        Ok(report)
    }

    /// Tell both controllers to terminate.
    pub async fn terminate(&mut self) -> Result<(), EngineError> {
        log::info!("Terminating controllers");

        self.multimove.send_frame(&TERMINATE).await?;
        self.cobot.send_frame(&TERMINATE).await?;

        Ok(())
    }

    fn resolve(&self, rig: Rig, name: &str) -> Result<u8, EngineError> {
        self.table
            .sequence_code(name)
            .ok_or_else(|| EngineError::UnknownCommand {
                rig,
                name: name.to_owned(),
            })
    }

    async fn dispatch(&mut self, rig: Rig, sequence: u8, position: Position) -> Result<(), EngineError> {
        let frame = [self.path as f64, sequence as f64, position.code()];

        log::info!("Dispatch to {} » {:?}", rig, frame);

        match rig {
            Rig::MultiMove => self.multimove.send_frame(&frame).await?,
            Rig::Cobot => self.cobot.send_frame(&frame).await?,
        }

        Ok(())
    }

    fn check_shutdown(&mut self) -> Result<(), EngineError> {
        match self.shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => {
                log::info!("Shutdown requested");
                Err(EngineError::Cancelled)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => Ok(()),
        }
    }

    /// Poll both inbound channels until both controllers completed the step.
    async fn wait_barrier(&mut self, step: usize, mut barrier: Barrier) -> Result<(), EngineError> {
        let deadline = self.settings.barrier_timeout.map(|t| Instant::now() + t);

        loop {
            if barrier.multimove > 0 {
                if let Some(frame) = self.multimove.recv_frame(Duration::ZERO).await? {
                    if frame.is(&ACK_MOTION_COMPLETE) {
                        barrier.multimove -= 1;
                        if barrier.multimove == 0 {
                            log::info!("MultiMove completed step {}", step);
                        }
                    } else {
                        log::trace!("Ignoring MultiMove frame: {}", frame);
                    }
                }
            }

            if barrier.cobot > 0 {
                if let Some(frame) = self.cobot.recv_frame(Duration::ZERO).await? {
                    if frame.is(&ACK_MOTION_COMPLETE) {
                        barrier.cobot -= 1;
                        if barrier.cobot == 0 {
                            log::info!("Cobot completed step {}", step);
                        }
                    } else {
                        log::trace!("Ignoring Cobot frame: {}", frame);
                    }
                }
            }

            if barrier.is_satisfied() {
                return Ok(());
            }

            self.check_shutdown()?;

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    log::error!("Barrier for step {} timed out", step);
                    return Err(EngineError::BarrierTimeout {
                        step,
                        multimove: barrier.multimove == 0,
                        cobot: barrier.cobot == 0,
                    });
                }
            }

            tokio::time::sleep(self.settings.retry_delay).await;
        }
    }
}

/// Wait for a specific frame, discarding anything else.
///
/// Returns false when the handshake timeout elapsed first.
async fn wait_for<L: Link>(
    link: &mut L,
    shutdown: &mut broadcast::Receiver<()>,
    expected: &[f64],
    settings: &EngineSettings,
) -> Result<bool, EngineError> {
    let deadline = settings.handshake_timeout.map(|t| Instant::now() + t);

    loop {
        match link.recv_frame(settings.retry_delay).await? {
            Some(frame) if frame.is(expected) => return Ok(true),
            Some(frame) => log::trace!("Ignoring frame during handshake: {}", frame),
            None => {}
        }

        match shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => return Err(EngineError::Cancelled),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {}
        }

        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        adapter::TcpConnector,
        channel::{memory_pair, MemoryLink},
        controller::{ControllerProcess, ControllerSettings, State},
        protocol::Frame,
        stream::{SineWave, Waypoints},
    };

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum Event {
        Dispatch(Rig, usize),
        Ack(Rig, usize),
    }

    type EventLog = Arc<Mutex<Vec<Event>>>;

    /// Channel end that records every frame it sends.
    struct TapLink {
        inner: MemoryLink,
        sent: Arc<Mutex<Vec<Frame>>>,
    }

    #[async_trait::async_trait]
    impl Link for TapLink {
        async fn send(&mut self, buffer: &[u8]) -> std::io::Result<()> {
            if let Ok(frame) = Frame::try_from(buffer) {
                self.sent.lock().unwrap().push(frame);
            }
            self.inner.send(buffer).await
        }

        async fn recv(&mut self, timeout: Duration) -> std::io::Result<Option<Vec<u8>>> {
            self.inner.recv(timeout).await
        }
    }

    /// Controller stand-in acknowledging every state motion after `delay`.
    ///
    /// Returns the frames it received. A `None` delay never acknowledges.
    fn spawn_fake(
        rig: Rig,
        mut link: MemoryLink,
        delay: Option<Duration>,
        events: EventLog,
    ) -> tokio::task::JoinHandle<Vec<Frame>> {
        tokio::spawn(async move {
            let mut received = Vec::new();
            let mut step = 0;

            while let Ok(Some(frame)) = link.recv_frame(Duration::from_secs(2)).await {
                received.push(frame.clone());

                if frame.is(&TERMINATE) {
                    break;
                }

                events.lock().unwrap().push(Event::Dispatch(rig, step));

                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                    events.lock().unwrap().push(Event::Ack(rig, step));
                    link.send_frame(&ACK_MOTION_COMPLETE).await.unwrap();
                }

                step += 1;
            }

            received
        })
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            retry_delay: Duration::from_millis(1),
            loop_tick: Duration::from_millis(1),
            barrier_timeout: None,
            handshake_timeout: Some(Duration::from_secs(2)),
            stream: StreamSettings {
                ack_timeout: Duration::from_millis(500),
                period: None,
            },
        }
    }

    fn four_steps() -> Sequence {
        let mut sequence = Sequence::new();
        sequence
            .append("Home", "Home", Position::Head, 0)
            .append("Standby", "Standby", Position::Middle, 0)
            .append("Home", "Standby", Position::Middle, 0)
            .append("Home", "Home", Position::Tail, 0);
        sequence
    }

    fn stream_steps() -> Sequence {
        let mut sequence = Sequence::new();
        sequence
            .append("Home", "Home", Position::Head, 0)
            .append(Command::Stream, "Home", Position::Middle, 3)
            .append("Standby", "Standby", Position::Tail, 0);
        sequence
    }

    fn position_of(events: &[Event], event: Event) -> usize {
        events.iter().position(|e| *e == event).unwrap()
    }

    #[tokio::test]
    async fn barrier_ordering() {
        let (multimove, multimove_peer) = memory_pair();
        let (cobot, cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let events = EventLog::default();
        let fake_multimove = spawn_fake(
            Rig::MultiMove,
            multimove_peer,
            Some(Duration::from_millis(30)),
            events.clone(),
        );
        let fake_cobot = spawn_fake(
            Rig::Cobot,
            cobot_peer,
            Some(Duration::from_millis(5)),
            events.clone(),
        );

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);

        let report = orchestrator
            .run(four_steps(), &mut SineWave::default())
            .await
            .unwrap();
        assert_eq!(report.completed, 4);
        assert!(report.streams.is_empty());

        orchestrator.terminate().await.unwrap();

        let multimove_frames = fake_multimove.await.unwrap();
        let cobot_frames = fake_cobot.await.unwrap();

        assert_eq!(
            multimove_frames,
            vec![
                Frame::new(vec![1.0, 1.0, 1.0]),
                Frame::new(vec![1.0, 2.0, 2.0]),
                Frame::new(vec![1.0, 1.0, 2.0]),
                Frame::new(vec![1.0, 1.0, 3.0]),
                Frame::new(vec![0.0, 0.0, 0.0]),
            ]
        );
        assert_eq!(cobot_frames[2], Frame::new(vec![1.0, 2.0, 2.0]));

        let events = events.lock().unwrap();
        for step in 1..4 {
            for rig in [Rig::MultiMove, Rig::Cobot] {
                let dispatch = position_of(&events, Event::Dispatch(rig, step));
                assert!(dispatch > position_of(&events, Event::Ack(Rig::MultiMove, step - 1)));
                assert!(dispatch > position_of(&events, Event::Ack(Rig::Cobot, step - 1)));
            }
        }
    }

    #[tokio::test]
    async fn internal_only_scenario() {
        let (multimove, multimove_peer) = memory_pair();
        let (cobot, cobot_peer) = memory_pair();
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        let controller_settings = ControllerSettings {
            recv_timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        };

        let mut multimove_process = ControllerProcess::new(
            Rig::MultiMove,
            multimove_peer,
            TcpConnector,
            MotionTable::default(),
            controller_settings.clone(),
            shutdown_tx.subscribe(),
        );
        let mut cobot_process = ControllerProcess::new(
            Rig::Cobot,
            cobot_peer,
            TcpConnector,
            MotionTable::default(),
            controller_settings,
            shutdown_tx.subscribe(),
        );

        let multimove_handle = tokio::spawn(async move {
            let result = multimove_process.run().await;
            (multimove_process.state(), result)
        });
        let cobot_handle = tokio::spawn(async move {
            let result = cobot_process.run().await;
            (cobot_process.state(), result)
        });

        let sent = Arc::new(Mutex::new(Vec::new()));
        let multimove = TapLink {
            inner: multimove,
            sent: sent.clone(),
        };
        let cobot = TapLink {
            inner: cobot,
            sent: Arc::new(Mutex::new(Vec::new())),
        };

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);

        orchestrator
            .handshake((Mode::Internal, Mode::Internal))
            .await
            .unwrap();

        let mut sequence = Sequence::new();
        sequence
            .append("Home", "Home", Position::Head, 0)
            .append("Standby", "Standby", Position::Middle, 0)
            .append(Command::Stream, "Home", Position::Middle, 5)
            .append("Home", "Home", Position::Tail, 0);

        let report = orchestrator
            .run(sequence, &mut SineWave::default())
            .await
            .unwrap();

        assert_eq!(report.completed, 4);
        assert_eq!(report.streams.len(), 1);
        assert_eq!(report.streams[0].sent, 5);
        assert_eq!(report.streams[0].acknowledged, 5);
        assert!(!report.streams[0].cancelled);

        orchestrator.terminate().await.unwrap();

        let (state, result) = multimove_handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, State::Terminated);
        let (state, result) = cobot_handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, State::Terminated);

        let sent = sent.lock().unwrap();
        let lengths = sent.iter().map(|frame| frame.len()).collect::<Vec<_>>();
        assert_eq!(lengths, vec![3, 3, 3, 6, 6, 6, 6, 6, 3, 3]);
        assert_eq!(sent[0], Frame::new(Mode::Internal.selector().to_vec()));
        assert_eq!(sent[8], Frame::new(vec![1.0, 1.0, 3.0]));
        assert_eq!(sent[9], Frame::new(TERMINATE.to_vec()));
    }

    #[tokio::test]
    async fn cancelled_barrier() {
        let (multimove, multimove_peer) = memory_pair();
        let (cobot, cobot_peer) = memory_pair();
        let (shutdown_tx, shutdown) = broadcast::channel(1);

        let events = EventLog::default();
        let _fake_multimove = spawn_fake(Rig::MultiMove, multimove_peer, None, events.clone());
        let _fake_cobot = spawn_fake(Rig::Cobot, cobot_peer, None, events.clone());

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(()).ok();
        });

        let result = orchestrator
            .run(four_steps(), &mut SineWave::default())
            .await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn barrier_timeout() {
        let (multimove, multimove_peer) = memory_pair();
        let (cobot, cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let events = EventLog::default();
        let _fake_multimove = spawn_fake(
            Rig::MultiMove,
            multimove_peer,
            Some(Duration::from_millis(1)),
            events.clone(),
        );
        let _fake_cobot = spawn_fake(Rig::Cobot, cobot_peer, None, events.clone());

        let settings = EngineSettings {
            barrier_timeout: Some(Duration::from_millis(200)),
            ..settings()
        };

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings, shutdown);

        let result = orchestrator
            .run(four_steps(), &mut SineWave::default())
            .await;

        assert!(matches!(
            result,
            Err(EngineError::BarrierTimeout {
                step: 0,
                multimove: true,
                cobot: false
            })
        ));
    }

    #[tokio::test]
    async fn unknown_command_not_dispatched() {
        let (multimove, mut multimove_peer) = memory_pair();
        let (cobot, mut cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);

        let mut sequence = Sequence::new();
        sequence.append("Dance", "Home", Position::Head, 0);

        let result = orchestrator
            .run(sequence, &mut SineWave::default())
            .await;

        assert!(matches!(
            result,
            Err(EngineError::UnknownCommand {
                rig: Rig::MultiMove,
                ..
            })
        ));
        assert!(multimove_peer.recv(Duration::ZERO).await.unwrap().is_none());
        assert!(cobot_peer.recv(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_sequence_rejected() {
        let (multimove, _multimove_peer) = memory_pair();
        let (cobot, _cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);

        let result = orchestrator
            .run(Sequence::new(), &mut Waypoints::new(vec![]))
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Sequence(SequenceError::Empty))
        ));
    }

    #[tokio::test]
    async fn handshake_drains_stale_frames() {
        let (multimove, mut multimove_peer) = memory_pair();
        let (cobot, mut cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        for peer in [&mut multimove_peer, &mut cobot_peer] {
            peer.send_frame(&ACK_SERVER_INIT).await.unwrap();
            peer.send_frame(&ACK_SERVER_INIT).await.unwrap();
            peer.send_frame(&[1.0, 2.0]).await.unwrap();
        }

        let responder = tokio::spawn(async move {
            let mut selectors = Vec::new();
            for peer in [&mut multimove_peer, &mut cobot_peer] {
                let frame = peer.recv_frame(Duration::from_secs(2)).await.unwrap().unwrap();
                selectors.push(frame);
                peer.send_frame(&ACK_SERVER_INIT).await.unwrap();
            }
            for peer in [&mut multimove_peer, &mut cobot_peer] {
                assert!(peer.recv(Duration::from_millis(20)).await.unwrap().is_none());
            }
            selectors
        });

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);
        orchestrator
            .handshake((Mode::Virtual, Mode::Internal))
            .await
            .unwrap();

        let selectors = responder.await.unwrap();
        assert_eq!(selectors[0], Frame::new(vec![1.0; 3]));
        assert_eq!(selectors[1], Frame::new(vec![3.0; 3]));
    }

    #[tokio::test]
    async fn handshake_times_out() {
        let (multimove, _multimove_peer) = memory_pair();
        let (cobot, _cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let settings = EngineSettings {
            handshake_timeout: Some(Duration::from_millis(50)),
            ..settings()
        };

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings, shutdown);

        let result = orchestrator
            .handshake((Mode::Internal, Mode::Internal))
            .await;

        assert!(matches!(
            result,
            Err(EngineError::HandshakeTimeout(Rig::MultiMove))
        ));
    }

    #[tokio::test]
    async fn stream_step_ordering() {
        let (multimove, multimove_peer) = memory_pair();
        let (cobot, cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let events = EventLog::default();
        let fake_multimove = spawn_fake(
            Rig::MultiMove,
            multimove_peer,
            Some(Duration::from_millis(5)),
            events.clone(),
        );
        let fake_cobot = spawn_fake(
            Rig::Cobot,
            cobot_peer,
            Some(Duration::from_millis(30)),
            events.clone(),
        );

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);

        let report = orchestrator
            .run(stream_steps(), &mut SineWave::default())
            .await
            .unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.streams[0].sent, 3);
        assert_eq!(report.streams[0].acknowledged, 3);
        assert_eq!(report.streams[0].pending(), 0);

        orchestrator.terminate().await.unwrap();

        let multimove_frames = fake_multimove.await.unwrap();
        let cobot_frames = fake_cobot.await.unwrap();

        let lengths = multimove_frames
            .iter()
            .map(|frame| frame.len())
            .collect::<Vec<_>>();
        assert_eq!(lengths, vec![3, 6, 6, 6, 3, 3]);
        assert_eq!(multimove_frames[4], Frame::new(vec![1.0, 2.0, 3.0]));
        assert_eq!(
            cobot_frames,
            vec![
                Frame::new(vec![1.0, 1.0, 1.0]),
                Frame::new(vec![1.0, 1.0, 2.0]),
                Frame::new(vec![1.0, 2.0, 3.0]),
                Frame::new(vec![0.0, 0.0, 0.0]),
            ]
        );

        let events = events.lock().unwrap();

        let cobot_stream_step = position_of(&events, Event::Dispatch(Rig::Cobot, 1));
        assert!(cobot_stream_step > position_of(&events, Event::Ack(Rig::MultiMove, 0)));
        assert!(cobot_stream_step > position_of(&events, Event::Ack(Rig::Cobot, 0)));

        let first_point = position_of(&events, Event::Dispatch(Rig::MultiMove, 1));
        assert!(first_point > position_of(&events, Event::Ack(Rig::Cobot, 1)));

        for tail in [Event::Dispatch(Rig::MultiMove, 4), Event::Dispatch(Rig::Cobot, 2)] {
            let tail = position_of(&events, tail);
            assert!(tail > position_of(&events, Event::Ack(Rig::MultiMove, 3)));
            assert!(tail > position_of(&events, Event::Ack(Rig::Cobot, 1)));
        }
    }

    #[tokio::test]
    async fn late_stream_acks_hold_barrier() {
        let (multimove, multimove_peer) = memory_pair();
        let (cobot, cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        let events = EventLog::default();
        let fake_multimove = spawn_fake(
            Rig::MultiMove,
            multimove_peer,
            Some(Duration::from_millis(50)),
            events.clone(),
        );
        let fake_cobot = spawn_fake(
            Rig::Cobot,
            cobot_peer,
            Some(Duration::from_millis(5)),
            events.clone(),
        );

        let settings = EngineSettings {
            stream: StreamSettings {
                ack_timeout: Duration::from_millis(10),
                period: None,
            },
            ..settings()
        };

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings, shutdown);

        let report = orchestrator
            .run(stream_steps(), &mut SineWave::default())
            .await
            .unwrap();
        assert_eq!(report.completed, 3);
        assert_eq!(report.streams[0].sent, 3);
        assert_eq!(
            report.streams[0].acknowledged + report.streams[0].timeouts,
            3
        );

        {
            let events = events.lock().unwrap();

            assert!(events.contains(&Event::Ack(Rig::MultiMove, 4)));

            let tail = position_of(&events, Event::Dispatch(Rig::MultiMove, 4));
            assert!(tail > position_of(&events, Event::Ack(Rig::MultiMove, 3)));
            let tail = position_of(&events, Event::Dispatch(Rig::Cobot, 2));
            assert!(tail > position_of(&events, Event::Ack(Rig::MultiMove, 3)));
        }

        orchestrator.terminate().await.unwrap();

        assert_eq!(fake_multimove.await.unwrap().len(), 6);
        assert_eq!(fake_cobot.await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn late_announcement_ignored_by_barrier() {
        let (multimove, mut multimove_peer) = memory_pair();
        let (cobot, mut cobot_peer) = memory_pair();
        let (_shutdown_tx, shutdown) = broadcast::channel(1);

        for peer in [&mut multimove_peer, &mut cobot_peer] {
            peer.send_frame(&ACK_SERVER_INIT).await.unwrap();
        }

        let responder = tokio::spawn(async move {
            for peer in [&mut multimove_peer, &mut cobot_peer] {
                peer.recv_frame(Duration::from_secs(2)).await.unwrap().unwrap();
                // Repeated announcement followed by the confirmation.
                peer.send_frame(&ACK_SERVER_INIT).await.unwrap();
                peer.send_frame(&ACK_SERVER_INIT).await.unwrap();
            }
            (multimove_peer, cobot_peer)
        });

        let mut orchestrator = Orchestrator::new(multimove, cobot, settings(), shutdown);
        orchestrator
            .handshake((Mode::Internal, Mode::Internal))
            .await
            .unwrap();

        let (multimove_peer, cobot_peer) = responder.await.unwrap();

        let events = EventLog::default();
        let fake_multimove = spawn_fake(
            Rig::MultiMove,
            multimove_peer,
            Some(Duration::from_millis(20)),
            events.clone(),
        );
        let fake_cobot = spawn_fake(
            Rig::Cobot,
            cobot_peer,
            Some(Duration::from_millis(20)),
            events.clone(),
        );

        let mut sequence = Sequence::new();
        sequence.append("Home", "Home", Position::Head, 0);

        let report = orchestrator
            .run(sequence, &mut SineWave::default())
            .await
            .unwrap();
        assert_eq!(report.completed, 1);

        assert!(events.lock().unwrap().contains(&Event::Ack(Rig::MultiMove, 0)));
        assert!(events.lock().unwrap().contains(&Event::Ack(Rig::Cobot, 0)));

        orchestrator.terminate().await.unwrap();

        assert_eq!(
            fake_multimove.await.unwrap(),
            vec![
                Frame::new(vec![1.0, 1.0, 1.0]),
                Frame::new(vec![0.0, 0.0, 0.0]),
            ]
        );
        assert_eq!(fake_cobot.await.unwrap().len(), 2);
    }
}
