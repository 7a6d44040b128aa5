/// Keyword marking a streaming step in place of a MultiMove command.
pub const STREAM_KEYWORD: &str = "STREAM";

pub enum SequenceError {
    /// Sequence has no steps.
    Empty,
    /// First step is not marked as head.
    MissingHead,
    /// A tail step appears before the last step.
    MisplacedTail(usize),
}

impl std::error::Error for SequenceError {}

impl std::fmt::Debug for SequenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::MissingHead => write!(f, "MissingHead"),
            Self::MisplacedTail(index) => write!(f, "MisplacedTail({})", index),
        }
    }
}

impl std::fmt::Display for SequenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "sequence is empty"),
            Self::MissingHead => write!(f, "sequence does not start with a head step"),
            Self::MisplacedTail(index) => write!(f, "tail step at {} is not the last step", index),
        }
    }
}

/// Step position within a sequence.
///
/// The position is sent along with every state-motion command as its wire
/// code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Head = 1,
    Middle = 2,
    Tail = 3,
}

impl Position {
    #[inline]
    pub fn code(&self) -> f64 {
        *self as u8 as f64
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Head => write!(f, "head"),
            Self::Middle => write!(f, "middle"),
            Self::Tail => write!(f, "tail"),
        }
    }
}

/// Command for the MultiMove controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run a named state motion.
    Motion(String),
    /// Hand the step over to a streaming session.
    Stream,
}

impl Command {
    /// Interpret a command name, the stream keyword selects streaming.
    pub fn parse(name: &str) -> Self {
        if name == STREAM_KEYWORD {
            Self::Stream
        } else {
            Self::Motion(name.to_owned())
        }
    }
}

impl From<&str> for Command {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Motion(name) => write!(f, "{}", name),
            Self::Stream => write!(f, "{}", STREAM_KEYWORD),
        }
    }
}

/// Sequence step.
///
/// Immutable once constructed, except for the unlock flag which only the
/// engine sets and which never reverts.
#[derive(Clone, Debug)]
pub struct Step {
    multimove: Command,
    cobot: String,
    position: Position,
    budget: usize,
    unlocked: bool,
}

impl Step {
    pub fn new(multimove: Command, cobot: impl ToString, position: Position, budget: usize) -> Self {
        Self {
            multimove,
            cobot: cobot.to_string(),
            position,
            budget,
            unlocked: false,
        }
    }

    /// Command for the MultiMove controller.
    #[inline]
    pub fn multimove(&self) -> &Command {
        &self.multimove
    }

    /// Sequence name for the Cobot controller.
    #[inline]
    pub fn cobot(&self) -> &str {
        &self.cobot
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.position
    }

    /// Streaming point budget, zero is unbounded.
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    #[inline]
    pub fn is_stream(&self) -> bool {
        self.multimove == Command::Stream
    }

    /// A head step may always fire, any other step only after its
    /// predecessor completed on both controllers.
    #[inline]
    pub fn is_unlocked(&self) -> bool {
        self.position == Position::Head || self.unlocked
    }

    #[inline]
    fn unlock(&mut self) {
        self.unlocked = true;
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) {}", self.multimove, self.cobot, self.position)?;
        if self.is_stream() {
            if self.budget == 0 {
                write!(f, " unbounded")?;
            } else {
                write!(f, " budget {}", self.budget)?;
            }
        }
        Ok(())
    }
}

/// Ordered choreography.
///
/// Built append-only, then handed to the engine which owns it for the
/// duration of one run.
#[derive(Clone, Debug, Default)]
pub struct Sequence {
    steps: Vec<Step>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step to the end of the sequence.
    pub fn append(
        &mut self,
        multimove: impl Into<Command>,
        cobot: impl ToString,
        position: Position,
        budget: usize,
    ) -> &mut Self {
        self.steps
            .push(Step::new(multimove.into(), cobot, position, budget));
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    /// Unlock the step at `index`, if there is one.
    pub(crate) fn unlock(&mut self, index: usize) {
        if let Some(step) = self.steps.get_mut(index) {
            step.unlock();
        }
    }

    /// Check the sequence is well formed.
    pub fn validate(&self) -> Result<(), SequenceError> {
        let first = self.steps.first().ok_or(SequenceError::Empty)?;
        if first.position != Position::Head {
            return Err(SequenceError::MissingHead);
        }

        let last = self.steps.len() - 1;
        if let Some(index) = self
            .steps
            .iter()
            .position(|step| step.position == Position::Tail)
        {
            if index != last {
                return Err(SequenceError::MisplacedTail(index));
            }
        }

        Ok(())
    }
}
