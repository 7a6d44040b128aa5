use std::collections::HashMap;

/// Path names and their wire codes.
const PATHS: [(&str, u8); 4] = [("1A", 1), ("1B", 2), ("2A", 3), ("2B", 4)];

/// Sequence names and their wire codes.
const SEQUENCES: [(&str, u8); 2] = [("Home", 1), ("Standby", 2)];

/// Tool code used on a path.
fn tool_code(path: &str) -> Option<u8> {
    match path {
        "1A" | "1B" => Some(1),
        "2A" | "2B" => Some(2),
        _ => None,
    }
}

/// Speed code used for a sequence.
fn speed_code(sequence: &str) -> Option<u8> {
    match sequence {
        "Home" => Some(1),
        "Standby" => Some(2),
        _ => None,
    }
}

/// Convert a frame element into a table code.
pub fn code(value: f64) -> Option<u8> {
    if value.fract() == 0.0 && (0.0..=u8::MAX as f64).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

/// Motion lookup table.
///
/// Resolves a `(path, sequence)` pair into the concrete motion data that is
/// sent to the robot controller. The default table holds
/// `[path, tool, speed, state]` for every known pair.
#[derive(Clone, Debug)]
pub struct MotionTable {
    paths: Vec<(String, u8)>,
    sequences: Vec<(String, u8)>,
    motions: HashMap<(u8, u8), Vec<f64>>,
}

impl MotionTable {
    /// Construct an empty table.
    pub fn empty() -> Self {
        Self {
            paths: Vec::new(),
            sequences: Vec::new(),
            motions: HashMap::new(),
        }
    }

    pub fn path_code(&self, name: &str) -> Option<u8> {
        self.paths
            .iter()
            .find(|(path, _)| path == name)
            .map(|(_, code)| *code)
    }

    pub fn path_name(&self, code: u8) -> Option<&str> {
        self.paths
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(name, _)| name.as_str())
    }

    pub fn sequence_code(&self, name: &str) -> Option<u8> {
        self.sequences
            .iter()
            .find(|(sequence, _)| sequence == name)
            .map(|(_, code)| *code)
    }

    pub fn sequence_name(&self, code: u8) -> Option<&str> {
        self.sequences
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(name, _)| name.as_str())
    }

    /// Resolve motion data for a path and sequence code.
    pub fn resolve(&self, path: u8, sequence: u8) -> Option<&[f64]> {
        self.motions.get(&(path, sequence)).map(|data| &data[..])
    }

    /// Register a path name.
    pub fn insert_path(&mut self, name: impl ToString, code: u8) {
        let name = name.to_string();
        self.paths.retain(|(path, _)| *path != name);
        self.paths.push((name, code));
    }

    /// Register a sequence name.
    pub fn insert_sequence(&mut self, name: impl ToString, code: u8) {
        let name = name.to_string();
        self.sequences.retain(|(sequence, _)| *sequence != name);
        self.sequences.push((name, code));
    }

    /// Set the motion data for a path and sequence pair.
    pub fn insert(&mut self, path: u8, sequence: u8, data: Vec<f64>) {
        self.motions.insert((path, sequence), data);
    }

    /// Set the motion data for a named pair.
    ///
    /// Returns false if either name is unknown.
    pub fn insert_by_name(&mut self, path: &str, sequence: &str, data: Vec<f64>) -> bool {
        match (self.path_code(path), self.sequence_code(sequence)) {
            (Some(path), Some(sequence)) => {
                self.insert(path, sequence, data);
                true
            }
            _ => false,
        }
    }
}

impl Default for MotionTable {
    fn default() -> Self {
        let mut table = Self::empty();

        for (name, code) in PATHS {
            table.insert_path(name, code);
        }
        for (name, code) in SEQUENCES {
            table.insert_sequence(name, code);
        }

        for (path, path_code) in PATHS {
            for (sequence, sequence_code) in SEQUENCES {
                if let (Some(tool), Some(speed)) = (tool_code(path), speed_code(sequence)) {
                    table.insert(
                        path_code,
                        sequence_code,
                        vec![
                            path_code as f64,
                            tool as f64,
                            speed as f64,
                            sequence_code as f64,
                        ],
                    );
                }
            }
        }

        table
    }
}
