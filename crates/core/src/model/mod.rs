//! Fingerprint data model.
//!
//! A [`FunctionFingerprint`] is the evidence gathered for one named function in a source
//! image: the strings its body references, the strings found next to the calls that reach
//! it, and (when strings alone are too weak) shallow fingerprints of the functions it calls.
//! Every sequence is ordered; resolution walks them front to back and the first qualifying
//! entry wins, so order is part of the data.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open address range `[start, end)` of a function in the image it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }
}

/// Direction of a calling-context scan relative to the call instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Toward the end of the calling function (the string follows the call).
    Forward,
    /// Toward the start of the calling function (the string precedes the call).
    Backward,
}

impl Direction {
    /// The opposite direction; used to walk from a string back to its call.
    pub fn inverted(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// A string referenced from inside the function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteriorString {
    pub text: String,
    /// Single reference and no duplicate text in the source image.
    pub unique: bool,
}

/// A string found next to a call site that targets the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallingString {
    pub text: String,
    pub unique: bool,
    pub direction: Direction,
}

/// Evidence record for one named function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFingerprint {
    pub name: String,
    pub range: AddressRange,
    #[serde(default)]
    pub interior_strings: Vec<InteriorString>,
    #[serde(default)]
    pub calling_strings: Vec<CallingString>,
    /// Shallow fingerprints of callees; only filled when string evidence was insufficient.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_callees: Vec<FunctionFingerprint>,
}

impl FunctionFingerprint {
    pub fn new(name: impl Into<String>, range: AddressRange) -> Self {
        Self {
            name: name.into(),
            range,
            interior_strings: Vec::new(),
            calling_strings: Vec::new(),
            fallback_callees: Vec::new(),
        }
    }

    pub fn unique_interior_count(&self) -> usize {
        self.interior_strings.iter().filter(|s| s.unique).count()
    }

    pub fn unique_calling_count(&self) -> usize {
        self.calling_strings.iter().filter(|s| s.unique).count()
    }

    /// Multi-line description of all evidence, escaping control characters in strings.
    pub fn long_form(&self) -> String {
        let mut out = format!("{self}\n  Strings:\n");
        for s in &self.interior_strings {
            out.push_str(&format!(
                "    {}: \"{}\"\n",
                uniqueness_label(s.unique),
                escape_control(&s.text)
            ));
        }
        out.push_str("  Calling Strings:\n");
        for s in &self.calling_strings {
            let direction = match s.direction {
                Direction::Forward => "Forward",
                Direction::Backward => "Backward",
            };
            out.push_str(&format!(
                "    {} {}: \"{}\"\n",
                uniqueness_label(s.unique),
                direction,
                escape_control(&s.text)
            ));
        }
        out.push_str("  Called Funcs:\n");
        for callee in &self.fallback_callees {
            out.push_str(&format!("    {callee}\n"));
        }
        out
    }
}

impl fmt::Display for FunctionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:08x}-0x{:08x})", self.name, self.range.start, self.range.end)
    }
}

fn uniqueness_label(unique: bool) -> &'static str {
    if unique {
        "Unique"
    } else {
        "Not Unique"
    }
}

/// Escape newline, tab and carriage return so each string stays on one line.
pub fn escape_control(text: &str) -> String {
    text.replace('\n', "\\n").replace('\t', "\\t").replace('\r', "\\r")
}
