// ADAPT CONFIGURATION SPACE
// CARTESIAN PRODUCT OF EVERY KNOB'S RESOLVED VALUES, IN A FIXED ORDER:
// KNOB NAMES SORTED, EACH NEW KNOB MULTIPLIES THE RUNNING SPACE.
// THE FIRST KNOB VARIES FASTEST. EVERY CONFIGURATION GETS A STABLE
// ZERO-BASED INDEX AT CONSTRUCTION; THE CORE NEVER LOOKS ONE UP BY EQUALITY.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use crate::error::{AdaptError, Result};
use crate::knob::{KnobValue, ResolvedKnob};

// ONE VALUE PER DECLARED KNOB, KEYED BY NAME, SORTED BY NAME

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    entries: Vec<(String, KnobValue)>,
}

impl Configuration {
    pub fn new(entries: impl IntoIterator<Item = (String, KnobValue)>) -> Self {
        let mut entries: Vec<(String, KnobValue)> = entries.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&KnobValue> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn require(&self, name: &str) -> Result<&KnobValue> {
        self.get(name).ok_or_else(|| AdaptError::UnknownKnob(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KnobValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

// MISSING KNOB IS A CONTRACT VIOLATION IN THE FUNCTION BODY
impl Index<&str> for Configuration {
    type Output = KnobValue;

    fn index(&self, name: &str) -> &KnobValue {
        match self.get(name) {
            Some(v) => v,
            None => panic!("configuration has no knob `{}`", name),
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

// --- ENUMERATED SPACE ---

#[derive(Debug, Clone)]
pub struct ConfigSpace {
    knob_names: Vec<String>,
    knobs: Vec<ResolvedKnob>,
    configs: Vec<Configuration>,
}

impl ConfigSpace {
    // `knobs` MAY ARRIVE IN ANY ORDER; THE SPACE SORTS BY NAME.
    pub fn build(knobs: &BTreeMap<String, ResolvedKnob>, max_size: usize) -> Result<Self> {
        let size = knobs
            .values()
            .try_fold(1usize, |acc, k| acc.checked_mul(k.len()))
            .unwrap_or(usize::MAX);
        if knobs.is_empty() || size == 0 {
            return Ok(Self {
                knob_names: knobs.keys().cloned().collect(),
                knobs: knobs.values().cloned().collect(),
                configs: Vec::new(),
            });
        }
        if size > max_size {
            return Err(AdaptError::DomainTooLarge { size, limit: max_size });
        }

        // ITERATIVE CROSS-PRODUCT EXTENSION
        let mut space: Vec<Vec<(String, KnobValue)>> = Vec::new();
        for (name, knob) in knobs {
            if space.is_empty() {
                space = knob.values.iter().map(|v| vec![(name.clone(), v.clone())]).collect();
                continue;
            }
            let mut extended = Vec::with_capacity(space.len() * knob.len());
            for value in &knob.values {
                for partial in &space {
                    let mut next = partial.clone();
                    next.push((name.clone(), value.clone()));
                    extended.push(next);
                }
            }
            space = extended;
        }

        // BTreeMap ITERATION IS ALREADY SORTED, SO ENTRIES ARE TOO
        let configs = space.into_iter().map(|entries| Configuration { entries }).collect();

        Ok(Self {
            knob_names: knobs.keys().cloned().collect(),
            knobs: knobs.values().cloned().collect(),
            configs,
        })
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn knob_names(&self) -> &[String] {
        &self.knob_names
    }

    pub fn get(&self, index: usize) -> Option<&Configuration> {
        self.configs.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Configuration)> {
        self.configs.iter().enumerate()
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        0..self.configs.len()
    }

    // MIXED-RADIX DECODE FOR CALLERS HOLDING A CONFIGURATION FROM OUTSIDE.
    // THE CONTROL LOOP ITSELF CARRIES INDICES AND NEVER NEEDS THIS.
    pub fn index_of(&self, config: &Configuration) -> Option<usize> {
        if self.configs.is_empty() || config.len() != self.knob_names.len() {
            return None;
        }
        let mut index = 0usize;
        let mut stride = 1usize;
        for (name, knob) in self.knob_names.iter().zip(&self.knobs) {
            let value = config.get(name)?;
            let digit = knob.values.iter().position(|v| v == value)?;
            index += digit * stride;
            stride *= knob.len();
        }
        Some(index)
    }

    // REFERENCE CONFIGURATION: EVERY KNOB AT ITS REFERENCE VALUE
    pub fn reference_index(&self) -> Option<usize> {
        let reference = Configuration::new(
            self.knob_names
                .iter()
                .zip(&self.knobs)
                .map(|(n, k)| (n.clone(), k.reference.clone())),
        );
        self.index_of(&reference)
    }
}

impl Index<usize> for ConfigSpace {
    type Output = Configuration;

    fn index(&self, index: usize) -> &Configuration {
        match self.configs.get(index) {
            Some(c) => c,
            None => panic!(
                "configuration index {} out of range (space has {})",
                index,
                self.configs.len()
            ),
        }
    }
}
