// ADAPT KNOB VALUES AND RANGES
// A KNOB RANGE IS EITHER AN EXPLICIT LIST OR A CONTINUOUS INTERVAL.
// INTERVALS ARE QUANTIZED TO N EVENLY SPACED SAMPLES BEFORE ENUMERATION.
// QUANTIZATION ALWAYS RECOMPUTES FROM THE RAW RANGE -- NEVER ACCUMULATES.

use std::fmt;

use crate::config::MIN_QUANTIZE_LEVELS;
use crate::error::{AdaptError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum KnobValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl KnobValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    // TYPED EXTRACTION FOR FUNCTION BODIES. A MISMATCH IS A PROGRAMMING ERROR
    // IN THE CALLER'S INTENT, NOT SOMETHING TO COERCE AROUND.
    pub fn int(&self) -> i64 {
        match self {
            Self::Integer(v) => *v,
            other => panic!("knob value type mismatch: wanted integer, found {}", other.kind()),
        }
    }

    pub fn real(&self) -> f64 {
        match self {
            Self::Real(v) => *v,
            other => panic!("knob value type mismatch: wanted real, found {}", other.kind()),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Text(v) => v,
            other => panic!("knob value type mismatch: wanted text, found {}", other.kind()),
        }
    }
}

impl fmt::Display for KnobValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Real(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for KnobValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for KnobValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for KnobValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for KnobValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

// RAW RANGE AS DECLARED BY THE INTENT

#[derive(Debug, Clone, PartialEq)]
pub enum KnobRange {
    List { values: Vec<KnobValue>, reference: KnobValue },
    Interval { low: f64, high: f64, reference: f64 },
}

impl KnobRange {
    pub fn list<V: Into<KnobValue>>(values: impl IntoIterator<Item = V>, reference: impl Into<KnobValue>) -> Self {
        Self::List {
            values: values.into_iter().map(Into::into).collect(),
            reference: reference.into(),
        }
    }

    pub fn interval(low: f64, high: f64, reference: f64) -> Self {
        Self::Interval { low, high, reference }
    }

    pub fn reference(&self) -> KnobValue {
        match self {
            Self::List { reference, .. } => reference.clone(),
            Self::Interval { reference, .. } => KnobValue::Real(*reference),
        }
    }

    // RESOLVE TO AN EXPLICIT LIST. LISTS PASS THROUGH (REFERENCE APPENDED IF
    // ABSENT); INTERVALS BECOME `levels` SAMPLES PLUS THE REFERENCE IF THE
    // STEP GRID MISSED IT.
    pub fn quantize(&self, name: &str, levels: usize) -> Result<ResolvedKnob> {
        if levels < MIN_QUANTIZE_LEVELS {
            return Err(AdaptError::InvalidQuantization(levels));
        }
        match self {
            Self::List { values, reference } => {
                if values.is_empty() {
                    return Err(invalid(name, "explicit list is empty"));
                }
                let mut values = values.clone();
                if !values.contains(reference) {
                    values.push(reference.clone());
                }
                Ok(ResolvedKnob { values, reference: reference.clone() })
            }
            Self::Interval { low, high, reference } => {
                let (low, high, reference) = (*low, *high, *reference);
                if !(low.is_finite() && high.is_finite() && reference.is_finite()) {
                    return Err(invalid(name, "interval bounds must be finite"));
                }
                if low >= high {
                    return Err(invalid(name, &format!("low {} must be below high {}", low, high)));
                }
                if reference < low || reference > high {
                    return Err(invalid(
                        name,
                        &format!("reference {} outside [{}, {}]", reference, low, high),
                    ));
                }
                let step = (high - low) / (levels - 1) as f64;
                let mut values: Vec<KnobValue> = (0..levels)
                    .map(|i| {
                        // PIN THE LAST SAMPLE TO THE BOUND: low + (N-1)*step DRIFTS
                        if i == levels - 1 { high } else { low + step * i as f64 }
                    })
                    .map(KnobValue::Real)
                    .collect();
                let reference = KnobValue::Real(reference);
                if !values.contains(&reference) {
                    values.push(reference.clone());
                }
                Ok(ResolvedKnob { values, reference })
            }
        }
    }
}

fn invalid(name: &str, reason: &str) -> AdaptError {
    AdaptError::InvalidRange {
        knob: name.to_string(),
        reason: reason.to_string(),
    }
}

// ENUMERABLE FORM USED BY THE CONFIGURATION SPACE

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKnob {
    pub values: Vec<KnobValue>,
    pub reference: KnobValue,
}

impl ResolvedKnob {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
