// ADAPT INTENT MODEL
// DECLARATIVE DESCRIPTION OF ONE CONTROLLABLE FUNCTION: KNOBS, MEASURES,
// CONSTRAINTS, OBJECTIVE, DIRECTION. PURE DATA PLUS DOMAIN ENUMERATION.
// THE TEXTUAL INTENT LANGUAGE LIVES ELSEWHERE; ITS RAW SOURCE IS CARRIED OPAQUELY.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::DEFAULT_QUANTIZE_LEVELS;
use crate::error::{AdaptError, Result};
use crate::knob::{KnobRange, ResolvedKnob};
use crate::space::ConfigSpace;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Comparison {
    AtMost,
    AtLeast,
    Equal,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::AtMost => "<=",
            Self::AtLeast => ">=",
            Self::Equal => "==",
        }
    }

    pub fn holds(self, value: f64, bound: f64, tolerance: f64) -> bool {
        match self {
            Self::AtMost => value <= bound + tolerance,
            Self::AtLeast => value >= bound - tolerance,
            Self::Equal => (value - bound).abs() <= tolerance,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Maximize => "MAXIMIZE",
            Self::Minimize => "MINIMIZE",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Bound {
    pub value: f64,
    pub comparison: Comparison,
}

// --- OBJECTIVE ---
// MAPS THE MEASURE VECTOR (DECLARED ORDER) TO A SCALAR COST/VALUE.
// EVERY VARIANT NAMES THE MEASURES IT READS SO THE INTENT CAN CHECK THEM.

pub type ObjectiveFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

#[derive(Clone)]
pub enum Objective {
    Measure(String),
    Weighted(Vec<(String, f64)>),
    Custom { terms: Vec<String>, f: ObjectiveFn },
}

impl Objective {
    pub fn measure(name: &str) -> Self {
        Self::Measure(name.to_string())
    }

    pub fn weighted(terms: &[(&str, f64)]) -> Self {
        Self::Weighted(terms.iter().map(|(n, w)| (n.to_string(), *w)).collect())
    }

    // `terms` ARE THE MEASURES `f` READS; `f` STILL RECEIVES THE FULL VECTOR
    pub fn custom<F>(terms: &[&str], f: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self::Custom {
            terms: terms.iter().map(|t| t.to_string()).collect(),
            f: Arc::new(f),
        }
    }

    pub fn terms(&self) -> Vec<&str> {
        match self {
            Self::Measure(n) => vec![n.as_str()],
            Self::Weighted(ts) => ts.iter().map(|(n, _)| n.as_str()).collect(),
            Self::Custom { terms, .. } => terms.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Debug for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measure(n) => write!(f, "Measure({})", n),
            Self::Weighted(ts) => write!(f, "Weighted({:?})", ts),
            Self::Custom { terms, .. } => write!(f, "Custom({:?})", terms),
        }
    }
}

// OBJECTIVE WITH MEASURE NAMES RESOLVED TO POSITIONS
#[derive(Clone)]
enum CompiledObjective {
    Linear(Vec<(usize, f64)>),
    Custom(ObjectiveFn),
}

// --- CONSTRAINT PARTITION ---

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstraintSet {
    pub at_most: Vec<(String, f64)>,
    pub at_least: Vec<(String, f64)>,
    pub equal: Vec<(String, f64)>,
}

impl ConstraintSet {
    pub fn len(&self) -> usize {
        self.at_most.len() + self.at_least.len() + self.equal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- INTENT ---

#[derive(Clone)]
pub struct Intent {
    name: String,
    ranges: BTreeMap<String, KnobRange>,
    resolved: BTreeMap<String, ResolvedKnob>,
    quantize_levels: usize,
    measures: Vec<String>,
    constraints: BTreeMap<String, Bound>,
    objective: Objective,
    compiled: CompiledObjective,
    direction: Direction,
    objective_source: Option<String>,
    knob_constraints_source: Option<String>,
}

impl Intent {
    pub fn builder(name: &str) -> IntentBuilder {
        IntentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ranges(&self) -> &BTreeMap<String, KnobRange> {
        &self.ranges
    }

    pub fn resolved_knobs(&self) -> &BTreeMap<String, ResolvedKnob> {
        &self.resolved
    }

    pub fn quantize_levels(&self) -> usize {
        self.quantize_levels
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn has_measure(&self, name: &str) -> bool {
        self.measures.iter().any(|m| m == name)
    }

    pub fn measure_index(&self, name: &str) -> Option<usize> {
        self.measures.iter().position(|m| m == name)
    }

    pub fn constraints(&self) -> &BTreeMap<String, Bound> {
        &self.constraints
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn objective_source(&self) -> Option<&str> {
        self.objective_source.as_deref()
    }

    pub fn knob_constraints_source(&self) -> Option<&str> {
        self.knob_constraints_source.as_deref()
    }

    // RE-RESOLVE EVERY RANGE FROM ITS RAW FORM. CALLING TWICE WITH DIFFERENT
    // LEVELS YIELDS EXACTLY WHAT ONE CALL WITH THE SECOND LEVEL WOULD.
    pub fn quantize(&mut self, levels: usize) -> Result<()> {
        self.resolved = resolve(&self.ranges, levels)?;
        self.quantize_levels = levels;
        Ok(())
    }

    pub fn resolved_domain(&self, max_size: usize) -> Result<ConfigSpace> {
        ConfigSpace::build(&self.resolved, max_size)
    }

    pub fn partition_constraints(&self) -> ConstraintSet {
        let mut set = ConstraintSet::default();
        for (measure, bound) in &self.constraints {
            let entry = (measure.clone(), bound.value);
            match bound.comparison {
                Comparison::AtMost => set.at_most.push(entry),
                Comparison::AtLeast => set.at_least.push(entry),
                Comparison::Equal => set.equal.push(entry),
            }
        }
        set
    }

    // COST OR VALUE OF A MEASURE VECTOR IN DECLARED MEASURE ORDER.
    // DIRECTION IS NOT APPLIED HERE; THE SCHEDULER OWNS THE SIGN.
    pub fn cost_or_value(&self, measures: &[f64]) -> f64 {
        match &self.compiled {
            CompiledObjective::Linear(terms) => {
                terms.iter().map(|&(i, w)| w * measures[i]).sum()
            }
            CompiledObjective::Custom(f) => f(measures),
        }
    }
}

impl fmt::Debug for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intent")
            .field("name", &self.name)
            .field("ranges", &self.ranges)
            .field("measures", &self.measures)
            .field("constraints", &self.constraints)
            .field("objective", &self.objective)
            .field("direction", &self.direction)
            .finish()
    }
}

fn resolve(
    ranges: &BTreeMap<String, KnobRange>,
    levels: usize,
) -> Result<BTreeMap<String, ResolvedKnob>> {
    ranges
        .iter()
        .map(|(name, range)| Ok((name.clone(), range.quantize(name, levels)?)))
        .collect()
}

fn compile(objective: &Objective, measures: &[String]) -> Result<CompiledObjective> {
    let position = |name: &str| -> Result<usize> {
        measures
            .iter()
            .position(|m| m == name)
            .ok_or_else(|| AdaptError::UnknownMeasure(name.to_string()))
    };
    match objective {
        Objective::Measure(n) => Ok(CompiledObjective::Linear(vec![(position(n)?, 1.0)])),
        Objective::Weighted(ts) => {
            let terms = ts
                .iter()
                .map(|(n, w)| Ok((position(n)?, *w)))
                .collect::<Result<Vec<_>>>()?;
            Ok(CompiledObjective::Linear(terms))
        }
        Objective::Custom { terms, f } => {
            for t in terms {
                position(t)?;
            }
            Ok(CompiledObjective::Custom(Arc::clone(f)))
        }
    }
}

// --- BUILDER ---
// STANDS IN FOR THE INTENT COMPILER: WHATEVER PARSES THE TEXT ENDS HERE.

pub struct IntentBuilder {
    name: String,
    ranges: BTreeMap<String, KnobRange>,
    measures: Vec<String>,
    constraints: Vec<(String, Bound)>,
    objective: Option<Objective>,
    direction: Direction,
    quantize_levels: usize,
    objective_source: Option<String>,
    knob_constraints_source: Option<String>,
}

impl IntentBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ranges: BTreeMap::new(),
            measures: Vec::new(),
            constraints: Vec::new(),
            objective: None,
            direction: Direction::Maximize,
            quantize_levels: DEFAULT_QUANTIZE_LEVELS,
            objective_source: None,
            knob_constraints_source: None,
        }
    }

    pub fn knob(mut self, name: &str, range: KnobRange) -> Self {
        self.ranges.insert(name.to_string(), range);
        self
    }

    pub fn measure(mut self, name: &str) -> Self {
        self.measures.push(name.to_string());
        self
    }

    pub fn constraint(mut self, measure: &str, comparison: Comparison, bound: f64) -> Self {
        self.constraints.push((measure.to_string(), Bound { value: bound, comparison }));
        self
    }

    pub fn objective(mut self, objective: Objective) -> Self {
        self.objective = Some(objective);
        self
    }

    pub fn maximize(mut self) -> Self {
        self.direction = Direction::Maximize;
        self
    }

    pub fn minimize(mut self) -> Self {
        self.direction = Direction::Minimize;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn quantize_levels(mut self, levels: usize) -> Self {
        self.quantize_levels = levels;
        self
    }

    pub fn objective_source(mut self, source: &str) -> Self {
        self.objective_source = Some(source.to_string());
        self
    }

    pub fn knob_constraints_source(mut self, source: &str) -> Self {
        self.knob_constraints_source = Some(source.to_string());
        self
    }

    pub fn build(self) -> Result<Intent> {
        if self.measures.is_empty() {
            return Err(AdaptError::InvalidConfig(format!(
                "intent `{}` declares no measures",
                self.name
            )));
        }
        for (i, m) in self.measures.iter().enumerate() {
            if self.measures[..i].contains(m) {
                return Err(AdaptError::InvalidConfig(format!("measure `{}` declared twice", m)));
            }
        }

        let mut constraints = BTreeMap::new();
        for (measure, bound) in self.constraints {
            if !self.measures.contains(&measure) {
                return Err(AdaptError::UnknownMeasure(measure));
            }
            if !bound.value.is_finite() {
                return Err(AdaptError::InvalidConfig(format!(
                    "constraint on `{}` has non-finite bound",
                    measure
                )));
            }
            if constraints.insert(measure.clone(), bound).is_some() {
                return Err(AdaptError::InvalidConfig(format!(
                    "measure `{}` constrained twice",
                    measure
                )));
            }
        }

        // NO OBJECTIVE GIVEN: OPTIMIZE THE FIRST DECLARED MEASURE
        let objective = self
            .objective
            .unwrap_or_else(|| Objective::Measure(self.measures[0].clone()));
        let compiled = compile(&objective, &self.measures)?;
        let resolved = resolve(&self.ranges, self.quantize_levels)?;

        Ok(Intent {
            name: self.name,
            ranges: self.ranges,
            resolved,
            quantize_levels: self.quantize_levels,
            measures: self.measures,
            constraints,
            objective,
            compiled,
            direction: self.direction,
            objective_source: self.objective_source,
            knob_constraints_source: self.knob_constraints_source,
        })
    }
}
