// ADAPT ONLINE PREDICTOR
// DECAYING-WINDOW RATIO ESTIMATOR OVER THE WHOLE CONFIGURATION SPACE.
//
// MODEL: m(x, t) ~ m0(x) * o(t)
//   m0(x): PER-CONFIGURATION BASELINE, SET BY EXHAUSTIVE PROFILING
//   o(t):  ONE SHARED OVERLOAD FACTOR PER MEASURE, KERNEL-SMOOTHED OVER TIME
//     o(t) = SUM_i (m_i / m0(x_i)) * K(t - t_i) / SUM_i K(t - t_i)
//     K(d) = exp(-d / bandwidth)
//
// O(1) PER OBSERVATION, INDEPENDENT OF DOMAIN SIZE. THE RELATIVE SHAPE OF
// MEASURE-VS-CONFIGURATION IS ASSUMED STABLE; ONLY ITS SCALE DRIFTS.
//
// CONFIGURATIONS AND MEASURES ARE ADDRESSED BY INDEX. AN INDEX OUTSIDE THE
// SPACE OR A MEASURE VECTOR OF THE WRONG WIDTH IS A CALLER BUG AND PANICS.

use tracing::{debug, warn, Span};

// BASELINES OF ZERO WOULD DIVIDE BY ZERO IN EVERY LATER UPDATE
const BASELINE_FLOOR: f64 = 1e-9;

pub trait Predictor {
    fn update(&mut self, config: usize, measured: &[f64], t: f64);
    fn predict(&self, config: usize) -> Vec<f64>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Accumulator {
    numerator: f64,
    denominator: f64,
    overload: f64,
}

impl Accumulator {
    // UNIT PRIOR: ONE PSEUDO-SAMPLE AT RATIO 1.0, SO o STARTS AT 1.0
    const PRIOR: Self = Self {
        numerator: 1.0,
        denominator: 1.0,
        overload: 1.0,
    };

    // DECAY BOTH SUMS FIRST, THEN ADD THE NEW SAMPLE TO EACH.
    // RETURNS THE NEXT STATE; THE CALLER COMMITS IT.
    fn absorb(self, decay: f64, ratio: f64) -> Self {
        let numerator = self.numerator * decay + ratio;
        let denominator = self.denominator * decay + 1.0;
        Self {
            numerator,
            denominator,
            overload: numerator / denominator,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PredictorSnapshot {
    pub baseline: Vec<Vec<f64>>,
    pub overload: Vec<f64>,
    pub last_sample_time: f64,
}

pub struct OverloadPredictor {
    measures: Vec<String>,
    // FLAT [config][measure]
    baseline: Vec<f64>,
    accumulators: Vec<Accumulator>,
    last_sample_time: f64,
    bandwidth: f64,
    samples: u64,
    span: Span,
}

impl OverloadPredictor {
    pub fn new(space_len: usize, measures: &[String], bandwidth: f64, start_time: f64, span: Span) -> Self {
        assert!(bandwidth > 0.0, "bandwidth must be positive, got {}", bandwidth);
        debug!(parent: &span, configs = space_len, measures = measures.len(), bandwidth, "predictor created");
        Self {
            measures: measures.to_vec(),
            baseline: vec![1.0; space_len * measures.len()],
            accumulators: vec![Accumulator::PRIOR; measures.len()],
            last_sample_time: start_time,
            bandwidth,
            samples: 0,
            span,
        }
    }

    pub fn space_len(&self) -> usize {
        if self.measures.is_empty() {
            0
        } else {
            self.baseline.len() / self.measures.len()
        }
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn last_sample_time(&self) -> f64 {
        self.last_sample_time
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn overload(&self, measure: usize) -> f64 {
        self.accumulators[measure].overload
    }

    pub fn baseline(&self, config: usize) -> &[f64] {
        let row = self.row(config);
        &self.baseline[row]
    }

    // BOOTSTRAP: SET m0 DIRECTLY, BYPASSING THE DECAY MACHINERY
    pub fn initialize(&mut self, config: usize, measured: &[f64], t: f64) {
        self.check_width(measured);
        let row = self.row(config);
        let span = &self.span;
        let names = &self.measures;
        for (q, (slot, &value)) in self.baseline[row].iter_mut().zip(measured).enumerate() {
            *slot = if value.is_finite() && value.abs() >= BASELINE_FLOOR {
                value
            } else {
                warn!(
                    parent: span,
                    config,
                    measure = %names[q],
                    value,
                    "baseline not usable as a divisor, flooring"
                );
                BASELINE_FLOOR
            };
        }
        self.last_sample_time = t;
        debug!(parent: &self.span, config, ?measured, "baseline initialized");
    }

    // PREDICTED VALUE OF ONE MEASURE AT ONE CONFIGURATION
    pub fn predict_measure(&self, config: usize, measure: usize) -> f64 {
        let n = self.measures.len();
        assert!(measure < n, "measure index {} out of range ({} measures)", measure, n);
        self.baseline[self.row(config)][measure] * self.accumulators[measure].overload
    }

    // IN-MEMORY ONLY. NO FILE FORMAT FOR LEARNED STATISTICS.
    pub fn snapshot(&self) -> PredictorSnapshot {
        let n = self.measures.len().max(1);
        PredictorSnapshot {
            baseline: self.baseline.chunks(n).map(<[f64]>::to_vec).collect(),
            overload: self.accumulators.iter().map(|a| a.overload).collect(),
            last_sample_time: self.last_sample_time,
        }
    }

    fn row(&self, config: usize) -> std::ops::Range<usize> {
        let n = self.measures.len();
        let len = self.space_len();
        assert!(config < len, "configuration index {} out of range (space has {})", config, len);
        config * n..(config + 1) * n
    }

    fn check_width(&self, measured: &[f64]) {
        assert_eq!(
            measured.len(),
            self.measures.len(),
            "measure vector has {} values, intent declares {}",
            measured.len(),
            self.measures.len()
        );
    }
}

impl Predictor for OverloadPredictor {
    fn update(&mut self, config: usize, measured: &[f64], t: f64) {
        self.check_width(measured);
        let row = self.row(config);

        // A NaN OR INF RATIO WOULD NEVER DECAY OUT OF THE NUMERATOR
        if let Some(q) = measured.iter().position(|m| !m.is_finite()) {
            warn!(
                parent: &self.span,
                config,
                measure = %self.measures[q],
                value = measured[q],
                "non-finite sample dropped"
            );
            return;
        }

        // OUT-OF-ORDER SAMPLES COUNT AS SIMULTANEOUS: NEVER AMPLIFY HISTORY
        let decay = ((self.last_sample_time - t) / self.bandwidth).exp().min(1.0);

        // COMPUTE EVERYTHING INTO LOCALS, COMMIT IN ONE STEP
        let next: Vec<Accumulator> = self
            .accumulators
            .iter()
            .zip(&self.baseline[row])
            .zip(measured)
            .map(|((acc, &m0), &m)| acc.absorb(decay, m / m0))
            .collect();

        self.accumulators = next;
        self.last_sample_time = t;
        self.samples += 1;

        debug!(
            parent: &self.span,
            config,
            decay,
            overload = ?self.accumulators.iter().map(|a| a.overload).collect::<Vec<_>>(),
            "statistics updated"
        );
    }

    fn predict(&self, config: usize) -> Vec<f64> {
        self.baseline[self.row(config)]
            .iter()
            .zip(&self.accumulators)
            .map(|(&m0, acc)| m0 * acc.overload)
            .collect()
    }
}
