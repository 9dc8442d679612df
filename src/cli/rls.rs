// RECURSIVE LEAST SQUARES UNDER CONTROL
// IDENTIFIES AN UNKNOWN FIR FILTER FROM A NOISY STREAM. THREE KNOBS TRADE
// ACCURACY FOR TIME:
//   filter_size        TAPS IN THE ESTIMATE (FEWER = FASTER, WORSE FIT)
//   forgetting_factor  EXPONENTIAL WEIGHT ON OLD SAMPLES
//   successive         0 = FULL RE-SOLVE (MATRIX INVERSE), 1 = RANK-ONE UPDATE
// MEASURES: latency (FILLED BY THE WRAPPER), residual (WEIGHTED SQUARED ERROR
// OVER THE LAST RESIDUAL_SPAN SAMPLES). CONSTRAINT: residual <= BOUND.
// OBJECTIVE: MINIMIZE latency.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rand::prelude::*;

use adapt::linalg::Matrix;
use adapt::{
    AdaptConfig, Comparison, Configuration, ControllableFunction, Intent, KnobRange, Measured,
    Objective, TimeShareSolver, LATENCY_MEASURE,
};

// GROUND-TRUTH FILTER THE STREAM IS GENERATED WITH
const TRUE_TAPS: [f64; 7] = [0.5, -0.3, 0.2, 0.1, -0.05, 0.03, 0.01];

const RESIDUAL_SPAN: usize = 7;

pub const RESIDUAL_MEASURE: &str = "residual";

// FULL RE-SOLVE WITH TOO FEW SAMPLES IS SINGULAR: START FROM delta * I
const SINGULAR_FALLBACK_DELTA: f64 = 1e3;

pub struct RlsArgs {
    pub iterations: u64,
    pub history: usize,
    pub max_residual: f64,
    pub noise: f64,
    pub seed: u64,
    pub profile_runs: usize,
    pub report_every: u64,
    pub dump_log: bool,
    pub config: AdaptConfig,
}

#[derive(Clone, Debug)]
pub struct FilterState {
    pub w: Vec<f64>,
    pub p: Matrix,
}

// SLIDING WINDOW OF THE STREAM PLUS THE LAST ESTIMATE FOR EACH FILTER SIZE
#[derive(Clone, Debug, Default)]
pub struct RlsInput {
    pub x: Vec<f64>,
    pub d: Vec<f64>,
    pub states: BTreeMap<usize, FilterState>,
}

#[derive(Clone, Debug)]
pub struct RlsOutput {
    pub size: usize,
    pub state: FilterState,
}

pub fn demo_intent(max_residual: f64, levels: usize) -> adapt::Result<Intent> {
    Intent::builder("rls")
        .knob("filter_size", KnobRange::list([3i64, 5, 7], 7i64))
        .knob("forgetting_factor", KnobRange::interval(0.9, 1.0, 0.99))
        .knob("successive", KnobRange::list([0i64, 1], 0i64))
        .measure(LATENCY_MEASURE)
        .measure(RESIDUAL_MEASURE)
        .constraint(RESIDUAL_MEASURE, Comparison::AtMost, max_residual)
        .objective(Objective::measure(LATENCY_MEASURE))
        .minimize()
        .quantize_levels(levels)
        .build()
}

// x[k] WITH NEGATIVE k READ AS "BEFORE THE WINDOW"
fn sample(x: &[f64], k: isize) -> Option<f64> {
    usize::try_from(k).ok().and_then(|k| x.get(k).copied())
}

// SOLVE THE WEIGHTED NORMAL EQUATIONS FROM SCRATCH
pub fn full_solve(x: &[f64], d: &[f64], size: usize, lambda: f64) -> FilterState {
    let n = x.len();
    let mut r = Matrix::zeros(size);
    let mut q = vec![0.0; size];
    for k in 0..n {
        let weight = lambda.powi((n - 1 - k) as i32);
        let base = k as isize - size as isize + 1;
        for i in 0..size {
            let Some(xi) = sample(x, base + i as isize) else {
                continue;
            };
            for j in 0..size {
                if let Some(xj) = sample(x, base + j as isize) {
                    r[(i, j)] += weight * xi * xj;
                }
            }
            q[i] += weight * xi * d[k];
        }
    }
    let p = r.inverse().unwrap_or_else(|| {
        let mut p = Matrix::identity(size);
        for i in 0..size {
            p[(i, i)] = SINGULAR_FALLBACK_DELTA;
        }
        p
    });
    let w = p.mul_vec(&q);
    FilterState { w, p }
}

// RANK-ONE UPDATE FROM THE PREVIOUS ESTIMATE WITH THE NEWEST SAMPLE
pub fn successive_update(x: &[f64], d: &[f64], prev: &FilterState, lambda: f64) -> FilterState {
    let size = prev.w.len();
    let n = x.len();
    let u = &x[n - size..];
    let e = d[n - 1] - u.iter().zip(&prev.w).map(|(a, b)| a * b).sum::<f64>();
    let px = prev.p.mul_vec(u);
    let s = lambda + u.iter().zip(&px).map(|(a, b)| a * b).sum::<f64>();
    let gain: Vec<f64> = px.iter().map(|v| v / s).collect();

    let mut p = Matrix::zeros(size);
    for i in 0..size {
        for j in 0..size {
            p[(i, j)] = (prev.p[(i, j)] - gain[i] * px[j]) / lambda;
        }
    }
    let w = prev.w.iter().zip(&gain).map(|(wi, ki)| wi + ki * e).collect();
    FilterState { w, p }
}

// EXPONENTIALLY WEIGHTED SQUARED ERROR OVER THE NEWEST RESIDUAL_SPAN SAMPLES
pub fn residual(x: &[f64], d: &[f64], w: &[f64], lambda: f64) -> f64 {
    let n = x.len() as isize;
    let size = w.len() as isize;
    let mut sum = 0.0;
    for j in 0..RESIDUAL_SPAN.min(x.len()) as isize {
        let mut re = d[(n - 1 - j) as usize];
        for (i, wi) in w.iter().enumerate() {
            if let Some(xi) = sample(x, n - size + i as isize - j) {
                re -= xi * wi;
            }
        }
        sum += re * re * lambda.powi(j as i32);
    }
    sum
}

pub fn rls_body(input: &RlsInput, config: &Configuration) -> (RlsOutput, Measured) {
    let size = config["filter_size"].int() as usize;
    let lambda = config["forgetting_factor"].real();
    let successive = config["successive"].int() != 0;

    // RANK-ONE PATH NEEDS A PREVIOUS ESTIMATE OF THE SAME SIZE
    let state = match input.states.get(&size) {
        Some(prev) if successive => successive_update(&input.x, &input.d, prev, lambda),
        _ => full_solve(&input.x, &input.d, size, lambda),
    };
    let re = residual(&input.x, &input.d, &state.w, lambda);
    (
        RlsOutput { size, state },
        HashMap::from([(RESIDUAL_MEASURE.to_string(), re)]),
    )
}

struct Stream {
    rng: StdRng,
    noise: f64,
    raw: Vec<f64>,
}

impl Stream {
    fn new(seed: u64, noise: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            noise,
            raw: Vec::new(),
        }
    }

    // NEXT (INPUT, DESIRED OUTPUT) PAIR
    fn next(&mut self) -> (f64, f64) {
        let x = self.rng.gen_range(-1.0..1.0);
        self.raw.push(x);
        if self.raw.len() > TRUE_TAPS.len() {
            self.raw.remove(0);
        }
        let clean: f64 = self
            .raw
            .iter()
            .rev()
            .zip(TRUE_TAPS.iter())
            .map(|(x, h)| x * h)
            .sum();
        let noise = self.rng.gen_range(-1.0..1.0) * self.noise;
        (x, clean + noise)
    }
}

fn push_window(input: &mut RlsInput, (x, d): (f64, f64), history: usize) {
    input.x.push(x);
    input.d.push(d);
    if input.x.len() > history {
        input.x.remove(0);
        input.d.remove(0);
    }
}

pub fn run_rls(args: &RlsArgs, shutdown: &AtomicBool) -> Result<()> {
    let intent = demo_intent(args.max_residual, args.config.quantize_levels)?;
    let history = args.history.max(TRUE_TAPS.len() + RESIDUAL_SPAN);

    let mut stream = Stream::new(args.seed, args.noise);
    let mut input = RlsInput::default();
    for _ in 0..history {
        push_window(&mut input, stream.next(), history);
    }
    // PROFILING INPUT CARRIES A FULL-SOLVE ESTIMATE FOR EVERY SIZE SO THE
    // RANK-ONE CONFIGURATIONS ARE PROFILED ON THEIR OWN PATH
    for size in [3usize, 5, 7] {
        input.states.insert(size, full_solve(&input.x, &input.d, size, 1.0));
    }

    let mut f = ControllableFunction::new(
        "rls",
        intent,
        args.config.clone(),
        Arc::new(TimeShareSolver),
        rls_body,
    )?;

    println!("ADAPT RLS DEMO");
    println!("CONFIGURATIONS:  {}", f.space().len());
    println!("WINDOW:          {}", args.config.window);
    println!("BANDWIDTH:       {}s", args.config.bandwidth);
    println!("MAX RESIDUAL:    {}", args.max_residual);
    println!("ITERATIONS:      {}", args.iterations);
    println!("SEED:            {}", args.seed);
    println!();

    f.exhaustive_profiling(&input, args.profile_runs)?;
    println!("PROFILED {} CONFIGURATIONS ({} RUNS EACH)", f.space().len(), args.profile_runs);

    let mut done = 0u64;
    let mut served: BTreeMap<usize, u64> = BTreeMap::new();
    while done < args.iterations {
        if shutdown.load(Ordering::Relaxed) {
            println!("INTERRUPTED AFTER {} ITERATIONS", done);
            break;
        }
        push_window(&mut input, stream.next(), history);
        let out = f.execute(&input)?;
        *served.entry(out.size).or_insert(0) += 1;
        input.states.insert(out.size, out.state);
        done += 1;

        if args.report_every > 0 && done % args.report_every == 0 {
            let cursor = f.scheduler().cursor();
            let index = f.scheduler().schedule().get(cursor.saturating_sub(1)).copied();
            if let Some(index) = index {
                println!(
                    "[{:>6}] CONFIG {:<4} {}  OVERLOAD latency={:.3} residual={:.3}",
                    done,
                    index,
                    f.space()[index],
                    f.predictor().overload(0),
                    f.predictor().overload(1),
                );
            }
        }
    }

    println!();
    println!(
        "RLS DONE: {} CALLS, {} PLANS, {} FALLBACKS, PHASE {}",
        done,
        f.scheduler().plans(),
        f.scheduler().fallbacks(),
        f.scheduler().phase().label()
    );
    for (size, n) in &served {
        println!("  FILTER SIZE {:<3} {} CALLS", size, n);
    }
    if let Some(state) = input.states.get(&7) {
        let err: f64 = state
            .w
            .iter()
            .rev()
            .zip(TRUE_TAPS.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        println!("  7-TAP ESTIMATE MAX |ERROR|: {:.4}", err);
    }

    if args.dump_log {
        f.history().dump();
    }
    f.history().summary();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noiseless(n: usize) -> RlsInput {
        let mut stream = Stream::new(7, 0.0);
        let mut input = RlsInput::default();
        for _ in 0..n {
            push_window(&mut input, stream.next(), n);
        }
        input
    }

    #[test]
    fn full_solve_recovers_true_taps() {
        let input = noiseless(64);
        let state = full_solve(&input.x, &input.d, 7, 1.0);
        // REGRESSOR IS OLDEST-FIRST, TAPS ARE NEWEST-FIRST
        for (w, h) in state.w.iter().rev().zip(TRUE_TAPS.iter()) {
            assert!((w - h).abs() < 1e-6, "tap {} vs {}", w, h);
        }
        assert!(residual(&input.x, &input.d, &state.w, 1.0) < 1e-10);
    }

    #[test]
    fn short_filter_leaves_residual() {
        let input = noiseless(64);
        let state = full_solve(&input.x, &input.d, 3, 1.0);
        assert!(residual(&input.x, &input.d, &state.w, 1.0) > 1e-4);
    }

    #[test]
    fn successive_tracks_full_solve() {
        let mut input = noiseless(64);
        let mut state = full_solve(&input.x, &input.d, 7, 1.0);
        let mut stream = Stream::new(99, 0.0);
        // KEEP THE TRUE HISTORY CONSISTENT: CONTINUE THE SAME GENERATOR
        stream.raw = input.x[input.x.len() - TRUE_TAPS.len()..].to_vec();
        for _ in 0..10 {
            push_window(&mut input, stream.next(), 128);
            state = successive_update(&input.x, &input.d, &state, 1.0);
        }
        for (w, h) in state.w.iter().rev().zip(TRUE_TAPS.iter()) {
            assert!((w - h).abs() < 1e-4, "tap {} vs {}", w, h);
        }
    }

    #[test]
    fn body_falls_back_to_full_solve_without_state() {
        let input = noiseless(32);
        let config = Configuration::new([
            ("filter_size".to_string(), adapt::KnobValue::Integer(5)),
            ("forgetting_factor".to_string(), adapt::KnobValue::Real(1.0)),
            ("successive".to_string(), adapt::KnobValue::Integer(1)),
        ]);
        let (out, measured) = rls_body(&input, &config);
        assert_eq!(out.size, 5);
        assert_eq!(out.state.w.len(), 5);
        assert!(measured.contains_key(RESIDUAL_MEASURE));
    }

    #[test]
    fn demo_intent_space() {
        let intent = demo_intent(1.0, 4).unwrap();
        // 3 SIZES x (4 SAMPLES + OFF-GRID 0.99) x 2 MODES
        assert_eq!(intent.resolved_domain(1000).unwrap().len(), 3 * 5 * 2);
    }
}
