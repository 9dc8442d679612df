// ADAPT SOLVER CAPABILITY
// THE SCHEDULER HANDS A FULLY TABULATED PROBLEM TO A SOLVER AND GETS BACK A
// WINDOW OF CONFIGURATION INDICES. SOLVERS ALWAYS MAXIMIZE; MINIMIZATION IS
// THE SCHEDULER'S JOB (IT NEGATES THE OBJECTIVE BEFORE SUBMITTING).
//
// TimeShareSolver IS THE IN-TREE IMPLEMENTATION:
//   1. BEST SINGLE FEASIBLE POINT, REPEATED FOR THE WHOLE WINDOW
//   2. NO SINGLE POINT FEASIBLE: BEST TWO-POINT MIX WITH INTEGER SLOT SPLIT,
//      CONSTRAINTS HOLDING ON THE WINDOW AVERAGE
//   3. NOTHING FEASIBLE: PlanningError::Infeasible

use crate::error::PlanningError;

// ABSOLUTE SLACK FOR <= / >= ROWS, RELATIVE FOR == ROWS
const FEASIBILITY_TOLERANCE: f64 = 1e-9;

// PAIR SEARCH IS O(N^2 * WINDOW); SKIP IT ON LARGER SPACES
pub const PAIR_SEARCH_LIMIT: usize = 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct LinearRow {
    pub label: String,
    // ONE COEFFICIENT PER DOMAIN INDEX
    pub coefficients: Vec<f64>,
    pub bound: f64,
}

impl LinearRow {
    pub fn new(label: &str, coefficients: Vec<f64>, bound: f64) -> Self {
        Self {
            label: label.to_string(),
            coefficients,
            bound,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlanProblem {
    // MAXIMIZE-MODE OBJECTIVE, TABULATED OVER THE DOMAIN
    pub objective: Vec<f64>,
    pub domain: Vec<usize>,
    pub at_most: Vec<LinearRow>,
    pub at_least: Vec<LinearRow>,
    pub equal: Vec<LinearRow>,
    pub window: usize,
}

impl PlanProblem {
    pub fn rows(&self) -> impl Iterator<Item = &LinearRow> {
        self.at_most.iter().chain(&self.at_least).chain(&self.equal)
    }

    fn check_shape(&self) -> Result<(), PlanningError> {
        if self.domain.is_empty() {
            return Err(PlanningError::EmptyDomain);
        }
        if self.window == 0 {
            return Err(PlanningError::Solver("window must be > 0".into()));
        }
        let n = self.domain.len();
        if self.objective.len() != n {
            return Err(PlanningError::Solver(format!(
                "objective has {} entries for a domain of {}",
                self.objective.len(),
                n
            )));
        }
        for row in self.rows() {
            if row.coefficients.len() != n {
                return Err(PlanningError::Solver(format!(
                    "row `{}` has {} coefficients for a domain of {}",
                    row.label,
                    row.coefficients.len(),
                    n
                )));
            }
        }
        Ok(())
    }

    // DO THE ROWS HOLD FOR A MIX: WEIGHT `a` ON POSITION i, `1 - a` ON POSITION j
    fn mix_feasible(&self, i: usize, j: usize, a: f64) -> bool {
        let value = |row: &LinearRow| a * row.coefficients[i] + (1.0 - a) * row.coefficients[j];
        self.at_most
            .iter()
            .all(|r| value(r) <= r.bound + FEASIBILITY_TOLERANCE)
            && self
                .at_least
                .iter()
                .all(|r| value(r) >= r.bound - FEASIBILITY_TOLERANCE)
            && self.equal.iter().all(|r| {
                (value(r) - r.bound).abs() <= FEASIBILITY_TOLERANCE * r.bound.abs().max(1.0)
            })
    }
}

pub trait Solver: Send + Sync {
    // RETURNS EXACTLY `problem.window` INDICES, EACH A MEMBER OF `problem.domain`
    fn solve(&self, problem: &PlanProblem) -> Result<Vec<usize>, PlanningError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TimeShareSolver;

impl TimeShareSolver {
    fn best_point(problem: &PlanProblem) -> Option<usize> {
        let mut best: Option<usize> = None;
        for pos in 0..problem.domain.len() {
            if !problem.mix_feasible(pos, pos, 1.0) {
                continue;
            }
            match best {
                Some(b) if problem.objective[pos] <= problem.objective[b] => {}
                _ => best = Some(pos),
            }
        }
        best
    }

    // RETURNS (i, j, SLOTS FOR i)
    fn best_pair(problem: &PlanProblem) -> Option<(usize, usize, usize)> {
        let n = problem.domain.len();
        let w = problem.window;
        let mut best: Option<((usize, usize, usize), f64)> = None;
        for i in 0..n {
            for j in (i + 1)..n {
                for k in 1..w {
                    let a = k as f64 / w as f64;
                    if !problem.mix_feasible(i, j, a) {
                        continue;
                    }
                    let value = a * problem.objective[i] + (1.0 - a) * problem.objective[j];
                    match best {
                        Some((_, v)) if value <= v => {}
                        _ => best = Some(((i, j, k), value)),
                    }
                }
            }
        }
        best.map(|(p, _)| p)
    }

    // SPREAD k SLOTS OF i EVENLY THROUGH THE WINDOW, j FILLS THE REST
    fn interleave(i: usize, j: usize, k: usize, window: usize) -> Vec<usize> {
        (0..window)
            .map(|s| {
                if (s + 1) * k / window > s * k / window { i } else { j }
            })
            .collect()
    }
}

impl Solver for TimeShareSolver {
    fn solve(&self, problem: &PlanProblem) -> Result<Vec<usize>, PlanningError> {
        problem.check_shape()?;
        let w = problem.window;

        if let Some(pos) = Self::best_point(problem) {
            return Ok(vec![problem.domain[pos]; w]);
        }

        if problem.domain.len() <= PAIR_SEARCH_LIMIT {
            if let Some((i, j, k)) = Self::best_pair(problem) {
                return Ok(Self::interleave(problem.domain[i], problem.domain[j], k, w));
            }
        }

        Err(PlanningError::Infeasible)
    }
}
