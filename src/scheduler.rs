// ADAPT SCHEDULER
// TURNS PREDICTIONS + INTENT INTO A WINDOW OF CONFIGURATIONS, SERVES IT ONE
// CALL AT A TIME, RE-PLANS LAZILY ON THE REQUEST AFTER THE WINDOW RUNS OUT.
//
//   IDLE --next--> PLANNING --ok--> SERVING --last slot--> EXHAUSTED
//                     ^                                        |
//                     +-----------------next-------------------+
//
// PLANNING TABULATES, FOR EVERY CONFIGURATION INDEX:
//   ONE ROW PER <= / >= / == CONSTRAINT (COEFFICIENT = PREDICTED MEASURE)
//   ONE SYNTHETIC == ROW OF ALL ONES, BOUND 1 (SELECT EXACTLY ONE POINT)
//   OBJECTIVE = cost_or_value(PREDICTION), NEGATED WHEN MINIMIZING
// THE SOLVER ALWAYS MAXIMIZES. THE SYNTHETIC ROW IS NEVER NEGATED.
//
// UPDATES ONLY FEED THE PREDICTOR. STALENESS IS TOLERATED FOR ONE WINDOW.
// THE SCHEDULER OWNS THE PREDICTOR: ONE &mut BORROW SERIALIZES
// next_configuration AND update_statistics, SO THE DECAY MATH NEVER INTERLEAVES.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn, Span};

use crate::config::AdaptConfig;
use crate::error::{AdaptError, PlanningError};
use crate::intent::{Direction, Intent};
use crate::predictor::{OverloadPredictor, Predictor};
use crate::solver::{LinearRow, PlanProblem, Solver};
use crate::space::ConfigSpace;

pub const SELECT_ONE_LABEL: &str = "select-one";

pub trait Controller {
    fn update_statistics(&mut self, config: usize, measured: &[f64], t: f64);
    fn next_configuration(&mut self) -> Result<usize, PlanningError>;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Idle,
    Serving,
    Exhausted,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Serving => "SERVING",
            Self::Exhausted => "EXHAUSTED",
        }
    }
}

// A SOLVE STILL RUNNING PAST ITS DEADLINE, AND THE PROBLEM IT WAS GIVEN
struct PendingSolve {
    problem: Arc<PlanProblem>,
    answer: mpsc::Receiver<Result<Vec<usize>, PlanningError>>,
}

// CONSTRAINT WITH ITS MEASURE RESOLVED TO A POSITION
#[derive(Clone, Debug)]
struct RowTemplate {
    label: String,
    measure: usize,
    bound: f64,
}

pub struct Scheduler {
    intent: Arc<Intent>,
    space: Arc<ConfigSpace>,
    predictor: OverloadPredictor,
    solver: Arc<dyn Solver>,
    at_most: Vec<RowTemplate>,
    at_least: Vec<RowTemplate>,
    equal: Vec<RowTemplate>,
    window: usize,
    solver_timeout: Option<Duration>,
    schedule: Vec<usize>,
    cursor: usize,
    phase: Phase,
    last_problem: Option<Arc<PlanProblem>>,
    pending: Option<PendingSolve>,
    plans: u64,
    fallbacks: u64,
    span: Span,
}

impl Scheduler {
    pub fn new(
        intent: Arc<Intent>,
        space: Arc<ConfigSpace>,
        predictor: OverloadPredictor,
        solver: Arc<dyn Solver>,
        config: &AdaptConfig,
        span: Span,
    ) -> Result<Self, AdaptError> {
        config.validate()?;
        assert_eq!(
            predictor.space_len(),
            space.len(),
            "predictor and scheduler disagree on the configuration space"
        );

        // SPLIT CONSTRAINTS BY KIND, KEEPING MEASURE -> BOUND PAIRS
        let partition = intent.partition_constraints();
        let resolve = |group: &[(String, f64)]| -> Result<Vec<RowTemplate>, AdaptError> {
            group
                .iter()
                .map(|(m, b)| {
                    let measure = intent
                        .measure_index(m)
                        .ok_or_else(|| AdaptError::UnknownMeasure(m.clone()))?;
                    Ok(RowTemplate { label: m.clone(), measure, bound: *b })
                })
                .collect()
        };
        let at_most = resolve(&partition.at_most)?;
        let at_least = resolve(&partition.at_least)?;
        let equal = resolve(&partition.equal)?;

        debug!(
            parent: &span,
            configs = space.len(),
            at_most = at_most.len(),
            at_least = at_least.len(),
            equal = equal.len(),
            window = config.window,
            direction = intent.direction().label(),
            "scheduler created"
        );

        Ok(Self {
            intent,
            space,
            predictor,
            solver,
            at_most,
            at_least,
            equal,
            window: config.window,
            solver_timeout: config.solver_timeout,
            schedule: Vec::new(),
            cursor: 0,
            phase: Phase::Idle,
            last_problem: None,
            pending: None,
            plans: 0,
            fallbacks: 0,
            span,
        })
    }

    pub fn intent(&self) -> &Arc<Intent> {
        &self.intent
    }

    pub fn space(&self) -> &Arc<ConfigSpace> {
        &self.space
    }

    pub fn predictor(&self) -> &OverloadPredictor {
        &self.predictor
    }

    pub fn predictor_mut(&mut self) -> &mut OverloadPredictor {
        &mut self.predictor
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn schedule(&self) -> &[usize] {
        &self.schedule
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn plans(&self) -> u64 {
        self.plans
    }

    // TIMES A TIMED-OUT SOLVE FELL BACK TO THE PREVIOUS SCHEDULE
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    // A TIMED-OUT SOLVE IS STILL RUNNING; THE NEXT PLAN WAITS ON IT
    pub fn solve_in_flight(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_problem(&self) -> Option<&PlanProblem> {
        self.last_problem.as_deref()
    }

    // FORCE A RE-PLAN ON THE NEXT REQUEST
    pub fn invalidate(&mut self) {
        if self.phase == Phase::Serving {
            self.phase = Phase::Exhausted;
        }
    }

    // SNAPSHOT THE PREDICTOR INTO A SOLVER PROBLEM
    pub fn build_problem(&self) -> PlanProblem {
        let n = self.space.len();
        let predicted: Vec<Vec<f64>> = (0..n).map(|i| self.predictor.predict(i)).collect();

        let objective = predicted
            .iter()
            .map(|m| {
                let v = self.intent.cost_or_value(m);
                match self.intent.direction() {
                    Direction::Maximize => v,
                    Direction::Minimize => -v,
                }
            })
            .collect();

        let rows = |templates: &[RowTemplate]| -> Vec<LinearRow> {
            templates
                .iter()
                .map(|s| {
                    LinearRow::new(&s.label, predicted.iter().map(|m| m[s.measure]).collect(), s.bound)
                })
                .collect()
        };

        let mut equal = rows(&self.equal);
        equal.push(LinearRow::new(SELECT_ONE_LABEL, vec![1.0; n], 1.0));

        PlanProblem {
            objective,
            domain: self.space.indices().collect(),
            at_most: rows(&self.at_most),
            at_least: rows(&self.at_least),
            equal,
            window: self.window,
        }
    }

    // PLANNING STATE: BUILD, SOLVE, VALIDATE, INSTALL
    pub fn plan(&mut self) -> Result<(), PlanningError> {
        if self.space.is_empty() {
            return Err(PlanningError::EmptyDomain);
        }

        let plan = match self.solver_timeout {
            None => {
                let problem = Arc::new(self.build_problem());
                self.last_problem = Some(Arc::clone(&problem));
                self.solver.solve(&problem)?
            }
            Some(timeout) => match self.solve_with_deadline(timeout) {
                Ok(plan) => plan,
                Err(PlanningError::Timeout(t)) if !self.schedule.is_empty() => {
                    // KEEP SERVING THE PREVIOUS WINDOW RATHER THAN BLOCK
                    warn!(
                        parent: &self.span,
                        timeout = ?t,
                        "solver timed out, re-serving previous schedule"
                    );
                    self.fallbacks += 1;
                    self.cursor = 0;
                    self.phase = Phase::Serving;
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        if plan.len() != self.window {
            return Err(PlanningError::Solver(format!(
                "solver returned {} slots for a window of {}",
                plan.len(),
                self.window
            )));
        }
        if let Some(&bad) = plan.iter().find(|&&i| i >= self.space.len()) {
            return Err(PlanningError::Solver(format!(
                "solver returned index {} outside a space of {}",
                bad,
                self.space.len()
            )));
        }

        self.schedule = plan;
        self.cursor = 0;
        self.phase = Phase::Serving;
        self.plans += 1;
        debug!(
            parent: &self.span,
            plan = self.plans,
            phase = self.phase.label(),
            schedule = ?self.schedule,
            "schedule computed"
        );
        Ok(())
    }

    // SOLVER ON ITS OWN THREAD, AT MOST ONE AT A TIME. A SOLVE THAT MISSES
    // ITS DEADLINE STAYS PENDING; LATER PLANS WAIT ON IT INSTEAD OF STARTING
    // ANOTHER, AND INSTALL ITS ANSWER ONCE IT ARRIVES.
    fn solve_with_deadline(&mut self, timeout: Duration) -> Result<Vec<usize>, PlanningError> {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let problem = Arc::new(self.build_problem());
                let (tx, answer) = mpsc::channel();
                let solver = Arc::clone(&self.solver);
                let job = Arc::clone(&problem);
                std::thread::spawn(move || {
                    let _ = tx.send(solver.solve(&job));
                });
                PendingSolve { problem, answer }
            }
        };
        self.last_problem = Some(Arc::clone(&pending.problem));
        match pending.answer.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.pending = Some(pending);
                Err(PlanningError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(PlanningError::Solver("solver thread exited without an answer".into()))
            }
        }
    }
}

impl Controller for Scheduler {
    fn update_statistics(&mut self, config: usize, measured: &[f64], t: f64) {
        self.predictor.update(config, measured, t);
    }

    fn next_configuration(&mut self) -> Result<usize, PlanningError> {
        if self.phase != Phase::Serving {
            self.plan()?;
        }
        let index = self.schedule[self.cursor];
        self.cursor += 1;
        if self.cursor >= self.schedule.len() {
            // EXHAUSTING CALL STILL GETS ITS SLOT; RE-PLAN WAITS FOR THE NEXT ONE
            self.phase = Phase::Exhausted;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Comparison, Objective};
    use crate::knob::KnobRange;
    use crate::solver::TimeShareSolver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn one_knob_intent(values: &[i64], minimize: bool) -> Intent {
        let b = Intent::builder("t")
            .knob("k", KnobRange::list(values.iter().copied(), values[0]))
            .measure("m")
            .objective(Objective::measure("m"));
        let b = if minimize { b.minimize() } else { b.maximize() };
        b.build().unwrap()
    }

    fn scheduler_with(intent: Intent, config: AdaptConfig, solver: Arc<dyn Solver>) -> Scheduler {
        let space = Arc::new(intent.resolved_domain(config.max_domain).unwrap());
        let predictor = OverloadPredictor::new(
            space.len(),
            intent.measures(),
            config.bandwidth,
            0.0,
            Span::none(),
        );
        Scheduler::new(Arc::new(intent), space, predictor, solver, &config, Span::none()).unwrap()
    }

    fn seeded(intent: Intent, baselines: &[f64], window: usize) -> Scheduler {
        let mut s = scheduler_with(
            intent,
            AdaptConfig::default().with_window(window),
            Arc::new(TimeShareSolver),
        );
        for (i, &b) in baselines.iter().enumerate() {
            s.predictor_mut().initialize(i, &[b], 0.0);
        }
        s
    }

    #[test]
    fn single_best_index_fills_window() {
        let mut s = seeded(one_knob_intent(&[1, 2, 3, 4], false), &[1.0, 7.0, 3.0, 2.0], 20);
        s.plan().unwrap();
        assert_eq!(s.schedule(), &[1; 20][..]);
    }

    #[test]
    fn minimize_negates_objective_but_not_select_one_row() {
        let mut s = seeded(one_knob_intent(&[1, 2, 3], true), &[4.0, 2.0, 9.0], 5);
        s.plan().unwrap();
        let p = s.last_problem().unwrap();
        assert_eq!(p.objective, vec![-4.0, -2.0, -9.0]);
        let select = p.equal.last().unwrap();
        assert_eq!(select.label, SELECT_ONE_LABEL);
        assert_eq!(select.coefficients, vec![1.0, 1.0, 1.0]);
        assert_eq!(select.bound, 1.0);
        // MINIMUM OF m IS AT INDEX 1
        assert_eq!(s.schedule(), &[1; 5][..]);
    }

    #[test]
    fn rows_carry_predicted_measures() {
        let intent = Intent::builder("rows")
            .knob("k", KnobRange::list([1i64, 2], 1i64))
            .measure("latency")
            .measure("error")
            .constraint("latency", Comparison::AtMost, 5.0)
            .constraint("error", Comparison::AtLeast, 0.5)
            .build()
            .unwrap();
        let mut s = scheduler_with(intent, AdaptConfig::default(), Arc::new(TimeShareSolver));
        s.predictor_mut().initialize(0, &[2.0, 1.0], 0.0);
        s.predictor_mut().initialize(1, &[4.0, 3.0], 0.0);
        let p = s.build_problem();
        assert_eq!(p.at_most.len(), 1);
        assert_eq!(p.at_most[0].coefficients, vec![2.0, 4.0]);
        assert_eq!(p.at_most[0].bound, 5.0);
        assert_eq!(p.at_least[0].coefficients, vec![1.0, 3.0]);
        assert_eq!(p.at_least[0].bound, 0.5);
        assert_eq!(p.equal.len(), 1);
        assert_eq!(p.domain, vec![0, 1]);
    }

    #[test]
    fn replans_lazily_after_window() {
        let mut s = seeded(one_knob_intent(&[1, 2], false), &[1.0, 2.0], 3);
        assert_eq!(s.phase(), Phase::Idle);
        for _ in 0..3 {
            assert_eq!(s.next_configuration().unwrap(), 1);
        }
        assert_eq!(s.plans(), 1);
        assert_eq!(s.phase(), Phase::Exhausted);
        assert_eq!(s.phase().label(), "EXHAUSTED");
        assert_eq!(s.next_configuration().unwrap(), 1);
        assert_eq!(s.plans(), 2);
        assert_eq!(s.cursor(), 1);
    }

    #[test]
    fn updates_do_not_force_replan() {
        let mut s = seeded(one_knob_intent(&[1, 2], false), &[1.0, 2.0], 4);
        s.next_configuration().unwrap();
        for t in 1..50 {
            s.update_statistics(1, &[100.0], t as f64);
        }
        assert_eq!(s.plans(), 1);
        assert_eq!(s.phase(), Phase::Serving);
        assert_eq!(s.cursor(), 1);
    }

    #[test]
    fn new_window_sees_fresh_predictions() {
        // m = -baseline * overload; DRIVING OVERLOAD NEGATIVE FLIPS THE ARGMAX
        let mut s = seeded(one_knob_intent(&[1, 2], false), &[1.0, 2.0], 2);
        assert_eq!(s.next_configuration().unwrap(), 1);
        for t in 1..100 {
            s.update_statistics(1, &[-2.0], t as f64);
        }
        // STILL SERVING THE STALE WINDOW
        assert_eq!(s.next_configuration().unwrap(), 1);
        // NEXT WINDOW PICKS THE NOW-LARGER INDEX 0
        assert_eq!(s.next_configuration().unwrap(), 0);
    }

    #[test]
    fn invalidate_triggers_replan() {
        let mut s = seeded(one_knob_intent(&[1, 2], false), &[1.0, 2.0], 10);
        s.next_configuration().unwrap();
        s.invalidate();
        s.next_configuration().unwrap();
        assert_eq!(s.plans(), 2);
    }

    #[test]
    fn empty_domain_is_planning_failure() {
        let intent = Intent::builder("empty").measure("m").build().unwrap();
        let mut s = scheduler_with(intent, AdaptConfig::default(), Arc::new(TimeShareSolver));
        assert_eq!(s.next_configuration(), Err(PlanningError::EmptyDomain));
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn infeasible_is_planning_failure() {
        let intent = Intent::builder("tight")
            .knob("k", KnobRange::list([1i64, 2], 1i64))
            .measure("m")
            .constraint("m", Comparison::AtMost, 0.5)
            .build()
            .unwrap();
        let mut s = scheduler_with(intent, AdaptConfig::default(), Arc::new(TimeShareSolver));
        assert_eq!(s.next_configuration(), Err(PlanningError::Infeasible));
    }

    struct BadSolver;

    impl Solver for BadSolver {
        fn solve(&self, p: &PlanProblem) -> Result<Vec<usize>, PlanningError> {
            Ok(vec![99; p.window])
        }
    }

    #[test]
    fn out_of_space_plan_rejected() {
        let mut s = scheduler_with(
            one_knob_intent(&[1, 2], false),
            AdaptConfig::default(),
            Arc::new(BadSolver),
        );
        assert!(matches!(s.plan(), Err(PlanningError::Solver(_))));
    }

    // FIRST CALL ANSWERS AT ONCE, EVERY LATER CALL STALLS
    struct StallAfterFirst {
        calls: AtomicUsize,
        stall: Duration,
    }

    impl StallAfterFirst {
        fn new(stall: Duration) -> Self {
            Self { calls: AtomicUsize::new(0), stall }
        }
    }

    impl Solver for StallAfterFirst {
        fn solve(&self, p: &PlanProblem) -> Result<Vec<usize>, PlanningError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                std::thread::sleep(self.stall);
            }
            TimeShareSolver.solve(p)
        }
    }

    #[test]
    fn timeout_reserves_previous_schedule() {
        let config = AdaptConfig::default()
            .with_window(2)
            .with_solver_timeout(Duration::from_millis(50));
        let solver = Arc::new(StallAfterFirst::new(Duration::from_millis(500)));
        let mut s = scheduler_with(one_knob_intent(&[1, 2], false), config, solver);
        s.predictor_mut().initialize(1, &[5.0], 0.0);
        assert_eq!(s.next_configuration().unwrap(), 1);
        assert_eq!(s.next_configuration().unwrap(), 1);
        // SECOND PLAN TIMES OUT: SAME WINDOW AGAIN
        assert_eq!(s.next_configuration().unwrap(), 1);
        assert_eq!(s.fallbacks(), 1);
        assert_eq!(s.plans(), 1);
        assert!(s.solve_in_flight());
    }

    #[test]
    fn slow_solver_answer_is_installed_once_ready() {
        let config = AdaptConfig::default()
            .with_window(1)
            .with_solver_timeout(Duration::from_millis(5));
        let solver = Arc::new(StallAfterFirst::new(Duration::from_millis(100)));
        let mut s = scheduler_with(
            one_knob_intent(&[1, 2], false),
            config,
            Arc::clone(&solver) as Arc<dyn Solver>,
        );
        s.predictor_mut().initialize(1, &[5.0], 0.0);
        assert_eq!(s.next_configuration().unwrap(), 1);

        let give_up = Instant::now() + Duration::from_secs(5);
        while s.plans() < 2 && Instant::now() < give_up {
            assert_eq!(s.next_configuration().unwrap(), 1);
        }
        assert_eq!(s.plans(), 2);
        assert!(s.fallbacks() > 0);
        assert!(!s.solve_in_flight());
        // ONE SOLVE PER INSTALLED PLAN: NONE STARTED WHILE ANOTHER RAN
        assert_eq!(solver.calls.load(Ordering::SeqCst), 2);
    }

    struct AlwaysStall;

    impl Solver for AlwaysStall {
        fn solve(&self, p: &PlanProblem) -> Result<Vec<usize>, PlanningError> {
            std::thread::sleep(Duration::from_millis(500));
            TimeShareSolver.solve(p)
        }
    }

    #[test]
    fn timeout_without_previous_schedule_is_reported() {
        let config = AdaptConfig::default().with_solver_timeout(Duration::from_millis(20));
        let mut s = scheduler_with(one_knob_intent(&[1, 2], false), config, Arc::new(AlwaysStall));
        assert_eq!(
            s.next_configuration(),
            Err(PlanningError::Timeout(Duration::from_millis(20)))
        );
    }
}
