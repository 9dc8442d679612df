// ADAPT MEASURE HISTORY
// APPEND-ONLY RECORD OF EVERY CONTROLLED CALL: WHICH CONFIGURATION RAN AND
// WHAT IT MEASURED. THE CONTROL LOOP ONLY APPENDS; DUMP/SUMMARY/SERIES ARE
// FOR THE OPERATOR AFTER THE RUN.

use crate::clock::ns_to_secs;

#[derive(Clone, Debug, PartialEq)]
pub struct MeasureRecord {
    pub ts_ns:     u64,
    pub iteration: u64,
    pub config:    usize,
    // DECLARED MEASURE ORDER
    pub measures:  Vec<f64>,
}

pub trait HistorySink {
    fn append(&mut self, record: MeasureRecord);
}

#[derive(Clone, Debug, Default)]
pub struct MeasureLog {
    measures: Vec<String>,
    records:  Vec<MeasureRecord>,
}

impl MeasureLog {
    pub fn new(measures: &[String]) -> Self {
        Self {
            measures: measures.to_vec(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn measures(&self) -> &[String] {
        &self.measures
    }

    pub fn records(&self) -> &[MeasureRecord] {
        &self.records
    }

    // ONE MEASURE'S TIME SERIES, (SECONDS SINCE FIRST RECORD, VALUE)
    pub fn series(&self, measure: &str) -> Option<Vec<(f64, f64)>> {
        let q = self.measures.iter().position(|m| m == measure)?;
        let base = self.records.first().map_or(0, |r| r.ts_ns);
        Some(
            self.records
                .iter()
                .map(|r| (ns_to_secs(r.ts_ns.saturating_sub(base)), r.measures[q]))
                .collect(),
        )
    }

    // HOW OFTEN EACH CONFIGURATION INDEX WAS SERVED, ASCENDING BY INDEX
    pub fn config_counts(&self) -> Vec<(usize, u64)> {
        let mut counts = std::collections::BTreeMap::new();
        for r in &self.records {
            *counts.entry(r.config).or_insert(0u64) += 1;
        }
        counts.into_iter().collect()
    }

    // (MIN, MEAN, MAX) OF ONE MEASURE ACROSS THE RUN
    pub fn stats(&self, measure: &str) -> Option<(f64, f64, f64)> {
        let q = self.measures.iter().position(|m| m == measure)?;
        if self.records.is_empty() {
            return None;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for r in &self.records {
            let v = r.measures[q];
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Some((min, sum / self.records.len() as f64, max))
    }

    // DUMP THE FULL TABLE
    pub fn dump(&self) {
        let Some(first) = self.records.first() else {
            return;
        };
        let base_ts = first.ts_ns;

        print!("\n{:<10} {:<8} {:<8}", "TIME_S", "ITER", "CONFIG");
        for m in &self.measures {
            print!(" {:<14}", m.to_uppercase());
        }
        println!();
        println!("{}", "-".repeat(28 + 15 * self.measures.len()));

        for r in &self.records {
            let elapsed_s = ns_to_secs(r.ts_ns.saturating_sub(base_ts));
            print!("{:<10.3} {:<8} {:<8}", elapsed_s, r.iteration, r.config);
            for v in &r.measures {
                print!(" {:<14.6}", v);
            }
            println!();
        }
        println!("TOTAL RECORDS: {}", self.records.len());
    }

    pub fn summary(&self) {
        if self.records.is_empty() {
            return;
        }

        println!("\n{}", "=".repeat(50));
        println!("ADAPT SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  CALLS:             {}", self.records.len());
        for m in &self.measures {
            if let Some((min, mean, max)) = self.stats(m) {
                println!(
                    "  {:<18} MIN {:.6} / MEAN {:.6} / MAX {:.6}",
                    format!("{}:", m.to_uppercase()),
                    min,
                    mean,
                    max
                );
            }
        }
        let total = self.records.len() as f64;
        for (config, n) in self.config_counts() {
            println!(
                "  CONFIG {:<11} {} CALLS ({:.1}%)",
                config,
                n,
                n as f64 / total * 100.0
            );
        }
    }
}

impl HistorySink for MeasureLog {
    fn append(&mut self, record: MeasureRecord) {
        assert_eq!(
            record.measures.len(),
            self.measures.len(),
            "history record width does not match declared measures"
        );
        self.records.push(record);
    }
}
