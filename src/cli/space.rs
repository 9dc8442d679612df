use anyhow::Result;

use adapt::Intent;

// PRINT EVERY RESOLVED KNOB, THEN THE ENUMERATED SPACE WITH STABLE INDICES.
// THE REFERENCE CONFIGURATION IS MARKED WITH '*'.
pub fn run_space(intent: &Intent, max_domain: usize) -> Result<()> {
    let space = intent.resolved_domain(max_domain)?;
    let reference = space.reference_index();

    println!("ADAPT CONFIGURATION SPACE: {}", intent.name());
    println!("QUANTIZE LEVELS: {}", intent.quantize_levels());
    println!();
    for (name, knob) in intent.resolved_knobs() {
        let values: Vec<String> = knob.values.iter().map(|v| v.to_string()).collect();
        println!("  {:<20} [{}]  REF {}", name, values.join(", "), knob.reference);
    }
    println!();

    println!("{:<8} CONFIGURATION", "INDEX");
    println!("{}", "-".repeat(60));
    for (index, config) in space.iter() {
        let mark = if Some(index) == reference { "*" } else { " " };
        println!("{:<7}{} {}", index, mark, config);
    }
    println!("TOTAL CONFIGURATIONS: {}", space.len());

    let constraints = intent.constraints();
    if !constraints.is_empty() {
        println!();
        for (measure, bound) in constraints {
            println!("  CONSTRAINT {} {} {}", measure, bound.comparison.symbol(), bound.value);
        }
    }
    println!(
        "  OBJECTIVE  {} {:?}",
        intent.direction().label(),
        intent.objective().terms()
    );
    Ok(())
}
