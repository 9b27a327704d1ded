//! End-of-run console report.

use std::time::Duration;

use crate::ledger::EnergyLedger;

const JOULES_PER_KWH: f64 = 3_600_000.0;

/// Renders totals, average power and the per-process breakdown, sorted by
/// accumulated energy descending. With a filter set, also shows the
/// matching processes' share of *total* GPU energy, since the rest was
/// deliberately left unattributed.
pub fn print_report(ledger: &EnergyLedger, run_duration: Duration, filter: Option<&str>) {
    let total_j = ledger.total_energy_j();
    let run_secs = run_duration.as_secs_f64();
    let average_power_w = if run_secs > 0.0 { total_j / run_secs } else { 0.0 };

    println!();
    println!("========== GPU ENERGY REPORT ==========");
    println!("Duration:          {run_secs:.2} s");
    println!("Samples:           {}", ledger.samples().len());
    println!("Total GPU energy:  {total_j:.2} J ({:.6} kWh)", total_j / JOULES_PER_KWH);
    println!("Average GPU power: {average_power_w:.2} W");

    let mut entries: Vec<(&String, f64)> = ledger
        .per_process_j()
        .iter()
        .map(|(name, joules)| (name, *joules))
        .collect();
    entries.sort_by(|a, b| b.1.total_cmp(&a.1));
    let attributed_j: f64 = entries.iter().map(|(_, joules)| joules).sum();

    println!();
    println!("========== PER-PROCESS ENERGY =========");
    if entries.is_empty() {
        println!("(no energy attributed)");
    }
    for (name, joules) in &entries {
        let share = if attributed_j > 0.0 {
            joules / attributed_j * 100.0
        } else {
            0.0
        };
        println!(
            "{name:<30} {joules:>10.2} J  {:.6} kWh  ({share:.1}% of attributed)",
            joules / JOULES_PER_KWH
        );
    }

    if let Some(filter) = filter {
        let of_total = if total_j > 0.0 {
            attributed_j / total_j * 100.0
        } else {
            0.0
        };
        println!();
        println!("Filter '{filter}': {attributed_j:.2} J, {of_total:.1}% of total GPU energy");
    }
    println!();
}
