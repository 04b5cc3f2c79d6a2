//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the simulation/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{EnsembleResult, ModelConfiguration, MohnsRhoSet, ParameterSet, RhoValues, RunResult, ScalarParam};
use crate::fit::rank_runs;
use crate::math::{Stat, SummaryStats};
use crate::sim::ForecastResult;

/// Banner with the project name and the active model forms.
pub fn format_header(command: &str, project: &str, config: &ModelConfiguration) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== msspm {command} - {project} ===\n"));
    out.push_str(&format!(
        "Forms: growth={:?} harvest={:?} competition={:?} predation={:?}{}\n",
        config.growth,
        config.harvest,
        config.competition,
        config.predation,
        if config.aggregate { " (guilds)" } else { "" }
    ));
    out.push_str(&format!(
        "Years: {}..={} ({} steps) | observed={:?}\n",
        config.start_year,
        config.start_year + config.run_length as i32,
        config.run_length,
        config.observed
    ));
    out
}

/// Statistics table: one row per statistic, one column per entity plus `model`.
pub fn format_stats(stats: &SummaryStats) -> String {
    let mut out = String::new();
    let mut header = format!("{:<14}", "statistic");
    let mut rule = format!("{:-<14}", "");
    for name in &stats.entities {
        header.push_str(&format!(" {:>12}", truncate(name, 12)));
        rule.push_str(&format!(" {:-<12}", ""));
    }
    header.push_str(&format!(" {:>12}", "model"));
    rule.push_str(&format!(" {:-<12}", ""));
    out.push_str(&header);
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');

    for stat in Stat::ALL {
        let mut line = format!("{:<14}", stat.label());
        for s in &stats.per_entity {
            line.push_str(&format!(" {:>12}", fmt_opt(s.get(stat))));
        }
        line.push_str(&format!(" {:>12}", fmt_opt(stats.model.get(stat))));
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Scalar parameters per entity, limited to `shown`.
pub fn format_parameters(names: &[String], params: &ParameterSet, shown: &[ScalarParam]) -> String {
    let mut out = String::new();
    let mut header = format!("{:<20}", "parameter");
    for name in names {
        header.push_str(&format!(" {:>12}", truncate(name, 12)));
    }
    out.push_str(&header);
    out.push('\n');
    for &p in shown {
        let mut line = format!("{:<20}", p.as_str());
        for v in params.scalar(p) {
            line.push_str(&format!(" {:>12}", fmt_num(*v)));
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Ranked runs (best `top_n`), marking the ones averaged into the ensemble.
pub fn format_runs(runs: &[RunResult], ensemble: Option<&EnsembleResult>, top_n: usize) -> String {
    let mut out = String::new();
    let ranked = rank_runs(runs);
    out.push_str(&format!("Runs: {} completed\n", runs.len()));
    out.push_str(&format!("{:>4} {:>6} {:>16} {:>10}\n", "rank", "run", "fitness", "iters"));
    for (rank, r) in ranked.iter().take(top_n).enumerate() {
        let selected = ensemble.is_some_and(|e| e.selected.contains(&r.run));
        out.push_str(&format!(
            "{}{:>3} {:>6} {:>16} {:>10}\n",
            if selected { "*" } else { " " },
            rank + 1,
            r.run,
            fmt_num(r.fitness),
            r.iterations
        ));
    }
    if ranked.len() > top_n {
        out.push_str(&format!("  ... {} more\n", ranked.len() - top_n));
    }
    if let Some(e) = ensemble {
        out.push_str(&format!("Ensemble: {:?} over {} runs (* above)\n", e.mode, e.selected.len()));
    }
    out
}

/// Terminal-year forecast: deterministic value and Monte Carlo band.
pub fn format_forecast(names: &[String], forecast: &ForecastResult) -> String {
    let mut out = String::new();
    let det = &forecast.deterministic;
    let last = det.terminal();
    out.push_str(&format!("Forecast to {} ({} draws)\n", det.year(last), forecast.draws.len()));
    out.push_str(&format!(
        "{:<16} {:>14} {:>14} {:>14} {:>14}\n",
        "entity", "deterministic", "mean", "min", "max"
    ));
    let has_bands = forecast.mean.nrows() > last;
    for (c, name) in names.iter().enumerate() {
        let band = |m: &nalgebra::DMatrix<f64>| {
            if has_bands { fmt_num(m[(last, c)]) } else { "-".to_string() }
        };
        out.push_str(&format!(
            "{:<16} {:>14} {:>14} {:>14} {:>14}\n",
            truncate(name, 16),
            fmt_num(det.value(last, c)),
            band(&forecast.mean),
            band(&forecast.min),
            band(&forecast.max)
        ));
    }
    out
}

/// Mohn's rho per entity and for the whole model.
pub fn format_rho(names: &[String], set: &MohnsRhoSet) -> String {
    let mut out = String::new();
    out.push_str(&format!("Retrospective: {} peels\n", set.peels.len().saturating_sub(1)));
    let mut header = format!("{:<18}", "quantity");
    for name in names {
        header.push_str(&format!(" {:>12}", truncate(name, 12)));
    }
    header.push_str(&format!(" {:>12}", "model"));
    out.push_str(&header);
    out.push('\n');
    let rows: [(&str, &RhoValues); 3] = [
        ("growth_rate", &set.growth_rate),
        ("carrying_capacity", &set.carrying_capacity),
        ("biomass", &set.biomass),
    ];
    for (label, values) in rows {
        let mut line = format!("{label:<18}");
        for v in &values.per_entity {
            line.push_str(&format!(" {:>12}", fmt_opt(*v)));
        }
        line.push_str(&format!(" {:>12}", fmt_opt(values.model)));
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn fmt_num(v: f64) -> String {
    if !v.is_finite() {
        return "n/a".to_string();
    }
    if v != 0.0 && (v.abs() >= 1e6 || v.abs() < 1e-3) {
        format!("{v:.4e}")
    } else {
        format!("{v:.4}")
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(fmt_num).unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
