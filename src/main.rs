use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Context;
use rayon::prelude::*;

use redistrict_gym::driver::{parse_records, AssignmentRecord, Driver, ExpectableRun, SchoolRecord};
use redistrict_gym::engine::{EarlyStopperParams, GreedyParams};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = pico_args::Arguments::from_env();

    let out_filename: PathBuf = args
        .opt_value_from_str("--out")
        .unwrap()
        .unwrap_or_else(|| "report.json".into());
    let min_schools: u32 = args.opt_value_from_str("--min-schools").unwrap().unwrap_or(1);
    let max_schools: u32 = args.opt_value_from_str("--max-schools").unwrap().unwrap_or(500);
    let early_stop_iters: u32 = args.opt_value_from_str("--early-stop-iters").unwrap().unwrap_or(1000);
    let early_stop_tol: f64 = args.opt_value_from_str("--early-stop-tol").unwrap().unwrap_or(0.1);
    let n_runs: usize = args.opt_value_from_str("--n-runs").unwrap().unwrap_or(20);
    let states_filter: Option<String> = args.opt_value_from_str("--states").unwrap();

    let greedy_params = GreedyParams {
        min_schools_per_district: min_schools,
        max_schools_per_district: max_schools,
    };
    let early_stopper_params = EarlyStopperParams {
        max_stale_iterations: early_stop_iters,
        tolerance: early_stop_tol,
    };

    let mut filenames: Vec<String> = vec![];
    while let Some(filename) = args.opt_free_from_str().unwrap() {
        filenames.push(filename);
    }

    let mut all_schools: Vec<SchoolRecord> = Vec::new();
    let mut all_assignments: Vec<AssignmentRecord> = Vec::new();
    for filename in &filenames {
        let contents = std::fs::read_to_string(filename).with_context(|| format!("failed to read {filename}"))?;
        let (schools, districts, assignments) =
            parse_records(&contents).with_context(|| format!("failed to parse {filename}"))?;
        log::debug!(
            "{filename}: {} schools, {} districts, {} assignments",
            schools.len(),
            districts.len(),
            assignments.len()
        );
        all_schools.extend(schools);
        all_assignments.extend(assignments);
    }

    let mut states: Vec<String> = all_assignments
        .iter()
        .map(|a| a.state_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if let Some(filter) = &states_filter {
        let wanted: BTreeSet<&str> = filter.split(',').collect();
        states.retain(|s| wanted.contains(s.as_str()));
    }

    let run_state = |state_name: &String| -> anyhow::Result<(String, ExpectableRun)> {
        log::info!("running state '{state_name}'");
        let start = std::time::Instant::now();
        let expectable = Driver::expectable_run(
            state_name,
            &all_schools,
            &all_assignments,
            n_runs,
            greedy_params,
            early_stopper_params,
        )
        .with_context(|| format!("failed to run state '{state_name}'"))?;
        log::info!("state '{state_name}' done in {:?}", start.elapsed());
        Ok((state_name.clone(), expectable))
    };

    let results: Vec<anyhow::Result<(String, ExpectableRun)>> = match std::env::var("RAYON_NUM_THREADS") {
        Ok(threads) if threads == "1" => states.iter().map(run_state).collect(),
        _ => states.par_iter().map(run_state).collect(),
    };

    let mut report: BTreeMap<String, ExpectableRun> = BTreeMap::new();
    for result in results {
        let (state_name, expectable) = result?;
        report.insert(state_name, expectable);
    }

    Driver::write_report(&out_filename, &report)?;

    Ok(())
}
