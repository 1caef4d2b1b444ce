// ========================================================================================
//
//                       The strategic orchestrator: codebook
//
// ========================================================================================
//
// This binary conducts the dictionary build from argument parsing to the
// final artifact. It owns all major resources: the ingested patient store,
// the ontology, the banned-code set, and the merged accumulator. The
// aggregation itself is pure and in-memory; every fallible phase here is a
// boundary (ingest, ontology load, artifact write), and any failure
// terminates the run with no partial output.

#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use codebook::accumulate::DictionaryAccumulator;
use codebook::artifact;
use codebook::flatmap::FlatMap;
use codebook::ingest;
use codebook::ontology::Ontology;
use codebook::store::{PatientStore, fold_patients_in_parallel};
use codebook::synthesis::synthesize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                         Command-line interface definition
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "codebook",
    version,
    about = "Builds a statistical token dictionary from clinical event timelines."
)]
struct Args {
    /// Directory of timeline CSV files (plain or gzip-compressed).
    input_path: PathBuf,

    /// Output path for the MessagePack dictionary artifact.
    #[clap(long, default_value = "dictionary.msgpack")]
    output: PathBuf,

    /// Two-column CSV of `child,parent` code names defining the ontology.
    /// Without it every code is treated as a root.
    #[clap(long)]
    ontology: Option<PathBuf>,

    /// Exclude codes whose name starts with this prefix. Repeatable.
    #[clap(long = "ban-prefix")]
    ban_prefixes: Vec<String>,

    /// Number of parallel shards. Also fixes the merge-tree shape, so it
    /// must match between runs for bit-identical output.
    #[clap(long)]
    threads: Option<usize>,

    /// Base seed for the per-shard random sources.
    #[clap(long, default_value_t = 0x5eed)]
    seed: u64,
}

// ========================================================================================
//                           The main orchestration logic
// ========================================================================================

fn main() {
    env_logger::init();
    let start_time = Instant::now();
    let args = Args::parse();

    // --- Phase 1: Ingest the patient store ---
    let mut store = match ingest::load_store(&args.input_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Fatal error ingesting timelines: {e}");
            process::exit(1);
        }
    };
    if store.num_patients() == 0 {
        eprintln!("Fatal error: no usable patients found under '{}'", args.input_path.display());
        process::exit(1);
    }

    // --- Phase 2: Ontology and banned codes ---
    let ontology = match &args.ontology {
        Some(path) => match Ontology::from_csv(path, &mut store.codes) {
            Ok(ontology) => ontology,
            Err(e) => {
                eprintln!("Fatal error loading ontology: {e}");
                process::exit(1);
            }
        },
        None => Ontology::from_edges(&[], store.codes.len()),
    };

    let mut banned_codes = FlatMap::new();
    let mut num_banned = 0usize;
    for (code, name) in store.codes.iter() {
        if args.ban_prefixes.iter().any(|p| name.starts_with(p)) {
            banned_codes.insert(code, true);
            num_banned += 1;
        }
    }
    info!("banned {num_banned} out of {} codes", store.codes.len());

    // --- Phase 3: Parallel accumulation ---
    let shards = args.threads.unwrap_or_else(num_cpus::get);
    let num_patients = store.num_patients();
    eprintln!("> Aggregating {num_patients} patients across {shards} shard(s)...");

    let progress = create_progress_bar(num_patients as u64, "patients");
    let accumulator = run_accumulation(&store, &ontology, &banned_codes, shards, args.seed, &progress);
    progress.finish_and_clear();

    // --- Phase 4: Entry synthesis ---
    let dictionary = match synthesize(accumulator, &ontology) {
        Ok(dictionary) => dictionary,
        Err(e) => {
            eprintln!("Fatal error synthesizing dictionary entries: {e}");
            process::exit(1);
        }
    };
    info!(
        "synthesized {} regular and {} rollup entries; age mean {:.1} std {:.1}",
        dictionary.regular.len(),
        dictionary.ontology_rollup.len(),
        dictionary.age_mean,
        dictionary.age_std
    );

    // --- Phase 5: Artifact write ---
    if let Err(e) = artifact::write_to_path(&dictionary, &args.output) {
        eprintln!("Fatal error writing '{}': {e}", args.output.display());
        process::exit(1);
    }

    eprintln!(
        "> Wrote {} entries to {} in {:.2?}",
        dictionary.regular.len() + dictionary.ontology_rollup.len(),
        args.output.display(),
        start_time.elapsed()
    );
}

/// The fold-then-reduce over patient shards. Each shard seeds its own random
/// source from the base seed and its index; the sequential shard-order merge
/// keeps the reduction deterministic for a fixed seed and shard count.
fn run_accumulation(
    store: &PatientStore,
    ontology: &Ontology,
    banned_codes: &FlatMap<bool>,
    shards: usize,
    base_seed: u64,
    progress: &ProgressBar,
) -> DictionaryAccumulator {
    let num_patients = store.num_patients();
    fold_patients_in_parallel(
        &store.patients,
        shards,
        |shard| DictionaryAccumulator::with_seed(shard_seed(base_seed, shard)),
        |accumulator, patient| {
            accumulator.add_patient(patient, ontology, num_patients, banned_codes);
            progress.inc(1);
        },
        DictionaryAccumulator::absorb,
    )
}

/// Decorrelates shard seeds; adjacent shard indices must not yield adjacent
/// random streams.
fn shard_seed(base_seed: u64, shard: usize) -> u64 {
    base_seed ^ (shard as u64 + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    pb.set_style(
        ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    pb.set_message(message.to_string());

    pb
}
