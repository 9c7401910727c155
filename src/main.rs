use anyhow::{bail, Context, Result};
use std::env;
use std::path::Path;
use std::rc::Rc;

use receipt_calc::{
    load_transactions_csv, AggregationEngine, EngineConfig, SqliteSnapshotWriter, SqliteStore,
    SystemClock,
};

const USAGE: &str = "usage: receipt-calc [-v] <command>

commands:
  import <seed.json>              load documents ({collection: {id: body}})
  import-transactions <file.csv>  load transactions (categoryId,type,amount,description)
  run <subject_id>                aggregate one client and save the result";

fn main() -> Result<()> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let verbose = args.first().is_some_and(|a| a == "-v" || a == "--verbose");
    if verbose {
        args.remove(0);
    }
    init_tracing(verbose)?;

    let config = EngineConfig::load().context("Failed to load configuration")?;

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["import", seed] => run_import(&config, Path::new(seed)),
        ["import-transactions", csv] => run_import_transactions(&config, Path::new(csv)),
        ["run", subject_id] => run_engine(&config, subject_id),
        _ => {
            eprintln!("{}", USAGE);
            bail!("invalid arguments");
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "warn" };

    let filter = tracing_subscriber::EnvFilter::try_from_env("RECEIPT_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn run_import(config: &EngineConfig, seed: &Path) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let imported = store.load_documents_json(seed)?;
    println!("✓ Imported {} documents into {:?}", imported, config.database_path);
    Ok(())
}

fn run_import_transactions(config: &EngineConfig, csv: &Path) -> Result<()> {
    let transactions = load_transactions_csv(csv)?;
    let store = SqliteStore::open(&config.database_path)?;
    let inserted = store.insert_transactions(&config.collections.transactions, &transactions)?;
    println!("✓ Inserted {} transactions into {:?}", inserted, config.database_path);
    Ok(())
}

fn run_engine(config: &EngineConfig, subject_id: &str) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let writer = Rc::new(SqliteSnapshotWriter::new(
        store.clone(),
        config.collections.receipt_calculations.as_str(),
    ));

    let mut engine = AggregationEngine::new(Rc::new(store.clone()), config.clone())
        .with_persistence(writer, Rc::new(SystemClock));
    engine.start(subject_id);

    // No external writers: one drain reaches the final state
    store.run_until_idle();
    engine.flush_persistence();

    let state = engine
        .state()
        .context("engine stopped before producing a state")?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    engine.stop();
    Ok(())
}
