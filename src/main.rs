// import-places: load Census states, counties and places into the ERP database

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use us_sstp::{logging, open_database, HttpFetcher, ImportError, PlaceImporter, Settings};

#[derive(Parser, Debug)]
#[command(name = "import-places", version, about = "Import US Census places")]
struct Cli {
    /// SQLite database of the ERP
    #[arg(short, long)]
    database: PathBuf,

    /// TOML configuration file
    #[arg(short, long = "config")]
    config_file: Option<PathBuf>,

    /// Debug logging (overridden by SSTP_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Subdivision codes to import counties and places for (`ut`, `US-UT`)
    #[arg(required = true, num_args = 1..)]
    codes: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    logging::init_tracing(cli.verbose)?;

    let settings = Settings::load(cli.config_file.as_deref()).map_err(ImportError::from)?;
    let conn = open_database(&cli.database)?;
    let fetcher = HttpFetcher::new(&settings.user_agent)?;

    println!("🗺️  Importing Census places: {}", cli.codes.join(", "));

    let report = PlaceImporter::new(&conn, &fetcher, &settings).run(&cli.codes)?;

    println!("✓ States:   {} created, {} updated", report.states.created, report.states.updated);
    println!("✓ Counties: {} created, {} updated", report.counties.created, report.counties.updated);
    println!("✓ Places:   {} created, {} updated", report.places.created, report.places.updated);
    if !report.unknown_class_codes.is_empty() {
        println!("⚠️  Unknown class codes: {}", report.unknown_class_codes.join(", "));
    }

    Ok(())
}
