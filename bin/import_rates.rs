// import-rates: load SSTP sales-tax rates into the ERP database

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use us_sstp::{logging, open_database, HttpFetcher, ImportError, RateImporter, Settings};

#[derive(Parser, Debug)]
#[command(name = "import-rates", version, about = "Import Streamlined Sales Tax rates")]
struct Cli {
    /// SQLite database of the ERP
    #[arg(short, long)]
    database: PathBuf,

    /// TOML configuration file
    #[arg(short, long = "config")]
    config_file: Option<PathBuf>,

    /// Only import active taxes (currently has no effect)
    #[arg(short, long)]
    active: bool,

    /// Debug logging (overridden by SSTP_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// State codes (`ut`, `US-UT`)
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

    let importer = RateImporter::new(&conn, &fetcher, &settings).active(cli.active);

    for code in &cli.codes {
        println!("💰 {}", code.to_ascii_uppercase());

        let report = importer.import_state(code)?;

        println!(
            "✓ Jurisdictions: {} created, {} updated",
            report.jurisdictions.created, report.jurisdictions.updated
        );
        println!("✓ Taxes: {} created, {} updated", report.taxes.created, report.taxes.updated);
        println!("✓ Parent links updated: {}", report.linked);
    }

    Ok(())
}
