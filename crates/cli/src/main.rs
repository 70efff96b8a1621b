use anyhow::Context;
use chrono::Utc;
use ckd_core::clinical::{age_in_years, estimate_gfr, CkdStage};
use ckd_core::import::parse_bulk_csv;
use ckd_core::measurement::check_creatinine;
use ckd_core::models::flexible_date;
use ckd_core::token::SignedTokenService;
use ckd_core::validation::check_age;
use ckd_core::Gender;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ckd")]
#[command(about = "CKD eGFR calculator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate a single eGFR
    Egfr {
        /// Serum creatinine (umol/L)
        creatinine: f64,
        /// Date of birth (YYYY-MM-DD)
        date_of_birth: String,
        /// Male or Female (or 0/1)
        gender: Gender,
        /// Apply the black ethnicity coefficient
        #[arg(long)]
        black: bool,
    },
    /// Calculate eGFR for every row of a CSV file. Nothing is stored.
    Bulk {
        /// CSV with columns creatinine,nhs_number,dob,gender,is_black
        path: PathBuf,
    },
    /// Generate a PKCS#8 PEM signing key for session tokens
    Keygen {
        /// Write the key here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let now = Utc::now();

    match cli.command {
        Commands::Egfr {
            creatinine,
            date_of_birth,
            gender,
            black,
        } => {
            let dob = flexible_date::parse(&date_of_birth).map_err(anyhow::Error::msg)?;
            if check_creatinine(creatinine).is_err() {
                anyhow::bail!("Creatinine value is invalid");
            }
            if let Some(err) = check_age(dob, now) {
                anyhow::bail!(err.message);
            }

            let egfr = estimate_gfr(creatinine, dob, gender, black, now);
            println!(
                "Age: {}, eGFR: {:.2}, stage: {}",
                age_in_years(dob, now),
                egfr,
                CkdStage::from_egfr(egfr).tier()
            );
        }
        Commands::Bulk { path } => {
            let file = File::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let entries = parse_bulk_csv(file)?;

            for (index, entry) in entries.iter().enumerate() {
                if check_creatinine(entry.creatinine).is_err() {
                    anyhow::bail!(
                        "Invalid or corrupted CSV file: Invalid creatinine value for entry {}",
                        index + 1
                    );
                }
                if check_age(entry.date_of_birth, now).is_some() {
                    anyhow::bail!(
                        "Invalid or corrupted CSV file: Invalid age for entry {}",
                        index + 1
                    );
                }
            }

            for entry in &entries {
                let egfr = estimate_gfr(
                    entry.creatinine,
                    entry.date_of_birth,
                    entry.gender,
                    entry.is_black,
                    now,
                );
                println!(
                    "NHS number: {}, eGFR: {:.2}, stage: {}",
                    entry.nhs_number,
                    egfr,
                    CkdStage::from_egfr(egfr).tier()
                );
            }
        }
        Commands::Keygen { out } => {
            let pem = SignedTokenService::generate_pkcs8_pem()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, pem)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Wrote signing key to {}", path.display());
                }
                None => print!("{pem}"),
            }
        }
    }

    Ok(())
}
