use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.facematch.FaceMatch1",
    default_service = "org.facematch.FaceMatch1",
    default_path = "/org/facematch/FaceMatch1"
)]
trait FaceMatch {
    fn enroll(&self, person_id: i64, person_name: &str, image_path: &str) -> zbus::Result<String>;
    fn unenroll(&self, person_id: i64) -> zbus::Result<u32>;
    fn recognize(&self, image_path: &str) -> zbus::Result<String>;
    fn list_people(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facematch", about = "FaceMatch recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face sample for a person (image must contain exactly one face)
    Enroll {
        /// Numeric person identifier
        person_id: i64,
        /// Display name for this person
        name: String,
        /// Image file containing the face
        image: PathBuf,
    },
    /// Remove every enrolled sample for a person
    Unenroll {
        person_id: i64,
    },
    /// Recognize faces in an image
    Recognize {
        image: PathBuf,
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
    /// List enrolled people
    List,
    /// Show daemon status
    Status,
}

/// The daemon resolves paths itself, so send absolute ones.
fn absolute(path: &Path) -> Result<String> {
    let abs = std::fs::canonicalize(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(abs.to_string_lossy().into_owned())
}

fn print_report(report: &serde_json::Value) {
    let outcomes = report["outcomes"].as_array().cloned().unwrap_or_default();
    if outcomes.is_empty() {
        println!("No faces passed the quality gate");
        return;
    }
    for (i, outcome) in outcomes.iter().enumerate() {
        let label = &outcome["label"];
        let who = if let Some(resolved) = label.get("Resolved") {
            format!(
                "{} (id {}, similarity {:.3})",
                resolved["name"].as_str().unwrap_or("?"),
                resolved["person_id"],
                resolved["similarity"].as_f64().unwrap_or(0.0)
            )
        } else if label.get("Error").is_some() {
            format!("Error: {}", label["Error"].as_str().unwrap_or("unknown"))
        } else {
            "Not recognized".to_string()
        };
        let liveness = outcome["liveness"]["status"].as_str().unwrap_or("unavailable");
        println!("face {}: {who}, liveness: {liveness}", i + 1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    let proxy = FaceMatchProxy::new(&connection).await?;

    match cli.command {
        Commands::Enroll { person_id, name, image } => {
            let record_id = proxy.enroll(person_id, &name, &absolute(&image)?).await?;
            println!("Enrolled {name} (id {person_id}), record {record_id}");
        }
        Commands::Unenroll { person_id } => {
            let removed = proxy.unenroll(person_id).await?;
            println!("Removed {removed} sample(s) for person {person_id}");
        }
        Commands::Recognize { image, json } => {
            let raw = proxy.recognize(&absolute(&image)?).await?;
            if json {
                println!("{raw}");
            } else {
                print_report(&serde_json::from_str(&raw)?);
            }
        }
        Commands::List => {
            let people: serde_json::Value = serde_json::from_str(&proxy.list_people().await?)?;
            match people.as_array() {
                Some(list) if !list.is_empty() => {
                    for p in list {
                        let name = p["person_name"].as_str().unwrap_or("?");
                        println!("{:>8}  {:<24} {} sample(s)", p["person_id"], name, p["samples"]);
                    }
                }
                _ => println!("No people enrolled"),
            }
        }
        Commands::Status => {
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
