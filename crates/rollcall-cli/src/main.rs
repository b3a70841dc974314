use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance1 {
    fn scan(&self, client: &str, frames: Vec<(u32, u32, Vec<u8>)>) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn reload_gallery(&self) -> zbus::Result<u32>;
    fn attendance_for_date(&self, date: &str) -> zbus::Result<String>;
    fn list_students(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a liveness session from image files (capture order = argument order)
    Scan {
        /// Client identifier recorded by the abuse guard
        #[arg(short, long, default_value = "cli")]
        client: String,
        /// Frame image files; at least 3
        frames: Vec<PathBuf>,
    },
    /// Show daemon status
    Status,
    /// Reload the gallery file and swap it in
    Reload,
    /// List attendance for a date (defaults to today)
    Attendance {
        /// Date as YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },
    /// List enrolled students
    Students,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus (is rollcalld running?)")?;
    let proxy = Attendance1Proxy::new(&connection).await?;

    match cli.command {
        Commands::Scan { client, frames } => {
            if frames.len() < 3 {
                bail!("a liveness session needs at least 3 frames, got {}", frames.len());
            }
            let frames = load_frames(&frames)?;
            let outcome = proxy.scan(&client, frames).await?;
            print_json(&outcome)?;
        }
        Commands::Status => {
            let status = proxy.status().await?;
            print_json(&status)?;
        }
        Commands::Reload => {
            let entries = proxy.reload_gallery().await?;
            println!("gallery reloaded: {entries} entries");
        }
        Commands::Attendance { date } => {
            let date = match date {
                Some(date) => date,
                None => chrono::Utc::now().date_naive().to_string(),
            };
            let rows = proxy.attendance_for_date(&date).await?;
            print_json(&rows)?;
        }
        Commands::Students => {
            let students = proxy.list_students().await?;
            print_json(&students)?;
        }
    }

    Ok(())
}

/// Decode image files into grayscale frames in argument order.
fn load_frames(paths: &[PathBuf]) -> Result<Vec<(u32, u32, Vec<u8>)>> {
    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        let gray = image::open(path)
            .with_context(|| format!("failed to open frame {}", path.display()))?
            .to_luma8();
        let (width, height) = gray.dimensions();
        frames.push((width, height, gray.into_raw()));
    }
    Ok(frames)
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
