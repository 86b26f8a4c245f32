use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.facelog.Facelog1",
    default_service = "org.facelog.Facelog1",
    default_path = "/org/facelog/Facelog1"
)]
trait Facelog {
    fn resolve_crop(&self, path: &str) -> zbus::Result<String>;
    fn resolve_face(&self, path: &str, x: i32, y: i32, width: u32, height: u32) -> zbus::Result<String>;
    fn list_identities(&self, date: &str) -> zbus::Result<String>;
    fn list_visits(&self, date: &str) -> zbus::Result<String>;
    fn identity_visits(&self, id: i64, date: &str) -> zbus::Result<String>;
    fn remove_identity(&self, id: i64) -> zbus::Result<bool>;
    fn remove_visit(&self, id: i64) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facelog", about = "facelog identity and visit log CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a face image into an identity and log the visit
    Resolve {
        /// Aligned face crop, or a full frame when --rect is given
        image: PathBuf,
        /// Detector rectangle inside the frame, as x,y,width,height
        #[arg(long)]
        rect: Option<Rect>,
    },
    /// List identities, optionally by registration date
    Identities {
        /// YYYY-MM-DD or YYYY-MM-DD..YYYY-MM-DD
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// List visits, optionally for one identity and by date
    Visits {
        #[arg(short, long)]
        identity: Option<i64>,
        /// YYYY-MM-DD or YYYY-MM-DD..YYYY-MM-DD
        #[arg(short, long, default_value = "")]
        date: String,
    },
    /// Delete an identity and all of its visits
    Forget {
        id: i64,
    },
    /// Delete a single visit
    DeleteVisit {
        id: i64,
    },
    /// Show daemon status
    Status,
}

/// Face rectangle given on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
}

impl FromStr for Rect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let &[x, y, w, h] = parts.as_slice() else {
            return Err(format!("expected x,y,width,height, got {s:?}"));
        };
        let int = |v: &str| v.parse::<i64>().map_err(|e| format!("{v:?}: {e}"));
        let (x, y, w, h) = (int(x)?, int(y)?, int(w)?, int(h)?);
        Ok(Rect {
            x: i32::try_from(x).map_err(|e| e.to_string())?,
            y: i32::try_from(y).map_err(|e| e.to_string())?,
            width: u32::try_from(w).map_err(|_| format!("width must be positive, got {w}"))?,
            height: u32::try_from(h).map_err(|_| format!("height must be positive, got {h}"))?,
        })
    }
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = FacelogProxy::new(&conn)
        .await
        .context("facelogd is not reachable")?;

    match cli.command {
        Commands::Resolve { image, rect } => {
            // the daemon resolves paths relative to its own working directory
            let image = std::fs::canonicalize(&image)
                .with_context(|| format!("cannot read {}", image.display()))?;
            let path = image.to_string_lossy();
            let reply = match rect {
                Some(r) => proxy.resolve_face(&path, r.x, r.y, r.width, r.height).await?,
                None => proxy.resolve_crop(&path).await?,
            };
            print_json(&reply)?;
        }
        Commands::Identities { date } => {
            print_json(&proxy.list_identities(&date).await?)?;
        }
        Commands::Visits { identity, date } => {
            let reply = match identity {
                Some(id) => proxy.identity_visits(id, &date).await?,
                None => proxy.list_visits(&date).await?,
            };
            print_json(&reply)?;
        }
        Commands::Forget { id } => {
            if !proxy.remove_identity(id).await? {
                bail!("no identity {id}");
            }
            println!("Deleted identity {id} and its visits");
        }
        Commands::DeleteVisit { id } => {
            if !proxy.remove_visit(id).await? {
                bail!("no visit {id}");
            }
            println!("Deleted visit {id}");
        }
        Commands::Status => {
            print_json(&proxy.status().await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_parses() {
        let r: Rect = "10, 20,64,80".parse().unwrap();
        assert_eq!(
            r,
            Rect {
                x: 10,
                y: 20,
                width: 64,
                height: 80
            }
        );
    }

    #[test]
    fn test_rect_allows_negative_origin_only() {
        assert!("-4,0,50,50".parse::<Rect>().is_ok());
        assert!("0,0,-50,50".parse::<Rect>().is_err());
        assert!("0,0,50".parse::<Rect>().is_err());
        assert!("a,0,50,50".parse::<Rect>().is_err());
    }

    #[test]
    fn test_cli_parses_resolve_with_rect() {
        let cli = Cli::try_parse_from(["facelog", "resolve", "frame.jpg", "--rect", "1,2,40,40"]).unwrap();
        match cli.command {
            Commands::Resolve { image, rect } => {
                assert_eq!(image, PathBuf::from("frame.jpg"));
                assert_eq!(rect.unwrap().width, 40);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
