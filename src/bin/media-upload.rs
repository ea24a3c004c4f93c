use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use media_store::{
    client::{ClientConfig, ObjectClient, source::TransferSource},
    models::{metadata::TransferMetadata, object::ObjectKind},
};
use std::{path::PathBuf, time::Duration};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload to and download from a media-store server")]
struct Cli {
    /// Server root URL
    #[arg(long, env = "MEDIA_UPLOAD_URL", default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Caller identity sent as X-User-Id
    #[arg(long, env = "MEDIA_UPLOAD_USER")]
    user: String,

    /// End-to-end deadline per transfer, in seconds
    #[arg(long, default_value_t = 30 * 60)]
    deadline_secs: u64,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Directory for the temp copy made when a streamed upload must be retried
    #[arg(long, env = "MEDIA_UPLOAD_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file, or stdin when the path is `-`
    Upload {
        path: PathBuf,

        #[arg(long)]
        project: String,

        /// Upload name; required when reading stdin
        #[arg(long)]
        filename: Option<String>,

        #[arg(long = "type", value_enum, default_value_t = Kind::Files)]
        kind: Kind,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Comma separated
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Download an object
    Download {
        project: String,
        id: String,

        /// Destination file
        #[arg(long, short)]
        out: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Video,
    Files,
}

impl From<Kind> for ObjectKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Video => ObjectKind::Video,
            Kind::Files => ObjectKind::Files,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::new(cli.url, cli.user);
    config.deadline = Duration::from_secs(cli.deadline_secs);
    config.retry.max_attempts = cli.max_attempts;
    if let Some(dir) = cli.staging_dir {
        config.staging_dir = dir;
    }
    let client = ObjectClient::new(config)?;

    match cli.command {
        Command::Upload {
            path,
            project,
            filename,
            kind,
            title,
            description,
            tags,
        } => {
            let source = if path.as_os_str() == "-" {
                let name = filename.context("--filename is required when reading stdin")?;
                TransferSource::forward_only(tokio::io::stdin()).named(name)
            } else {
                match filename {
                    Some(name) => TransferSource::path(path).named(name),
                    None => TransferSource::path(path),
                }
            };

            let metadata = TransferMetadata {
                kind: Some(kind.into()),
                title,
                description,
                tags,
                ..TransferMetadata::files(project)
            };
            let receipt = client
                .upload(source, &metadata)
                .await
                .context("upload failed")?;
            println!(
                "{}",
                serde_json::json!({
                    "id": receipt.object_id,
                    "filename": receipt.filename,
                    "mode": format!("{:?}", receipt.mode),
                    "status": receipt.status,
                })
            );
        }
        Command::Download { project, id, out } => {
            let written = client
                .download(&project, &id, &out)
                .await
                .with_context(|| format!("download of {project}/{id} failed"))?;
            println!("{} bytes written to {}", written, out.display());
        }
    }

    Ok(())
}
