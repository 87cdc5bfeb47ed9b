use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a local file through the chunk receiver
    Upload {
        #[arg(long, help = "File to upload")]
        file: PathBuf,

        #[arg(long, help = "Upload session id")]
        session: String,

        #[arg(long, help = "Media type declared for the package")]
        content_type: Option<String>,

        #[arg(long, help = "Send the blake3 checksum so the assembled file is verified")]
        verify: bool,

        #[arg(
            long,
            value_delimiter = ',',
            help = "Chunk indexes to leave out of the first pass"
        )]
        withhold: Vec<u32>,
    },
    /// Submit one chunk request given as JSON
    UploadChunk {
        #[arg(long, help = "Chunk request JSON file")]
        request: PathBuf,
    },
    CancelUpload {
        #[arg(long, help = "Upload session id")]
        session: String,
    },
    /// Serve a file the way the download endpoint does
    Download {
        #[arg(long, help = "File to serve")]
        file: PathBuf,

        #[arg(long, help = "Range header value, e.g. bytes=0-99,200-")]
        range: Option<String>,

        #[arg(long, help = "Write the body here instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Run migration invocations against a store
    Migrate {
        #[arg(long, help = "Pipeline definition JSON file")]
        pipeline: PathBuf,

        #[arg(long, help = "Target identity, one migration per target")]
        target: String,

        #[arg(long, help = "Checkpoint file, created when missing")]
        checkpoint: PathBuf,

        #[arg(long, help = "PostgreSQL connection string")]
        database_url: Option<String>,

        #[arg(long, help = "JSON fixture of tables to migrate in memory")]
        fixture: Option<PathBuf>,

        #[arg(long, help = "Keep invoking until the migration finishes")]
        until_done: bool,
    },
    CancelMigration {
        #[arg(long)]
        target: String,

        #[arg(long, help = "Process id from the checkpoint")]
        process: String,
    },
    Status {
        #[arg(long, help = "Checkpoint file")]
        checkpoint: PathBuf,

        #[arg(long, help = "Print JSON instead of a table")]
        json: bool,
    },
    /// List files under a directory in packaging order, largest first
    Stage {
        #[arg(long)]
        dir: PathBuf,
    },
}
