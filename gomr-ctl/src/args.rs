use std::path::PathBuf;

use clap::{command, Parser, Subcommand};

//
// For parsing the user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all jobs known to the cluster with status and progress,
    /// newest first.
    Jobs,
    /// Submit a job: upload the executable, seed the coordination tree,
    /// print the generated job name.
    Submit {
        /// Input descriptor, one map task each; repeatable.
        #[arg(short, long = "input", required = true)]
        inputs: Vec<String>,

        /// Desired partition count.
        #[arg(short, long, default_value_t = 1)]
        partitions: u32,

        /// Object-store bucket; defaults to $S3_BUCKET.
        #[arg(short, long)]
        bucket: Option<String>,

        /// Short alphanumeric tag prepended to the job name.
        #[arg(long)]
        prefix: Option<String>,

        /// Path to the compiled map/reduce executable.
        binary: PathBuf,
    },
    /// Download the concatenated results of a finished job.
    Fetch {
        /// The name returned when the job was submitted.
        #[arg(long)]
        jobname: String,

        /// Where to store the results.
        #[arg(short)]
        output: PathBuf,
    },
}

pub fn parse_args() -> Commands {
    Args::parse().command
}
