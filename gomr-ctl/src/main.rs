mod args;
use args::{parse_args, Commands};

mod core;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    match parse_args() {
        Commands::Jobs => core::jobs().await?,
        Commands::Submit {
            inputs,
            partitions,
            bucket,
            prefix,
            binary,
        } => core::submit(inputs, partitions, bucket, prefix, binary).await?,
        Commands::Fetch { jobname, output } => core::fetch(jobname, &output).await?,
    }

    Ok(())
}
