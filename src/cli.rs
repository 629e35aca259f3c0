use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `JOBSH_LOG=jobsh=debug`.
pub const LOG_ENV: &str = "JOBSH_LOG";

/// Interactive Unix shell with pipelines, redirection and job control.
#[derive(Parser, Debug)]
#[command(name = "jobsh", version, about)]
pub struct Cli {
    /// Run a single command line and exit with its status.
    #[arg(short = 'c', long = "command", value_name = "COMMAND")]
    pub command: Option<String>,

    /// Do not print a prompt before reading each line.
    #[arg(short = 'p', long = "no-prompt")]
    pub no_prompt: bool,

    /// Log job control activity to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Install the stderr log subscriber. `verbose` overrides the environment.
pub fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
