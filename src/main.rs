use clap::Parser;
use tracing::warn;

use jobsh::cli::{self, Cli};
use jobsh::context::ShellContext;
use jobsh::shell::{self, RunOptions};
use jobsh::terminal::Terminal;

fn main() {
    let args = Cli::parse();
    cli::init_tracing(args.verbose);

    let terminal = match Terminal::init() {
        Ok(terminal) => terminal,
        Err(err) => {
            eprintln!("jobsh: {err}");
            warn!(%err, "running without job control");
            Terminal::detached()
        }
    };
    let mut ctx = ShellContext::new(terminal);

    let code = match args.command {
        Some(line) => {
            let status = shell::execute_line(&mut ctx, &line);
            ctx.exit_request.unwrap_or(status)
        }
        None => shell::run(&mut ctx, RunOptions { prompt: !args.no_prompt }),
    };
    std::process::exit(code);
}
