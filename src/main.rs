use clap::Parser;
use colored::Colorize;

fn main() {
    let cli = haccp_trace::Cli::parse();
    haccp_trace::init_tracing(cli.log_level());

    if let Err(e) = haccp_trace::run(cli) {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
