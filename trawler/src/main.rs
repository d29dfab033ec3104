use anyhow::Result;
use clap::ArgMatches;
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use trawler::commands::command_argument_builder;
use trawler::handlers::{
    handle_crawl, handle_init, handle_report, handle_sessions, print_banner,
};

fn init_tracing(verbose: bool) {
    // RUST_LOG wins over --verbose
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(chosen_command: &ArgMatches) -> Result<()> {
    match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("crawl", primary_command)) => handle_crawl(primary_command).await,
        Some(("report", primary_command)) => handle_report(primary_command),
        Some(("sessions", primary_command)) => handle_sessions(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    init_tracing(chosen_command.get_flag("verbose"));

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    if let Err(e) = dispatch(&chosen_command).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
