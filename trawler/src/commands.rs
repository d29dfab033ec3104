use crate::handlers::parse_seed_url;
use clap::{arg, command};

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/trawler/";

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);

const FORMATS: [&str; 4] = ["html", "json", "markdown", "md"];

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("trawler")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("trawler")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log every element-level action (same as RUST_LOG=debug)")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the trawler configuration directory and session database")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location of the trawler configuration directory")
                        .default_value(DEFAULT_CONFIG_DIR),
                )
                .arg(
                    arg!(-f - -"force")
                        .help(
                            "Forces the overwriting of any existing database at the specified \
                        location.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a site breadth-first, fill and submit every form it finds, and \
                record a screenshot of each action.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The seed URL; the crawl never leaves its scheme, host and port")
                        .value_parser(parse_seed_url),
                )
                .arg(
                    arg!(-n --"max-pages" <NUM>)
                        .required(false)
                        .help("Stop after visiting this many pages")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("20"),
                )
                .arg(
                    arg!(-d --"delay" <SECONDS>)
                        .required(false)
                        .help("Settle delay after loads and clicks")
                        .value_parser(clap::value_parser!(f64))
                        .default_value("1"),
                )
                .arg(
                    arg!(-m --"mode" <MODE>)
                        .required(false)
                        .help("forms: submit each form; buttons: press every button with its nearby inputs")
                        .value_parser(["forms", "buttons"])
                        .default_value("forms"),
                )
                .arg(
                    arg!(--"driver" <DRIVER>)
                        .required(false)
                        .help("static: plain HTTP, no JavaScript; chrome: headless Chrome")
                        .value_parser(["static", "chrome"])
                        .default_value("chrome"),
                )
                .arg(
                    arg!(--"headed")
                        .required(false)
                        .help("Show the Chrome window")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"max-scrolls" <NUM>)
                        .required(false)
                        .help("Scroll each page to the bottom up to this many times before interacting")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    arg!(--"walk-links")
                        .required(false)
                        .help("Follow every in-domain link of a page once, then return, before interacting")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"nav-timeout" <SECONDS>)
                        .required(false)
                        .help("How long to wait for a page load or a click's navigation")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                )
                .arg(
                    arg!(--"retract-failed-clicks")
                        .required(false)
                        .help("Drop the highlight screenshot of a click that failed")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Where to write the review document (default: trawler-report.<format>)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Review document format: html, json, markdown")
                        .value_parser(FORMATS)
                        .default_value("html"),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Session database (default: the one created by `trawler init`, if any)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"openai-api-key" <KEY>)
                        .required(false)
                        .help("API key for LLM-generated field values")
                        .env("OPENAI_API_KEY")
                        .hide_env_values(true),
                )
                .arg(
                    arg!(--"openai-base-url" <URL>)
                        .required(false)
                        .help("OpenAI-compatible API base URL")
                        .env("OPENAI_BASE_URL"),
                )
                .arg(
                    arg!(--"openai-model" <MODEL>)
                        .required(false)
                        .help("Model used for field values")
                        .default_value(trawler_scanner::oracle::DEFAULT_OPENAI_MODEL),
                ),
        )
        .subcommand(
            command!("report")
                .about("Recompile the review document of a stored session")
                .arg(
                    arg!(-s --"session" <ID>)
                        .required(true)
                        .help("Session ID, as printed by `trawler crawl` or `trawler sessions`"),
                )
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Session database")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Where to write the document (default: trawler-<session>.<format>)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Review document format: html, json, markdown")
                        .value_parser(FORMATS)
                        .default_value("html"),
                ),
        )
        .subcommand(
            command!("sessions")
                .about("List stored crawl sessions, newest first")
                .arg(
                    arg!(--"db" <PATH>)
                        .required(false)
                        .help("Session database")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                ),
        )
}
