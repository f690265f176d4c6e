// crates/cli/src/main.rs

use anyhow::Result;
use clap::{Arg, ArgAction, Command};

mod commands;

fn build_cli() -> Command {
    Command::new("sheetsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keeps a local view of a volunteer-hours spreadsheet in sync")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Path to the settings file")
                .default_value("sheetsync.toml")
                .global(true),
        )
        .subcommand(
            Command::new("watch")
                .about("Poll the spreadsheet and print sync events until Ctrl-C")
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("MS")
                        .help("Override the poll interval in milliseconds")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("once")
                .about("Fetch the spreadsheet once and print a summary")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the fetched rows as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("check-config").about("Validate the settings file and print effective values"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let matches = build_cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("sheetsync.toml");

    match matches.subcommand() {
        Some(("watch", sub_matches)) => {
            let interval = sub_matches.get_one::<u64>("interval").copied();
            commands::watch(config_path, interval).await
        }
        Some(("once", sub_matches)) => commands::run_once(config_path, sub_matches.get_flag("json")).await,
        Some(("check-config", _)) => commands::check_config(config_path),
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_watch_interval_parses() {
        let matches = build_cli()
            .try_get_matches_from(["sheetsync", "--config", "alt.toml", "watch", "--interval", "500"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("config").unwrap(), "alt.toml");
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "watch");
        assert_eq!(sub.get_one::<u64>("interval"), Some(&500));
    }
}
