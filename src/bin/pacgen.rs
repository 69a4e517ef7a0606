//! Renders a PAC script from a config file, for manual inspection or for
//! serving to browsers out-of-process.
use std::fs;
use std::process::ExitCode;

use clap::{Arg, Command};
use log::error;

use phantomrelay::cache::DnsCaches;
use phantomrelay::config::{self, RecordingForwarder};
use phantomrelay::nose::Nose;
use phantomrelay::pac;

fn cli() -> Command {
    Command::new("pacgen")
        .about("render a PAC script from a policy config file")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .required(true)
                .help("path to the policy config file"),
        )
        .arg(
            Arg::new("socks")
                .short('s')
                .long("socks")
                .value_name("HOST:PORT")
                .default_value("127.0.0.1:1080")
                .help("SOCKS address proxied hosts are routed to"),
        )
}

fn main() -> ExitCode {
    env_logger::init();
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").unwrap();
    let socks_addr = matches.get_one::<String>("socks").unwrap();

    let text = match fs::read_to_string(config_path) {
        Ok(t) => t,
        Err(e) => {
            error!("could not read {config_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let caches = DnsCaches::new();
    let nose = Nose::new();
    let mut forwarder = RecordingForwarder::default();

    let (table, _global_dns) = match config::load(&text, &caches, &nose, &mut forwarder) {
        Ok(t) => t,
        Err(e) => {
            error!("failed to load {config_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("{}", pac::render(&table, socks_addr));
    ExitCode::SUCCESS
}
