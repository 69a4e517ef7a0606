//! A thin demonstration client for the DNS module: resolves a name
//! against a given upstream descriptor and prints whatever the service
//! returns — a real address list, or a lie carrying a Nose index.
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Arg, Command};
use log::error;

use phantomrelay::dns::wire::{QTYPE_A, QTYPE_AAAA};
use phantomrelay::dns::DnsService;
use phantomrelay::policy::PolicyTable;
use phantomrelay::World;

fn cli() -> Command {
    Command::new("dnsquery")
        .about("resolve a name through the DNS service against an upstream resolver")
        .arg(Arg::new("name").required(true).help("name to resolve"))
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("DESCRIPTOR")
                .default_value("udp:///1.1.1.1:53")
                .help("upstream descriptor, e.g. udp:///1.1.1.1:53"),
        )
        .arg(
            Arg::new("aaaa")
                .long("aaaa")
                .action(clap::ArgAction::SetTrue)
                .help("query AAAA instead of A"),
        )
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let matches = cli().get_matches();

    let name = matches.get_one::<String>("name").unwrap();
    let server = matches.get_one::<String>("server").unwrap();
    let qtype = if matches.get_flag("aaaa") { QTYPE_AAAA } else { QTYPE_A };

    let world = Arc::new(World::new(PolicyTable::new(), server.clone()));
    let service = DnsService::new(world);

    let (index, ips) = service.ns_lookup(name, qtype, Some(server)).await;

    if ips.is_empty() && index == 0 {
        error!("no answer for {name}");
        return ExitCode::FAILURE;
    }

    if index > 0 {
        println!("{name}: lie, nose index {index}");
    }
    for ip in ips {
        println!("{name}: {ip}");
    }
    ExitCode::SUCCESS
}
