use std::net::SocketAddr;
use std::process;

use clap::{Parser, Subcommand};

use dns_resolver::daemon_client::{DaemonClient, Lookup};
use dns_wire::types::type_from_name;

/// Administrative client for the cache daemon.
#[derive(Parser)]
struct Args {
    /// Address the cache daemon is listening on
    #[clap(long, default_value = "127.0.0.1:5353")]
    addr: SocketAddr,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report the daemon's configured quotas
    Status,
    /// Look up a single cached answer
    Get {
        /// Name to look up
        name: String,
        /// Query type, e.g. A, AAAA, NS, CNAME, SOA
        qtype: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (mut client, status) = match DaemonClient::connect(args.addr).await {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("could not reach cache daemon at {}: {err}", args.addr);
            process::exit(2);
        }
    };

    let result = match args.command {
        Command::Status => {
            println!("OK cache_daemon {}/{}", status.positive_capacity, status.negative_capacity);
            Ok(())
        }
        Command::Get { name, qtype } => {
            let Some(qtype) = type_from_name(&qtype) else {
                eprintln!("unknown query type: {qtype}");
                process::exit(1);
            };
            let name = dns_wire::types::DomainName::new(&name);
            match client.get(&name, qtype).await {
                Ok(Lookup::NotFound) => {
                    println!("NOTFOUND");
                    Ok(())
                }
                Ok(Lookup::Negative { ttl, rcode }) => {
                    println!("NEG {ttl} {rcode}");
                    Ok(())
                }
                Ok(Lookup::Positive { ttl, rdata }) => {
                    println!("POS {ttl} {}", rdata.len());
                    for rr in rdata {
                        println!("  {}", rr.iter().map(|b| format!("{b:02x}")).collect::<String>());
                    }
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }
    };

    let _ = client.quit().await;

    if let Err(err) = result {
        eprintln!("{err}");
        process::exit(3);
    }
}
