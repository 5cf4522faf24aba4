use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use clap::Parser;

use dns_resolver::engine::{Engine, QueryMode, ResolutionError, ResolveResult};
use dns_wire::rdata::{a_to_ip_string, aaaa_to_ip_string, name_rdata, soa_rdata};
use dns_wire::types::{
    name_from_type, type_from_name, DomainName, ResourceRecord, TYPE_A, TYPE_AAAA, TYPE_CNAME,
    TYPE_NS, TYPE_SOA,
};

fn print_section(heading: &str, msg_wire: &dns_wire::types::Message, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }
    println!("\n;; {heading}");
    for rr in rrs {
        let rdata = match rr.rtype {
            TYPE_A => a_to_ip_string(rr).unwrap_or_default(),
            TYPE_AAAA => aaaa_to_ip_string(rr).unwrap_or_default(),
            TYPE_CNAME | TYPE_NS => name_rdata(msg_wire, rr)
                .map(|n| n.to_string())
                .unwrap_or_default(),
            TYPE_SOA => soa_rdata(msg_wire, rr)
                .map(|soa| format!("{} {} {}", soa.mname, soa.rname, soa.serial))
                .unwrap_or_default(),
            _ => format!("<{} bytes>", rr.rdata.len()),
        };
        println!(
            "{}\t{}\tIN\t{}\t{rdata}",
            rr.name,
            rr.ttl,
            name_from_type(rr.rtype),
        );
    }
}

/// Iterative/one-shot DNS lookup utility.
#[derive(Parser)]
struct Args {
    /// Name to resolve
    #[clap(long)]
    name: String,

    /// Query type to resolve
    #[clap(long, default_value = "A")]
    qtype: String,

    /// Nameserver(s) to query, can be specified more than once. In
    /// iterative mode these are the starting servers; in one-shot mode
    /// only the first is used.
    #[clap(long = "ns", required = true)]
    nameservers: Vec<SocketAddr>,

    /// Walk delegations and follow CNAMEs instead of sending a single query
    #[clap(long)]
    iter: bool,

    /// Print each step of the resolution to stderr
    #[clap(long)]
    trace: bool,

    /// Transport to use
    #[clap(long, default_value = "dns")]
    mode: String,

    /// SNI hostname; required whenever --mode dot is used, in both
    /// one-shot and iterative mode
    #[clap(long)]
    sni: Option<String>,

    /// Skip certificate verification for DNS-over-TLS
    #[clap(long)]
    insecure_dot: bool,

    /// Per-query timeout, in milliseconds
    #[clap(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Advertise EDNS(0) in outgoing queries
    #[clap(long, default_value_t = true, overrides_with = "no_edns")]
    edns: bool,

    /// Do not advertise EDNS(0)
    #[clap(long)]
    no_edns: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let Some(qtype) = type_from_name(&args.qtype) else {
        eprintln!("unknown query type: {}", args.qtype);
        process::exit(1);
    };

    let mode = match args.mode.as_str() {
        "dns" => QueryMode::Dns,
        "dot" => {
            let Some(sni) = args.sni.clone() else {
                eprintln!("--sni is required when --mode dot is used");
                process::exit(2);
            };
            QueryMode::Dot {
                sni,
                insecure: args.insecure_dot,
            }
        }
        other => {
            eprintln!("unknown mode: {other}");
            process::exit(1);
        }
    };

    let name = DomainName::new(&args.name);
    println!(";; QUESTION");
    println!("{name}\tIN\t{}", args.qtype.to_ascii_uppercase());

    let engine = Engine {
        cache: None,
        use_edns: args.edns && !args.no_edns,
        timeout: Duration::from_millis(args.timeout_ms),
        trace: args.trace,
        ..Engine::default()
    };

    if !args.iter {
        let server = args.nameservers[0];
        match engine.single_query_to(server, &name, qtype, &mode).await {
            Ok(reply) => {
                print_section("ANSWER", &reply, &reply.answers.clone());
                print_section("AUTHORITY", &reply, &reply.authority.clone());
            }
            Err(err) => {
                eprintln!(";; {err}");
                process::exit(exit_code_for(&err));
            }
        }
        return;
    }

    match engine.resolve(&args.nameservers, &name, qtype, &mode).await {
        Ok(ResolveResult::Ok { records, wire }) => {
            let msg = dns_wire::types::Message::from_octets(&wire).unwrap();
            print_section("ANSWER", &msg, &records);
        }
        Ok(ResolveResult::Nxdomain { ttl }) => {
            println!("\n;; ANSWER");
            println!("; name does not exist (negative ttl {ttl})");
            process::exit(3);
        }
        Ok(ResolveResult::Nodata { ttl }) => {
            println!("\n;; ANSWER");
            println!("; no data of the requested type (negative ttl {ttl})");
            process::exit(3);
        }
        Err(err) => {
            eprintln!(";; {err}");
            process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &ResolutionError) -> i32 {
    match err {
        ResolutionError::DotRequiresSni => 2,
        ResolutionError::Timeout | ResolutionError::Transport => 4,
        ResolutionError::TooManyCnameHops
        | ResolutionError::SafetyBudgetExhausted
        | ResolutionError::NoRootServers => 4,
    }
}
