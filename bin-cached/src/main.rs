mod settings;

use std::time::Instant;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Duration};
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::EnvFilter;

use dns_resolver::cache::{CacheKey, NegativeEntry, PositiveEntry, SharedCache};
use dns_wire::types::{DomainName, CLASS_IN};
use settings::Settings;

const MAX_LINE_BYTES: usize = 8192;
const PURGE_INTERVAL: Duration = Duration::from_secs(30);

/// Side-car cache daemon: holds the dual-quota response cache so multiple
/// resolver processes can share one cache over a line protocol.
#[derive(Parser)]
struct Args {
    /// Path to a YAML configuration file
    #[clap(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "could not load configuration");
            std::process::exit(1);
        }
    };

    let cache = SharedCache::new(settings.positive_capacity, settings.negative_capacity);

    let purge_cache = cache.clone();
    tokio::spawn(async move {
        let mut ticker = interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            purge_cache.purge_expired(Instant::now()).await;
        }
    });

    let listener = match TcpListener::bind(settings.listen_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = %settings.listen_addr, "could not bind");
            std::process::exit(1);
        }
    };
    info!(addr = %settings.listen_addr, "cache daemon listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        let cache = cache.clone();
        tokio::spawn(
            async move {
                if let Err(err) = handle_connection(stream, &cache).await {
                    warn!(%err, "connection ended with an error");
                }
            }
            .instrument(tracing::info_span!("connection", %peer)),
        );
    }
}

async fn handle_connection(
    stream: TcpStream,
    cache: &SharedCache,
) -> Result<(), std::io::Error> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            return Ok(());
        }
        if raw.len() > MAX_LINE_BYTES {
            writer.write_all(b"ERR line too long\n").await?;
            return Ok(());
        }
        while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
            raw.pop();
        }
        let line = String::from_utf8_lossy(&raw).into_owned();

        match handle_line(&line, cache).await {
            Some(reply) => {
                writer.write_all(reply.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            None => return Ok(()),
        }
    }
}

/// Handles one line of the protocol. Returns `None` to close the
/// connection (`QUIT`/`EXIT`).
async fn handle_line(line: &str, cache: &SharedCache) -> Option<String> {
    let mut parts = line.split(' ');
    match parts.next() {
        Some("STATUS") => {
            let (cp, cn) = cache.caps().await;
            Some(format!("OK cache_daemon {cp}/{cn}"))
        }
        Some("GET") => {
            let name = parts.next()?;
            let qtype: u16 = parts.next()?.parse().ok()?;
            let key = CacheKey::new(DomainName::new(name), qtype, CLASS_IN);
            let now = Instant::now();
            if let Some((entry, ttl)) = cache.get_positive(&key, now).await {
                let rdata: Vec<String> = entry
                    .records
                    .iter()
                    .map(|r| hex_encode(&r.rdata))
                    .collect();
                let mut reply = format!("POS {ttl} {}", rdata.len());
                for hex in &rdata {
                    reply.push('\n');
                    reply.push_str(hex);
                }
                Some(reply)
            } else if let Some((entry, ttl)) = cache.get_negative(&key, now).await {
                let rcode: u8 = if entry.is_nxdomain { 3 } else { 0 };
                Some(format!("NEG {ttl} {rcode}"))
            } else {
                Some("NOTFOUND".to_owned())
            }
        }
        Some("PUTP") => {
            let name = parts.next()?;
            let qtype: u16 = parts.next()?.parse().ok()?;
            let ttl: u32 = parts.next()?.parse().ok()?;
            let rdata: Vec<bytes::Bytes> = parts
                .map(|hex| hex_decode(hex).map(bytes::Bytes::from))
                .collect::<Option<_>>()?;
            let records = rdata
                .into_iter()
                .map(|rd| dns_wire::types::ResourceRecord {
                    name: DomainName::new(name),
                    rtype: qtype,
                    rclass: CLASS_IN,
                    ttl,
                    rdata: rd,
                    rdata_offset: 0,
                })
                .collect();
            let key = CacheKey::new(DomainName::new(name), qtype, CLASS_IN);
            cache
                .put_positive(
                    key,
                    PositiveEntry {
                        records,
                        wire: bytes::Bytes::new(),
                    },
                    Duration::from_secs(u64::from(ttl)),
                    Instant::now(),
                )
                .await;
            Some("OK".to_owned())
        }
        Some("PUTN") => {
            let name = parts.next()?;
            let qtype: u16 = parts.next()?.parse().ok()?;
            let ttl: u32 = parts.next()?.parse().ok()?;
            let rcode: u8 = parts.next()?.parse().ok()?;
            let key = CacheKey::new(DomainName::new(name), qtype, CLASS_IN);
            cache
                .put_negative(
                    key,
                    NegativeEntry {
                        is_nxdomain: rcode == 3,
                    },
                    Duration::from_secs(u64::from(ttl)),
                    Instant::now(),
                )
                .await;
            Some("OK".to_owned())
        }
        Some("QUIT" | "EXIT") => None,
        _ => Some("ERR unknown verb".to_owned()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
