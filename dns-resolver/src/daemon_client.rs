//! Client for the optional cache daemon's line protocol (ASCII, `\n`
//! terminated, `\r` tolerated and stripped, 8192-byte line cap).
//!
//! A client connects once, sends `STATUS` to confirm it is actually talking
//! to a cache daemon, and keeps that one connection for the lifetime of the
//! resolver. There is no reconnect-and-retry: if the connection drops, the
//! caller falls back to resolving without the daemon.

use std::fmt;
use std::net::SocketAddr;

use dns_wire::types::DomainName;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const MAX_LINE_BYTES: usize = 8192;

#[derive(Debug)]
pub enum DaemonError {
    Connect(std::io::Error),
    Io(std::io::Error),
    UnexpectedReply(String),
    LineTooLong,
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Connect(e) => write!(f, "could not connect to cache daemon: {e}"),
            DaemonError::Io(e) => write!(f, "cache daemon I/O error: {e}"),
            DaemonError::UnexpectedReply(line) => write!(f, "unexpected cache daemon reply: {line}"),
            DaemonError::LineTooLong => write!(f, "cache daemon line exceeded {MAX_LINE_BYTES} bytes"),
        }
    }
}

impl std::error::Error for DaemonError {}

pub struct DaemonStatus {
    pub positive_capacity: usize,
    pub negative_capacity: usize,
}

pub enum Lookup {
    Positive { ttl: u32, rdata: Vec<Vec<u8>> },
    Negative { ttl: u32, rcode: u8 },
    NotFound,
}

/// What the `GET` reply's first line says, before a multi-line `POS` body
/// (if any) has been read off the wire.
enum GetHeader {
    NotFound,
    Negative { ttl: u32, rcode: u8 },
    Positive { ttl: u32, count: usize },
}

/// A single persistent connection to the cache daemon.
pub struct DaemonClient {
    stream: BufReader<TcpStream>,
}

impl DaemonClient {
    /// Connects to `addr` and verifies it answers `STATUS` like a cache
    /// daemon before returning.
    pub async fn connect(addr: SocketAddr) -> Result<(Self, DaemonStatus), DaemonError> {
        let stream = TcpStream::connect(addr).await.map_err(DaemonError::Connect)?;
        let mut client = Self {
            stream: BufReader::new(stream),
        };
        let status = client.status().await?;
        Ok((client, status))
    }

    pub async fn status(&mut self) -> Result<DaemonStatus, DaemonError> {
        self.write_line("STATUS").await?;
        let reply = self.read_line().await?;
        parse_status(&reply)
    }

    pub async fn get(&mut self, name: &DomainName, qtype: u16) -> Result<Lookup, DaemonError> {
        self.write_line(&format!("GET {} {}", name.as_str(), qtype))
            .await?;
        let header = self.read_line().await?;
        match parse_get_header(&header)? {
            GetHeader::NotFound => Ok(Lookup::NotFound),
            GetHeader::Negative { ttl, rcode } => Ok(Lookup::Negative { ttl, rcode }),
            GetHeader::Positive { ttl, count } => {
                let mut rdata = Vec::with_capacity(count);
                for _ in 0..count {
                    let line = self.read_line().await?;
                    rdata.push(hex_decode(&line).map_err(|_| DaemonError::UnexpectedReply(line))?);
                }
                Ok(Lookup::Positive { ttl, rdata })
            }
        }
    }

    pub async fn put_positive(
        &mut self,
        name: &DomainName,
        qtype: u16,
        ttl: u32,
        rdata: &[Vec<u8>],
    ) -> Result<(), DaemonError> {
        let mut line = format!("PUTP {} {} {}", name.as_str(), qtype, ttl);
        for rr in rdata {
            line.push(' ');
            line.push_str(&hex_encode(rr));
        }
        self.write_line(&line).await?;
        self.expect_ok().await
    }

    pub async fn put_negative(
        &mut self,
        name: &DomainName,
        qtype: u16,
        ttl: u32,
        rcode: u8,
    ) -> Result<(), DaemonError> {
        self.write_line(&format!("PUTN {} {} {} {}", name.as_str(), qtype, ttl, rcode))
            .await?;
        self.expect_ok().await
    }

    pub async fn quit(mut self) -> Result<(), DaemonError> {
        self.write_line("QUIT").await
    }

    async fn expect_ok(&mut self) -> Result<(), DaemonError> {
        let reply = self.read_line().await?;
        if reply.starts_with("OK") {
            Ok(())
        } else {
            Err(DaemonError::UnexpectedReply(reply))
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<(), DaemonError> {
        let stream = self.stream.get_mut();
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(DaemonError::Io)?;
        stream.write_all(b"\n").await.map_err(DaemonError::Io)?;
        stream.flush().await.map_err(DaemonError::Io)
    }

    async fn read_line(&mut self) -> Result<String, DaemonError> {
        let mut raw = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut raw)
            .await
            .map_err(DaemonError::Io)?;
        if n == 0 {
            return Err(DaemonError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "cache daemon closed connection",
            )));
        }
        if raw.len() > MAX_LINE_BYTES {
            return Err(DaemonError::LineTooLong);
        }
        while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

fn parse_status(line: &str) -> Result<DaemonStatus, DaemonError> {
    // "OK cache_daemon {cp}/{cn}"
    let caps = line
        .rsplit(' ')
        .next()
        .ok_or_else(|| DaemonError::UnexpectedReply(line.to_owned()))?;
    let (cp, cn) = caps
        .split_once('/')
        .ok_or_else(|| DaemonError::UnexpectedReply(line.to_owned()))?;
    let positive_capacity = cp
        .parse()
        .map_err(|_| DaemonError::UnexpectedReply(line.to_owned()))?;
    let negative_capacity = cn
        .parse()
        .map_err(|_| DaemonError::UnexpectedReply(line.to_owned()))?;
    Ok(DaemonStatus {
        positive_capacity,
        negative_capacity,
    })
}

fn parse_get_header(line: &str) -> Result<GetHeader, DaemonError> {
    let mut parts = line.split(' ');
    match parts.next() {
        Some("NOTFOUND") => Ok(GetHeader::NotFound),
        Some("NEG") => {
            let ttl = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DaemonError::UnexpectedReply(line.to_owned()))?;
            let rcode = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DaemonError::UnexpectedReply(line.to_owned()))?;
            Ok(GetHeader::Negative { ttl, rcode })
        }
        Some("POS") => {
            let ttl = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DaemonError::UnexpectedReply(line.to_owned()))?;
            let count = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DaemonError::UnexpectedReply(line.to_owned()))?;
            Ok(GetHeader::Positive { ttl, count })
        }
        _ => Err(DaemonError::UnexpectedReply(line.to_owned())),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, std::num::ParseIntError> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let bytes = vec![0x01, 0xab, 0xff, 0x00];
        let encoded = hex_encode(&bytes);
        assert_eq!(encoded, "01abff00");
        assert_eq!(hex_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn parses_status_reply() {
        let status = parse_status("OK cache_daemon 50/50").unwrap();
        assert_eq!(status.positive_capacity, 50);
        assert_eq!(status.negative_capacity, 50);
    }

    #[test]
    fn parses_notfound_and_neg_and_pos_headers() {
        assert!(matches!(
            parse_get_header("NOTFOUND").unwrap(),
            GetHeader::NotFound
        ));
        assert!(matches!(
            parse_get_header("NEG 60 3").unwrap(),
            GetHeader::Negative { ttl: 60, rcode: 3 }
        ));
        assert!(matches!(
            parse_get_header("POS 300 1").unwrap(),
            GetHeader::Positive { ttl: 300, count: 1 }
        ));
    }

    #[tokio::test]
    async fn connect_against_in_process_daemon_and_round_trips_put_get() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            // STATUS handshake
            stream.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), "STATUS");
            stream
                .get_mut()
                .write_all(b"OK cache_daemon 50/50\n")
                .await
                .unwrap();

            line.clear();
            stream.read_line(&mut line).await.unwrap();
            assert!(line.starts_with("PUTP a.example. 1 300 0a0a0a01"));
            stream.get_mut().write_all(b"OK\n").await.unwrap();

            line.clear();
            stream.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim_end(), "GET a.example. 1");
            stream
                .get_mut()
                .write_all(b"POS 300 1\n0a0a0a01\n")
                .await
                .unwrap();
        });

        let (mut client, status) = DaemonClient::connect(addr).await.unwrap();
        assert_eq!(status.positive_capacity, 50);

        let name = DomainName::new("a.example.");
        client
            .put_positive(&name, 1, 300, &[vec![10, 10, 10, 1]])
            .await
            .unwrap();
        match client.get(&name, 1).await.unwrap() {
            Lookup::Positive { ttl, rdata } => {
                assert_eq!(ttl, 300);
                assert_eq!(rdata, vec![vec![10, 10, 10, 1]]);
            }
            _ => panic!("expected positive lookup"),
        }

        server.await.unwrap();
    }
}
