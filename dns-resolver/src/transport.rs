//! Wire transport: UDP with TCP fallback on truncation, and DNS-over-TLS.
//!
//! Every function here returns an empty buffer on any I/O failure rather
//! than propagating it — a single nameserver being unreachable is routine
//! during iterative resolution and is handled by the engine trying the
//! next one, not by unwinding an error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, warn};

const UDP_RECV_BUFFER_SIZE: usize = 4096;
const TCP_LENGTH_PREFIX_SIZE: usize = 2;

/// Sends `query` to `addr` over UDP and returns the reply, or an empty
/// `Vec` if the send, receive, or the `timeout` itself fails.
pub async fn send_udp_bytes(addr: SocketAddr, query: &[u8], timeout_duration: Duration) -> Vec<u8> {
    let attempt = async {
        let local_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        }
        .parse()
        .unwrap();
        let socket = UdpSocket::bind(local_addr).await.ok()?;
        socket.connect(addr).await.ok()?;
        socket.send(query).await.ok()?;
        let mut buf = vec![0u8; UDP_RECV_BUFFER_SIZE];
        let n = socket.recv(&mut buf).await.ok()?;
        buf.truncate(n);
        Some(buf)
    };

    match timeout(timeout_duration, attempt).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!(%addr, "udp query failed");
            Vec::new()
        }
        Err(_) => {
            debug!(%addr, "udp query timed out");
            Vec::new()
        }
    }
}

/// Sends `query` to `addr` over a plain TCP connection, 2-byte length
/// prefixed, and returns the reply payload (prefix stripped).
pub async fn send_tcp_bytes(addr: SocketAddr, query: &[u8], timeout_duration: Duration) -> Vec<u8> {
    let attempt = async {
        let mut stream = TcpStream::connect(addr).await.ok()?;
        write_framed(&mut stream, query).await.ok()?;
        read_framed(&mut stream).await.ok()
    };

    match timeout(timeout_duration, attempt).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!(%addr, "tcp query failed");
            Vec::new()
        }
        Err(_) => {
            debug!(%addr, "tcp query timed out");
            Vec::new()
        }
    }
}

/// Sends `query` to `addr` over DNS-over-TLS, verifying the presented
/// certificate against `sni` unless `protocol.insecure_dot` is set.
pub async fn send_dot_bytes(
    addr: SocketAddr,
    sni: &str,
    query: &[u8],
    insecure: bool,
    timeout_duration: Duration,
) -> Vec<u8> {
    let attempt = async {
        let config = tls_client_config(insecure);
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(sni.to_owned()).ok()?;
        let tcp = TcpStream::connect(addr).await.ok()?;
        let mut tls = connector.connect(server_name, tcp).await.ok()?;
        write_framed(&mut tls, query).await.ok()?;
        read_framed(&mut tls).await.ok()
    };

    match timeout(timeout_duration, attempt).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            warn!(%addr, sni, "dot query failed");
            Vec::new()
        }
        Err(_) => {
            warn!(%addr, sni, "dot query timed out");
            Vec::new()
        }
    }
}

fn tls_client_config(insecure: bool) -> rustls::ClientConfig {
    if insecure {
        return rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth();
    }

    let mut roots = rustls::RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        result if !result.certs.is_empty() => {
            for cert in result.certs {
                let _ = roots.add(cert);
            }
        }
        _ => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls_pki_types::CertificateDer<'_>,
        _intermediates: &[rustls_pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls_pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

async fn write_framed<S: AsyncWriteExt + Unpin>(stream: &mut S, payload: &[u8]) -> std::io::Result<()> {
    let len = u16::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

async fn read_framed<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let mut prefix = [0u8; TCP_LENGTH_PREFIX_SIZE];
    stream.read_exact(&mut prefix).await?;
    let len = u16::from_be_bytes(prefix) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
