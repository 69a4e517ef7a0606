//! Upstream DNS resolver client: UDP/TCP/TLS transports
//! behind one descriptor grammar, each bounded by a 5-second deadline.
use std::net::IpAddr;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::dns::wire::MAX_PACKET_SIZE;
use crate::error::{Error, Result};

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
    Tls,
}

/// `udp:|tcp:|tls:/<empty>/<host:port>[/<k=v&k=v…>]`.
#[derive(Debug, Clone, Default)]
pub struct UpstreamDescriptor {
    /// `None` when the scheme prefix is unrecognized — a distinct case
    /// where no upstream call is ever attempted.
    pub transport: Option<Transport>,
    pub host: String,
    pub port: u16,
    pub ecs: Option<IpAddr>,
    pub pd: Option<String>,
    /// `type=A` or `type=AAAA`: force a single address family.
    pub forced_qtype: Option<u16>,
}

impl UpstreamDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let (scheme, rest) = descriptor
            .split_once(':')
            .ok_or_else(|| Error::config(format!("upstream descriptor missing scheme: {descriptor}")))?;

        let transport = match scheme {
            "udp" => Some(Transport::Udp),
            "tcp" => Some(Transport::Tcp),
            "tls" => Some(Transport::Tls),
            _ => None,
        };

        let rest = rest.trim_start_matches('/');
        let (hostport, opts) = match rest.split_once('/') {
            Some((h, o)) => (h, Some(o)),
            None => (rest, None),
        };

        let (host, port) = hostport
            .rsplit_once(':')
            .ok_or_else(|| Error::config(format!("upstream descriptor missing port: {descriptor}")))?;
        let port: u16 = port.parse()?;

        let mut desc = UpstreamDescriptor {
            transport,
            host: host.to_string(),
            port,
            ecs: None,
            pd: None,
            forced_qtype: None,
        };

        if let Some(opts) = opts {
            for kv in opts.split('&') {
                let Some((k, v)) = kv.split_once('=') else { continue };
                match k {
                    "ecs" => desc.ecs = v.parse().ok(),
                    "pd" => desc.pd = Some(v.to_string()),
                    "type" => {
                        desc.forced_qtype = match v {
                            "A" => Some(crate::dns::wire::QTYPE_A),
                            "AAAA" => Some(crate::dns::wire::QTYPE_AAAA),
                            _ => None,
                        }
                    }
                    _ => {}
                }
            }
        }

        Ok(desc)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `udp:` — single datagram exchange, 5s read deadline. The socket is
/// connected to the upstream address, but a connected UDP socket still
/// accepts any datagram handed to it by the kernel regardless of which
/// query it answers, so replies are matched against the request's own ID
/// (always 0 for `pack_request`'s host-local queries) rather than assumed.
pub async fn query_udp(desc: &UpstreamDescriptor, request: &[u8]) -> Result<Vec<u8>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(desc.addr()).await?;

    let request_id = if request.len() >= 2 { BigEndian::read_u16(&request[..2]) } else { 0 };

    timeout(DEADLINE, socket.send(request))
        .await
        .map_err(|_| Error::resolve("udp send timed out"))??;

    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        let mut buf = [0u8; MAX_PACKET_SIZE];
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(Error::resolve("udp read timed out"));
        }
        let n = match timeout(remaining, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(Error::resolve(e.to_string())),
            Err(_) => return Err(Error::resolve("udp read timed out")),
        };
        if n > MAX_PACKET_SIZE {
            // silent drop on oversized replies
            continue;
        }
        if n < 2 || BigEndian::read_u16(&buf[..2]) != request_id {
            continue;
        }
        return Ok(buf[..n].to_vec());
    }
}

async fn length_prefixed_exchange<S>(mut stream: S, request: &[u8]) -> Result<Vec<u8>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut framed = Vec::with_capacity(request.len() + 2);
    framed.write_u16::<BigEndian>(request.len() as u16).unwrap();
    framed.extend_from_slice(request);
    stream.write_all(&framed).await?;

    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len > MAX_PACKET_SIZE {
        return Ok(Vec::new());
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// `tcp:` — 2-byte big-endian length prefix, 5s connect timeout.
pub async fn query_tcp(desc: &UpstreamDescriptor, request: &[u8]) -> Result<Vec<u8>> {
    let stream = timeout(DEADLINE, TcpStream::connect(desc.addr()))
        .await
        .map_err(|_| Error::resolve("tcp connect timed out"))??;
    timeout(DEADLINE, length_prefixed_exchange(stream, request))
        .await
        .map_err(|_| Error::resolve("tcp exchange timed out"))?
}

/// `tls:` — same framing as `tcp:`, over a non-validating TLS session.
pub async fn query_tls(desc: &UpstreamDescriptor, request: &[u8]) -> Result<Vec<u8>> {
    let tcp = timeout(DEADLINE, TcpStream::connect(desc.addr()))
        .await
        .map_err(|_| Error::resolve("tls connect timed out"))??;

    let connector = crate::insecure_tls::connector();
    let server_name = rustls::ServerName::try_from(desc.host.as_str())
        .map_err(|e| Error::resolve(format!("invalid TLS server name: {e}")))?;
    let stream = timeout(DEADLINE, connector.connect(server_name, tcp))
        .await
        .map_err(|_| Error::resolve("tls handshake timed out"))??;

    timeout(DEADLINE, length_prefixed_exchange(stream, request))
        .await
        .map_err(|_| Error::resolve("tls exchange timed out"))?
}

/// Dispatch to the transport named by `desc.transport`. An unrecognized
/// scheme yields `Error::Resolve` directly rather than ever reaching a
/// transport-specific call.
pub async fn query(desc: &UpstreamDescriptor, request: &[u8]) -> Result<Vec<u8>> {
    match desc.transport {
        Some(Transport::Udp) => query_udp(desc, request).await,
        Some(Transport::Tcp) => query_tcp(desc, request).await,
        Some(Transport::Tls) => query_tls(desc, request).await,
        None => Err(Error::resolve(format!("unrecognized upstream scheme for {}", desc.addr()))),
    }
}

/// `TCPlookupDNS64`: issue a rewritten query forcing qtype A, then rewrite
/// each A answer into an AAAA answer carrying `prefix`.
pub async fn tcp_lookup_dns64(
    desc: &UpstreamDescriptor,
    name: &str,
    prefix: &[u8; 12],
) -> Result<Vec<u8>> {
    let request = crate::dns::wire::pack_request(name, crate::dns::wire::QTYPE_A, desc.ecs);
    let response = query_tcp(desc, &request).await?;
    crate::dns::wire::rewrite_dns64(&response, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_descriptor() {
        let desc = UpstreamDescriptor::parse("udp:///1.1.1.1:53").unwrap();
        assert_eq!(desc.transport, Some(Transport::Udp));
        assert_eq!(desc.host, "1.1.1.1");
        assert_eq!(desc.port, 53);
        assert!(desc.ecs.is_none());
    }

    #[test]
    fn parses_options() {
        let desc = UpstreamDescriptor::parse("tcp:///9.9.9.9:53/pd=64:ff9b::&type=A").unwrap();
        assert_eq!(desc.transport, Some(Transport::Tcp));
        assert_eq!(desc.pd.as_deref(), Some("64:ff9b::"));
        assert_eq!(desc.forced_qtype, Some(crate::dns::wire::QTYPE_A));
    }

    #[test]
    fn unrecognized_scheme_has_no_transport() {
        let desc = UpstreamDescriptor::parse("quic:///1.1.1.1:53").unwrap();
        assert!(desc.transport.is_none());
    }

    #[tokio::test]
    async fn query_udp_accepts_a_zero_id_reply_matching_a_zero_id_request() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let desc = UpstreamDescriptor {
            transport: Some(Transport::Udp),
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        };

        let request = crate::dns::wire::pack_request("example.com", crate::dns::wire::QTYPE_A, None);

        tokio::spawn(async move {
            let mut buf = [0u8; MAX_PACKET_SIZE];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let resp = crate::dns::wire::build_response(
                &buf[..n],
                &["1.1.1.1".parse().unwrap()],
                crate::dns::wire::QTYPE_A,
            )
            .unwrap();
            server.send_to(&resp, peer).await.unwrap();
        });

        let resp = query_udp(&desc, &request).await.unwrap();
        let answers = crate::dns::wire::get_answers(&resp).unwrap();
        assert_eq!(answers.a, vec!["1.1.1.1".parse::<std::net::Ipv4Addr>().unwrap()]);
    }
}
