use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tokio_rustls::{
    client::TlsStream,
    rustls::{self, pki_types::ServerName, pki_types::TrustAnchor},
    TlsConnector,
};
use url::Url;

use crate::{Options, Result, WebSocketError};

/// A TCP stream, optionally wrapped in TLS.
#[pin_project(project = MaybeTlsProj)]
pub enum MaybeTlsStream<S> {
    /// `ws://` and `http://` targets.
    Plain(#[pin] S),
    /// `wss://` and `https://` targets.
    Tls(#[pin] TlsStream<S>),
}

impl<S> AsyncRead for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsProj::Plain(stream) => stream.poll_read(cx, buf),
            MaybeTlsProj::Tls(stream) => stream.poll_read(cx, buf),
        }
    }
}

impl<S> AsyncWrite for MaybeTlsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            MaybeTlsProj::Plain(stream) => stream.poll_write(cx, buf),
            MaybeTlsProj::Tls(stream) => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsProj::Plain(stream) => stream.poll_flush(cx),
            MaybeTlsProj::Tls(stream) => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            MaybeTlsProj::Plain(stream) => stream.poll_shutdown(cx),
            MaybeTlsProj::Tls(stream) => stream.poll_shutdown(cx),
        }
    }
}

/// Whether `url` needs TLS. Fails for schemes other than `ws`, `wss`, `http` and `https`.
pub(crate) fn is_secure(url: &Url) -> Result<bool> {
    match url.scheme() {
        "ws" | "http" => Ok(false),
        "wss" | "https" => Ok(true),
        _ => Err(WebSocketError::InvalidHttpScheme),
    }
}

/// Opens the TCP connection for `url` and negotiates TLS when the scheme asks for it.
pub(crate) async fn connect(
    url: &Url,
    options: &Options,
    connector: Option<TlsConnector>,
) -> Result<MaybeTlsStream<TcpStream>> {
    let secure = is_secure(url)?;
    let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
    let port = url
        .port_or_known_default()
        .unwrap_or(if secure { 443 } else { 80 });
    // IPv6 literals come bracketed from the url crate
    let host = host.trim_start_matches('[').trim_end_matches(']');

    #[cfg(feature = "logging")]
    log::debug!("connecting to {host}:{port} (tls={secure})");

    let tcp_stream = TcpStream::connect((host, port))
        .await
        .map_err(WebSocketError::ConnectFailed)?;
    let _ = tcp_stream.set_nodelay(options.no_delay);

    if !secure {
        return Ok(MaybeTlsStream::Plain(tcp_stream));
    }

    let connector = match connector {
        Some(connector) => connector,
        None => tls_connector()?,
    };
    let domain = ServerName::try_from(host.to_string()).map_err(|_| {
        WebSocketError::ConnectFailed(io::Error::new(io::ErrorKind::InvalidInput, "invalid dnsname"))
    })?;

    let tls_stream = connector
        .connect(domain, tcp_stream)
        .await
        .map_err(WebSocketError::ConnectFailed)?;

    Ok(MaybeTlsStream::Tls(tls_stream))
}

/// Creates a TLS connector trusting the webpki root certificates.
pub(crate) fn tls_connector() -> Result<TlsConnector> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| TrustAnchor {
        subject: ta.subject.clone(),
        subject_public_key_info: ta.subject_public_key_info.clone(),
        name_constraints: ta.name_constraints.clone(),
    }));

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    config.alpn_protocols = vec!["http/1.1".into()];

    Ok(TlsConnector::from(Arc::new(config)))
}
