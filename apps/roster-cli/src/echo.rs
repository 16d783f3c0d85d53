//! TCP line-echo service advertised through roster, and a client that finds it.

use std::net::Ipv4Addr;

use anyhow::{Context, Result, bail};
use roster::{Client, DiscoveryApi};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_NAME: &str = "echo";
pub const DEFAULT_PORT: u16 = 3333;

/// Binds `port`, registers `tcp://<local-ip>:<port>` under `name` and echoes
/// lines until `cancel` fires. The registration is withdrawn before returning.
pub async fn run_server(
    client: &Client,
    name: &str,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    let port = listener.local_addr()?.port();
    let ip = roster::local_ip()?;
    let endpoint = format!("tcp://{ip}:{port}");

    let handle = client.register(name, &endpoint, None).await?;
    println!("{name} listening on {endpoint}");

    serve(listener, cancel).await;

    info!(service = name, "shutting down, withdrawing registration");
    handle.unregister().await;
    Ok(())
}

async fn serve(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "connection accepted");
                    tokio::spawn(async move {
                        if let Err(e) = echo_lines(stream).await {
                            warn!(%peer, error = %e, "echo connection failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
        }
    }
}

async fn echo_lines(stream: TcpStream) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Discovers `name`, sends `message` as one line and returns the reply.
pub async fn run_client(client: &Client, name: &str, message: &str) -> Result<String> {
    let service = client.discover(name).await?;
    let addr = socket_addr(&service.endpoint)?;
    debug!(service = name, %addr, "connecting");

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(message.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    let reply = BufReader::new(reader)
        .lines()
        .next_line()
        .await?
        .context("connection closed before a reply arrived")?;
    Ok(reply)
}

/// `tcp://host:port` to `host:port`.
fn socket_addr(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint).with_context(|| format!("invalid endpoint '{endpoint}'"))?;
    if url.scheme() != "tcp" {
        bail!("endpoint '{endpoint}' is not a tcp:// address");
    }
    let host = url
        .host_str()
        .with_context(|| format!("endpoint '{endpoint}' has no host"))?;
    let port = url
        .port()
        .with_context(|| format!("endpoint '{endpoint}' has no port"))?;
    Ok(format!("{host}:{port}"))
}
