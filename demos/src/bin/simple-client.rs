use std::{net::SocketAddr, sync::Arc};

use splitwire::{DuplexConn, SplitRetryStream};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("splitwire=debug".parse().unwrap()))
        .init();

    let address: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9091".to_owned())
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let stream = Arc::new(SplitRetryStream::dial(address).await?);
    info!(%address, timeout = ?stream.timeout(), "connected to server");

    let writer = {
        let stream = stream.clone();
        tokio::spawn(async move {
            for i in 1..=2 {
                stream.write_all(format!("message {}\n", i).as_bytes()).await?;
            }
            stream.close_write().await
        })
    };

    let mut buf = vec![0; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                info!("server closed connection");
                break;
            }
            Ok(n) => info!("echo received: {}", String::from_utf8_lossy(&buf[..n]).trim_end()),
            Err(e) => {
                info!("read failed: {:?}", e);
                return Err(e);
            }
        }
    }

    writer.await??;
    if let Some(stats) = stream.retry_stats() {
        info!(?stats, "retry decided");
    }
    Ok(())
}
