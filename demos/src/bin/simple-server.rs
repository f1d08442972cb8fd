use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    const ADDRESS: &str = "127.0.0.1:9091";
    let listener = TcpListener::bind(ADDRESS).await?;
    println!("listening on: {:?}", ADDRESS);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        println!("accepted connection from {}", peer);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) => {
                        println!("client closed connection");
                        return;
                    }
                    Ok(n) => {
                        if let Err(e) = socket.write_all(&buf[..n]).await {
                            println!("sending failed: {:?}", e);
                            return;
                        }
                    }
                    Err(e) => {
                        println!("read failed: {:?}", e);
                        return;
                    }
                }
            }
        });
    }
}
