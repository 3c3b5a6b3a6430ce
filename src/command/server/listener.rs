use crate::command::server::http_server::serve_request;
use crate::command::server::ServerContext;
use crate::command::Error;
use crate::configuration::ServerConfig;
use arc_swap::ArcSwap;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info};

fn timeouts(server_config: &ServerConfig) -> [Duration; 2] {
    [
        Duration::from_secs(server_config.query_timeout),
        Duration::from_secs(server_config.query_timeout_grace_period),
    ]
}

/// Plain TCP listener; TLS is terminated in front of the gatekeeper.
///
/// Each accepted connection captures the context current at accept time.
pub struct Listener {
    binding_address: SocketAddr,
    context: ArcSwap<ServerContext>,
    timeouts: ArcSwap<[Duration; 2]>,
}

impl Listener {
    pub fn new(server_config: &ServerConfig, context: ServerContext) -> Self {
        Self {
            binding_address: SocketAddr::new(server_config.bind_address, server_config.port),
            context: ArcSwap::from_pointee(context),
            timeouts: ArcSwap::from_pointee(timeouts(server_config)),
        }
    }

    /// The binding address is only read at startup.
    pub fn notify_config_change(&self, server_config: &ServerConfig, context: ServerContext) {
        self.context.store(Arc::new(context));
        self.timeouts.store(Arc::new(timeouts(server_config)));
    }

    async fn bind(&self) -> Result<TcpListener, Error> {
        TcpListener::bind(self.binding_address)
            .await
            .map_err(|err| {
                Error::Initialization(format!("Failed to bind to {}: {err}", self.binding_address))
            })
    }

    pub async fn serve(&self) -> Result<(), Error> {
        let listener = self.bind().await?;
        info!("Listening on {}", self.binding_address);

        loop {
            let (tcp, remote_address) = listener.accept().await.map_err(|err| {
                Error::Execution(format!("Failed to accept incoming connection: {err}"))
            })?;
            debug!("Accepted connection from {remote_address}");

            let context = Arc::clone(&self.context.load());
            let timeouts = Arc::clone(&self.timeouts.load());
            tokio::spawn(Box::pin(serve_request(TokioIo::new(tcp), context, timeouts)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::server::server_context::tests::create_test_server_context;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn server_config(port: u16, query_timeout: u64, grace_period: u64) -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            port,
            query_timeout,
            query_timeout_grace_period: grace_period,
        }
    }

    fn free_port() -> u16 {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    #[test]
    fn test_listener_new() {
        let config = server_config(8080, 1800, 30);

        let listener = Listener::new(&config, create_test_server_context());

        assert_eq!(
            listener.binding_address,
            SocketAddr::from(([127, 0, 0, 1], 8080))
        );
        let timeouts = listener.timeouts.load();
        assert_eq!(timeouts[0], Duration::from_secs(1800));
        assert_eq!(timeouts[1], Duration::from_secs(30));
    }

    #[test]
    fn test_listener_notify_config_change() {
        let config = server_config(8080, 3600, 60);
        let listener = Listener::new(&config, create_test_server_context());

        let reloaded = server_config(9090, 120, 10);
        listener.notify_config_change(&reloaded, create_test_server_context());

        assert_eq!(listener.binding_address.port(), 8080);
        let timeouts = listener.timeouts.load();
        assert_eq!(timeouts[0], Duration::from_secs(120));
        assert_eq!(timeouts[1], Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_bind_port_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let listener = Listener::new(&server_config(port, 5, 1), create_test_server_context());

        match listener.serve().await {
            Err(Error::Initialization(msg)) => {
                assert!(msg.starts_with("Failed to bind to 127.0.0.1:"));
            }
            _ => panic!("Expected Initialization error"),
        }
    }

    #[tokio::test]
    async fn test_listener_serves_healthz() {
        let port = free_port();
        let listener = Arc::new(Listener::new(
            &server_config(port, 5, 1),
            create_test_server_context(),
        ));
        let server = Arc::clone(&listener);
        let handle = tokio::spawn(async move { server.serve().await });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(connected) = TcpStream::connect(("127.0.0.1", port)).await {
                stream = Some(connected);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut stream = stream.unwrap();

        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));

        handle.abort();
    }
}
