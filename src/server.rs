use crate::config::Config;
use crate::logger::{default_logger, LoggerRef};
use crate::session::{run_session, Session, SessionOptions};
use crate::socket::bind_interface;
use crate::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

const LISTEN_BACKLOG: u32 = 1024;

/// Throughput test server.
///
/// Accepts connections and runs one independent session per connection on
/// its own task. A failing session is logged and dropped. The accept loop
/// keeps running.
///
/// # Examples
///
/// ```no_run
/// use pperf::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(5201));
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
///
/// Binding first gives access to the chosen port:
///
/// ```no_run
/// use pperf::{Config, Server};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let server = Server::new(Config::server(0));
/// let listener = server.bind().await?;
/// println!("listening on {}", listener.local_addr()?);
/// server.serve(listener).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: Config,
    logger: LoggerRef,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            logger: default_logger(),
        }
    }

    /// Replaces the logger used by the accept loop and every session.
    pub fn with_logger(mut self, logger: LoggerRef) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds and listens on the configured address and port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid configuration and
    /// [`Error::ListenSetup`] if the socket cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        self.config.validate()?;

        let ip = self
            .config
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, self.config.port);
        let listen_err = |source| Error::ListenSetup {
            addr: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(listen_err)?;
        socket.set_reuseaddr(true).map_err(listen_err)?;
        bind_interface(&socket, self.config.interface.as_deref(), &self.logger)
            .map_err(listen_err)?;
        socket.bind(addr).map_err(listen_err)?;
        let listener = socket.listen(LISTEN_BACKLOG).map_err(listen_err)?;

        self.logger.info(&format!(
            "Server listening on {}",
            listener.local_addr().map_err(listen_err)?
        ));
        Ok(listener)
    }

    /// Runs the accept loop on an already bound listener.
    ///
    /// Never returns under normal operation. Accept failures are logged and
    /// skipped.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    self.logger.info(&format!("New connection from {}", addr));
                    let config = self.config.clone();
                    let logger = self.logger.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, addr, config, logger.clone()).await {
                            // already logged at error level by the session
                            logger.debug(&format!("Session with {} failed: {}", addr, e));
                        }
                    });
                }
                Err(e) => {
                    self.logger.error(&Error::Accept(e).to_string());
                }
            }
        }
    }

    /// Binds, then serves forever.
    ///
    /// # Errors
    ///
    /// Only listen setup can fail.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

async fn handle_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    config: Config,
    logger: LoggerRef,
) -> Result<()> {
    let options = SessionOptions::from_config(&config, addr.to_string());
    let mut session = Session::new();

    run_session(&mut stream, &mut session, &options, logger.as_ref()).await?;

    logger.info(&format!(
        "Test completed for {}: recv {} / peer reported {}",
        addr,
        session.recv().stats(),
        session.send().stats()
    ));
    Ok(())
}
