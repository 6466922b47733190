use crate::config::Config;
use crate::error::Result;
use crate::smtp::handler::HandlerChain;
use crate::smtp::session::serve_connection;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct SmtpServer {
    config: Arc<Config>,
    chain: Arc<HandlerChain>,
}

impl SmtpServer {
    pub fn new(config: Arc<Config>, chain: Arc<HandlerChain>) -> Self {
        Self { config, chain }
    }

    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.smtp.listen_addr).await?;
        info!("SMTP server listening on {}", self.config.smtp.listen_addr);
        info!("SMTP handlers: {}", self.chain.names().join(", "));

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);
                    let config = Arc::clone(&self.config);
                    let chain = Arc::clone(&self.chain);

                    tokio::spawn(async move {
                        let (reader, writer) = socket.into_split();
                        let peer = addr.to_string();
                        if let Err(e) = serve_connection(
                            reader,
                            writer,
                            &peer,
                            &config.server.hostname,
                            &chain,
                            &config.smtp,
                        )
                        .await
                        {
                            error!("Session error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
