//! Control server
//!
//! Listens on a Unix socket for newline-delimited JSON requests from the
//! chat front end (or any other local client) and dispatches them to the
//! handler. One JSON object per line in, one per line out.

use crate::control::{ApiError, ApiRequest, ApiResponse, RequestHandler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{debug, error, info};

/// Default control socket path
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/wg-provision.sock";

/// Control server owning the listening socket
pub struct ControlServer {
    /// Path to the Unix socket
    socket_path: PathBuf,
    /// Request handler
    handler: Arc<RequestHandler>,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(socket_path: PathBuf, handler: Arc<RequestHandler>) -> Self {
        Self {
            socket_path,
            handler,
        }
    }

    /// Bind the socket and serve connections until the process stops
    pub async fn start(&self) -> Result<(), ApiError> {
        info!("Starting control server at {:?}", self.socket_path);

        // A previous run may have left its socket behind
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                ApiError::InternalError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ApiError::InternalError(format!("Failed to create socket directory: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| ApiError::InternalError(format!("Failed to bind Unix socket: {}", e)))?;

        info!("Control server listening at {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Remove the socket file
    pub fn shutdown(&self) -> Result<(), ApiError> {
        info!("Shutting down control server");

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .map_err(|e| ApiError::InternalError(format!("Failed to remove socket: {}", e)))?;
        }

        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: tokio::net::UnixStream,
    handler: Arc<RequestHandler>,
) -> Result<(), ApiError> {
    debug!("New control connection");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Control client disconnected");
                break;
            }
            Ok(_) => {
                let request_str = line.trim();
                if request_str.is_empty() {
                    continue;
                }

                let response = match ApiRequest::from_json(request_str) {
                    Ok(request) => handler.handle_request(request).await,
                    Err(e) => {
                        error!("Failed to parse request: {}", e);
                        ApiResponse::error("unknown".to_string(), e)
                    }
                };

                let response_str = response.to_json()?;
                writer
                    .write_all(response_str.as_bytes())
                    .await
                    .map_err(|e| {
                        ApiError::InternalError(format!("Failed to write response: {}", e))
                    })?;
                writer
                    .write_all(b"\n")
                    .await
                    .map_err(|e| ApiError::InternalError(format!("Failed to write newline: {}", e)))?;
                writer
                    .flush()
                    .await
                    .map_err(|e| ApiError::InternalError(format!("Failed to flush response: {}", e)))?;
            }
            Err(e) => {
                error!("Failed to read from socket: {}", e);
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provision::Provisioner;
    use crate::wireguard::{DeviceBackend, KeyPair, MemoryDevice};
    use tempfile::TempDir;

    fn test_handler(dir: &TempDir) -> Arc<RequestHandler> {
        let config = Config {
            server_public_key: KeyPair::generate().public.to_base64(),
            output_dir: dir.path().join("configs").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let device = Arc::new(MemoryDevice::new()) as Arc<dyn DeviceBackend>;
        Arc::new(RequestHandler::new(Arc::new(
            Provisioner::new(&config, device).unwrap(),
        )))
    }

    #[tokio::test]
    async fn test_server_shutdown_removes_socket() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("test.sock");
        let server = ControlServer::new(socket_path.clone(), test_handler(&dir));

        std::fs::write(&socket_path, "").unwrap();
        assert!(socket_path.exists());

        server.shutdown().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_request_over_socket() {
        let dir = TempDir::new().unwrap();
        let socket_path = dir.path().join("control.sock");
        let server = Arc::new(ControlServer::new(socket_path.clone(), test_handler(&dir)));

        let server_task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };

        // Wait for the socket to appear
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let stream = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"id\":\"t1\",\"request\":\"generate_config\"}\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        let response = ApiResponse::from_json(line.trim()).unwrap();
        assert_eq!(response.id, "t1");
        assert!(response.success);

        server_task.abort();
    }
}
