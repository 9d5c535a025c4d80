//! HTTP configuration server.
//!
//! Runs the axum router on a dedicated thread with its own current-thread
//! runtime, so the synchronous scheduler never has to enter async code.
//! `stop` triggers a graceful shutdown and joins the thread.

use crate::create_router;
use sensornode_controller::{ConfigurationHook, ConfigurationServer};
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

struct Running {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct HttpConfigurationServer {
    bind_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    running: Option<Running>,
}

impl HttpConfigurationServer {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            local_addr: None,
            running: None,
        }
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl ConfigurationServer for HttpConfigurationServer {
    fn start(&mut self, hook: ConfigurationHook) -> Result<(), String> {
        if self.running.is_some() {
            return Err("configuration server already running".to_string());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("failed to build runtime: {}", e))?;
        let listener = runtime
            .block_on(TcpListener::bind(self.bind_addr))
            .map_err(|e| format!("failed to bind {}: {}", self.bind_addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| format!("failed to read bound address: {}", e))?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let app = create_router(hook);
        let thread = thread::Builder::new()
            .name("config-http".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(e) = result {
                        error!("Configuration server error: {}", e);
                    }
                });
            })
            .map_err(|e| format!("failed to spawn server thread: {}", e))?;

        info!("Configuration server listening on http://{}", local_addr);
        self.local_addr = Some(local_addr);
        self.running = Some(Running { shutdown, thread });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if running.thread.join().is_err() {
            warn!("Configuration server thread panicked");
        }
        self.local_addr = None;
        info!("Configuration server stopped");
    }
}

impl Drop for HttpConfigurationServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::fixture;
    use sensornode_controller::EventKind;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn request(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_serves_until_stopped() {
        let fx = fixture();
        let mut server = HttpConfigurationServer::new("127.0.0.1:0".parse().unwrap());
        server.start(fx.hook.clone()).unwrap();
        let addr = server.local_addr().unwrap();

        let response = request(
            addr,
            "GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        );
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"access_point_active\":true"));

        server.stop();
        assert!(!server.is_running());
        assert!(TcpStream::connect(addr).is_err());
        // Stopping twice is harmless.
        server.stop();
    }

    #[test]
    fn test_configuration_raises_sleep() {
        let fx = fixture();
        let mut server = HttpConfigurationServer::new("127.0.0.1:0".parse().unwrap());
        server.start(fx.hook.clone()).unwrap();
        let addr = server.local_addr().unwrap();

        let body = r#"{"credentials":[{"ssid":"homewifi","password":"A"}],"cloud":{"provider":"kaa","app_version":"v1","endpoint_token":"ep"}}"#;
        let raw = format!(
            "POST /config HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let response = request(addr, &raw);
        assert!(response.starts_with("HTTP/1.1 200"));

        server.stop();
        assert_eq!(fx.queue.pop().unwrap().kind, EventKind::GoToSleep);
    }

    #[test]
    fn test_second_start_rejected() {
        let fx = fixture();
        let mut server = HttpConfigurationServer::new("127.0.0.1:0".parse().unwrap());
        server.start(fx.hook.clone()).unwrap();
        assert!(server.start(fx.hook.clone()).is_err());
        server.stop();
    }
}
