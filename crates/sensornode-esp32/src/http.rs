//! Configuration endpoints on the ESP HTTP server.
//!
//! Same routes and response envelope as the Linux server:
//! - `POST /config` - apply credentials and cloud target
//! - `GET /status` - node snapshot
//! - `GET /measurement` - one sensor reading
//! - `POST /measurement/test` - queue a test acquisition
//!
//! `EspHttpServer` runs its handlers on its own task, so `start` returns
//! immediately and dropping the server stops it.

use anyhow::anyhow;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Request};
use log::{info, warn};
use sensornode_controller::hook::{STATUS_BAD_REQUEST, STATUS_OK};
use sensornode_controller::{ConfigurationHook, ConfigurationServer, SensorError};
use sensornode_core::ConfigurationRequest;
use serde::Serialize;
use serde_json::json;

const MAX_BODY: usize = 16 * 1024;
const STACK_SIZE: usize = 16 * 1024;

fn read_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_BODY {
        return Err(anyhow!("request body too large"));
    }
    let mut body = vec![0u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_ok<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    data: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(&json!({ "data": data, "status": 0, "status_text": "ok" }))?;
    req.into_response(200, Some("OK"), &[("Content-Type", "application/json")])?
        .write_all(&body)?;
    Ok(())
}

fn write_failed(
    req: Request<&mut EspHttpConnection<'_>>,
    status: u16,
    status_text: &str,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(
        &json!({ "data": null, "status": status, "status_text": status_text }),
    )?;
    req.into_response(status, None, &[("Content-Type", "application/json")])?
        .write_all(&body)?;
    Ok(())
}

#[derive(Default)]
pub struct EspConfigurationServer {
    server: Option<EspHttpServer<'static>>,
}

impl EspConfigurationServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn serve(hook: ConfigurationHook) -> anyhow::Result<EspHttpServer<'static>> {
        let mut server = EspHttpServer::new(&Configuration {
            stack_size: STACK_SIZE,
            ..Default::default()
        })?;

        {
            let hook = hook.clone();
            server.fn_handler::<anyhow::Error, _>("/config", Method::Post, move |mut req| {
                let body = read_body(&mut req)?;
                let request: ConfigurationRequest = match serde_json::from_slice(&body) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!("Malformed configuration request: {}", e);
                        return write_failed(req, 400, &e.to_string());
                    }
                };

                info!(
                    "Configuration request for {} with {} networks",
                    request.cloud.name(),
                    request.credentials.len()
                );
                match hook.device_configuration(request) {
                    STATUS_OK => write_ok(req, &json!({ "result": "ok" })),
                    STATUS_BAD_REQUEST => write_failed(req, 400, "incomplete configuration"),
                    _ => write_failed(req, 500, "configuration could not be stored"),
                }
            })?;
        }

        {
            let hook = hook.clone();
            server.fn_handler::<anyhow::Error, _>("/measurement", Method::Get, move |req| {
                match hook.measurement() {
                    Ok(envelope) => write_ok(req, &envelope),
                    Err(e @ SensorError::Unavailable(_)) => write_failed(req, 503, &e.to_string()),
                    Err(e) => write_failed(req, 500, &e.to_string()),
                }
            })?;
        }

        {
            let hook = hook.clone();
            server.fn_handler::<anyhow::Error, _>("/measurement/test", Method::Post, move |req| {
                hook.start_test_data_acquisition();
                write_ok(req, &json!({ "result": "started" }))
            })?;
        }

        server.fn_handler::<anyhow::Error, _>("/status", Method::Get, move |req| {
            write_ok(req, &hook.status())
        })?;

        Ok(server)
    }
}

impl ConfigurationServer for EspConfigurationServer {
    fn start(&mut self, hook: ConfigurationHook) -> Result<(), String> {
        if self.server.is_some() {
            return Err("configuration server already running".to_string());
        }
        let server = Self::serve(hook).map_err(|e| format!("failed to start HTTP server: {}", e))?;
        info!("Configuration server listening on port 80");
        self.server = Some(server);
        Ok(())
    }

    fn stop(&mut self) {
        if self.server.take().is_some() {
            info!("Configuration server stopped");
        }
    }
}
