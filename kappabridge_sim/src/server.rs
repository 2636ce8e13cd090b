//! Serves a `SimGateway` over the line-delimited JSON protocol.
//!
//! Each connection owns the instances it created; anything not destroyed
//! explicitly is dropped when the connection closes.

use crate::error::SimError;
use crate::gateway::{SimGateway, SimInstance};
use kappabridge_env::protocol::{decode_line, encode_line, Call, Reply, Request, Response};
use kappabridge_env::{EngineGateway, GatewayError, InstanceId, StochasticInstance};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Instances created over one connection.
pub struct Session {
    gateway: Arc<SimGateway>,
    instances: HashMap<InstanceId, SimInstance>,
}

impl Session {
    pub fn new(gateway: Arc<SimGateway>) -> Self {
        Self {
            gateway,
            instances: HashMap::new(),
        }
    }

    /// Executes one call against the gateway or one of this session's instances.
    pub fn dispatch(&mut self, call: Call) -> Result<Reply, GatewayError> {
        match call {
            Call::CreateInstance(spec) => {
                let instance = self.gateway.create_instance(&spec)?;
                let id = instance.id();
                self.instances.insert(id, instance);
                Ok(Reply::Instance(id))
            }
            Call::LoadDefinition { instance, path } => {
                self.instance_mut(instance)?.load_definition(&path)?;
                Ok(Reply::Done)
            }
            Call::Initialize { instance } => {
                self.instance_mut(instance)?.initialize()?;
                Ok(Reply::Done)
            }
            Call::Advance {
                instance,
                dt,
                report_progress,
            } => {
                self.instance_mut(instance)?.advance(dt, report_progress)?;
                Ok(Reply::Done)
            }
            Call::Observe { instance, name } => Ok(Reply::Value(self.instance(instance)?.observe(&name)?)),
            Call::CurrentTime { instance } => Ok(Reply::Value(self.instance(instance)?.current_time()?)),
            Call::Destroy { instance } => {
                let sim = self
                    .instances
                    .remove(&instance)
                    .ok_or(GatewayError::UnknownInstance(instance))?;
                sim.destroy()?;
                Ok(Reply::Done)
            }
        }
    }

    fn instance(&self, id: InstanceId) -> Result<&SimInstance, GatewayError> {
        self.instances.get(&id).ok_or(GatewayError::UnknownInstance(id))
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut SimInstance, GatewayError> {
        self.instances.get_mut(&id).ok_or(GatewayError::UnknownInstance(id))
    }

    /// Instances still alive in this session.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Accepts connections until `shutdown` fires.
pub async fn serve_gateway(
    listener: TcpListener,
    gateway: Arc<SimGateway>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), SimError> {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Gateway server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| SimError::Server(e.to_string()))?;
                debug!("Accepted connection from {}", peer);
                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, gateway).await {
                        warn!("Connection {} ended with error: {}", peer, e);
                    }
                });
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, gateway: Arc<SimGateway>) -> Result<(), SimError> {
    stream.set_nodelay(true).map_err(|e| SimError::Server(e.to_string()))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut session = Session::new(gateway);

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| SimError::Server(e.to_string()))?
    {
        if line.trim().is_empty() {
            continue;
        }
        // Undecodable requests get id 0; the client reports the mismatch.
        let response = match decode_line::<Request>(&line) {
            Ok(request) => {
                debug!("-> #{} {}", request.id, request.call.method());
                Response::from_result(request.id, session.dispatch(request.call))
            }
            Err(err) => Response::from_result(0, Err(err)),
        };
        let out = encode_line(&response)?;
        write_half
            .write_all(out.as_bytes())
            .await
            .map_err(|e| SimError::Server(e.to_string()))?;
    }

    if !session.is_empty() {
        debug!("Dropping {} orphaned instance(s)", session.len());
    }
    Ok(())
}

/// A server running on its own thread and runtime.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<Result<(), SimError>>>,
}

impl ServerHandle {
    /// Bound address (useful when binding port 0).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting connections and waits for the server thread.
    pub fn shutdown(mut self) -> Result<(), SimError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| SimError::Server("server thread panicked".into()))?,
            None => Ok(()),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Binds `addr` and serves `gateway` on a background thread.
pub fn spawn_server(addr: &str, gateway: Arc<SimGateway>) -> Result<ServerHandle, SimError> {
    let addr = addr.to_string();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (bound_tx, bound_rx) = std::sync::mpsc::channel();

    let thread = std::thread::Builder::new()
        .name("kappabridge-server".into())
        .spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| SimError::Server(e.to_string()))?;

            runtime.block_on(async move {
                let listener = match TcpListener::bind(&addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        let msg = format!("bind {}: {}", addr, e);
                        let _ = bound_tx.send(Err(SimError::Server(msg.clone())));
                        return Err(SimError::Server(msg));
                    }
                };
                let local = listener
                    .local_addr()
                    .map_err(|e| SimError::Server(e.to_string()))?;
                let _ = bound_tx.send(Ok(local));
                info!("Gateway server listening on {}", local);
                serve_gateway(listener, gateway, shutdown_rx).await
            })
        })
        .map_err(|e| SimError::Server(e.to_string()))?;

    let addr = bound_rx
        .recv()
        .map_err(|_| SimError::Server("server thread exited before binding".into()))??;

    Ok(ServerHandle {
        addr,
        shutdown: Some(shutdown_tx),
        thread: Some(thread),
    })
}
