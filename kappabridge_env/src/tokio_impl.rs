//! Production gateway: JSON lines over TCP, driven by a private Tokio runtime.

use crate::error::GatewayError;
use crate::gateway::{EngineGateway, StochasticInstance};
use crate::protocol::{decode_line, encode_line, Call, Reply, Request, Response};
use crate::types::{InstanceId, InstanceSpec};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway to a remote stochastic engine server.
///
/// Calls block the current thread until the server answers, so this type
/// must not be used from inside an async task (it owns its own runtime).
#[derive(Clone)]
pub struct RpcGateway {
    channel: Arc<RpcChannel>,
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,

    /// Bytes of a reply line not yet complete; survives a timed-out read
    pending: Vec<u8>,

    /// Set when a request was cut off mid-write; the stream is unusable
    broken: bool,
}

/// One TCP connection shared by the gateway and all its instances.
struct RpcChannel {
    runtime: Runtime,
    conn: Mutex<Connection>,
    next_id: AtomicU64,
    timeout: Duration,
    peer: String,
}

impl RpcGateway {
    /// Connects with the default call timeout.
    pub fn connect(addr: &str) -> Result<Self, GatewayError> {
        Self::connect_with_timeout(addr, DEFAULT_CALL_TIMEOUT)
    }

    /// Connects with a custom per-call timeout.
    pub fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
            .map_err(GatewayError::transport)?;

        let stream = runtime
            .block_on(async { tokio::time::timeout(timeout, TcpStream::connect(addr)).await })
            .map_err(|_| GatewayError::Timeout(timeout.as_millis() as u64))?
            .map_err(|e| GatewayError::transport(format!("connect to {}: {}", addr, e)))?;
        stream.set_nodelay(true).map_err(GatewayError::transport)?;

        let (read_half, write_half) = stream.into_split();
        let channel = RpcChannel {
            runtime,
            conn: Mutex::new(Connection {
                reader: BufReader::new(read_half),
                writer: write_half,
                pending: Vec::new(),
                broken: false,
            }),
            next_id: AtomicU64::new(1),
            timeout,
            peer: addr.to_string(),
        };

        Ok(Self {
            channel: Arc::new(channel),
        })
    }

    /// Address this gateway is connected to.
    pub fn peer(&self) -> &str {
        &self.channel.peer
    }
}

impl RpcChannel {
    /// Sends one request and waits for its response.
    ///
    /// Replies to earlier calls that timed out are still in flight on the
    /// stream; they are read and discarded until the matching id arrives.
    fn call(&self, call: Call) -> Result<Reply, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = call.method();
        let line = encode_line(&Request { id, call })?;
        let timeout_ms = self.timeout.as_millis() as u64;

        let mut guard = self
            .conn
            .lock()
            .map_err(|_| GatewayError::transport("connection lock poisoned"))?;
        let conn = &mut *guard;
        if conn.broken {
            return Err(GatewayError::transport(format!(
                "{}: connection unusable after an interrupted request",
                method
            )));
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let written = self.runtime.block_on(async {
            tokio::time::timeout_at(deadline, async {
                conn.writer.write_all(line.as_bytes()).await?;
                conn.writer.flush().await
            })
            .await
        });
        match written {
            Err(_) => {
                conn.broken = true;
                return Err(GatewayError::Timeout(timeout_ms));
            }
            Ok(Err(e)) => {
                conn.broken = true;
                return Err(GatewayError::transport(format!("{}: {}", method, e)));
            }
            Ok(Ok(())) => {}
        }

        loop {
            let received = self.runtime.block_on(async {
                tokio::time::timeout_at(deadline, conn.reader.read_until(b'\n', &mut conn.pending)).await
            });
            match received {
                Err(_) => return Err(GatewayError::Timeout(timeout_ms)),
                Ok(Err(e)) => return Err(GatewayError::transport(format!("{}: {}", method, e))),
                Ok(Ok(_)) => {}
            }
            if conn.pending.last() != Some(&b'\n') {
                return Err(GatewayError::transport("connection closed by engine"));
            }

            let raw = std::mem::take(&mut conn.pending);
            let text = String::from_utf8(raw).map_err(GatewayError::protocol)?;
            let response: Response = decode_line(&text)?;
            // Id 0 answers a request the server could not decode.
            if response.id != 0 && response.id < id {
                continue;
            }
            if response.id != id {
                return Err(GatewayError::protocol(format!(
                    "{}: expected response {}, got {}",
                    method, id, response.id
                )));
            }
            return response.into_result();
        }
    }
}

fn expect_done(reply: Reply) -> Result<(), GatewayError> {
    match reply {
        Reply::Done => Ok(()),
        other => Err(GatewayError::protocol(format!("unexpected reply {:?}", other))),
    }
}

fn expect_value(reply: Reply) -> Result<f64, GatewayError> {
    match reply {
        Reply::Value(v) => Ok(v),
        other => Err(GatewayError::protocol(format!("unexpected reply {:?}", other))),
    }
}

impl EngineGateway for RpcGateway {
    type Instance = RpcInstance;

    fn create_instance(&self, spec: &InstanceSpec) -> Result<RpcInstance, GatewayError> {
        match self.channel.call(Call::CreateInstance(spec.clone()))? {
            Reply::Instance(id) => Ok(RpcInstance {
                id,
                channel: Arc::clone(&self.channel),
            }),
            other => Err(GatewayError::protocol(format!("unexpected reply {:?}", other))),
        }
    }
}

/// Instance living in a remote engine.
pub struct RpcInstance {
    id: InstanceId,
    channel: Arc<RpcChannel>,
}

impl StochasticInstance for RpcInstance {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn load_definition(&mut self, path: &Path) -> Result<(), GatewayError> {
        expect_done(self.channel.call(Call::LoadDefinition {
            instance: self.id,
            path: path.to_path_buf(),
        })?)
    }

    fn initialize(&mut self) -> Result<(), GatewayError> {
        expect_done(self.channel.call(Call::Initialize { instance: self.id })?)
    }

    fn advance(&mut self, dt: f64, report_progress: bool) -> Result<(), GatewayError> {
        expect_done(self.channel.call(Call::Advance {
            instance: self.id,
            dt,
            report_progress,
        })?)
    }

    fn observe(&self, name: &str) -> Result<f64, GatewayError> {
        expect_value(self.channel.call(Call::Observe {
            instance: self.id,
            name: name.to_string(),
        })?)
    }

    fn current_time(&self) -> Result<f64, GatewayError> {
        expect_value(self.channel.call(Call::CurrentTime { instance: self.id })?)
    }

    fn destroy(self) -> Result<(), GatewayError> {
        expect_done(self.channel.call(Call::Destroy { instance: self.id })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = RpcGateway::connect_with_timeout(
            &format!("127.0.0.1:{}", port),
            Duration::from_millis(500),
        );
        assert!(matches!(
            result,
            Err(GatewayError::Transport(_)) | Err(GatewayError::Timeout(_))
        ));
    }

    /// Answers every create_instance with the request id; the first reply is
    /// held back by `delay`.
    fn delayed_server(delay: Duration) -> String {
        use std::io::{BufRead, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = std::io::BufReader::new(stream);
            for (n, line) in reader.lines().enumerate() {
                let Ok(line) = line else { break };
                let request: Request = decode_line(&line).unwrap();
                if n == 0 {
                    std::thread::sleep(delay);
                }
                let reply = Response::from_result(request.id, Ok(Reply::Instance(InstanceId(request.id))));
                if writer.write_all(encode_line(&reply).unwrap().as_bytes()).is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[test]
    fn test_late_reply_is_skipped_after_timeout() {
        let addr = delayed_server(Duration::from_millis(450));
        let gateway = RpcGateway::connect_with_timeout(&addr, Duration::from_millis(300)).unwrap();
        let spec = InstanceSpec::new(crate::types::TimeUnit::Milliseconds);

        assert!(matches!(
            gateway.create_instance(&spec),
            Err(GatewayError::Timeout(300))
        ));
        let second = gateway.create_instance(&spec).unwrap();
        assert_eq!(second.id(), InstanceId(2));
        let third = gateway.create_instance(&spec).unwrap();
        assert_eq!(third.id(), InstanceId(3));
    }

    #[test]
    fn test_expect_helpers() {
        assert!(expect_done(Reply::Done).is_ok());
        assert_eq!(expect_value(Reply::Value(2.5)).unwrap(), 2.5);
        assert!(matches!(
            expect_value(Reply::Done),
            Err(GatewayError::Protocol(_))
        ));
    }
}
