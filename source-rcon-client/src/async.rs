//! Asynchronous RCON client, built on [Tokio](https://tokio.rs/).

use crate::auth::{AuthSession, AuthStep};
use crate::command::{CommandCycle, CommandStep};
use crate::options::Options;
use crate::packet::{frame_size, Packet, Phase, RequestIds};
use crate::Error;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::instrument::WithSubscriber;
use tracing::{debug, trace};

/// A byte stream the client can talk RCON over.
pub trait AsyncConnection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncConnection for T {}

pub type DialFuture = Pin<Box<dyn Future<Output = io::Result<Box<dyn AsyncConnection>>> + Send>>;

/// Opens a connection given a network name (always `"tcp"`) and an address.
pub type DialFn = Arc<dyn Fn(String, String) -> DialFuture + Send + Sync>;

pub type ConnectOptions = Options<DialFn>;

impl Options<DialFn> {
    /// Replaces the default TCP dialer, e.g. with an in-memory connection.
    pub fn dial<F, Fut>(mut self, dial: F) -> Self
    where
        F: Fn(String, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = io::Result<Box<dyn AsyncConnection>>> + Send + 'static,
    {
        self.dial = Some(Arc::new(move |network: String, addr: String| {
            Box::pin(dial(network, addr)) as DialFuture
        }));
        self
    }
}

/// Asynchronously connect to an RCON server and authenticate.
///
/// If `options` has no password, no connection is made: the returned client can only be closed.
///
/// # Example
/// ```rust,no_run
/// use source_rcon_client::r#async::{connect, ConnectOptions};
///
/// #[tokio::main]
/// async fn main() {
///     let client = connect("127.0.0.1:27015", ConnectOptions::new().password("hunter2"))
///         .await
///         .unwrap();
///
///     println!("{}", client.send("status").await.unwrap());
///     client.close().await.unwrap();
/// }
/// ```
pub async fn connect(addr: &str, options: ConnectOptions) -> crate::Result<Client> {
    Client::connect(addr, options).await
}

/// Reads and writes one length-prefixed packet at a time.
#[derive(Debug)]
pub struct FramedTransport<C> {
    conn: C,
}

impl<C: AsyncConnection> FramedTransport<C> {
    pub fn new(conn: C) -> Self {
        FramedTransport { conn }
    }

    /// Writes an encoded packet.
    pub async fn send(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.conn.write_all(bytes).await?;
        self.conn.flush().await?;
        Ok(())
    }

    /// Reads one packet and returns it without its size prefix.
    pub async fn receive(&mut self) -> crate::Result<Vec<u8>> {
        let mut size_bytes = [0; 4];
        self.conn.read_exact(&mut size_bytes).await?;
        let size = frame_size(size_bytes)?;

        let mut payload = Vec::new();
        (&mut self.conn)
            .take(size as u64)
            .read_to_end(&mut payload)
            .await?;
        if payload.len() < size {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        trace!(bytes = ?payload, "received packet");
        Ok(payload)
    }

    pub async fn send_packet(&mut self, packet: &Packet) -> crate::Result<()> {
        self.send(&packet.encode()).await
    }

    pub async fn receive_packet(&mut self, phase: Phase) -> crate::Result<Packet> {
        Packet::decode(&self.receive().await?, phase)
    }

    pub async fn close(&mut self) -> crate::Result<()> {
        self.conn.shutdown().await?;
        Ok(())
    }
}

/// An RCON client.
///
/// Commands can be sent from several tasks at once; they are run one after another.
pub struct Client {
    addr: String,
    session: Option<Mutex<Session>>,
    dispatch: Option<tracing::Dispatch>,
}

struct Session {
    transport: FramedTransport<Box<dyn AsyncConnection>>,
    ids: RequestIds,
}

impl Client {
    pub async fn connect(addr: &str, mut options: ConnectOptions) -> crate::Result<Self> {
        if addr.is_empty() {
            return Err(Error::MissingAddress);
        }

        let mut client = Client {
            addr: addr.to_string(),
            session: None,
            dispatch: options.dispatch.take(),
        };

        let password = match options.take_password() {
            Some(password) => password,
            None => return Ok(client),
        };

        let open = Session::open(addr, &password, &options);
        let session = match &client.dispatch {
            Some(dispatch) => open.with_subscriber(dispatch.clone()).await?,
            None => open.await?,
        };
        client.session = Some(Mutex::new(session));
        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    /// Runs a command and returns its full response.
    ///
    /// There is no timeout: wrap the call in [`tokio::time::timeout`] to bound it. If this fails
    /// part way through a response, the connection is left open but may be out of sync with the
    /// server.
    ///
    /// The same holds when the future is dropped before it completes, e.g. by an elapsed timeout:
    /// the server's replies to the abandoned command are still in flight and the next `send` would
    /// fail reading them. Close the client and connect again after a timeout.
    pub async fn send(&self, command: &str) -> crate::Result<String> {
        let session = self.session.as_ref().ok_or(Error::NotInitialized)?;
        let mut session = session.lock().await;

        let exec = session.exec(command);
        match &self.dispatch {
            Some(dispatch) => exec.with_subscriber(dispatch.clone()).await,
            None => exec.await,
        }
    }

    /// Closes the connection, if the client has one.
    pub async fn close(mut self) -> crate::Result<()> {
        match self.session.take() {
            Some(session) => session.into_inner().transport.close().await,
            None => Ok(()),
        }
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.addr)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl Session {
    async fn open(addr: &str, password: &str, options: &ConnectOptions) -> crate::Result<Self> {
        debug!(addr, "connecting rcon");
        let conn = match &options.dial {
            Some(dial) => dial("tcp".to_string(), addr.to_string()).await?,
            None => dial_tcp(addr, options.connect_timeout()).await?,
        };

        let mut session = Session {
            transport: FramedTransport::new(conn),
            ids: RequestIds::new(),
        };
        if let Err(err) = session.authenticate(password).await {
            let _ = session.transport.close().await;
            return Err(err);
        }
        Ok(session)
    }

    async fn authenticate(&mut self, password: &str) -> crate::Result<()> {
        debug!("authenticating");
        let mut auth = AuthSession::new(self.ids.next(), password);
        self.transport.send_packet(&auth.request()).await?;

        loop {
            let packet = self.transport.receive_packet(Phase::Auth).await?;
            if auth.accept(packet)? == AuthStep::Authenticated {
                debug!("authenticated");
                return Ok(());
            }
        }
    }

    async fn exec(&mut self, command: &str) -> crate::Result<String> {
        let mut cycle = CommandCycle::new(self.ids.next(), self.ids.next());
        debug!(command, "sending command");
        for request in cycle.requests(command) {
            self.transport.send_packet(&request).await?;
        }

        loop {
            let packet = self.transport.receive_packet(Phase::Command).await?;
            if let CommandStep::Complete(output) = cycle.accept(packet)? {
                return Ok(output);
            }
        }
    }
}

async fn dial_tcp(addr: &str, timeout: Duration) -> io::Result<Box<dyn AsyncConnection>> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => Ok(Box::new(stream?)),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connecting to {} timed out", addr),
        )),
    }
}
