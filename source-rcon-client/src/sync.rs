//! Blocking RCON client.

use crate::auth::{AuthSession, AuthStep};
use crate::command::{CommandCycle, CommandStep};
use crate::options::{with_dispatch, Options};
use crate::packet::{frame_size, Packet, Phase, RequestIds};
use crate::Error;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// A byte stream the client can talk RCON over.
pub trait Connection: Read + Write + Send {
    fn close(&mut self) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Opens a connection given a network name (always `"tcp"`) and an address.
pub type DialFn = Arc<dyn Fn(&str, &str) -> io::Result<Box<dyn Connection>> + Send + Sync>;

pub type ConnectOptions = Options<DialFn>;

impl Options<DialFn> {
    /// Replaces the default TCP dialer, e.g. with an in-memory connection.
    pub fn dial<F>(mut self, dial: F) -> Self
    where
        F: Fn(&str, &str) -> io::Result<Box<dyn Connection>> + Send + Sync + 'static,
    {
        self.dial = Some(Arc::new(dial));
        self
    }
}

/// Connect to an RCON server and authenticate.
///
/// If `options` has no password, no connection is made: the returned client can only be closed.
pub fn connect(addr: &str, options: ConnectOptions) -> crate::Result<Client> {
    Client::connect(addr, options)
}

/// Reads and writes one length-prefixed packet at a time.
#[derive(Debug)]
pub struct FramedTransport<C> {
    conn: C,
}

impl<C: Connection> FramedTransport<C> {
    pub fn new(conn: C) -> Self {
        FramedTransport { conn }
    }

    /// Writes an encoded packet.
    pub fn send(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.conn.write_all(bytes)?;
        self.conn.flush()?;
        Ok(())
    }

    /// Reads one packet and returns it without its size prefix.
    pub fn receive(&mut self) -> crate::Result<Vec<u8>> {
        let mut size_bytes = [0; 4];
        self.conn.read_exact(&mut size_bytes)?;
        let size = frame_size(size_bytes)?;

        // Grow as data arrives rather than trusting the size up front
        let mut payload = Vec::new();
        (&mut self.conn).take(size as u64).read_to_end(&mut payload)?;
        if payload.len() < size {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        trace!(bytes = ?payload, "received packet");
        Ok(payload)
    }

    pub fn send_packet(&mut self, packet: &Packet) -> crate::Result<()> {
        self.send(&packet.encode())
    }

    pub fn receive_packet(&mut self, phase: Phase) -> crate::Result<Packet> {
        Packet::decode(&self.receive()?, phase)
    }

    pub fn close(&mut self) -> crate::Result<()> {
        self.conn.close()?;
        Ok(())
    }
}

/// An RCON client.
///
/// Commands can be sent from several threads at once; they are run one after another.
pub struct Client {
    addr: String,
    session: Option<Mutex<Session>>,
    dispatch: Option<tracing::Dispatch>,
}

struct Session {
    transport: FramedTransport<Box<dyn Connection>>,
    ids: RequestIds,
}

impl Client {
    pub fn connect(addr: &str, mut options: ConnectOptions) -> crate::Result<Self> {
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

        let session = with_dispatch(client.dispatch.as_ref(), || {
            Session::open(addr, &password, &options)
        })?;
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
    /// If this fails part way through a response, the connection is left open but may be out of
    /// sync with the server.
    pub fn send(&self, command: &str) -> crate::Result<String> {
        let session = self.session.as_ref().ok_or(Error::NotInitialized)?;
        let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);

        with_dispatch(self.dispatch.as_ref(), || session.exec(command))
    }

    /// Closes the connection, if the client has one.
    pub fn close(mut self) -> crate::Result<()> {
        match self.session.take() {
            Some(session) => session
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .transport
                .close(),
            None => Ok(()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let mut session = session.into_inner().unwrap_or_else(PoisonError::into_inner);
            let _ = session.transport.close();
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
    fn open(addr: &str, password: &str, options: &ConnectOptions) -> crate::Result<Self> {
        debug!(addr, "connecting rcon");
        let conn = match &options.dial {
            Some(dial) => dial("tcp", addr)?,
            None => dial_tcp(addr, options.connect_timeout())?,
        };

        let mut session = Session {
            transport: FramedTransport::new(conn),
            ids: RequestIds::new(),
        };
        if let Err(err) = session.authenticate(password) {
            let _ = session.transport.close();
            return Err(err);
        }
        Ok(session)
    }

    fn authenticate(&mut self, password: &str) -> crate::Result<()> {
        debug!("authenticating");
        let mut auth = AuthSession::new(self.ids.next(), password);
        self.transport.send_packet(&auth.request())?;

        loop {
            let packet = self.transport.receive_packet(Phase::Auth)?;
            if auth.accept(packet)? == AuthStep::Authenticated {
                debug!("authenticated");
                return Ok(());
            }
        }
    }

    fn exec(&mut self, command: &str) -> crate::Result<String> {
        let mut cycle = CommandCycle::new(self.ids.next(), self.ids.next());
        debug!(command, "sending command");
        for request in cycle.requests(command) {
            self.transport.send_packet(&request)?;
        }

        loop {
            let packet = self.transport.receive_packet(Phase::Command)?;
            if let CommandStep::Complete(output) = cycle.accept(packet)? {
                return Ok(output);
            }
        }
    }
}

fn dial_tcp(addr: &str, timeout: Duration) -> io::Result<Box<dyn Connection>> {
    let mut last_err = None;
    for socket_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => return Ok(Box::new(stream)),
            Err(err) => last_err = Some(err),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("could not resolve {}", addr),
        )
    }))
}
