use crate::packet::{Packet, PacketKind};
use crate::Error;

/// Id a server puts in its auth response to reject the password.
const AUTH_FAILED_ID: i32 = -1;

/// Authentication handshake for a single connection.
///
/// The server answers an auth request with an empty response value echoing the request id,
/// followed by the actual auth response.
#[derive(Debug)]
pub(crate) struct AuthSession<'a> {
    id: i32,
    password: &'a str,
    saw_echo: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthStep {
    Pending,
    Authenticated,
}

impl<'a> AuthSession<'a> {
    pub fn new(id: i32, password: &'a str) -> Self {
        AuthSession {
            id,
            password,
            saw_echo: false,
        }
    }

    pub fn request(&self) -> Packet {
        Packet::new(self.id, PacketKind::Auth, self.password)
    }

    /// Feeds the next packet received from the server. Packets must be decoded in the auth phase.
    pub fn accept(&mut self, packet: Packet) -> crate::Result<AuthStep> {
        if self.saw_echo {
            return self.verdict(&packet);
        }

        match packet.kind {
            // Some servers skip the echo and answer straight away
            PacketKind::AuthResponse => self.verdict(&packet),
            PacketKind::ResponseValue if packet.id == AUTH_FAILED_ID => {
                Err(Error::AuthenticationFailed)
            }
            PacketKind::ResponseValue if packet.id != self.id => {
                Err(Error::InvalidResponseId(packet.id))
            }
            PacketKind::ResponseValue => {
                self.saw_echo = true;
                Ok(AuthStep::Pending)
            }
            kind => Err(Error::InvalidResponseType(kind.to_wire())),
        }
    }

    fn verdict(&self, packet: &Packet) -> crate::Result<AuthStep> {
        if packet.kind == PacketKind::AuthResponse && packet.id == self.id {
            Ok(AuthStep::Authenticated)
        } else {
            Err(Error::AuthenticationFailed)
        }
    }
}
