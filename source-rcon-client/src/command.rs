//! Reassembly of command responses.
//!
//! The protocol does not say how many packets a response spans, so every command is followed by
//! an empty "mirror" packet. The server handles packets in order, so the echo of the mirror can
//! only arrive after the last fragment of the command's response. Right after the echo the server
//! sends one more packet whose body is [`TRAILER`].

use crate::packet::{Packet, PacketKind, TRAILER};
use crate::Error;

#[derive(Debug)]
pub(crate) struct CommandCycle {
    request_id: i32,
    mirror_id: i32,
    saw_mirror: bool,
    output: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandStep {
    Pending,
    Complete(String),
}

impl CommandCycle {
    pub fn new(request_id: i32, mirror_id: i32) -> Self {
        CommandCycle {
            request_id,
            mirror_id,
            saw_mirror: false,
            output: Vec::new(),
        }
    }

    /// The command packet and the mirror packet, in the order they must be sent.
    pub fn requests(&self, command: &str) -> [Packet; 2] {
        [
            Packet::new(self.request_id, PacketKind::ExecCommand, command),
            Packet::new(self.mirror_id, PacketKind::ResponseValue, Vec::new()),
        ]
    }

    /// Feeds the next packet received from the server. Packets must be decoded in the command
    /// phase.
    pub fn accept(&mut self, packet: Packet) -> crate::Result<CommandStep> {
        if packet.kind != PacketKind::ResponseValue {
            return Err(Error::InvalidResponseType(packet.kind.to_wire()));
        }

        if self.saw_mirror {
            return if packet.body == TRAILER {
                let output = std::mem::take(&mut self.output);
                Ok(CommandStep::Complete(into_text(output)))
            } else {
                Err(Error::InvalidResponseTrailer)
            };
        }

        if packet.id == self.mirror_id {
            self.saw_mirror = true;
        } else if packet.id == self.request_id {
            self.output.extend_from_slice(&packet.body);
        } else {
            return Err(Error::InvalidResponseId(packet.id));
        }

        Ok(CommandStep::Pending)
    }
}

fn into_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}
