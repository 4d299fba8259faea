#![allow(dead_code)]

use source_rcon_client::packet::{Packet, PacketKind, TRAILER};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

pub const PASSWORD: &str = "hunter2";

/// Decides what a fake server sends back for each request it receives.
pub type Script = Box<dyn FnMut(&Packet) -> Vec<Packet> + Send>;

pub fn value<B: Into<Vec<u8>>>(id: i32, body: B) -> Packet {
    Packet::new(id, PacketKind::ResponseValue, body)
}

pub fn auth_response(id: i32) -> Packet {
    Packet::new(id, PacketKind::AuthResponse, Vec::new())
}

/// Replies to a mirror packet: the echo and the trailer.
pub fn mirror_replies(id: i32) -> Vec<Packet> {
    vec![value(id, Vec::new()), value(id, TRAILER)]
}

/// Answers an auth request the way a Source server does.
pub fn auth_replies(request: &Packet) -> Vec<Packet> {
    let id = if request.body == PASSWORD.as_bytes() {
        request.id
    } else {
        -1
    };
    vec![value(request.id, Vec::new()), auth_response(id)]
}

/// A well-behaved server. Each command is answered with the fragments returned by `reply`.
pub fn source_server<F>(reply: F) -> Script
where
    F: Fn(&str) -> Vec<String> + Send + 'static,
{
    Box::new(move |request: &Packet| match request.kind {
        PacketKind::Auth => auth_replies(request),
        PacketKind::ExecCommand => {
            let command = String::from_utf8_lossy(&request.body);
            reply(&command)
                .into_iter()
                .map(|fragment| value(request.id, fragment))
                .collect()
        }
        PacketKind::ResponseValue => mirror_replies(request.id),
        _ => Vec::new(),
    })
}

/// A server that authenticates normally but answers every command with `replies`, given the
/// command and mirror ids.
pub fn command_script<F>(replies: F) -> Script
where
    F: Fn(i32, i32) -> Vec<Packet> + Send + 'static,
{
    let mut pending_command = None;
    Box::new(move |request: &Packet| match request.kind {
        PacketKind::Auth => auth_replies(request),
        PacketKind::ExecCommand => {
            pending_command = Some(request.id);
            Vec::new()
        }
        PacketKind::ResponseValue => match pending_command.take() {
            Some(command_id) => replies(command_id, request.id),
            None => Vec::new(),
        },
        _ => Vec::new(),
    })
}

/// Collects the message of every event it sees.
#[derive(Clone, Default)]
pub struct EventLog {
    messages: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn dispatch(&self) -> Dispatch {
        Dispatch::new(Registry::default().with(self.clone()))
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.messages().iter().any(|seen| seen == message)
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for EventLog {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.messages.lock().unwrap().push(message);
    }
}
