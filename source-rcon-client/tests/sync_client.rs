#![cfg(feature = "sync")]

mod support;

use source_rcon_client::packet::{Packet, PacketKind, Phase, TRAILER};
use source_rcon_client::{connect, ConnectOptions, Connection, Error};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use support::*;

#[derive(Debug, Default)]
struct Log {
    dials: usize,
    closes: usize,
    requests: Vec<Packet>,
}

/// In-memory connection that feeds every request it receives to a script and queues the
/// script's replies for reading.
struct MockConnection {
    script: Script,
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    log: Arc<Mutex<Log>>,
}

impl Read for MockConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(self.inbound.len());
        for (dst, src) in buf.iter_mut().zip(self.inbound.drain(..len)) {
            *dst = src;
        }
        Ok(len)
    }
}

impl Write for MockConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(buf);

        while self.outbound.len() >= 4 {
            let size = i32::from_le_bytes(self.outbound[..4].try_into().unwrap()) as usize;
            if self.outbound.len() < 4 + size {
                break;
            }

            let frame: Vec<u8> = self.outbound.drain(..4 + size).collect();
            let request = Packet::decode(&frame[4..], Phase::Command).unwrap();
            for reply in (self.script)(&request) {
                self.inbound.extend(reply.encode());
            }
            self.log.lock().unwrap().requests.push(request);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for MockConnection {
    fn close(&mut self) -> io::Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}

fn options(script: Script) -> (ConnectOptions, Arc<Mutex<Log>>) {
    let log = Arc::new(Mutex::new(Log::default()));
    let script = Mutex::new(Some(script));
    let dial_log = log.clone();

    let options = ConnectOptions::new()
        .password(PASSWORD)
        .dial(move |network, _addr| {
            assert_eq!(network, "tcp");
            dial_log.lock().unwrap().dials += 1;
            let script = script
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))?;

            Ok(Box::new(MockConnection {
                script,
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                log: dial_log.clone(),
            }) as Box<dyn Connection>)
        });

    (options, log)
}

fn echo_server() -> Script {
    source_server(|command| vec![command.to_string()])
}

#[test]
fn authenticates_with_password() {
    let (options, log) = options(echo_server());
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert!(client.is_authenticated());
    assert_eq!(client.to_string(), "127.0.0.1:27015");

    let log = log.lock().unwrap();
    assert_eq!(log.dials, 1);
    assert_eq!(log.requests.len(), 1);
    assert_eq!(log.requests[0].kind, PacketKind::Auth);
    assert_eq!(log.requests[0].body, PASSWORD.as_bytes());
}

#[test]
fn rejected_password_closes_once() {
    let (options, log) = options(source_server(|_| Vec::new()));
    let err = connect("127.0.0.1:27015", options.password("wrong")).unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed));
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[test]
fn rejection_without_echo() {
    let (options, log) = options(Box::new(|_: &Packet| vec![auth_response(-1)]));
    let err = connect("127.0.0.1:27015", options).unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed));
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[test]
fn auth_echo_with_wrong_id() {
    let (options, log) = options(Box::new(|request: &Packet| {
        vec![value(request.id + 10, Vec::new()), auth_response(request.id)]
    }));
    let err = connect("127.0.0.1:27015", options).unwrap_err();

    assert!(matches!(err, Error::InvalidResponseId(_)));
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[test]
fn server_hanging_up_during_auth() {
    let (options, log) = options(Box::new(|_: &Packet| Vec::new()));
    let err = connect("127.0.0.1:27015", options).unwrap_err();

    assert!(matches!(err, Error::Transport(ref source) if source.kind() == io::ErrorKind::UnexpectedEof));
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[test]
fn dial_failure_is_a_transport_error() {
    let options = ConnectOptions::new()
        .password(PASSWORD)
        .dial(|_, _| Err(io::Error::from(io::ErrorKind::ConnectionRefused)));
    let err = connect("127.0.0.1:27015", options).unwrap_err();

    assert!(
        matches!(err, Error::Transport(ref source) if source.kind() == io::ErrorKind::ConnectionRefused)
    );
}

#[test]
fn missing_address() {
    let (options, log) = options(echo_server());
    let err = connect("", options).unwrap_err();

    assert!(matches!(err, Error::MissingAddress));
    assert_eq!(log.lock().unwrap().dials, 0);
}

#[test]
fn no_password_never_dials() {
    let (options, log) = options(echo_server());
    let client = connect("127.0.0.1:27015", options.password("")).unwrap();

    assert!(!client.is_authenticated());
    assert!(matches!(client.send("status"), Err(Error::NotInitialized)));
    client.close().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.dials, 0);
    assert_eq!(log.closes, 0);
}

#[test]
fn single_packet_command() {
    let (options, log) = options(source_server(|_| vec!["ok".to_string()]));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert_eq!(client.send("status").unwrap(), "ok");

    let log = log.lock().unwrap();
    let command = &log.requests[1];
    let mirror = &log.requests[2];
    assert_eq!(command.kind, PacketKind::ExecCommand);
    assert_eq!(command.body, b"status");
    assert_eq!(mirror.kind, PacketKind::ResponseValue);
    assert!(mirror.body.is_empty());
    assert_ne!(command.id, mirror.id);
}

#[test]
fn multi_packet_command() {
    let (options, _) = options(source_server(|_| {
        vec!["part1".to_string(), "part2".to_string()]
    }));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert_eq!(client.send("cvarlist").unwrap(), "part1part2");
}

#[test]
fn large_response() {
    let fragments: Vec<String> = (0..20).map(|i| format!("{:04096}", i)).collect();
    let expected = fragments.concat();
    let (options, _) = options(source_server(move |_| fragments.clone()));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert_eq!(client.send("cvarlist").unwrap(), expected);
}

#[test]
fn empty_response() {
    let (options, _) = options(source_server(|_| Vec::new()));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert_eq!(client.send("say hi").unwrap(), "");
}

#[test]
fn foreign_id_fails_and_keeps_connection() {
    let (options, log) = options(command_script(|command_id, mirror_id| {
        let mut replies = vec![value(command_id + mirror_id + 100, "stray")];
        replies.extend(mirror_replies(mirror_id));
        replies
    }));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert!(matches!(client.send("status"), Err(Error::InvalidResponseId(_))));
    assert!(client.is_authenticated());
    assert_eq!(log.lock().unwrap().closes, 0);
}

#[test]
fn corrupt_trailer() {
    let (options, _) = options(command_script(|command_id, mirror_id| {
        vec![
            value(command_id, "ok"),
            value(mirror_id, Vec::new()),
            value(mirror_id, vec![0, 0, 0, 0]),
        ]
    }));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert!(matches!(client.send("status"), Err(Error::InvalidResponseTrailer)));
}

#[test]
fn wrong_response_type() {
    let (options, _) = options(command_script(|command_id, _| {
        vec![Packet::new(command_id, PacketKind::ExecCommand, "ok")]
    }));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert!(matches!(client.send("status"), Err(Error::InvalidResponseType(2))));
}

#[test]
fn server_hanging_up_mid_response() {
    let (options, _) = options(command_script(|command_id, _| vec![value(command_id, "part")]));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert!(matches!(client.send("status"), Err(Error::Transport(_))));
}

#[test]
fn close_releases_connection_once() {
    let (options, log) = options(echo_server());
    let client = connect("127.0.0.1:27015", options).unwrap();

    client.close().unwrap();
    assert_eq!(log.lock().unwrap().closes, 1);
}

#[test]
fn drop_releases_connection_once() {
    let (options, log) = options(echo_server());
    drop(connect("127.0.0.1:27015", options).unwrap());

    assert_eq!(log.lock().unwrap().closes, 1);
}

#[test]
fn concurrent_sends_do_not_interleave() {
    let (options, log) = options(echo_server());
    let client = Arc::new(connect("127.0.0.1:27015", options).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|thread_num| {
            let client = client.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let command = format!("echo {} {}", thread_num, i);
                    assert_eq!(client.send(&command).unwrap(), command);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let log = log.lock().unwrap();
    let cycles = &log.requests[1..];
    assert_eq!(cycles.len(), 8 * 25 * 2);
    for pair in cycles.chunks(2) {
        assert_eq!(pair[0].kind, PacketKind::ExecCommand);
        assert_eq!(pair[1].kind, PacketKind::ResponseValue);
        assert_eq!(pair[1].id, pair[0].id + 1);
    }
}

#[test]
fn injected_dispatch_receives_events() {
    let injected = EventLog::default();
    let current = EventLog::default();
    let (options, _) = options(echo_server());

    tracing::dispatcher::with_default(&current.dispatch(), || {
        let client = connect("127.0.0.1:27015", options.dispatch(injected.dispatch())).unwrap();
        assert_eq!(client.send("status").unwrap(), "status");
    });

    assert!(injected.contains("connecting rcon"));
    assert!(injected.contains("authenticating"));
    assert!(injected.contains("received packet"));
    assert!(current.messages().is_empty(), "{:?}", current.messages());
}

#[test]
fn events_go_to_current_subscriber_by_default() {
    let current = EventLog::default();
    let (options, _) = options(echo_server());

    tracing::dispatcher::with_default(&current.dispatch(), || {
        let client = connect("127.0.0.1:27015", options).unwrap();
        assert_eq!(client.send("status").unwrap(), "status");
    });

    assert!(current.contains("connecting rcon"));
    assert!(current.contains("received packet"));
}

#[test]
fn default_dialer_over_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut script = source_server(|command| vec![format!("ran {}", command)]);

        loop {
            let mut size_bytes = [0; 4];
            if stream.read_exact(&mut size_bytes).is_err() {
                break;
            }
            let mut payload = vec![0; i32::from_le_bytes(size_bytes) as usize];
            stream.read_exact(&mut payload).unwrap();

            let request = Packet::decode(&payload, Phase::Command).unwrap();
            for reply in script(&request) {
                stream.write_all(&reply.encode()).unwrap();
            }
        }
    });

    let client = connect(&addr, ConnectOptions::new().password(PASSWORD)).unwrap();
    assert_eq!(client.send("status").unwrap(), "ran status");
    assert_eq!(client.send("users").unwrap(), "ran users");
    client.close().unwrap();

    server.join().unwrap();
}

#[test]
fn trailer_is_not_part_of_the_output() {
    let (options, _) = options(command_script(|command_id, mirror_id| {
        vec![
            value(command_id, TRAILER),
            value(mirror_id, Vec::new()),
            value(mirror_id, TRAILER),
        ]
    }));
    let client = connect("127.0.0.1:27015", options).unwrap();

    assert_eq!(client.send("status").unwrap().into_bytes(), TRAILER.to_vec());
}
