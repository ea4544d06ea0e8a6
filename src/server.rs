//! Blocking command loop over the remote connection.
//!
//! Five commands, matched exactly: `clock`, `start`, `stop`, `kill`, `wait`.
//! Anything else, including a read timeout or a disconnect, tears the
//! connection down and the server goes back to a blocking accept; that is
//! the only recovery mechanism. Every event line is appended to the log and
//! echoed to the client as one fixed-size frame.

use crate::daq::Directive;
use crate::frame::{Decimator, SampleFrame};
use crate::transport::{Connection, Transport};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};
use std::io::{Read as _, Write as _};
use std::thread;
use std::time::Duration;

/// Command frame size on the wire; shorter messages are null-padded.
pub const MSG_SIZE: usize = 256;

const TOKEN_CLOCK: &str = "clock";
const TOKEN_START: &str = "start";
const TOKEN_STOP: &str = "stop";
const TOKEN_KILL: &str = "kill";
const TOKEN_WAIT: &str = "wait";

#[derive(Default)]
struct Session {
    running: bool,
    /// Timestamp from the last `clock`; present iff the clock has been
    /// received since the last stop.
    last_time: Option<String>,
}

impl Session {
    fn clock_received(&self) -> bool {
        self.last_time.is_some()
    }
}

pub struct CommandServer<T: Transport> {
    transport: T,
    directives: Sender<Directive>,
    ratio_packs: u32,
}

impl<T: Transport> CommandServer<T> {
    pub fn new(transport: T, directives: Sender<Directive>, ratio_packs: u32) -> Self {
        Self {
            transport,
            directives,
            ratio_packs,
        }
    }

    /// Accept one client at a time, serve it until the session ends, accept
    /// again. Bind/accept failures are logged and retried.
    pub fn run(&mut self) -> ! {
        loop {
            let conn = match self.transport.open() {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("transport open failed: {e}");
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };
            info!("accepted connection from {}", conn.peer());
            self.serve(conn);
        }
    }

    fn serve(&mut self, mut conn: Box<dyn Connection>) {
        let mut session = Session::default();
        report(conn.as_mut(), "accepted connection");

        loop {
            let msg = match read_frame(conn.as_mut()) {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("client disconnected");
                    break;
                }
                Err(e) => {
                    warn!("socket read failed: {e}");
                    break;
                }
            };
            match msg.as_str() {
                TOKEN_CLOCK => {
                    report(conn.as_mut(), "waiting for client date/time");
                    match read_frame(conn.as_mut()) {
                        Ok(Some(ts)) => {
                            report(conn.as_mut(), &format!("received client time [{ts}]"));
                            session.last_time = Some(ts);
                        }
                        _ => {
                            warn!("no timestamp followed clock, closing connection");
                            break;
                        }
                    }
                }
                TOKEN_START => {
                    report(conn.as_mut(), "received [start]");
                    if !session.clock_received() {
                        report(conn.as_mut(), "no clock received, send it first");
                        continue;
                    }
                    if session.running {
                        report(conn.as_mut(), "acquisition already running");
                        continue;
                    }
                    // one extra parameter frame follows start; consumed unused
                    match read_frame(conn.as_mut()) {
                        Ok(Some(_)) => {}
                        _ => {
                            warn!("no parameter followed start, closing connection");
                            break;
                        }
                    }
                    let file_base = session.last_time.clone().unwrap_or_default();
                    self.start_run(conn.as_mut(), &file_base);
                    session.running = true;
                }
                TOKEN_STOP => {
                    report(conn.as_mut(), "received [stop]");
                    if session.running {
                        self.send_stop();
                        session.running = false;
                        session.last_time = None;
                        report(conn.as_mut(), "acquisition stopped");
                    } else {
                        report(conn.as_mut(), "acquisition not started");
                    }
                }
                TOKEN_KILL => {
                    report(conn.as_mut(), "received [kill]");
                    if session.running {
                        self.send_stop();
                        session.running = false;
                    }
                    // the loop deliberately keeps listening after kill
                    report(conn.as_mut(), "killing session");
                }
                TOKEN_WAIT => report(conn.as_mut(), "server waiting"),
                other => {
                    info!("unknown command [{other}]");
                    report(
                        conn.as_mut(),
                        "received nothing or unknown message, closing connection",
                    );
                    break;
                }
            }
        }

        // close out a run the client can no longer reach
        if session.running {
            self.send_stop();
        }
        info!("connection closed, listening again");
    }

    /// Wire a fresh frame tap to a packet forwarder owning a clone of the
    /// connection's write half, then hand the tap to the acquisition worker.
    fn start_run(&self, conn: &mut dyn Connection, file_base: &str) {
        let (tap, frames) = unbounded();
        match conn.try_clone() {
            Ok(writer) => {
                let decimator = Decimator::new(self.ratio_packs);
                thread::spawn(move || packet_forwarder(frames, writer, decimator));
            }
            Err(e) => warn!("cloning connection for packet forwarding failed: {e}"),
        }
        if self
            .directives
            .send(Directive::Start {
                file_base: file_base.to_string(),
                tap,
            })
            .is_err()
        {
            warn!("acquisition worker is gone");
        }
        report(
            conn,
            &format!("starting acquisition, file rpiData_{file_base}.bin"),
        );
    }

    fn send_stop(&self) {
        if self.directives.send(Directive::Stop).is_err() {
            warn!("acquisition worker is gone");
        }
    }
}

/// One blocking read of up to [`MSG_SIZE`] bytes, decoded by truncating at
/// the first NUL and trimming a trailing line ending. `None` means the peer
/// closed the connection.
fn read_frame(conn: &mut dyn Connection) -> std::io::Result<Option<String>> {
    let mut buf = [0u8; MSG_SIZE];
    let n = match conn.read(&mut buf)? {
        0 => return Ok(None),
        n => n,
    };
    let end = buf[..n].iter().position(|&b| b == 0).unwrap_or(n);
    let msg = String::from_utf8_lossy(&buf[..end])
        .trim_end_matches(['\r', '\n'])
        .to_string();
    Ok(Some(msg))
}

/// Log one event line and echo it to the client as a null-padded frame.
fn report(conn: &mut dyn Connection, msg: &str) {
    info!("{msg}");
    let mut frame = [0u8; MSG_SIZE];
    let bytes = msg.as_bytes();
    let n = bytes.len().min(MSG_SIZE);
    frame[..n].copy_from_slice(&bytes[..n]);
    if let Err(e) = conn.write_all(&frame) {
        warn!("echo to client failed: {e}");
    }
}

/// Forwarder thread: one decimated packet to the client per `ratio_packs`
/// captured frames. Exits when the tap is dropped or the peer goes away.
fn packet_forwarder(
    frames: Receiver<SampleFrame>,
    mut conn: Box<dyn Connection>,
    mut decimator: Decimator,
) {
    for frame in frames.iter() {
        if let Some(packet) = decimator.offer(&frame) {
            if let Err(e) = conn.write_all(packet.as_bytes()) {
                warn!("decimated packet send failed: {e}");
                return;
            }
        }
    }
}
