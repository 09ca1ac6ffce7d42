// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! APRS-IS TCP client threads.
//!
//! The connect thread owns the state machine: resolve, connect (with
//! keepalive and timeouts via socket2), log in, wait the settle period,
//! then heartbeat every 30 s until something breaks; any error returns
//! the machine to DISCONNECTED and the loop starts over. The recv
//! thread turns the byte stream into lines: LF terminated, CR trimmed,
//! embedded NUL rewritten to the literal `<0x00>` so downstream string
//! handling stays safe.

use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::igate::{Igate, IgateState};
use crate::{APP_NAME, VERSION_MAJOR, VERSION_MINOR};

/// Pause between reconnect attempts.
const RECONNECT_WAIT: Duration = Duration::from_secs(10);
/// Time from login to READY.
const LOGIN_SETTLE: Duration = Duration::from_secs(7);
/// Heartbeat interval when READY.
const HEARTBEAT: Duration = Duration::from_secs(30);
/// A silent server longer than this is a dead connection.
const READ_TIMEOUT: Duration = Duration::from_secs(150);

/// Start the connect thread (which spawns a recv thread per
/// connection) and the SATgate release thread.
pub fn spawn(ig: Arc<Igate>) -> std::io::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    let connect_ig = Arc::clone(&ig);
    handles.push(
        std::thread::Builder::new()
            .name("htnc-igate-connect".to_string())
            .spawn(move || connect_run(&connect_ig))?,
    );
    if ig.cfg.satgate_delay.is_some() {
        let sat_ig = Arc::clone(&ig);
        handles.push(
            std::thread::Builder::new()
                .name("htnc-igate-satgate".to_string())
                .spawn(move || sat_ig.satgate_run())?,
        );
    }
    Ok(handles)
}

/// The login line, without terminator.
pub(crate) fn login_line(ig: &Igate) -> String {
    let mut line = format!(
        "user {} pass {} vers {} {}.{}",
        ig.cfg.login_call, ig.cfg.passcode, APP_NAME, VERSION_MAJOR, VERSION_MINOR
    );
    if let Some(f) = &ig.cfg.server_filter {
        line.push_str(" filter ");
        line.push_str(f);
    }
    line
}

fn connect_run(ig: &Arc<Igate>) {
    log::info!("[IGate] connect thread up for {}:{}", ig.cfg.server, ig.cfg.port);
    while ig.running.load(Ordering::Acquire) {
        if ig.state() != IgateState::Disconnected {
            interruptible_sleep(ig, Duration::from_millis(500));
            continue;
        }

        ig.set_state(IgateState::Connecting);
        let stream = match open_stream(&ig.cfg.server, ig.cfg.port) {
            Ok(s) => s,
            Err(e) => {
                log::error!("[IGate] connect to {} failed: {}", ig.cfg.server, e);
                ig.set_state(IgateState::Disconnected);
                interruptible_sleep(ig, RECONNECT_WAIT);
                continue;
            }
        };

        let reader = match stream.try_clone() {
            Ok(r) => r,
            Err(e) => {
                log::error!("[IGate] socket clone failed: {}", e);
                ig.set_state(IgateState::Disconnected);
                continue;
            }
        };
        *ig.uplink.lock() = Some(Box::new(stream));

        ig.set_state(IgateState::LoggingIn);
        if ig.send_line(login_line(ig).as_bytes()).is_err() {
            continue; // send_line already reset the state
        }

        let recv_ig = Arc::clone(ig);
        let recv = std::thread::Builder::new()
            .name("htnc-igate-recv".to_string())
            .spawn(move || recv_run(&recv_ig, reader));

        interruptible_sleep(ig, LOGIN_SETTLE);
        if ig.state() == IgateState::LoggingIn {
            ig.set_state(IgateState::Ready);
        }

        // Heartbeat until the connection dies.
        while ig.running.load(Ordering::Acquire) && ig.state() == IgateState::Ready {
            interruptible_sleep(ig, HEARTBEAT);
            if ig.state() == IgateState::Ready {
                let _ = ig.send_line(b"#");
            }
        }
        if let Ok(handle) = recv {
            let _ = handle.join();
        }
    }
    log::info!("[IGate] connect thread down");
}

fn open_stream(server: &str, port: u16) -> std::io::Result<TcpStream> {
    let mut last_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses");
    for addr in (server, port).to_socket_addrs()? {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(60)))?;
        match socket.connect_timeout(&addr.into(), Duration::from_secs(15)) {
            Ok(()) => {
                socket.set_read_timeout(Some(READ_TIMEOUT))?;
                log::info!("[IGate] connected to {}", addr);
                return Ok(socket.into());
            }
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn recv_run(ig: &Arc<Igate>, mut stream: TcpStream) {
    let mut line: Vec<u8> = Vec::with_capacity(512);
    let mut buf = [0u8; 1024];
    loop {
        if !ig.running.load(Ordering::Acquire) {
            return;
        }
        let n = match stream.read(&mut buf) {
            Ok(0) => {
                log::error!("[IGate] server closed the connection");
                ig.set_state(IgateState::Disconnected);
                return;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("[IGate] read failed: {}", e);
                ig.set_state(IgateState::Disconnected);
                return;
            }
        };
        for &b in &buf[..n] {
            if b == b'\n' {
                handle_line(ig, &sanitize(&line));
                line.clear();
            } else {
                line.push(b);
                if line.len() > 2048 {
                    // Not a sane APRS-IS line; resynchronize.
                    line.clear();
                }
            }
        }
    }
}

/// Trim the CR, rewrite NULs so the line stays a usable string.
pub(crate) fn sanitize(raw: &[u8]) -> Vec<u8> {
    let trimmed = match raw.last() {
        Some(b'\r') => &raw[..raw.len() - 1],
        _ => raw,
    };
    let mut out = Vec::with_capacity(trimmed.len());
    for &b in trimmed {
        if b == 0 {
            out.extend_from_slice(b"<0x00>");
        } else {
            out.push(b);
        }
    }
    out
}

fn handle_line(ig: &Arc<Igate>, line: &[u8]) {
    if line.is_empty() {
        return;
    }
    if line[0] == b'#' {
        // Server banners before login completes are worth showing once;
        // afterwards they are heartbeats.
        if ig.state() != IgateState::Ready {
            log::info!("[IGate] {}", String::from_utf8_lossy(line));
        }
        return;
    }
    ig.process_is_line(line);
}

fn interruptible_sleep(ig: &Arc<Igate>, total: Duration) {
    let mut left = total;
    while !left.is_zero() && ig.running.load(Ordering::Acquire) {
        let step = left.min(Duration::from_millis(250));
        std::thread::sleep(step);
        left -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::igate::testutil::igate_with;
    use crate::igate::IgateConfig;

    #[test]
    fn test_login_line_format() {
        let (ig, _, _) = igate_with(IgateConfig {
            login_call: "W1ABC-10".into(),
            passcode: "12345".into(),
            ..IgateConfig::default()
        });
        assert_eq!(login_line(&ig), "user W1ABC-10 pass 12345 vers HTNC 1.8");

        let (ig, _, _) = igate_with(IgateConfig {
            login_call: "W1ABC-10".into(),
            passcode: "12345".into(),
            server_filter: Some("m/50".into()),
            ..IgateConfig::default()
        });
        assert!(login_line(&ig).ends_with(" filter m/50"));
    }

    #[test]
    fn test_sanitize_crlf_and_nul() {
        assert_eq!(sanitize(b"hello\r"), b"hello");
        assert_eq!(sanitize(b"hello"), b"hello");
        assert_eq!(sanitize(b"a\x00b"), b"a<0x00>b");
        assert_eq!(sanitize(b""), b"");
    }

    #[test]
    fn test_banner_lines_not_parsed_as_packets() {
        let (ig, _, queue) = igate_with(IgateConfig {
            login_call: "X".into(),
            tx_chan: Some(0),
            ..IgateConfig::default()
        });
        handle_line(&ig, b"# aprsc 2.1.15-gc67551b");
        assert_eq!(ig.stats().1, 0);
        assert!(queue.remove(0, crate::xmit::Priority::Low).is_none());
    }
}
