// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-packet CSV activity log.
//!
//! One row per decoded packet, machine-readable, with optional daily
//! rotation by UTC date (one `YYYY-MM-DD.log` file per day in the
//! configured directory). The column set is fixed; fields that do not
//! apply to a packet stay empty rather than shifting columns.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::aprs::info::{classify, message_addressee, object_name, position_of, PacketType};
use crate::core::ALevel;
use crate::error::Result;
use crate::protocol::Frame;
use crate::Chan;

/// The fixed header row.
pub const CSV_HEADER: &str = "chan,utime,isotime,source,heard,level,error,dti,name,symbol,latitude,longitude,speed,course,altitude,frequency,offset,tone,system,status,telemetry,comment";

struct LogState {
    date: String,
    writer: BufWriter<File>,
}

/// CSV activity log writer.
pub struct ActivityLog {
    /// Directory (daily mode) or single file path.
    path: PathBuf,
    daily: bool,
    state: Mutex<Option<LogState>>,
}

impl ActivityLog {
    pub fn new(path: &Path, daily: bool) -> Self {
        Self { path: path.to_path_buf(), daily, state: Mutex::new(None) }
    }

    /// Append one decoded packet.
    pub fn log(&self, chan: Chan, frame: &Frame, alevel: ALevel, retries: usize) -> Result<()> {
        let now = Utc::now();
        let date = now.format("%Y-%m-%d").to_string();

        let mut guard = self.state.lock();
        let rotate = match guard.as_ref() {
            Some(s) => self.daily && s.date != date,
            None => true,
        };
        if rotate {
            let path = if self.daily {
                std::fs::create_dir_all(&self.path)?;
                self.path.join(format!("{}.log", date))
            } else {
                self.path.clone()
            };
            let fresh = !path.exists();
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut writer = BufWriter::new(file);
            if fresh {
                writeln!(writer, "{}", CSV_HEADER)?;
            }
            log::info!("[ActivityLog] writing {}", path.display());
            *guard = Some(LogState { date, writer });
        }

        let Some(state) = guard.as_mut() else { return Ok(()) };
        let row = format_row(chan, frame, alevel, retries, now.timestamp());
        writeln!(state.writer, "{}", row)?;
        state.writer.flush()?;
        Ok(())
    }
}

fn format_row(chan: Chan, frame: &Frame, alevel: ALevel, retries: usize, utime: i64) -> String {
    let info = frame.info();
    let ptype = classify(info);
    let dti = info.first().map(|&b| b as char).unwrap_or(' ');
    let pos = position_of(info);

    let name = match ptype {
        PacketType::Object => object_name(info).unwrap_or_default(),
        PacketType::Message => message_addressee(info).unwrap_or_default(),
        _ => String::new(),
    };
    let symbol = pos
        .map(|p| format!("{}{}", p.symbol_table, p.symbol))
        .unwrap_or_default();
    let status = if ptype == PacketType::Status {
        String::from_utf8_lossy(&info[1..]).to_string()
    } else {
        String::new()
    };
    let telemetry = if ptype == PacketType::Telemetry {
        String::from_utf8_lossy(info).to_string()
    } else {
        String::new()
    };
    let comment = match ptype {
        PacketType::Position if pos.is_some() => {
            // Whatever follows the position body and its extensions.
            String::from_utf8_lossy(info).chars().skip(1).collect::<String>()
        }
        _ => String::new(),
    };

    let fields: Vec<String> = vec![
        chan.to_string(),
        utime.to_string(),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        frame.source().to_text(),
        heard_station(frame),
        alevel.to_text(),
        retries.to_string(),
        dti.to_string(),
        name,
        symbol,
        pos.map(|p| format!("{:.6}", p.lat)).unwrap_or_default(),
        pos.map(|p| format!("{:.6}", p.lon)).unwrap_or_default(),
        pos.and_then(|p| p.speed_knots).map(|s| s.to_string()).unwrap_or_default(),
        pos.and_then(|p| p.course).map(|c| c.to_string()).unwrap_or_default(),
        pos.and_then(|p| p.alt_ft).map(|a| a.to_string()).unwrap_or_default(),
        String::new(), // frequency
        String::new(), // offset
        String::new(), // tone
        String::new(), // system
        status,
        telemetry,
        comment,
    ];
    fields.iter().map(|f| csv_field(f)).collect::<Vec<_>>().join(",")
}

/// The station we actually heard: the last used digipeater, or the
/// source itself when the packet came direct.
fn heard_station(frame: &Frame) -> String {
    (2..frame.num_addrs())
        .rev()
        .find(|&i| frame.h(i))
        .map(|i| frame.addr_with_ssid(i))
        .unwrap_or_else(|| frame.source().to_text())
}

/// Quote a CSV field when it needs it, doubling embedded quotes.
fn csv_field(text: &str) -> String {
    if text.contains(',') || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Frame::from_monitor(text, false).unwrap()
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_heard_station() {
        assert_eq!(heard_station(&frame("A>B:x")), "A");
        assert_eq!(heard_station(&frame("A>B,K1AAA*,K2BBB*,WIDE2-1:x")), "K2BBB");
    }

    #[test]
    fn test_row_for_position_report() {
        let f = frame("W1ABC>APRS,K1AAA*:!4237.14N/07120.83W>on my way");
        let row = format_row(0, &f, ALevel { rec: 42, mark: 21, space: 18 }, 0, 1700000000);
        let cols: Vec<&str> = row.split(',').collect();
        assert_eq!(cols[0], "0");
        assert_eq!(cols[3], "W1ABC");
        assert_eq!(cols[4], "K1AAA");
        assert_eq!(cols[7], "!");
        assert_eq!(cols[9], "/>");
        assert!(cols[10].starts_with("42.61"));
        assert!(cols[11].starts_with("-71.34"));
    }

    #[test]
    fn test_single_file_mode_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packets.log");
        let log = ActivityLog::new(&path, false);
        log.log(0, &frame("A>B:>one"), ALevel::default(), 0).unwrap();
        log.log(1, &frame("C>D:>two"), ALevel::default(), 0).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("0,"));
        assert!(lines[2].starts_with("1,"));
    }

    #[test]
    fn test_daily_mode_uses_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(dir.path(), true);
        log.log(0, &frame("A>B:>x"), ALevel::default(), 0).unwrap();
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let expect = dir.path().join(format!("{}.log", date));
        assert!(expect.exists());
        let text = std::fs::read_to_string(&expect).unwrap();
        assert!(text.starts_with(CSV_HEADER));
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packets.log");
        {
            let log = ActivityLog::new(&path, false);
            log.log(0, &frame("A>B:>x"), ALevel::default(), 0).unwrap();
        }
        // A second writer on the same file must not repeat the header.
        let log = ActivityLog::new(&path, false);
        log.log(0, &frame("A>B:>y"), ALevel::default(), 0).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("chan,utime").count(), 1);
    }
}
