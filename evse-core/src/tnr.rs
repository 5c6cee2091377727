//! TNR (Test-Non-Régression) record/replay: observes every inbound/outbound
//! frame and session-state event without altering session semantics, for
//! later comparison against a golden run.

use std::io::{self, BufRead, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TnrKind {
    FrameIn,
    FrameOut,
    SessionEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TnrRecord {
    pub at: DateTime<Utc>,
    pub kind: TnrKind,
    pub session_id: String,
    pub detail: serde_json::Value,
}

/// Appends one JSON line per observed event. Never mutates session state;
/// it is purely a subscriber on the event bus.
pub struct TnrRecorder<W: Write> {
    writer: W,
}

impl<W: Write> TnrRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn record(&mut self, record: &TnrRecord) -> io::Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.writer, "{line}")
    }
}

/// Drains the event bus's three observed topics onto `recorder` until the
/// bus is dropped. Runs as its own task: it never blocks the session hot
/// path because it only ever falls behind its own buffer, not the
/// publisher.
pub async fn run_recorder<W: Write + Send + 'static>(mut recorder: TnrRecorder<W>, bus: EventBus) {
    let mut frame_in = bus.subscribe_frame_in();
    let mut frame_out = bus.subscribe_frame_out();
    let mut session_event = bus.subscribe_session_events();

    loop {
        tokio::select! {
            event = crate::events::recv_or_warn(&mut frame_in, "frameIn") => {
                match event {
                    Some(e) => { let _ = recorder.record(&TnrRecord {
                        at: e.at, kind: TnrKind::FrameIn, session_id: e.session_id,
                        detail: serde_json::Value::String(String::from_utf8_lossy(&e.bytes).into_owned()),
                    }); }
                    None => break,
                }
            }
            event = crate::events::recv_or_warn(&mut frame_out, "frameOut") => {
                match event {
                    Some(e) => { let _ = recorder.record(&TnrRecord {
                        at: e.at, kind: TnrKind::FrameOut, session_id: e.session_id,
                        detail: serde_json::Value::String(String::from_utf8_lossy(&e.bytes).into_owned()),
                    }); }
                    None => break,
                }
            }
            event = crate::events::recv_or_warn(&mut session_event, "sessionEvent") => {
                match event {
                    Some(e) => { let _ = recorder.record(&TnrRecord {
                        at: e.at, kind: TnrKind::SessionEvent, session_id: e.session_id,
                        detail: serde_json::json!({ "state": format!("{:?}", e.state) }),
                    }); }
                    None => break,
                }
            }
        }
    }
}

/// Reads a previously recorded journal back for replay/comparison.
pub struct TnrPlayer {
    records: Vec<TnrRecord>,
}

impl TnrPlayer {
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: TnrRecord = serde_json::from_str(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            records.push(record);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[TnrRecord] {
        &self.records
    }

    pub fn frames_for_session<'a>(&'a self, session_id: &'a str) -> impl Iterator<Item = &'a TnrRecord> {
        self.records.iter().filter(move |r| r.session_id == session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn record_then_replay_preserves_order() {
        let mut buf = Vec::new();
        {
            let mut recorder = TnrRecorder::new(&mut buf);
            recorder
                .record(&TnrRecord {
                    at: Utc::now(),
                    kind: TnrKind::FrameIn,
                    session_id: "s1".into(),
                    detail: serde_json::json!("[2,\"m1\",\"Heartbeat\",{}]"),
                })
                .unwrap();
            recorder
                .record(&TnrRecord {
                    at: Utc::now(),
                    kind: TnrKind::FrameOut,
                    session_id: "s1".into(),
                    detail: serde_json::json!("[3,\"m1\",{}]"),
                })
                .unwrap();
        }

        let player = TnrPlayer::from_reader(Cursor::new(buf)).unwrap();
        let frames: Vec<_> = player.frames_for_session("s1").collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].kind, TnrKind::FrameIn);
        assert_eq!(frames[1].kind, TnrKind::FrameOut);
    }

    #[test]
    fn replay_from_tempfile_round_trips() {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = tempfile::tempfile().unwrap();
        {
            let mut recorder = TnrRecorder::new(&mut file);
            recorder
                .record(&TnrRecord { at: Utc::now(), kind: TnrKind::SessionEvent, session_id: "s2".into(), detail: serde_json::json!({"state":"BOOTED"}) })
                .unwrap();
        }
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        let player = TnrPlayer::from_reader(Cursor::new(contents)).unwrap();
        assert_eq!(player.records().len(), 1);
    }
}
