use super::*;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record key events only.
    KeyEventsOnly,
    /// Record key events and raw chunks.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep raw shell chunk events.
    pub keep_raw_chunks: bool,
    /// Keep prompt-changed events.
    pub keep_prompt_changed: bool,
    /// Keep state-changed events.
    pub keep_state_changed: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_raw_chunks: false,
            keep_prompt_changed: false,
            keep_state_changed: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionEstablished {
        device_addr: String,
        #[serde(alias = "prompt")]
        prompt_after: String,
        #[serde(alias = "state")]
        fsm_prompt_after: String,
        #[serde(default)]
        hostname: Option<String>,
    },
    ConnectionFailed {
        device_addr: String,
        reason: String,
    },
    ConnectionClosed {
        #[serde(default)]
        device_addr: Option<String>,
        reason: String,
        #[serde(default)]
        prompt_before: Option<String>,
        #[serde(default)]
        fsm_prompt_before: Option<String>,
    },
    CommandOutput {
        command: String,
        mode: String,
        #[serde(default)]
        prompt_before: Option<String>,
        #[serde(default)]
        prompt_after: Option<String>,
        #[serde(default)]
        fsm_prompt_before: Option<String>,
        #[serde(default)]
        fsm_prompt_after: Option<String>,
        success: bool,
        content: String,
        all: String,
    },
    PromptChanged {
        prompt: String,
    },
    StateChanged {
        state: String,
    },
    RawChunk {
        data: String,
    },
}

/// In-memory session recorder.
///
/// Clones share the same log, so one recorder handed to a provider captures
/// every hop of a search in order.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record a key-level event.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        if self.level == SessionRecordLevel::Off {
            return Ok(());
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Record raw shell data chunk when enabled.
    pub fn record_raw_chunk(&self, data: String) -> Result<(), ConnectError> {
        if self.level != SessionRecordLevel::Full {
            return Ok(());
        }
        self.record_event(SessionEvent::RawChunk { data })
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                ConnectError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        if jsonl.trim().is_empty() {
            return Ok(recorder);
        }

        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                ConnectError::InternalServerError(format!("record decode error: {e}"))
            })?;
            parsed.push(entry);
        }

        let mut guard = recorder
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        *guard = parsed;
        drop(guard);

        Ok(recorder)
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp (stable for equal timestamps) and noisy
    /// events such as raw shell chunks can be filtered out.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConnectError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut indexed = recorder
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::RawChunk { .. } if !options.keep_raw_chunks => None,
                SessionEvent::PromptChanged { .. } if !options.keep_prompt_changed => None,
                SessionEvent::StateChanged { .. } if !options.keep_state_changed => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline replayer over the command outputs of one recorded session.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

impl SessionReplayer {
    pub fn new(entries: Vec<SessionRecordEntry>) -> Self {
        Self { entries, cursor: 0 }
    }

    /// Build a replayer from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        Self::new(recorder.entries().unwrap_or_default())
    }

    /// Build a replayer from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Replay the next recorded output for the given command.
    ///
    /// Recorded outputs for other commands before it are skipped.
    pub fn replay_next(&mut self, command: &str) -> Result<Output, ConnectError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            if let SessionEvent::CommandOutput {
                command: recorded_command,
                prompt_after,
                success,
                content,
                all,
                ..
            } = &entry.event
                && recorded_command == command
            {
                return Ok(Output {
                    success: *success,
                    content: content.clone(),
                    all: all.clone(),
                    prompt: prompt_after.clone(),
                });
            }
        }

        Err(ConnectError::ReplayMismatchError(format!(
            "no replayable output found for command '{command}'"
        )))
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    const NOISY_FIXTURE: &str = r#"{"ts_ms":3,"event":{"kind":"raw_chunk","data":"chunk-2"}}
{"ts_ms":1,"event":{"kind":"connection_established","device_addr":"admin@10.0.0.1:22","prompt_after":"SW1#","fsm_prompt_after":"enable"}}
{"ts_ms":2,"event":{"kind":"prompt_changed","prompt":"SW1#"}}
{"ts_ms":4,"event":{"kind":"state_changed","state":"enable"}}
{"ts_ms":5,"event":{"kind":"command_output","command":"show ip arp","mode":"enable","success":true,"content":"","all":"show ip arp\nSW1#"}}
"#;

    fn command_output(command: &str, content: &str) -> SessionEvent {
        SessionEvent::CommandOutput {
            command: command.to_string(),
            mode: "enable".to_string(),
            prompt_before: Some("SW1#".to_string()),
            prompt_after: Some("SW1#".to_string()),
            fsm_prompt_before: Some("enable".to_string()),
            fsm_prompt_after: Some("enable".to_string()),
            success: true,
            content: content.to_string(),
            all: format!("{command}\n{content}\nSW1#"),
        }
    }

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::ConnectionFailed {
                device_addr: "admin@10.0.0.9:22".to_string(),
                reason: "connection refused".to_string(),
            })
            .expect("record failure");

        let jsonl = recorder.to_jsonl().expect("encode jsonl");
        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode jsonl");
        let entries = restored.entries().expect("entries");

        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0].event,
            SessionEvent::ConnectionFailed { .. }
        ));
    }

    #[test]
    fn replayer_returns_matching_command_output() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(command_output("show ip arp", "Internet 10.0.0.1"))
            .expect("record command output");

        let mut replayer = SessionReplayer::from_recorder(&recorder);
        let output = replayer.replay_next("show ip arp").expect("replay");

        assert!(output.success);
        assert_eq!(output.content, "Internet 10.0.0.1");
        assert_eq!(output.prompt.as_deref(), Some("SW1#"));
    }

    #[test]
    fn replayer_skips_other_commands() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(command_output("terminal length 0", ""))
            .expect("record 1");
        recorder
            .record_event(command_output("show mac address-table", "1 0011.2233.4455 DYNAMIC Gi0/1"))
            .expect("record 2");

        let mut replayer = SessionReplayer::from_recorder(&recorder);
        let output = replayer
            .replay_next("show mac address-table")
            .expect("replay");
        assert_eq!(output.content, "1 0011.2233.4455 DYNAMIC Gi0/1");
        assert!(replayer.replay_next("terminal length 0").is_err());
    }

    #[test]
    fn replay_next_returns_error_when_command_not_found() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(command_output("show clock", "12:00:00"))
            .expect("record command output");

        let mut replayer = SessionReplayer::from_recorder(&recorder);
        let err = match replayer.replay_next("show ip arp") {
            Ok(_) => panic!("missing replay should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
    }

    #[test]
    fn key_events_only_skips_raw_chunks() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);

        recorder
            .record_raw_chunk("raw-shell-data".to_string())
            .expect("record raw");
        recorder
            .record_event(SessionEvent::PromptChanged {
                prompt: "SW1#".to_string(),
            })
            .expect("record prompt");

        let entries = recorder.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0].event,
            SessionEvent::PromptChanged { .. }
        ));
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::new(SessionRecordLevel::Off);

        recorder
            .record_event(SessionEvent::StateChanged {
                state: "enable".to_string(),
            })
            .expect("record state");
        recorder
            .record_raw_chunk("raw-shell-data".to_string())
            .expect("record raw");

        assert!(recorder.entries().expect("entries").is_empty());
    }

    #[test]
    fn clones_share_one_log() {
        let recorder = SessionRecorder::default();
        let clone = recorder.clone();
        clone
            .record_event(SessionEvent::StateChanged {
                state: "enable".to_string(),
            })
            .expect("record");
        assert_eq!(recorder.entries().expect("entries").len(), 1);
        recorder.clear().expect("clear");
        assert!(clone.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_accepts_empty_input() {
        let restored = SessionRecorder::from_jsonl("").expect("decode empty jsonl");
        assert!(restored.entries().expect("entries").is_empty());
    }

    #[test]
    fn from_jsonl_supports_short_connection_field_names() {
        let short = r#"{"ts_ms":1,"event":{"kind":"connection_established","device_addr":"u@10.0.0.1:22","prompt":"r#","state":"enable"}}"#;
        let entries = SessionRecorder::from_jsonl(short)
            .expect("parse")
            .entries()
            .expect("entries");
        match &entries[0].event {
            SessionEvent::ConnectionEstablished {
                prompt_after,
                fsm_prompt_after,
                hostname,
                ..
            } => {
                assert_eq!(prompt_after, "r#");
                assert_eq!(fsm_prompt_after, "enable");
                assert_eq!(hostname, &None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn normalize_jsonl_filters_noise_and_sorts_by_timestamp() {
        let normalized =
            SessionRecorder::normalize_jsonl(NOISY_FIXTURE, NormalizeOptions::default())
                .expect("normalize");
        let restored = SessionRecorder::from_jsonl(&normalized).expect("restore normalized");
        let entries = restored.entries().expect("entries");

        assert_eq!(entries.len(), 3);
        assert!(matches!(
            entries[0].event,
            SessionEvent::ConnectionEstablished { .. }
        ));
        assert!(matches!(
            entries[1].event,
            SessionEvent::StateChanged { .. }
        ));
        assert!(matches!(
            entries[2].event,
            SessionEvent::CommandOutput { .. }
        ));
        assert!(entries[0].ts_ms <= entries[1].ts_ms && entries[1].ts_ms <= entries[2].ts_ms);
    }

    #[test]
    fn normalize_jsonl_can_keep_all_event_types() {
        let options = NormalizeOptions {
            keep_raw_chunks: true,
            keep_prompt_changed: true,
            keep_state_changed: true,
        };
        let normalized =
            SessionRecorder::normalize_jsonl(NOISY_FIXTURE, options).expect("normalize");
        let restored = SessionRecorder::from_jsonl(&normalized).expect("restore normalized");
        assert_eq!(restored.entries().expect("entries").len(), 5);
    }
}
