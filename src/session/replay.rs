use super::*;

/// One recorded connection attempt.
#[derive(Debug, Clone)]
enum Segment {
    Established {
        prompt: String,
        hostname: Option<String>,
        entries: Vec<SessionRecordEntry>,
    },
    Failed {
        device_addr: String,
        reason: String,
    },
}

/// Offline [`SessionProvider`] backed by a session recording.
///
/// The recording is split at every `connection_established` /
/// `connection_failed` event; each part becomes the session for that host.
/// When a host was recorded more than once, the first recording is used.
#[derive(Debug, Clone, Default)]
pub struct ReplayProvider {
    segments: HashMap<IpAddr, Segment>,
}

impl ReplayProvider {
    pub fn from_recorder(recorder: &SessionRecorder) -> Result<Self, ConnectError> {
        Ok(Self::from_entries(recorder.entries()?))
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        Self::from_recorder(&SessionRecorder::from_jsonl(jsonl)?)
    }

    fn from_entries(entries: Vec<SessionRecordEntry>) -> Self {
        let mut segments: HashMap<IpAddr, Segment> = HashMap::new();
        let mut current: Option<IpAddr> = None;

        for entry in entries {
            match &entry.event {
                SessionEvent::ConnectionEstablished {
                    device_addr,
                    prompt_after,
                    hostname,
                    ..
                } => {
                    current = device_host(device_addr);
                    match current {
                        Some(host) if !segments.contains_key(&host) => {
                            segments.insert(
                                host,
                                Segment::Established {
                                    prompt: prompt_after.clone(),
                                    hostname: hostname.clone(),
                                    entries: Vec::new(),
                                },
                            );
                        }
                        Some(_) => {
                            debug!("Ignoring repeated recording for {}", device_addr);
                            current = None;
                        }
                        None => debug!("Unparsable device address in recording: {}", device_addr),
                    }
                }
                SessionEvent::ConnectionFailed {
                    device_addr,
                    reason,
                } => {
                    current = None;
                    if let Some(host) = device_host(device_addr) {
                        segments.entry(host).or_insert_with(|| Segment::Failed {
                            device_addr: device_addr.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
                _ => {
                    if let Some(host) = current
                        && let Some(Segment::Established { entries, .. }) = segments.get_mut(&host)
                    {
                        entries.push(entry.clone());
                    }
                }
            }
        }

        Self { segments }
    }

    /// Hosts with a recorded connection attempt.
    pub fn hosts(&self) -> Vec<IpAddr> {
        let mut hosts = self.segments.keys().copied().collect::<Vec<_>>();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl SessionProvider for ReplayProvider {
    type Session = ReplaySession;

    async fn open(
        &self,
        host: IpAddr,
        credentials: &Credentials,
    ) -> Result<ReplaySession, ConnectError> {
        let addr = device_addr(&credentials.username, host, config::DEFAULT_SSH_PORT);
        match self.segments.get(&host) {
            Some(Segment::Established {
                prompt,
                hostname,
                entries,
            }) => {
                debug!("{} replaying recorded session", addr);
                Ok(ReplaySession {
                    hostname: hostname.clone().or_else(|| hostname_from_prompt(prompt)),
                    replayer: SessionReplayer::new(entries.clone()),
                    closed: false,
                })
            }
            Some(Segment::Failed {
                device_addr,
                reason,
            }) => Err(ConnectError::RecordedConnectFailure {
                device_addr: device_addr.clone(),
                reason: reason.clone(),
            }),
            None => Err(ConnectError::ReplayMismatchError(format!(
                "no recorded session for {addr}"
            ))),
        }
    }
}

/// A session replaying recorded command outputs in order.
#[derive(Debug, Clone)]
pub struct ReplaySession {
    hostname: Option<String>,
    replayer: SessionReplayer,
    closed: bool,
}

#[async_trait]
impl Session for ReplaySession {
    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    async fn run(&mut self, command: &str) -> Result<String, ConnectError> {
        if self.closed {
            return Err(ConnectError::ConnectClosedError);
        }
        let output = self.replayer.replay_next(command)?;
        trace!("Replayed '{}' ({} bytes)", command, output.content.len());
        Ok(output.content)
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.closed = true;
        Ok(())
    }
}

/// `SW1#`, `SW1>` or `SW1(config)#` -> `SW1`.
fn hostname_from_prompt(prompt: &str) -> Option<String> {
    let cleaned = prompt.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let end = cleaned.find(['#', '>', '(']).unwrap_or(cleaned.len());
    let name = cleaned[..end].trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
