use super::*;

/// Interactive SSH shell on one switch.
///
/// Commands are written to a pseudo terminal and their output is collected
/// until the [`DeviceHandler`] recognises the next prompt.
pub struct SshSession {
    client: Client,
    sender: Sender<String>,
    recv: Receiver<String>,
    handler: DeviceHandler,
    prompt: String,
    device_addr: String,
    /// Mode commands run in; `None` keeps whatever mode the login landed in.
    mode: Option<String>,
    timeout: Duration,
    closed: bool,
    recorder: Option<SessionRecorder>,
}

/// Parameters for [`SshSession::connect`].
pub(super) struct ConnectParams<'a> {
    pub host: IpAddr,
    pub port: u16,
    pub credentials: &'a Credentials,
    pub handler: DeviceHandler,
    pub security_options: &'a ConnectionSecurityOptions,
    pub init_timeout: Duration,
    pub command_timeout: Duration,
    pub recorder: Option<SessionRecorder>,
}

impl SshSession {
    /// Logs in, opens a shell and waits for the first prompt.
    pub(super) async fn connect(params: ConnectParams<'_>) -> Result<SshSession, ConnectError> {
        let ConnectParams {
            host,
            port,
            credentials,
            mut handler,
            security_options,
            init_timeout,
            command_timeout,
            recorder,
        } = params;
        let device_addr = device_addr(&credentials.username, host, port);

        let ssh_config = Config {
            preferred: security_options.preferred(),
            inactivity_timeout: Some(config::DEFAULT_INACTIVITY_TIMEOUT),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (host.to_string(), port),
            &credentials.username,
            AuthMethod::with_password(&credentials.password),
            security_options.server_check.clone(),
            ssh_config,
        )
        .await?;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, mut receiver_from_shell) = mpsc::channel::<String>(256);

        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = receiver_from_user.recv() => {
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } => {
                                let s = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(s).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", io_task_device_addr);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        let mut buffer = String::new();
        let mut prompt = String::new();
        let mut initial_output = String::new();

        let mut params = HashMap::new();
        if let Some(enable) = credentials.enable_password.as_ref() {
            params.insert("EnablePassword".to_string(), format!("{}\n", enable));
        }
        handler.dyn_param = params;

        // Wait for prompt output.
        let init_result = tokio::time::timeout(init_timeout, async {
            loop {
                let Some(data) = receiver_from_shell.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                trace!("{:?}", data);
                buffer.push_str(&data);
                initial_output.push_str(&data);

                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer.drain(..=newline_pos).collect::<String>();
                    handler.read(line.trim_end());
                }

                if !buffer.is_empty() {
                    if handler.read_prompt(&buffer) {
                        prompt.push_str(&buffer);
                        handler.read(&buffer);
                        return Ok(());
                    }
                    if let Some((c, _)) = handler.read_need_write(&buffer) {
                        handler.read(&buffer);
                        buffer.clear();
                        sender_to_shell.send(c).await?;
                    }
                }
            }
        })
        .await;

        match init_result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(ConnectError::InitTimeout(if initial_output.is_empty() {
                    "waiting for initial prompt".to_string()
                } else {
                    initial_output
                }));
            }
        }

        let mode = credentials
            .enable_password
            .as_ref()
            .map(|_| "Enable".to_string());

        if let Some(session_recorder) = recorder.as_ref() {
            let _ = session_recorder.record_event(SessionEvent::ConnectionEstablished {
                device_addr: device_addr.clone(),
                prompt_after: prompt.clone(),
                fsm_prompt_after: handler.current_state().to_string(),
                hostname: handler.hostname().map(str::to_string),
            });
        }

        Ok(Self {
            client,
            sender: sender_to_shell,
            recv: receiver_from_shell,
            handler,
            prompt,
            device_addr,
            mode,
            timeout: command_timeout,
            closed: false,
            recorder,
        })
    }

    /// Checks if the underlying SSH connection is still active.
    pub fn is_connected(&self) -> bool {
        !self.closed && !self.client.is_closed()
    }

    fn record_command(&self, command: &str, mode: &str, prompt_before: &str, output: &Output) {
        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::CommandOutput {
                command: command.to_string(),
                mode: mode.to_string(),
                prompt_before: Some(prompt_before.to_string()),
                prompt_after: Some(self.prompt.clone()),
                fsm_prompt_before: Some(mode.to_string()),
                fsm_prompt_after: Some(self.handler.current_state().to_string()),
                success: output.success,
                content: output.content.clone(),
                all: output.all.clone(),
            });
        }
    }

    /// Executes a command and waits for the full output by matching the prompt.
    pub async fn write_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<Output, ConnectError> {
        if self.closed {
            return Err(ConnectError::ConnectClosedError);
        }

        let prompt_before = self.prompt.clone();
        let mode = self.handler.current_state().to_string();

        // Drop residual data from the previous command.
        while self.recv.try_recv().is_ok() {}

        self.sender.send(format!("{}\n", command)).await?;

        let handler = &mut self.handler;
        let recv = &mut self.recv;
        let sender = &self.sender;
        let recorder = self.recorder.as_ref();

        let mut clean_output = String::new();
        let mut line_buffer = String::new();
        let mut line = String::new();
        let mut new_prompt: Option<String> = None;

        let result = tokio::time::timeout(timeout, async {
            let mut is_error = false;
            loop {
                let Some(data) = recv.recv().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                if let Some(recorder) = recorder {
                    let _ = recorder.record_raw_chunk(data.clone());
                }
                line_buffer.push_str(&data);

                while let Some(newline_pos) = line_buffer.find('\n') {
                    line.clear();
                    line.extend(line_buffer.drain(..=newline_pos));
                    let trim_start = IGNORE_START_LINE.replace(&line, "");
                    handler.read(trim_start.trim_end());
                    if handler.error() {
                        is_error = true;
                    }
                    clean_output.push_str(&trim_start);
                }

                // The prompt has no trailing newline.
                if !line_buffer.is_empty() {
                    if handler.read_prompt(&line_buffer) {
                        handler.read(&line_buffer);
                        clean_output.push_str(&line_buffer);
                        new_prompt = Some(std::mem::take(&mut line_buffer));
                        return Ok(!is_error);
                    }
                    if let Some((c, is_record)) = handler.read_need_write(&line_buffer) {
                        handler.read(&line_buffer);
                        if !is_record {
                            line_buffer.clear();
                        }
                        trace!("Input required: '{:?}'", c);
                        sender.send(c).await?;
                    }
                }
            }
        })
        .await;

        if let Some(prompt) = new_prompt {
            if let Some(recorder) = self.recorder.as_ref()
                && prompt != self.prompt
            {
                let _ = recorder.record_event(SessionEvent::PromptChanged {
                    prompt: prompt.clone(),
                });
            }
            self.prompt = prompt;
        }

        let success = match result {
            Ok(Ok(success)) => success,
            Ok(Err(err)) => {
                let failed = Output {
                    success: false,
                    content: clean_output.clone(),
                    all: clean_output,
                    prompt: None,
                };
                self.record_command(command, &mode, &prompt_before, &failed);
                return Err(err);
            }
            Err(_) => {
                let failed = Output {
                    success: false,
                    content: clean_output.clone(),
                    all: clean_output.clone(),
                    prompt: None,
                };
                self.record_command(command, &mode, &prompt_before, &failed);
                return Err(ConnectError::ExecTimeout(clean_output));
            }
        };

        let output = Output {
            success,
            content: strip_echo_and_prompt(&clean_output, command).to_string(),
            all: clean_output,
            prompt: self.handler.current_prompt().map(|v| v.to_string()),
        };
        self.record_command(command, &mode, &prompt_before, &output);
        Ok(output)
    }

    /// Executes a command in a specific device mode with a custom timeout.
    ///
    /// Mode transition commands are issued first when the shell is elsewhere.
    pub async fn write_with_mode_and_timeout(
        &mut self,
        command: &str,
        mode: &str,
        timeout: Duration,
    ) -> Result<Output, ConnectError> {
        let mut last_state = self.handler.current_state().to_string();
        let trans_cmds = self.handler.trans_state_write(mode)?;
        let mut all = self.prompt.clone();

        for (t_cmd, target_state) in trans_cmds {
            debug!("{} Trans state command: {}", self.device_addr, t_cmd);
            let mut mode_output = self.write_with_timeout(&t_cmd, timeout).await?;
            all.push_str(mode_output.all.as_str());
            if !mode_output.success || self.handler.current_state() != target_state {
                mode_output.success = false;
                mode_output.all = all;
                return Ok(mode_output);
            }

            let current_state = self.handler.current_state().to_string();
            if let Some(recorder) = self.recorder.as_ref()
                && current_state != last_state
            {
                let _ = recorder.record_event(SessionEvent::StateChanged {
                    state: current_state.clone(),
                });
            }
            last_state = current_state;
        }

        let mut cmd_output = self.write_with_timeout(command, timeout).await?;
        all.push_str(cmd_output.all.as_str());
        cmd_output.all = all;
        Ok(cmd_output)
    }
}

/// Removes the echoed command and the trailing prompt line.
fn strip_echo_and_prompt<'a>(all: &'a str, command: &str) -> &'a str {
    let mut content = all;
    if !command.is_empty()
        && let Some(rest) = content.strip_prefix(command)
    {
        content = rest.trim_start_matches(['\n', '\r']);
    }
    match content.rfind('\n') {
        Some(pos) => &content[..pos],
        None => "",
    }
}

#[async_trait]
impl Session for SshSession {
    fn hostname(&self) -> Option<String> {
        self.handler.hostname().map(str::to_string)
    }

    async fn run(&mut self, command: &str) -> Result<String, ConnectError> {
        let timeout = self.timeout;
        let output = match self.mode.clone() {
            Some(mode) => {
                self.write_with_mode_and_timeout(command, &mode, timeout)
                    .await?
            }
            None => self.write_with_timeout(command, timeout).await?,
        };
        if !output.success {
            warn!(
                "{} '{}' reported an error, parsing output anyway",
                self.device_addr, command
            );
        }
        Ok(output.content)
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        if self.closed {
            return Ok(());
        }
        debug!("{} Closing SSH session", self.device_addr);

        if let Some(recorder) = self.recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectionClosed {
                device_addr: Some(self.device_addr.clone()),
                reason: "session_closed".to_string(),
                prompt_before: Some(self.prompt.clone()),
                fsm_prompt_before: Some(self.handler.current_state().to_string()),
            });
        }

        let connected = self.is_connected();
        self.closed = true;
        self.recv.close();

        if connected {
            if let Err(e) = self.sender.send("exit\n".to_string()).await {
                debug!("{} Failed to send exit command: {:?}", self.device_addr, e);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if let Err(e) = self.client.disconnect().await {
            debug!("{} Disconnect failed: {:?}", self.device_addr, e);
        }
        Ok(())
    }
}
