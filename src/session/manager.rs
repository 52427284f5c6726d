use super::client::ConnectParams;
use super::*;
use crate::templates;

/// Opens [`SshSession`]s, one fresh login per hop.
///
/// Every session gets its own [`DeviceHandler`] built from the configured
/// template, so prompt state never leaks from one switch to the next.
#[derive(Debug, Clone)]
pub struct SshSessionProvider {
    template: String,
    port: u16,
    security_options: ConnectionSecurityOptions,
    command_timeout: Duration,
    init_timeout: Duration,
    recorder: Option<SessionRecorder>,
}

impl SshSessionProvider {
    /// Creates a provider for switches of the given template family.
    ///
    /// Fails with [`ConnectError::TemplateNotFound`] for unknown templates.
    pub fn new(template: &str) -> Result<Self, ConnectError> {
        templates::by_name(template)?;
        Ok(Self {
            template: template.to_string(),
            port: config::DEFAULT_SSH_PORT,
            security_options: ConnectionSecurityOptions::default(),
            command_timeout: config::DEFAULT_COMMAND_TIMEOUT,
            init_timeout: config::DEFAULT_INIT_TIMEOUT,
            recorder: None,
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_security(mut self, security_options: ConnectionSecurityOptions) -> Self {
        self.security_options = security_options;
        self
    }

    /// Applies to every command and to the wait for the login prompt.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self.init_timeout = timeout;
        self
    }

    /// Records every session opened by this provider into `recorder`.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl SessionProvider for SshSessionProvider {
    type Session = SshSession;

    async fn open(
        &self,
        host: IpAddr,
        credentials: &Credentials,
    ) -> Result<SshSession, ConnectError> {
        let addr = device_addr(&credentials.username, host, self.port);
        debug!("{} opening SSH session", addr);

        let result = match templates::by_name(&self.template) {
            Ok(handler) => {
                SshSession::connect(ConnectParams {
                    host,
                    port: self.port,
                    credentials,
                    handler,
                    security_options: &self.security_options,
                    init_timeout: self.init_timeout,
                    command_timeout: self.command_timeout,
                    recorder: self.recorder.clone(),
                })
                .await
            }
            Err(err) => Err(err),
        };

        if let Err(err) = result.as_ref() {
            warn!("{} connection failed: {}", addr, err);
            if let Some(recorder) = self.recorder.as_ref() {
                let _ = recorder.record_event(SessionEvent::ConnectionFailed {
                    device_addr: addr,
                    reason: err.to_string(),
                });
            }
        }
        result
    }
}
