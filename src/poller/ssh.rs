use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use super::{CommandRunner, QueryError};
use crate::config::Credentials;
use crate::utils::{is_valid_hostname, truncate_lines};

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// This is blocking, so call from a spawn_blocking context.
fn ssh_connect(host: &str, creds: &Credentials, timeout_secs: u64) -> Result<ssh2::Session, QueryError> {
    let addr = (host, 22)
        .to_socket_addrs()
        .map_err(|e| QueryError::Unreachable(format!("cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| QueryError::Unreachable(format!("{} resolved to no address", host)))?;

    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout_secs))
        .map_err(|e| QueryError::Unreachable(format!("TCP connection failed: {}", e)))?;

    tcp.set_read_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();
    tcp.set_write_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| QueryError::Unreachable(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_secs as u32 * 1000);
    session.handshake()
        .map_err(|e| QueryError::Unreachable(format!("SSH handshake failed: {}", e)))?;

    // Try password auth first
    match session.userauth_password(&creds.username, &creds.password) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    // EOS usually only offers keyboard-interactive
    let mut prompter = PasswordPrompt { password: creds.password.clone() };
    let _ = session.userauth_keyboard_interactive(&creds.username, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(QueryError::Auth("SSH authentication failed: all methods exhausted".to_string()))
    }
}

/// Run one command on an open session. A failure here means the session is
/// unusable, not that the switch rejected the command.
fn ssh_exec_on_session(session: &ssh2::Session, command: &str) -> Result<String, QueryError> {
    let mut channel = session.channel_session()
        .map_err(|e| QueryError::Unreachable(format!("Failed to open channel: {}", e)))?;

    if let Err(e) = channel.exec(command) {
        let _ = channel.wait_close();
        return Err(QueryError::Unreachable(format!("Failed to execute command: {}", e)));
    }

    let mut output = String::new();
    let read = channel.read_to_string(&mut output);
    let _ = channel.wait_close();
    read.map_err(|e| QueryError::Unreachable(format!("Failed to read output: {}", e)))?;
    Ok(output)
}

/// Run `command` on the device's open session, logging in first if there is
/// none or it went stale. Hands the session back for the next command.
/// This is blocking, so call from a spawn_blocking context.
fn ssh_run_command(
    host: &str,
    creds: &Credentials,
    cached: Option<ssh2::Session>,
    command: &str,
    timeout_secs: u64,
) -> Result<(String, ssh2::Session), QueryError> {
    if let Some(session) = cached {
        match ssh_exec_on_session(&session, command) {
            Ok(output) => return Ok((output, session)),
            Err(e) => tracing::debug!("SSH session to {} went stale ({}); reconnecting", host, e),
        }
    }

    let session = ssh_connect(host, creds, timeout_secs)?;
    let output = ssh_exec_on_session(&session, command)?;
    Ok((output, session))
}

/// EOS reports CLI errors in-band, prefixed with '%'. Only JSON output is
/// also scanned for "Invalid input"; config text may legitimately contain it.
fn check_cli_output(command: &str, output: &str, json: bool) -> Result<(), QueryError> {
    let trimmed = output.trim_start();
    if trimmed.starts_with('%') || (json && trimmed.contains("Invalid input")) {
        return Err(QueryError::Malformed(format!(
            "`{}` rejected: {}",
            command,
            truncate_lines(trimmed, 3)
        )));
    }
    Ok(())
}

/// Open sessions keyed by device, so a device's commands share one login
struct SessionCache<S> {
    sessions: Mutex<HashMap<String, S>>,
}

impl<S> SessionCache<S> {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Borrow the device's session exclusively until it is put back
    fn take(&self, device: &str) -> Option<S> {
        self.sessions.lock().ok()?.remove(device)
    }

    fn put(&self, device: &str, session: S) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(device.to_string(), session);
        }
    }
}

/// EOS CLI over SSH, using `| json` for structured output
pub struct SshClient {
    credentials: Credentials,
    timeout_secs: u64,
    sessions: SessionCache<ssh2::Session>,
}

impl SshClient {
    pub fn new(credentials: Credentials, timeout_secs: u64) -> Self {
        Self {
            credentials,
            timeout_secs,
            sessions: SessionCache::new(),
        }
    }

    /// Runs in a blocking thread pool so one slow switch never stalls the others
    async fn run(&self, device: &str, command: String, json: bool) -> Result<String, QueryError> {
        if !is_valid_hostname(device) {
            return Err(QueryError::Unreachable(format!("invalid device name: {}", device)));
        }

        let host = device.to_string();
        let creds = self.credentials.clone();
        let timeout_secs = self.timeout_secs;
        let cached = self.sessions.take(device);

        let (output, session) = tokio::task::spawn_blocking(move || {
            ssh_run_command(&host, &creds, cached, &command, timeout_secs).map(|(output, session)| {
                let checked = check_cli_output(&command, &output, json).map(|()| output);
                (checked, session)
            })
        })
        .await
        .map_err(|e| QueryError::Unreachable(format!("Task join error: {}", e)))??;

        // A rejected command leaves the session usable
        self.sessions.put(device, session);
        output
    }
}

#[async_trait]
impl CommandRunner for SshClient {
    async fn run_json(&self, device: &str, command: &str) -> Result<Value, QueryError> {
        let output = self.run(device, format!("{} | json", command), true).await?;
        serde_json::from_str(&output).map_err(|e| {
            QueryError::Malformed(format!("`{} | json` returned invalid JSON: {}", command, e))
        })
    }

    async fn run_text(&self, device: &str, command: &str) -> Result<String, QueryError> {
        self.run(device, command.to_string(), false).await
    }

    fn release(&self, device: &str) {
        if self.sessions.take(device).is_some() {
            tracing::debug!("Closed SSH session to {}", device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_cli_output_detects_errors() {
        assert!(check_cli_output("show version | json", r#"{"version": "4.28.3M"}"#, true).is_ok());
        assert!(matches!(
            check_cli_output("show lldp neighbor", "% Invalid input (at token 2: 'neighbor')", false),
            Err(QueryError::Malformed(_))
        ));
        assert!(matches!(
            check_cli_output("show lldp neighbors detail | json", "Invalid input (privileged mode required)", true),
            Err(QueryError::Malformed(_))
        ));
    }

    #[test]
    fn test_check_cli_output_accepts_config_text_mentioning_errors() {
        let config = "hostname leaf1\n!\ninterface Ethernet1\n   description Invalid input feed\n!\nend\n";
        assert!(check_cli_output("show running-config", config, false).is_ok());
    }

    #[test]
    fn test_session_cache_hands_out_each_session_once() {
        let cache = SessionCache::new();
        assert!(cache.take("leaf1").is_none());

        cache.put("leaf1", 7u32);
        cache.put("leaf2", 9u32);
        assert_eq!(cache.take("leaf1"), Some(7));
        // taken until put back
        assert!(cache.take("leaf1").is_none());
        assert_eq!(cache.take("leaf2"), Some(9));

        cache.put("leaf1", 8u32);
        assert_eq!(cache.take("leaf1"), Some(8));
    }

    #[test]
    fn test_run_rejects_invalid_device_name() {
        let client = SshClient::new(
            Credentials {
                username: "admin".to_string(),
                password: "admin".to_string(),
            },
            5,
        );
        let err = tokio_test::block_on(client.run_text("sw1; reboot", "show version")).unwrap_err();
        assert!(matches!(err, QueryError::Unreachable(_)));
    }
}
