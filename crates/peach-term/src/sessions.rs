//! Shell processes running on pseudo-terminals, keyed by pid.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_ROWS: u16 = 24;
const DEFAULT_COLS: u16 = 80;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to spawn shell: {0}")]
    Spawn(String),

    #[error("spawned shell has no pid")]
    NoPid,
}

/// Shell settings applied to every spawned session.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub shell: String,
    pub workdir: PathBuf,
}

/// Incremental UTF-8 decoder for PTY output.
///
/// A multi-byte character split across two reads is held back until its
/// remaining bytes arrive. Bytes that can never form a character become
/// U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut start = 0;
        loop {
            match std::str::from_utf8(&self.pending[start..]) {
                Ok(text) => {
                    out.push_str(text);
                    start = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid = start + err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[start..valid]));
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            start = valid + bad;
                        }
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            start = valid;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..start);
        out
    }

    /// Flush whatever is left when the stream ends.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// One running shell. Output can be claimed by a single WebSocket.
pub struct PtySession {
    pid: String,
    input: mpsc::Sender<String>,
    output: Mutex<Option<mpsc::Receiver<String>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    // Dropping the master closes the terminal.
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl PtySession {
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Claim the output stream. Returns `None` once it has been taken.
    pub fn take_output(&self) -> Option<mpsc::Receiver<String>> {
        self.output.lock().ok()?.take()
    }

    pub async fn write(&self, data: String) -> bool {
        self.input.send(data).await.is_ok()
    }

    fn kill(&self) {
        let Ok(mut killer) = self.killer.lock() else {
            return;
        };
        if let Err(e) = killer.kill() {
            debug!("kill pid {}: {}", self.pid, e);
        }
    }
}

/// Registry of live shells.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<ShellConfig>,
    sessions: Arc<DashMap<String, Arc<PtySession>>>,
}

impl SessionManager {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn get(&self, pid: &str) -> Option<Arc<PtySession>> {
        self.sessions.get(pid).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Kill the shell and forget it.
    pub fn terminate(&self, pid: &str) {
        if let Some((_, session)) = self.sessions.remove(pid) {
            session.kill();
            info!("Terminated shell {}", pid);
        }
    }

    /// Spawn a shell on a fresh PTY and register it.
    pub fn spawn(&self) -> Result<Arc<PtySession>, SessionError> {
        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.config.shell);
        cmd.env("TERM", "xterm-256color");
        if self.config.workdir.is_dir() {
            cmd.cwd(&self.config.workdir);
        } else {
            warn!(
                "Working directory {} missing, using default",
                self.config.workdir.display()
            );
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let mut killer = child.clone_killer();
        let pid = match child.process_id() {
            Some(pid) => pid.to_string(),
            None => {
                let _ = killer.kill();
                return Err(SessionError::NoPid);
            }
        };
        drop(pair.slave);

        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(format!("PTY writer: {e}")))?;
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(format!("PTY reader: {e}")))?;

        let (input_tx, mut input_rx) = mpsc::channel::<String>(100);
        let (output_tx, output_rx) = mpsc::channel::<String>(256);

        tokio::task::spawn_blocking(move || {
            while let Some(input) = input_rx.blocking_recv() {
                if writer.write_all(input.as_bytes()).is_err() || writer.flush().is_err() {
                    break;
                }
            }
        });

        tokio::task::spawn_blocking(move || {
            let mut buffer = [0u8; 4096];
            let mut decoder = Utf8Decoder::default();
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = decoder.decode(&buffer[..n]);
                        if data.is_empty() {
                            continue;
                        }
                        if output_tx.blocking_send(data).is_err() {
                            break;
                        }
                    }
                }
            }
            let rest = decoder.finish();
            if !rest.is_empty() {
                let _ = output_tx.blocking_send(rest);
            }
        });

        let session = Arc::new(PtySession {
            pid: pid.clone(),
            input: input_tx,
            output: Mutex::new(Some(output_rx)),
            killer: Mutex::new(killer),
            _master: Mutex::new(pair.master),
        });
        self.sessions.insert(pid.clone(), session.clone());

        let sessions = self.sessions.clone();
        let exited = pid.clone();
        tokio::task::spawn_blocking(move || {
            let status = child.wait();
            debug!("Shell {} exited: {:?}", exited, status.map(|s| s.exit_code()));
            sessions.remove(&exited);
        });
        info!("Spawned {} as pid {}", self.config.shell, pid);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_split_across_reads() {
        let bytes = "ab中c".as_bytes();
        // '中' is three bytes starting at index 2.
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(&bytes[..3]), "ab");
        assert_eq!(decoder.decode(&bytes[3..4]), "");
        assert_eq!(decoder.decode(&bytes[4..]), "中c");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_every_split_point_decodes_intact() {
        let text = "héllo 中文 🍑!";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = Utf8Decoder::default();
            let mut out = decoder.decode(&bytes[..split]);
            out.push_str(&decoder.decode(&bytes[split..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "split at byte {split}");
        }
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe4\xb8"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }
}
