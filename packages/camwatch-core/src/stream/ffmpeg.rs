//! RTSP transport backed by an `ffmpeg` subprocess.
//!
//! ffmpeg pulls the stream over TCP, scales it and writes raw `bgr24`
//! frames to stdout; each read takes exactly one frame worth of bytes.

use super::frame::Frame;
use super::transport::{Connector, Transport, TransportError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};

/// Spawns one ffmpeg process per opened stream.
#[derive(Debug, Clone)]
pub struct FfmpegConnector {
    program: String,
    width: u32,
    height: u32,
}

impl FfmpegConnector {
    pub fn new(program: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            program: program.into(),
            width,
            height,
        }
    }

    fn args(&self, url: &str) -> Vec<String> {
        vec![
            "-nostdin".into(),
            "-loglevel".into(),
            "error".into(),
            "-rtsp_transport".into(),
            "tcp".into(),
            "-i".into(),
            url.into(),
            "-an".into(),
            "-vf".into(),
            format!("scale={}:{}", self.width, self.height),
            "-pix_fmt".into(),
            "bgr24".into(),
            "-f".into(),
            "rawvideo".into(),
            "pipe:1".into(),
        ]
    }
}

#[async_trait]
impl Connector for FfmpegConnector {
    async fn open(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let mut child = Command::new(&self.program)
            .args(self.args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Open(format!("failed to start {}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Open("ffmpeg stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("ffmpeg: {}", line);
                }
            });
        }

        let transport = FfmpegTransport {
            child: Mutex::new(Some(child)),
            stdout: tokio::sync::Mutex::new(stdout),
            width: self.width,
            height: self.height,
            pending: Mutex::new(None),
            released: AtomicBool::new(false),
        };

        // The stream counts as open once the first frame decodes
        match transport.read_raw().await {
            Ok(first) => {
                *transport.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(first);
                Ok(Arc::new(transport))
            }
            Err(e) => {
                transport.release();
                Err(TransportError::Open(match e {
                    TransportError::EndOfStream => "stream closed before first frame".to_string(),
                    other => other.to_string(),
                }))
            }
        }
    }
}

struct FfmpegTransport {
    child: Mutex<Option<Child>>,
    stdout: tokio::sync::Mutex<ChildStdout>,
    width: u32,
    height: u32,
    pending: Mutex<Option<Frame>>,
    released: AtomicBool,
}

impl FfmpegTransport {
    async fn read_raw(&self) -> Result<Frame, TransportError> {
        let len = self.width as usize * self.height as usize * 3;
        let mut buf = vec![0u8; len];

        let mut stdout = self.stdout.lock().await;
        if self.released.load(Ordering::SeqCst) {
            return Err(TransportError::Released);
        }
        match stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(TransportError::EndOfStream);
            }
            Err(e) => return Err(TransportError::Io(e)),
        }

        Frame::new(self.width, self.height, buf).ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                ErrorKind::InvalidData,
                "frame size mismatch",
            ))
        })
    }
}

#[async_trait]
impl Transport for FfmpegTransport {
    async fn read_frame(&self) -> Result<Frame, TransportError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(TransportError::Released);
        }
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(frame) = pending {
            return Ok(frame);
        }
        self.read_raw().await
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let child = self.child.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::debug!("ffmpeg already exited: {}", e);
            }
        }
    }
}

impl Drop for FfmpegTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffmpeg_arguments() {
        let connector = FfmpegConnector::new("ffmpeg", 640, 480);
        let args = connector.args("rtsp://admin:x@10.0.0.5:554/live");

        assert_eq!(args[args.len() - 1], "pipe:1");
        let window = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(window("-rtsp_transport"), "tcp");
        assert_eq!(window("-i"), "rtsp://admin:x@10.0.0.5:554/live");
        assert_eq!(window("-vf"), "scale=640:480");
        assert_eq!(window("-pix_fmt"), "bgr24");
        assert_eq!(window("-f"), "rawvideo");
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_open() {
        let connector = FfmpegConnector::new("/nonexistent/camwatch-ffmpeg", 4, 4);
        let result = connector.open("rtsp://127.0.0.1:1/live").await;
        assert!(matches!(result, Err(TransportError::Open(_))));
    }
}
