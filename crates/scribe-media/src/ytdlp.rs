//! `yt-dlp` download process with stdout streaming.

use std::future::Future;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{MediaError, MediaResult};
use crate::failure::EncoderFailure;

/// Best progressive MP4 up to 480p, falling back to any progressive MP4.
pub const YTDLP_FORMAT: &str = "b[height<=480][ext=mp4]/b[ext=mp4]";

/// Stderr lines that are progress chatter rather than errors.
const PROGRESS_NOISE: &[&str] = &[
    "Extracting URL",
    "Downloading webpage",
    "Downloading ios player",
    "Downloading mweb player",
    "Downloading m3u8",
    "Downloading 1 format",
    "[download]",
];

/// Lines of stderr kept for the failure message.
const STDERR_TAIL_LINES: usize = 20;

pub fn ytdlp_args(url: &str) -> Vec<String> {
    vec![
        "-f".to_string(),
        YTDLP_FORMAT.to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "-o".to_string(),
        "-".to_string(),
        url.to_string(),
    ]
}

pub fn is_progress_noise(line: &str) -> bool {
    PROGRESS_NOISE.iter().any(|p| line.contains(p))
}

/// A running download whose media bytes arrive on stdout.
struct YtDlpProcess {
    program: String,
    child: Child,
    stderr: Option<JoinHandle<Vec<String>>>,
}

impl YtDlpProcess {
    async fn finish(mut self) -> Result<(), EncoderFailure> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| EncoderFailure::from_io(self.program.clone(), &e))?;

        let tail = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if status.success() {
            return Ok(());
        }

        let mut failure = EncoderFailure::new(self.program.clone()).with_stderr(tail.join("\n"));
        failure.exit_code = status.code();
        failure.signal = status.signal();
        Err(failure)
    }
}

type ExitFuture = Pin<Box<dyn Future<Output = Result<(), EncoderFailure>> + Send>>;

/// Downloaded media as a byte stream.
///
/// End of stream is only reported once the downloader exited successfully;
/// a failed exit surfaces as a read error, so a consumer never mistakes a
/// truncated download for a complete one. Dropping the stream kills the
/// process.
pub struct YtDlpStream {
    stdout: ChildStdout,
    exit: Option<ExitFuture>,
}

impl AsyncRead for YtDlpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stdout).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let Some(exit) = this.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(exit.as_mut().poll(cx));
        this.exit = None;
        match result {
            Ok(()) => Poll::Ready(Ok(())),
            Err(failure) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::Other,
                failure.to_string(),
            ))),
        }
    }
}

/// Spawn the downloader for `url` and stream its output.
pub fn spawn_download(program: &Path, url: &str, file_id: &str) -> MediaResult<YtDlpStream> {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "yt-dlp".to_string());

    let mut child = Command::new(program)
        .args(ytdlp_args(url))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EncoderFailure::from_io(name.clone(), &e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MediaError::invalid_media("downloader stdout unavailable"))?;

    let stderr = child.stderr.take().map(|pipe| {
        let file_id = file_id.to_string();
        tokio::spawn(async move {
            let mut tail = Vec::new();
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if is_progress_noise(&line) {
                    debug!(file_id = %file_id, "{}", line);
                    continue;
                }
                error!(file_id = %file_id, "Download error: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
            tail
        })
    });

    let process = YtDlpProcess {
        program: name,
        child,
        stderr,
    };

    Ok(YtDlpStream {
        stdout,
        exit: Some(Box::pin(process.finish())),
    })
}
