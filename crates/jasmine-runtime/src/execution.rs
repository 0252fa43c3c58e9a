//! A started command: lazy output stream plus exit status

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use jasmine_core::JasmineResult;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// One line of command output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Fully collected result of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A running command
///
/// `output` is finite and can be consumed once. `finish` drains it while
/// awaiting the exit status, so a caller that wants live output polls the
/// stream first and then calls `finish` for the status.
pub struct Execution {
    pub command: String,
    pub output: BoxStream<'static, OutputChunk>,
    exit: BoxFuture<'static, JasmineResult<i32>>,
}

impl Execution {
    pub fn new(
        command: impl Into<String>,
        output: BoxStream<'static, OutputChunk>,
        exit: BoxFuture<'static, JasmineResult<i32>>,
    ) -> Self {
        Self {
            command: command.into(),
            output,
            exit,
        }
    }

    /// An execution that has already finished with the given output
    pub fn completed(command: impl Into<String>, exit_code: i32, stdout: &str, stderr: &str) -> Self {
        let chunks: Vec<OutputChunk> = stdout
            .lines()
            .map(|l| OutputChunk::Stdout(l.to_string()))
            .chain(stderr.lines().map(|l| OutputChunk::Stderr(l.to_string())))
            .collect();
        Self::new(
            command,
            futures::stream::iter(chunks).boxed(),
            futures::future::ready(Ok(exit_code)).boxed(),
        )
    }

    /// An execution whose exit status is an error (e.g. a lost channel)
    pub fn failed(command: impl Into<String>, error: jasmine_core::JasmineError) -> Self {
        Self::new(
            command,
            futures::stream::empty::<OutputChunk>().boxed(),
            futures::future::ready(Err(error)).boxed(),
        )
    }

    /// Drain the remaining output and wait for the exit status
    pub async fn finish(self) -> JasmineResult<CommandOutput> {
        let Execution {
            command,
            mut output,
            exit,
        } = self;

        let collect = async move {
            let mut stdout = String::new();
            let mut stderr = String::new();
            while let Some(chunk) = output.next().await {
                match chunk {
                    OutputChunk::Stdout(line) => {
                        stdout.push_str(&line);
                        stdout.push('\n');
                    }
                    OutputChunk::Stderr(line) => {
                        stderr.push_str(&line);
                        stderr.push('\n');
                    }
                }
            }
            (stdout, stderr)
        };

        let ((stdout, stderr), exit_code) = futures::join!(collect, exit);
        Ok(CommandOutput {
            command,
            exit_code: exit_code?,
            stdout,
            stderr,
        })
    }
}

/// Lazily read a pipe line by line
pub(crate) fn line_stream<R>(reader: R, wrap: fn(String) -> OutputChunk) -> BoxStream<'static, OutputChunk>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let lines = BufReader::new(reader).lines();
    futures::stream::unfold(lines, move |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((wrap(line), lines)),
            _ => None,
        }
    })
    .boxed()
}
