//! Output sinks for the CLI transport.
//!
//! # Important
//!
//! - **stdout**: command output only
//! - **stderr**: diagnostics (`Error: ...`), never parsed
//! - Lines end with an explicit `\n`; no `println!`, which may emit `\r\n`
//!   on Windows
//!
//! On close every sink is flushed. File sinks and the process stdout/stderr
//! are then synced, the latter through a duplicate of the process handle, so
//! output redirected to a file reaches the disk. Media that cannot be synced
//! (pipes, terminals, character devices) report `EINVAL`/`ENOTSUP`; those
//! failures are ignored. Custom writers are only flushed.

use std::fmt;
use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A sink the CLI transport writes to.
pub enum Output {
    /// Process stdout.
    Stdout(tokio::io::Stdout),
    /// Process stderr.
    Stderr(tokio::io::Stderr),
    /// A regular file; synced on close.
    File(tokio::fs::File),
    /// Any other writer; flushed on close.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
}

impl Output {
    /// The process stdout.
    pub fn stdout() -> Self {
        Output::Stdout(tokio::io::stdout())
    }

    /// The process stderr.
    pub fn stderr() -> Self {
        Output::Stderr(tokio::io::stderr())
    }

    /// A file sink.
    pub fn file(file: tokio::fs::File) -> Self {
        Output::File(file)
    }

    /// Any async writer.
    pub fn writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Output::Writer(Box::new(writer))
    }

    /// Borrow as a plain async writer.
    pub fn as_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        match self {
            Output::Stdout(w) => w,
            Output::Stderr(w) => w,
            Output::File(w) => w,
            Output::Writer(w) => w.as_mut(),
        }
    }

    /// Write `line` followed by a single `\n`.
    pub async fn write_line(&mut self, line: &str) -> io::Result<()> {
        let w = self.as_writer();
        w.write_all(line.as_bytes()).await?;
        w.write_all(b"\n").await
    }

    /// Flush, then sync if the medium supports it.
    ///
    /// Sync failures that only mean "this medium cannot be synced" are
    /// ignored.
    pub async fn sync(&mut self) -> io::Result<()> {
        self.as_writer().flush().await?;

        let synced = match self {
            Output::File(file) => file.sync_all().await,
            Output::Stdout(_) => sync_std(StdStream::Out).await,
            Output::Stderr(_) => sync_std(StdStream::Err).await,
            Output::Writer(_) => Ok(()),
        };
        if let Err(err) = synced {
            if !is_sync_unsupported(&err) {
                return Err(err);
            }
            tracing::debug!("ignoring sync failure on unsyncable output: {}", err);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum StdStream {
    Out,
    Err,
}

/// Sync a process stream on the blocking pool.
async fn sync_std(stream: StdStream) -> io::Result<()> {
    tokio::task::spawn_blocking(move || duplicate_std(stream)?.sync_all())
        .await
        .map_err(io::Error::other)?
}

/// A `File` over a duplicate of the process stream's handle. Dropping it
/// leaves the original stream open.
#[cfg(unix)]
fn duplicate_std(stream: StdStream) -> io::Result<std::fs::File> {
    use std::os::fd::AsFd;

    let fd = match stream {
        StdStream::Out => std::io::stdout().as_fd().try_clone_to_owned()?,
        StdStream::Err => std::io::stderr().as_fd().try_clone_to_owned()?,
    };
    Ok(std::fs::File::from(fd))
}

#[cfg(windows)]
fn duplicate_std(stream: StdStream) -> io::Result<std::fs::File> {
    use std::os::windows::io::AsHandle;

    let handle = match stream {
        StdStream::Out => std::io::stdout().as_handle().try_clone_to_owned()?,
        StdStream::Err => std::io::stderr().as_handle().try_clone_to_owned()?,
    };
    Ok(std::fs::File::from(handle))
}

#[cfg(not(any(unix, windows)))]
fn duplicate_std(_stream: StdStream) -> io::Result<std::fs::File> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Output::Stdout(_) => "stdout",
            Output::Stderr(_) => "stderr",
            Output::File(_) => "file",
            Output::Writer(_) => "writer",
        };
        f.debug_tuple("Output").field(&kind).finish()
    }
}

/// Whether a sync error only says the medium cannot be synced.
///
/// `EINVAL` surfaces as `InvalidInput`; `ENOTSUP`/`ENOSYS` as `Unsupported`.
pub fn is_sync_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
    )
}
