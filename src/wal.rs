use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of file, a truncated tail, or a
/// checksum mismatch: replay stops at the first damaged record.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of slot and appointment events.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(event))
    }

    /// Write and fsync `events` as one unit. On failure the file is cut back
    /// to its length before the batch, so replay never sees a partial batch.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let committed = self.writer.get_ref().metadata()?.len();
        let mut written = 0;
        let mut result = Ok(());
        for event in events {
            if let Err(e) = encode_event(&mut self.writer, event) {
                result = Err(e);
                break;
            }
            written += 1;
        }
        if result.is_ok() {
            result = self.flush_sync();
        }
        match result {
            Ok(()) => {
                self.appends_since_compact += written;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.truncate_to(committed) {
                    tracing::error!("WAL rollback to {committed} bytes failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Drop buffered bytes and cut the file to `len`.
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let (stale, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        stale.set_len(len)?;
        stale.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact event on disk, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        Ok(events)
    }
}

// ── Group-commit writer ──────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the background task that owns the `Wal`.
///
/// Appends that arrive while a flush is pending are batched behind a single
/// fsync, and every caller in the batch is answered with the batch result.
#[derive(Clone)]
pub struct WalWriter {
    tx: mpsc::Sender<WalCommand>,
}

impl WalWriter {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    pub async fn append(&self, event: &Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::Append {
            event: event.clone(),
            response,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::Compact { events, response }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self.send(WalCommand::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn send(&self, cmd: WalCommand) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer shut down")
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_other(&mut wal, other);
                continue;
            }
        };
        let mut batch: Pending = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_other(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Pending) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let result = wal.append_batch(batch.iter().map(|(event, _)| event));

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }

    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_other(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = wal.compact(&events);
            if result.is_ok() {
                tracing::info!("compacted WAL {} to {} events", wal.path().display(), events.len());
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by writer_loop"),
    }
}
