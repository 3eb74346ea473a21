use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Byte sink under a `Wal`. Implemented for `File`; tests substitute a
/// sink that fails on demand.
pub trait LogFile: Write {
    /// Make everything written so far durable.
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the log back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only log of booking events.
///
/// Entry layout: `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
/// A torn or corrupt tail (crash mid-write) ends replay at the last good entry.
///
/// Appends are buffered in memory and reach the file only in `flush_sync`.
/// A batch that fails to write or sync is cut back off the file, so the log
/// only ever holds batches whose callers were told they succeeded.
pub struct Wal<F: LogFile = File> {
    file: F,
    /// Encoded entries not yet handed to the file.
    pending: Vec<u8>,
    pending_events: u64,
    /// File length after the last successful `flush_sync`.
    durable_len: u64,
    /// A failed batch may still sit past `durable_len`.
    needs_truncate: bool,
    path: PathBuf,
    appends_since_compact: u64,
}

/// Encode one event as `[len][bincode][crc32]`.
fn write_entry(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one entry and its encoded size. `Ok(None)` means clean end,
/// truncation, or corruption.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, (len + 8) as u64)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Every valid entry from `reader` plus the length of that valid prefix.
fn scan(reader: &mut impl Read) -> io::Result<(Vec<Event>, u64)> {
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, size)) = read_entry(reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

impl Wal<File> {
    /// Open (or create) the WAL file at `path` for appending.
    ///
    /// Bytes past the last valid entry are cut off first. Replay stops
    /// there, so anything appended after them would never be read back.
    pub fn open(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let file_len = file.metadata()?.len();
        let (_, valid_len) = scan(&mut BufReader::new(&mut file))?;
        if valid_len < file_len {
            tracing::warn!(
                path = %path.display(),
                discarded_bytes = file_len - valid_len,
                "dropping unreadable WAL tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self::with_file(file, path.to_path_buf(), valid_len))
    }

    /// Write a snapshot of events to the temp file next to `path` and fsync it.
    /// Slow I/O; the live log is untouched until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            write_entry(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp snapshot over the log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let len = file.metadata()?.len();
        *self = Self::with_file(file, self.path.clone(), len);
        Ok(())
    }

    /// Replace the log with `events` in one step. Used by tests.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Every valid event in the log, oldest first. A missing file is empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let (events, _) = scan(&mut BufReader::new(file))?;
        Ok(events)
    }
}

impl<F: LogFile> Wal<F> {
    fn with_file(file: F, path: PathBuf, durable_len: u64) -> Self {
        Self {
            file,
            pending: Vec::new(),
            pending_events: 0,
            durable_len,
            needs_truncate: false,
            path,
            appends_since_compact: 0,
        }
    }

    /// Append and fsync a single event. Production writes go through
    /// `append_buffered` + `flush_sync` so a batch shares one fsync.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Encode an event into the pending batch without touching the file.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_entry(&mut self.pending, event)?;
        self.pending_events += 1;
        Ok(())
    }

    /// Write the pending batch and fsync. On any failure the whole batch is
    /// discarded and the file is cut back to its last durable length.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        match self.write_pending() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.discard_pending();
                Err(e)
            }
        }
    }

    fn write_pending(&mut self) -> io::Result<()> {
        if self.needs_truncate {
            self.file.truncate(self.durable_len)?;
            self.needs_truncate = false;
        }
        self.file.write_all(&self.pending)?;
        self.file.flush()?;
        self.file.sync()?;
        self.durable_len += self.pending.len() as u64;
        self.appends_since_compact += self.pending_events;
        self.pending.clear();
        self.pending_events = 0;
        Ok(())
    }

    /// Drop the pending batch and any of its bytes that reached the file.
    /// If the truncate fails it is retried before the next batch is written.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
        self.pending_events = 0;
        self.needs_truncate = self.file.truncate(self.durable_len).is_err();
    }

    /// Return the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durable appends since the log was opened or last compacted.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
