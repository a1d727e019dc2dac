use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::store::StoreEvent;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &StoreEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Where log entries land. A [`File`] outside of tests.
pub trait LogSink: Write {
    fn sync(&self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only log of store events.
///
/// Format per entry: `[u32: len][bincode: StoreEvent][u32: crc32]`.
/// Opening the log cuts it back to its last intact entry, so a torn tail
/// from a crash never sits in front of new appends.
pub struct Wal<S: LogSink = File> {
    sink: S,
    path: PathBuf,
    /// Length of the fsynced, intact prefix.
    len: u64,
    appends_since_compact: u64,
    /// Set when the sink could not be cut back after a failed append.
    poisoned: bool,
}

impl Wal<File> {
    /// Replay the log at `path`, drop anything after the last intact entry,
    /// and open it for appending. A missing file is an empty log.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<StoreEvent>)> {
        let (events, intact) = match File::open(path) {
            Ok(f) => read_entries(&mut BufReader::new(f))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => (Vec::new(), 0),
            Err(e) => return Err(e),
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > intact {
            warn!(
                "dropping {} bytes after the last intact entry of {}",
                on_disk - intact,
                path.display()
            );
            file.set_len(intact)?;
            file.sync_all()?;
        }
        let wal = Self {
            sink: file,
            path: path.to_path_buf(),
            len: intact,
            appends_since_compact: 0,
            poisoned: false,
        };
        Ok((wal, events))
    }

    /// Read every intact event without touching the file.
    pub fn replay(path: &Path) -> io::Result<Vec<StoreEvent>> {
        match File::open(path) {
            Ok(f) => Ok(read_entries(&mut BufReader::new(f))?.0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Rewrite the log as `events` via temp file + rename, then reopen.
    pub fn compact(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let written = {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
            writer.get_ref().metadata()?.len()
        };
        fs::rename(&tmp_path, &self.path)?;
        // The old handle now points at an unlinked file.
        match OpenOptions::new().append(true).open(&self.path) {
            Ok(file) => self.sink = file,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        }
        self.len = written;
        self.appends_since_compact = 0;
        Ok(())
    }
}

impl<S: LogSink> Wal<S> {
    /// Append one event and fsync before returning. On failure the log is
    /// cut back to its previous length, so nothing of the entry survives.
    pub fn append(&mut self, event: &StoreEvent) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "log is unusable after a write that could not be rolled back",
            ));
        }
        let mut entry = Vec::new();
        encode_event(&mut entry, event)?;
        match self.write_entry(&entry) {
            Ok(()) => {
                self.len += entry.len() as u64;
                self.appends_since_compact += 1;
                Ok(())
            }
            Err(e) => {
                self.roll_back();
                Err(e)
            }
        }
    }

    fn write_entry(&mut self, entry: &[u8]) -> io::Result<()> {
        self.sink.write_all(entry)?;
        self.sink.flush()?;
        self.sink.sync()
    }

    fn roll_back(&mut self) {
        let cut = self.sink.truncate(self.len).and_then(|()| self.sink.sync());
        if let Err(e) = cut {
            warn!("could not cut log back to {} bytes: {e}", self.len);
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

/// Decode entries up to the end of the log or the first torn or corrupt
/// one. Also returns the byte length of the intact prefix.
fn read_entries(reader: &mut impl Read) -> io::Result<(Vec<StoreEvent>, u64)> {
    let mut events = Vec::new();
    let mut intact = 0u64;
    while let Some((event, size)) = next_entry(reader)? {
        events.push(event);
        intact += size;
    }
    Ok((events, intact))
}

/// Fill `buf`, or report a clean `false` if the file ends first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next entry and its size on disk.
fn next_entry(reader: &mut impl Read) -> io::Result<Option<(StoreEvent, u64)>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let size = 8 + payload.len() as u64;
    Ok(bincode::deserialize(&payload).ok().map(|event| (event, size)))
}
