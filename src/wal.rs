use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes of framing around each payload: length prefix plus trailing CRC.
const FRAME_OVERHEAD: u64 = 8;

fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one record. `Ok(None)` means a clean end, a torn tail or a bad checksum;
/// anything after that point is not trusted.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, len as u64 + FRAME_OVERHEAD))),
        Err(_) => Ok(None),
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What survived a replay, and where the trustworthy prefix of the file ends.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    pub valid_len: u64,
}

/// Append-only write-ahead log of inventory events.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`. A crash mid-write leaves a
/// torn record at the tail; [`Wal::recover`] cuts it off before appending resumes.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay `path`, truncate anything past the last good record, and open for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > replay.valid_len {
            tracing::warn!(
                path = %path.display(),
                discarded = on_disk - replay.valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: replay.events.len() as u64,
        };
        Ok((wal, replay.events))
    }

    /// Read every intact record from `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, size)) = read_record(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += size;
        }
        Ok(replay)
    }

    /// Buffer one record. Nothing is durable until [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `snapshot`: write a sibling temp file, fsync it,
    /// rename it over the log and reopen.
    pub fn compact(&mut self, snapshot: &[Event]) -> io::Result<()> {
        self.flush_sync()?;
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for event in snapshot {
                write_record(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}
