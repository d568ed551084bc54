use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes of framing around each payload: length prefix plus CRC trailer.
const FRAME_OVERHEAD: usize = 8;

/// Write one framed record and return its size on disk.
fn write_record(out: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.write_all(&frame)?;
    Ok(frame.len() as u64)
}

/// Fill `buf` completely, or report a clean stop if the file ends first.
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its frame size, or `None` at end of log or at the
/// first damaged tail.
fn read_record(input: &mut impl Read, path: &Path) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(input, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_full(input, &mut payload)? || !read_full(input, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        tracing::warn!("WAL {}: checksum mismatch, stopping replay", path.display());
        return Ok(None);
    }
    match bincode::deserialize(&payload) {
        Ok(event) => Ok(Some((event, (payload.len() + FRAME_OVERHEAD) as u64))),
        Err(e) => {
            tracing::warn!("WAL {}: undecodable record, stopping replay: {e}", path.display());
            Ok(None)
        }
    }
}

/// Intact records of `path` and the number of bytes they occupy.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut input = BufReader::new(file);
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, frame_len)) = read_record(&mut input, path)? {
        events.push(event);
        intact_len += frame_len;
    }
    Ok((events, intact_len))
}

fn open_for_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only event log.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little endian. A
/// torn or corrupt tail left by a crash is cut off when the log is opened,
/// so new records always follow the last good one.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    /// Durable records since open or the last compaction.
    appended: u64,
    /// Buffered records not yet covered by a `flush_sync`.
    pending: u64,
    pending_bytes: u64,
    /// File length as of the last successful `flush_sync`.
    synced_len: u64,
    #[cfg(test)]
    fail_at: Option<u64>,
}

impl Wal {
    /// Open (or create) the log, truncating anything after the last intact
    /// record. The append counter starts at the number of records kept.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (records, intact_len) = scan(path)?;
        let out = open_for_append(path)?;
        let file_len = out.get_ref().metadata()?.len();
        if file_len > intact_len {
            tracing::warn!(
                "WAL {}: dropping {} bytes of damaged tail after {} records",
                path.display(),
                file_len - intact_len,
                records.len()
            );
            out.get_ref().set_len(intact_len)?;
            out.get_ref().sync_all()?;
        }
        Ok(Self {
            out,
            path: path.to_path_buf(),
            appended: records.len() as u64,
            pending: 0,
            pending_bytes: 0,
            synced_len: intact_len,
            #[cfg(test)]
            fail_at: None,
        })
    }

    /// Append and fsync one record.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Make the append of record number `n` (counting from open or the last
    /// compaction) fail after a short write reaches the file.
    #[cfg(test)]
    pub(crate) fn fail_append_at(&mut self, n: u64) {
        self.fail_at = Some(n);
    }

    /// Buffer one record. Durable only after [`Wal::flush_sync`].
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        #[cfg(test)]
        if self.fail_at == Some(self.appended + self.pending) {
            self.fail_at = None;
            self.out.write_all(&[0xAB; 3])?;
            self.out.flush()?;
            return Err(io::Error::other("injected short write"));
        }
        self.pending_bytes += write_record(&mut self.out, event)?;
        self.pending += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        self.synced_len += self.pending_bytes;
        self.appended += self.pending;
        self.pending = 0;
        self.pending_bytes = 0;
        Ok(())
    }

    /// Throw away every byte written since the last successful
    /// [`Wal::flush_sync`], whether still buffered or already in the file.
    pub fn discard_unsynced(&mut self) -> io::Result<()> {
        let fresh = open_for_append(&self.path)?;
        let (file, _unwritten) = std::mem::replace(&mut self.out, fresh).into_parts();
        self.pending = 0;
        self.pending_bytes = 0;
        file.set_len(self.synced_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the log with `events`: write a sibling temp file, fsync it,
    /// rename it over the log, then reopen for appends.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("wal.tmp");
        let mut written = 0;
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for event in events {
                written += write_record(&mut out, event)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.out = open_for_append(&self.path)?;
        self.appended = 0;
        self.pending = 0;
        self.pending_bytes = 0;
        self.synced_len = written;
        Ok(())
    }

    /// Records appended since open or the last compaction, buffered ones
    /// included. A freshly opened log counts the records it already holds.
    pub fn appends_since_compact(&self) -> u64 {
        self.appended + self.pending
    }

    /// Every intact record in `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spacebook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn registered(name: &str) -> Event {
        Event::ResourceRegistered {
            id: Ulid::new(),
            name: name.into(),
        }
    }

    fn saved(resource_id: Ulid, start: Ms, end: Ms) -> Event {
        Event::ReservationSaved {
            reservation: Reservation {
                id: Ulid::new(),
                resource_id,
                span: Span::new(start, end),
                holder: "carol".into(),
                notes: String::new(),
                status: Status::Confirmed,
                priority: Priority::new(2),
            },
        }
    }

    #[test]
    fn records_replay_in_order() {
        let path = tmp_path("order.wal");
        let rid = Ulid::new();
        let events = vec![
            registered("Room A"),
            saved(rid, 1000, 2000),
            Event::NotesUpdated { id: Ulid::new(), notes: "late".into() },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn.wal");
        let event = registered("Room A");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            // Length prefix promising more bytes than follow.
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        let good = registered("Room A");
        let bad = Event::StatusUpdated {
            id: Ulid::new(),
            status: Status::Cancelled,
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![good]);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let path = tmp_path("compact.wal");
        let rid = Ulid::new();
        let kept = Event::ResourceRegistered {
            id: rid,
            name: "Conference Hall".into(),
        };
        let after = saved(rid, 1000, 2000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            for i in 0..10 {
                wal.append(&Event::ResourceRenamed {
                    id: rid,
                    name: format!("Hall {i}"),
                })
                .unwrap();
            }
            let before_len = fs::metadata(&path).unwrap().len();
            wal.compact(std::slice::from_ref(&kept)).unwrap();
            assert!(fs::metadata(&path).unwrap().len() < before_len);
            assert_eq!(wal.appends_since_compact(), 0);
            assert!(!path.with_extension("wal.tmp").exists());
            wal.append(&after).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, after]);
    }

    #[test]
    fn buffered_records_count_and_land_after_sync() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (0..5).map(|i| registered(&format!("Room {i}"))).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn reopen_cuts_torn_tail_so_new_records_replay() {
        let path = tmp_path("torn_reopen.wal");
        let first = registered("Room A");
        let second = registered("Room B");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        let intact_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0x2A, 0, 0, 0, 9, 9, 9]).unwrap();
        }

        {
            let mut wal = Wal::open(&path).unwrap();
            assert_eq!(fs::metadata(&path).unwrap().len(), intact_len);
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }

    #[test]
    fn undecodable_record_stops_replay_and_is_cut_on_open() {
        let path = tmp_path("undecodable.wal");
        let good = registered("Room A");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            // Checksum matches, but no `Event` variant has this tag.
            let payload = [0xFFu8; 6];
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&crc32fast::hash(&payload).to_le_bytes()).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good.clone()]);

        let after = registered("Room B");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&after).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![good, after]);
    }

    #[test]
    fn reopen_counts_existing_records() {
        let path = tmp_path("reopen_count.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            for i in 0..3 {
                wal.append(&registered(&format!("Room {i}"))).unwrap();
            }
        }

        let mut wal = Wal::open(&path).unwrap();
        assert_eq!(wal.appends_since_compact(), 3);
        wal.append(&registered("Room 3")).unwrap();
        assert_eq!(wal.appends_since_compact(), 4);
    }

    #[test]
    fn discard_unsynced_drops_partial_batch() {
        let path = tmp_path("discard.wal");
        let kept = registered("Room A");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        wal.fail_append_at(3);
        wal.append_buffered(&registered("Room B")).unwrap();
        wal.append_buffered(&registered("Room C")).unwrap();
        assert!(wal.append_buffered(&registered("Room D")).is_err());
        wal.discard_unsynced().unwrap();

        assert_eq!(wal.appends_since_compact(), 1);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept.clone()]);

        let after = registered("Room E");
        wal.append(&after).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, after]);
    }
}
