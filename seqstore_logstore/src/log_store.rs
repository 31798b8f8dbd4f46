use crate::record::{self, Record, RecordFlags};
use crate::segment::{self, SegmentInfo, SegmentReader, SegmentWriter};
use log::{debug, error, info, warn};
use std::{
    collections::HashSet,
    fs,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

pub const MAX_SEG_SIZE: u32 = 4 * 1024 * 1024; // 4 MiB max segment size

/// Append-only, segment based key → bytes store.
///
/// Every put and delete is a CRC-framed record appended to the active segment and
/// fsynced before the call returns. Full segments are sealed with a sorted hash
/// footer. Lookups go from the active segment to the sealed ones, newest first.
///
/// The store assumes it is the only writer of its directory: there is no
/// cross-process locking, two processes appending to the same directory will
/// corrupt each other's segments.
pub struct LogStructuredStore {
    dir:           PathBuf,
    active:        Mutex<SegmentWriter>, // use Mutex to ensure only one thread writes at a time
    sealed:        RwLock<Vec<SegmentReader>>, // sorted by id descending (newest first) (write lock for rolling)
    max_seg_size:  u32,
}

/// Rebuild the footer for a segment by reading the log file and writing the footer file.
/// A torn tail is cut off first so the new footer covers the whole log.
fn rebuild_footer(meta: &SegmentInfo) -> io::Result<()> {
    let fd = fs::OpenOptions::new().read(true).write(true).open(&meta.log_path)?;
    let mut footer = Vec::<(u32, u32)>::new(); // (hash32, offset)
    let valid_end = segment::scan_log(&fd, |off, rec| footer.push((rec.hash32, off)))?;

    let log_len = fd.metadata()?.len();
    if (valid_end as u64) < log_len {
        warn!(
            "logstore: truncating segment {:016X} from {} to {} bytes (torn tail)",
            meta.id, log_len, valid_end
        );
        fd.set_len(valid_end as u64)?;
        fd.sync_all()?;
    }
    segment::write_footer(meta, &footer)
}

fn poisoned<T>(_: T) -> io::Error {
    io::Error::new(io::ErrorKind::Other, "logstore lock poisoned")
}

/// Keep the first record seen for each key; only puts are live.
fn absorb(seen: &mut HashSet<Vec<u8>>, live: &mut Vec<Record>, rec: Record) {
    if seen.insert(rec.key.clone()) && rec.flags == RecordFlags::Put {
        live.push(rec);
    }
}

/// Current value of every live key, sorted by key.
fn live_records(active: &SegmentWriter, sealed: &[SegmentReader]) -> io::Result<Vec<Record>> {
    let mut seen = HashSet::new();
    let mut live = Vec::new();

    for off in active.offsets_newest_first() {
        absorb(&mut seen, &mut live, active.read_at(off)?);
    }
    for seg in sealed {
        for off in seg.offsets_newest_first() {
            absorb(&mut seen, &mut live, seg.read_at(off)?);
        }
    }

    live.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(live)
}

fn remove_segment_files(meta: &SegmentInfo) -> io::Result<()> {
    fs::remove_file(&meta.log_path)?;
    match fs::remove_file(&meta.ftr_path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl LogStructuredStore {
    /// Open (or create) a store in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        Self::open_with_max_segment_size(dir, MAX_SEG_SIZE)
    }

    pub fn open_with_max_segment_size<P: AsRef<Path>>(dir: P, max_seg_size: u32) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // discover *.log, sorting them in a vector by id descending (newest first)
        let mut ids: Vec<u64> = fs::read_dir(&dir)?
            .filter_map(|e| {
                let name = e.ok()?.file_name();
                let name = name.to_str()?;
                let id_str = name.strip_suffix(".log")?;
                u64::from_str_radix(id_str, 16).ok()
            })
            .collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut sealed_readers = Vec::new();

        // the newest segment may have been cut short by a crash; rescan it and keep appending to it
        let mut writer = match ids.first() {
            Some(&newest) => SegmentWriter::recover(&dir, newest, max_seg_size)?,
            None => SegmentWriter::create(&dir, 0, max_seg_size)?,
        };
        if writer.is_full() {
            let next_id = writer.meta.id + 1;
            sealed_readers.push(writer.seal()?);
            writer = SegmentWriter::create(&dir, next_id, max_seg_size)?;
        }

        // open the older segments
        for &id in ids.iter().skip(1) {
            let meta = SegmentInfo::new(&dir, id);
            let reader = match SegmentReader::open(meta.clone()) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("logstore: rebuilding footer for segment {:016X} ({})", id, e);
                    rebuild_footer(&meta)?;
                    SegmentReader::open(meta)?
                }
                Err(e) => return Err(e), // real I/O error
            };
            sealed_readers.push(reader);
        }

        info!(
            "logstore: opened {} with {} sealed segment(s), active segment {:016X}",
            dir.display(),
            sealed_readers.len(),
            writer.meta.id
        );

        Ok(Self {
            dir,
            active: Mutex::new(writer),
            sealed: RwLock::new(sealed_readers),
            max_seg_size,
        })
    }

    fn lock_active(&self) -> io::Result<MutexGuard<'_, SegmentWriter>> {
        self.active.lock().map_err(poisoned)
    }

    fn read_sealed(&self) -> io::Result<RwLockReadGuard<'_, Vec<SegmentReader>>> {
        self.sealed.read().map_err(poisoned)
    }

    fn write_sealed(&self) -> io::Result<RwLockWriteGuard<'_, Vec<SegmentReader>>> {
        self.sealed.write().map_err(poisoned)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store `val` under `key`; durable once this returns `Ok`.
    pub fn put(&self, key: &[u8], val: &[u8]) -> io::Result<()> {
        self.append(Record::put(key, val))
    }

    /// Write a tombstone for `key`.
    pub fn delete(&self, key: &[u8]) -> io::Result<()> {
        self.append(Record::delete(key))
    }

    fn append(&self, rec: Record) -> io::Result<()> {
        let mut writer = self.lock_active()?;

        // check if we need to roll the segment
        if !writer.fits(rec.encoded_len()) {
            self.roll_segment(&mut writer)?;
        }

        writer.append(&rec)?;
        debug!(
            "logstore: appended {:?} record ({} bytes) to segment {:016X}",
            rec.flags,
            rec.encoded_len(),
            writer.meta.id
        );
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> io::Result<Option<Vec<u8>>> {
        let hash = record::hash32(key);

        // search in the active segment first
        if let Some(value) = self.lock_active()?.lookup_in_mem(hash, key)? {
            return Ok(value);
        }

        // then search in the sealed segments from newest to oldest; a tombstone ends the search
        for reader in self.read_sealed()?.iter() {
            if let Some(value) = reader.lookup(hash, key)? {
                return Ok(value);
            }
        }

        // not found
        Ok(None)
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> io::Result<Vec<Vec<u8>>> {
        let writer = self.lock_active()?;
        let sealed = self.read_sealed()?;
        Ok(live_records(&writer, &sealed)?
            .into_iter()
            .map(|rec| rec.key)
            .collect())
    }

    /// Tombstone every live key. Tombstones are written in as few synced batches
    /// as the segment size allows.
    pub fn clear(&self) -> io::Result<()> {
        let mut writer = self.lock_active()?;
        let tombstones: Vec<Record> = {
            let sealed = self.read_sealed()?;
            live_records(&writer, &sealed)?
                .iter()
                .map(|rec| Record::delete(&rec.key))
                .collect()
        };

        let mut rest = &tombstones[..];
        while !rest.is_empty() {
            // take as many tombstones as the active segment can hold (at least one)
            let mut used = writer.bytes_written() as u64;
            let mut n = 0;
            while n < rest.len() {
                let len = rest[n].encoded_len() as u64;
                if n > 0 && used + len > self.max_seg_size as u64 {
                    break;
                }
                used += len;
                n += 1;
            }
            if !writer.fits(rest[0].encoded_len()) {
                self.roll_segment(&mut writer)?;
                continue;
            }
            writer.append_batch(&rest[..n])?;
            rest = &rest[n..];
        }

        info!("logstore: cleared {} key(s)", tombstones.len());
        Ok(())
    }

    /// Flush the active segment writer's footer to disk.
    pub fn flush(&self) -> io::Result<()> {
        self.lock_active()?.flush_footer()
    }

    /// Rewrite the live entries into fresh segments and drop the old ones.
    ///
    /// New segments get ids above every existing one, so until the old files are
    /// gone they shadow them with identical values. Old files are removed oldest
    /// first: the remaining old segments are always the newest ones, which keeps
    /// tombstones for deleted keys around for as long as any older put survives.
    pub fn compact(&self) -> io::Result<()> {
        let mut writer = self.lock_active()?;
        let mut sealed = self.write_sealed()?;

        let live = live_records(&writer, &sealed)?;
        let mut old: Vec<SegmentInfo> = sealed.iter().map(|r| r.meta.clone()).collect();
        old.push(writer.meta.clone());
        old.sort_by_key(|m| m.id);

        let first_id = writer.meta.id + 1;
        let output = self
            .write_compacted(first_id, &live)
            .and_then(|(compacted, next_id)| {
                let fresh = SegmentWriter::create(&self.dir, next_id, self.max_seg_size)?;
                Ok((compacted, fresh))
            });
        let (compacted, fresh) = match output {
            Ok(out) => out,
            Err(e) => {
                // leave nothing behind that could shadow later writes
                for id in first_id..=first_id + live.len() as u64 {
                    let meta = SegmentInfo::new(&self.dir, id);
                    if meta.log_path.exists() {
                        if let Err(e) = remove_segment_files(&meta) {
                            error!("logstore: cannot remove partial segment {:016X}: {}", id, e);
                        }
                    }
                }
                return Err(e);
            }
        };

        // swap in the new layout, then delete the old files oldest first
        *writer = fresh;
        *sealed = compacted;
        for meta in &old {
            remove_segment_files(meta)?;
        }
        segment::sync_dir(&self.dir)?;

        info!(
            "logstore: compacted {} segment(s) into {} holding {} live key(s)",
            old.len(),
            sealed.len(),
            live.len()
        );
        Ok(())
    }

    /// Write `live` into sealed segments starting at `first_id`.
    /// Returns the readers (newest first) and the next unused id.
    fn write_compacted(&self, first_id: u64, live: &[Record]) -> io::Result<(Vec<SegmentReader>, u64)> {
        let mut readers = Vec::new();
        let mut next_id = first_id;
        let mut rest = live;

        while !rest.is_empty() {
            let mut out = SegmentWriter::create(&self.dir, next_id, self.max_seg_size)?;
            next_id += 1;

            let mut used = 0u64;
            let mut n = 0;
            while n < rest.len() {
                let len = rest[n].encoded_len() as u64;
                if n > 0 && used + len > self.max_seg_size as u64 {
                    break;
                }
                used += len;
                n += 1;
            }
            out.append_batch(&rest[..n])?;
            readers.insert(0, out.seal()?);
            rest = &rest[n..];
        }
        Ok((readers, next_id))
    }

    fn roll_segment(&self, old: &mut SegmentWriter) -> io::Result<()> {
        // seal first: on failure the old writer stays active and nothing is lost
        let reader = old.seal()?;
        let next_id = old.meta.id + 1;
        *old = SegmentWriter::create(&self.dir, next_id, self.max_seg_size)?;

        info!("logstore: sealed segment {:016X}, rolling to {:016X}", reader.meta.id, next_id);
        self.write_sealed()?.insert(0, reader); // insert at the front (newest first)

        Ok(())
    }

    pub fn segment_count(&self) -> io::Result<usize> {
        Ok(self.read_sealed()?.len() + 1)
    }
}
