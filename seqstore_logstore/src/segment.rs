use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use log::{error, warn};
use memmap2::Mmap;

use crate::record::{Record, RecordFlags, LEN_PREFIX};

const FOOTER_SLOT: usize = 8; // hash32 + offset32

/// Small metadata carrier shared by writer & reader.
#[derive(Clone, Debug)]
pub(crate) struct SegmentInfo {
    pub id:       u64,
    pub log_path: PathBuf,
    pub ftr_path: PathBuf,
}

impl SegmentInfo {
    /// Construct paths like `<dir>/<id>.log`  `<dir>/<id>.ftr`.
    pub fn new<P: AsRef<Path>>(dir: P, id: u64) -> Self {
        // format id as 16-digit hex
        let log_path = dir.as_ref().join(format!("{id:016X}.log"));
        let ftr_path = dir.as_ref().join(format!("{id:016X}.ftr"));
        Self { id, log_path, ftr_path }
    }

    fn dir(&self) -> &Path {
        self.log_path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// fsync a directory so that file creations, renames and removals in it are durable.
pub(crate) fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Read the record starting at `off`; `end` bounds the readable part of the log.
fn read_record_at(fd: &File, off: u32, end: u64) -> io::Result<Record> {
    let mut len_buf = [0u8; LEN_PREFIX];
    fd.read_exact_at(&mut len_buf, off as u64)?;

    // full record length including the 4 bytes of rec_len itself
    let rec_len = u32::from_le_bytes(len_buf) as u64 + LEN_PREFIX as u64;
    if off as u64 + rec_len > end {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record runs past the end of the segment"));
    }

    let mut buf = vec![0u8; rec_len as usize];
    fd.read_exact_at(&mut buf, off as u64)?;
    Record::decode(&mut &buf[..])
}

/// Whether the unreadable record at `off` is the last thing in the log, i.e. what an
/// interrupted append leaves behind.
fn is_torn_tail(fd: &File, off: u64, log_len: u64) -> io::Result<bool> {
    if log_len - off < LEN_PREFIX as u64 {
        return Ok(true);
    }
    let mut len_buf = [0u8; LEN_PREFIX];
    fd.read_exact_at(&mut len_buf, off)?;
    let rec_end = off + LEN_PREFIX as u64 + u32::from_le_bytes(len_buf) as u64;
    Ok(rec_end >= log_len)
}

/// Walk the log sequentially, calling `visit` with the offset of every intact record.
/// Returns the offset just past the last intact record. A bad record that reaches
/// the end of the log is a torn tail and ends the scan; one followed by more data
/// is corruption and fails with `InvalidData`.
pub(crate) fn scan_log<F: FnMut(u32, &Record)>(fd: &File, mut visit: F) -> io::Result<u32> {
    let log_len = fd.metadata()?.len();
    let mut off = 0u64;

    while off < log_len {
        let rec = match read_record_at(fd, off as u32, log_len) {
            Ok(rec) => rec,
            Err(e) if matches!(e.kind(), io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof) => {
                if is_torn_tail(fd, off, log_len)? {
                    break;
                }
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("corrupt record at offset {off} of {log_len}, before the end of the log: {e}"),
                ));
            }
            Err(e) => return Err(e),
        };
        visit(off as u32, &rec);
        off += rec.encoded_len() as u64;
    }
    Ok(off as u32)
}

/// Write a sorted footer for `meta` through a temp file + rename, so a crash leaves
/// either the old footer or the new one.
pub(crate) fn write_footer(meta: &SegmentInfo, pairs: &[(u32, u32)]) -> io::Result<()> {
    let mut sorted = pairs.to_vec();
    sorted.sort_unstable(); // by hash32, then offset

    let mut buf = Vec::with_capacity(sorted.len() * FOOTER_SLOT);
    for (hash, offset) in &sorted {
        buf.extend_from_slice(&hash.to_le_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
    }

    let tmp_path = meta.ftr_path.with_extension("ftr.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, &meta.ftr_path)?;
    sync_dir(meta.dir())
}

pub(crate) struct SegmentWriter {
    pub meta:       SegmentInfo,
    log_fd:         File,
    footer_buf:     Vec<(u32 /*hash32*/, u32 /*offset32*/)>, // append order
    in_mem_idx:     HashMap<u32, Vec<u32>>, // hash32 → offsets, oldest first
    offset:         u32, // current write offset in the log file
    max_size:       u32,
    broken:         bool, // a failed write could not be rolled back
}

impl SegmentWriter {
    /// Create a fresh `.log` file, empty footer buffer.
    /// An empty file already at this id (left by an earlier failed create) is reused.
    pub fn create<P: AsRef<Path>>(dir: P, id: u64, max_size: u32) -> io::Result<Self> {
        let meta = SegmentInfo::new(dir, id);
        let log_fd = match OpenOptions::new()
            .create_new(true)
            .read(true) // allow reading back
            .append(true) // allow appending
            .open(&meta.log_path)
        {
            Ok(fd) => fd,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let fd = OpenOptions::new().read(true).append(true).open(&meta.log_path)?;
                if fd.metadata()?.len() != 0 {
                    return Err(e);
                }
                warn!("logstore: reusing empty leftover segment {:016X}", id);
                fd
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = sync_dir(meta.dir()) {
            if let Err(rm) = fs::remove_file(&meta.log_path) {
                error!("logstore: cannot remove segment {:016X} after failed create: {}", id, rm);
            }
            return Err(e);
        }

        Ok(Self {
            meta,
            log_fd,
            footer_buf: Vec::new(),
            in_mem_idx: HashMap::new(),
            offset: 0,
            max_size,
            broken: false,
        })
    }

    /// Re-open an existing segment (.log) for appending.
    /// The log is rescanned; a torn tail left by a crash is cut off, corruption
    /// before the tail fails the open.
    pub fn recover<P: AsRef<Path>>(dir: P, id: u64, max_size: u32) -> io::Result<Self> {
        let meta = SegmentInfo::new(dir, id);
        let log_fd = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&meta.log_path)?;

        let mut footer_buf = Vec::new();
        let mut in_mem_idx: HashMap<u32, Vec<u32>> = HashMap::new();
        let valid_end = scan_log(&log_fd, |off, rec| {
            footer_buf.push((rec.hash32, off));
            in_mem_idx.entry(rec.hash32).or_default().push(off);
        })?;

        let log_len = log_fd.metadata()?.len();
        if (valid_end as u64) < log_len {
            warn!(
                "logstore: truncating segment {:016X} from {} to {} bytes (torn tail)",
                id, log_len, valid_end
            );
            log_fd.set_len(valid_end as u64)?;
            log_fd.sync_all()?;
        }

        Ok(Self {
            meta,
            log_fd,
            footer_buf,
            in_mem_idx,
            offset: valid_end,
            max_size,
            broken: false,
        })
    }

    /// Whether a record of `len` bytes belongs in this segment.
    /// An empty segment accepts anything so oversized records still get written.
    pub fn fits(&self, len: usize) -> bool {
        self.offset == 0 || self.offset as u64 + len as u64 <= self.max_size as u64
    }

    pub fn is_full(&self) -> bool {
        self.offset >= self.max_size
    }

    pub fn append(&mut self, rec: &Record) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(rec))
    }

    /// Append records and fsync once. Either every record becomes visible or,
    /// on error, the log is cut back to its previous length and none does.
    pub fn append_batch(&mut self, recs: &[Record]) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("segment {:016X} has an unrecoverable tail; reopen the store", self.meta.id),
            ));
        }

        // encode into temp buf
        let mut buf = Vec::new();
        let mut placed = Vec::with_capacity(recs.len());
        for rec in recs {
            placed.push((rec.hash32, self.offset as u64 + buf.len() as u64));
            rec.encode(&mut buf)?;
        }
        let end = self.offset as u64 + buf.len() as u64;
        if end > u32::MAX as u64 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "segment offset overflow"));
        }

        if let Err(e) = self.log_fd.write_all(&buf).and_then(|_| self.log_fd.sync_data()) {
            self.rollback();
            return Err(e);
        }

        // update book-keeping only once the bytes are durable
        for (hash, off) in placed {
            self.footer_buf.push((hash, off as u32));
            self.in_mem_idx.entry(hash).or_default().push(off as u32);
        }
        self.offset = end as u32;
        Ok(())
    }

    fn rollback(&mut self) {
        let res = self.log_fd.set_len(self.offset as u64).and_then(|_| self.log_fd.sync_data());
        if let Err(e) = res {
            error!("logstore: cannot roll back segment {:016X}: {}", self.meta.id, e);
            self.broken = true;
        }
    }

    /// Fast in-memory lookup while the segment is still open.
    /// Returns `Some(Some(value))` for a put, `Some(None)` for a delete (tombstone), or `None` if not found.
    pub fn lookup_in_mem(&self, hash: u32, key: &[u8]) -> io::Result<Option<Option<Vec<u8>>>> {
        let Some(offsets) = self.in_mem_idx.get(&hash) else {
            return Ok(None);
        };

        // newest first; the key comparison resolves hash collisions
        for &off in offsets.iter().rev() {
            let rec = self.read_at(off)?;
            if rec.key == key {
                return Ok(Some(match rec.flags {
                    RecordFlags::Put => Some(rec.value),
                    RecordFlags::Delete => None, // tombstone
                }));
            }
        }
        Ok(None)
    }

    pub fn read_at(&self, off: u32) -> io::Result<Record> {
        read_record_at(&self.log_fd, off, self.offset as u64)
    }

    pub fn offsets_newest_first(&self) -> Vec<u32> {
        self.footer_buf.iter().rev().map(|&(_, off)| off).collect()
    }

    /// Write the footer for everything appended so far. No-op if empty.
    pub fn flush_footer(&self) -> io::Result<()> {
        if self.footer_buf.is_empty() {
            return Ok(());
        }
        write_footer(&self.meta, &self.footer_buf)
    }

    /// Write the final footer and return a read-only handle (mmap footer).
    /// The writer must not be appended to afterwards.
    pub fn seal(&self) -> io::Result<SegmentReader> {
        write_footer(&self.meta, &self.footer_buf)?;
        self.log_fd.sync_all()?;

        // reopen read-only
        SegmentReader::open(self.meta.clone())
    }

    pub fn bytes_written(&self) -> u32 {
        self.offset
    }
}

pub(crate) struct SegmentReader {
    pub meta:   SegmentInfo,
    log_fd:     File,
    log_len:    u64,
    footer_mm:  Option<Mmap>, // None for an empty footer
}

impl SegmentReader {
    /// Open existing `<id>.log/<id>.ftr` pair.
    /// A missing or inconsistent footer is reported as `InvalidData`.
    pub fn open(meta: SegmentInfo) -> io::Result<Self> {
        let log_fd = File::open(&meta.log_path)?;
        let log_len = log_fd.metadata()?.len();

        let ftr_fd = File::open(&meta.ftr_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                io::Error::new(io::ErrorKind::InvalidData, "footer is missing")
            } else {
                e
            }
        })?;
        let footer_mm = if ftr_fd.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&ftr_fd)? }) // memory-map the footer file
        };

        let reader = Self { meta, log_fd, log_len, footer_mm };
        if !reader.footer_valid() {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "footer is corrupted"));
        }
        if !reader.footer_covers_log() {
            // e.g. a footer flushed while the segment was still active
            return Err(io::Error::new(io::ErrorKind::InvalidData, "footer does not cover the whole log"));
        }
        Ok(reader)
    }

    /// The newest indexed record must end exactly where the log ends.
    fn footer_covers_log(&self) -> bool {
        let Some(last) = self.footer_pairs().map(|(_, off)| off).max() else {
            return self.log_len == 0;
        };
        let mut len_buf = [0u8; LEN_PREFIX];
        if self.log_fd.read_exact_at(&mut len_buf, last as u64).is_err() {
            return false;
        }
        last as u64 + LEN_PREFIX as u64 + u32::from_le_bytes(len_buf) as u64 == self.log_len
    }

    fn footer(&self) -> &[u8] {
        self.footer_mm.as_deref().unwrap_or(&[])
    }

    fn slot_count(&self) -> usize {
        self.footer().len() / FOOTER_SLOT
    }

    fn slot(&self, i: usize) -> (u32, u32) {
        let s = &self.footer()[i * FOOTER_SLOT..(i + 1) * FOOTER_SLOT];
        let h = u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
        let o = u32::from_le_bytes([s[4], s[5], s[6], s[7]]);
        (h, o)
    }

    /// check if the footer is corrupted:
    /// - must be a multiple of 8 bytes (hash32 + offset32)
    /// - entries sorted by (hash32, offset)
    /// - all offsets must be within the log file length
    fn footer_valid(&self) -> bool {
        if self.footer().len() % FOOTER_SLOT != 0 {
            return false;
        }
        let mut prev: Option<(u32, u32)> = None;
        for i in 0..self.slot_count() {
            let pair = self.slot(i);
            if pair.1 as u64 >= self.log_len || prev.is_some_and(|p| p >= pair) {
                return false;
            }
            prev = Some(pair);
        }
        true
    }

    /// Index of the first footer slot whose hash is not less than `hash`.
    fn lower_bound(&self, hash: u32) -> usize {
        let (mut lo, mut hi) = (0, self.slot_count());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.slot(mid).0 < hash {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Binary-search footer, then `pread` the candidates newest first.
    /// Same contract as `SegmentWriter::lookup_in_mem`.
    pub fn lookup(&self, hash: u32, key: &[u8]) -> io::Result<Option<Option<Vec<u8>>>> {
        let start = self.lower_bound(hash);
        let mut end = start;
        while end < self.slot_count() && self.slot(end).0 == hash {
            end += 1;
        }

        for i in (start..end).rev() {
            let rec = self.read_at(self.slot(i).1)?;
            if rec.key == key {
                return Ok(Some(match rec.flags {
                    RecordFlags::Put => Some(rec.value),
                    RecordFlags::Delete => None,
                }));
            }
        }
        Ok(None)
    }

    pub fn read_at(&self, off: u32) -> io::Result<Record> {
        read_record_at(&self.log_fd, off, self.log_len)
    }

    /// Iterate over (hash32, offset32) pairs stored in the footer.
    pub fn footer_pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.slot_count()).map(move |i| self.slot(i))
    }

    pub fn offsets_newest_first(&self) -> Vec<u32> {
        let mut offsets: Vec<u32> = self.footer_pairs().map(|(_, off)| off).collect();
        offsets.sort_unstable_by(|a, b| b.cmp(a));
        offsets
    }
}
