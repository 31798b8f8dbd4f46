//! Encode / decode individual on-disk records.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

pub const LEN_PREFIX: usize = 4; // rec_len itself
pub const FIXED_HDR: usize = LEN_PREFIX + 2 + 1 + 1 + 4; // rec_len + key_len + flags + reserved + key_hash32
pub const CRC_LEN: usize = 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFlags {
    Put     = 0x01,  // mark the record as a key-value pair (an insertion or update)
    Delete  = 0x02,  // mark the record as a tombstone (a deletion)
}

impl RecordFlags {
    fn from_u8(v: u8) -> io::Result<Self> {
        match v {
            0x01 => Ok(RecordFlags::Put),
            0x02 => Ok(RecordFlags::Delete),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid record flag 0x{other:02x}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub flags:  RecordFlags, // mark the operation type of this record
    pub key:    Vec<u8>,     // key for this record (actual key used for lookup)
    pub value:  Vec<u8>,     // value for this record (empty for a tombstone)
    pub hash32: u32,         // upper 32 bits of SHA-256 hash of the key
}

impl Record {
    pub fn put(key: &[u8], value: &[u8]) -> Self {
        Self { flags: RecordFlags::Put, key: key.to_vec(), value: value.to_vec(), hash32: hash32(key) }
    }

    pub fn delete(key: &[u8]) -> Self {
        Self { flags: RecordFlags::Delete, key: key.to_vec(), value: Vec::new(), hash32: hash32(key) }
    }

    /// Return total encoded length.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.key.len(), self.value.len())
    }

    /// Write encoded bytes to `w`.
    /// a record is serialized as:
    ///  - [rec_len][key_len][flags][reserved][hash32][key][value][crc32] in little-endian
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let key_len = u16::try_from(self.key.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "key longer than 65535 bytes"))?;
        let rec_len = u32::try_from(self.encoded_len() - LEN_PREFIX)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record larger than 4 GiB"))?;

        w.write_u32::<LittleEndian>(rec_len)?;
        w.write_u16::<LittleEndian>(key_len)?;
        w.write_all(&[self.flags as u8, 0])?; // reserved
        w.write_u32::<LittleEndian>(self.hash32)?;
        w.write_all(&self.key)?;
        w.write_all(&self.value)?;
        w.write_u32::<LittleEndian>(checksum(key_len, self.flags as u8, self.hash32, &self.key, &self.value))?;
        Ok(())
    }

    /// Read a record from `r` at the current cursor.
    /// A malformed length or a CRC mismatch is reported as `InvalidData`.
    pub fn decode<R: Read>(r: &mut R) -> io::Result<Self> {
        let rec_len = r.read_u32::<LittleEndian>()? as usize;
        let key_len = r.read_u16::<LittleEndian>()? as usize;
        let flags_u8  = r.read_u8()?;
        let _reserved = r.read_u8()?;
        let hash32    = r.read_u32::<LittleEndian>()?;

        let overhead = FIXED_HDR - LEN_PREFIX + CRC_LEN;
        if rec_len < overhead + key_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "record length too small"));
        }

        // read the variable parts
        let mut key = vec![0; key_len];
        r.read_exact(&mut key)?;
        let mut value = vec![0; rec_len - overhead - key_len];
        r.read_exact(&mut value)?;

        let expected_crc = r.read_u32::<LittleEndian>()?;
        if checksum(key_len as u16, flags_u8, hash32, &key, &value) != expected_crc {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "CRC32 mismatch"));
        }

        Ok(Record {
            flags: RecordFlags::from_u8(flags_u8)?,
            key,
            value,
            hash32,
        })
    }
}

pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    FIXED_HDR + key_len + value_len + CRC_LEN
}

// CRC32 over the entire record except rec_len and the checksum itself
fn checksum(key_len: u16, flags: u8, hash32: u32, key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&key_len.to_le_bytes());
    hasher.update(&[flags, 0]);
    hasher.update(&hash32.to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Hash helper (upper 32 bits of SHA-256 by default).
/// compute the SHA-256 hash of the input key and return the first 4 bytes as a u32
/// (the hash is in big-endian order)
pub fn hash32(key: &[u8]) -> u32 {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(key);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_put_and_tombstone() {
        let put = Record::put(b"storedWords", b"\x02\x00\x00\x00\x00");
        let del = Record::delete(b"storedWords");

        let mut buf = Vec::new();
        put.encode(&mut buf).unwrap();
        del.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), put.encoded_len() + del.encoded_len());

        let mut cursor = &buf[..];
        assert_eq!(Record::decode(&mut cursor).unwrap(), put);
        assert_eq!(Record::decode(&mut cursor).unwrap(), del);
        assert!(cursor.is_empty());
    }

    #[test]
    fn flipped_value_byte_fails_crc() {
        let mut buf = Vec::new();
        Record::put(b"k", b"value").encode(&mut buf).unwrap();

        // last value byte sits right before the crc
        let idx = buf.len() - CRC_LEN - 1;
        buf[idx] ^= 0xff;

        let err = Record::decode(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut buf = Vec::new();
        Record::put(b"k", b"value").encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        assert!(Record::decode(&mut &buf[..]).is_err());
    }

    #[test]
    fn bogus_length_is_invalid_data() {
        let mut buf = Vec::new();
        Record::put(b"key", b"").encode(&mut buf).unwrap();
        // claim a record shorter than its own header
        buf[0..4].copy_from_slice(&3u32.to_le_bytes());

        let err = Record::decode(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
