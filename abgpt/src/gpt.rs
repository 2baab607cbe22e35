// SPDX-License-Identifier: MIT

use crate::errors::*;
use crate::io_ext::BlockIOLbaExt;
use abio::prelude::*;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";
pub const GPT_PRIMARY_HEADER_LBA: u64 = 1;
pub const GPT_PRIMARY_ENTRIES_LBA: u64 = 2;
pub const GPT_ENTRY_BASE_SIZE: usize = 128;
pub const GPT_HEADER_MIN_SIZE: u32 = 92;
pub const GPT_NAME_LEN: usize = 36;

/// Legacy alias suffix: a lookup for `xbl` also matches `xblbak`.
const BAK_NAME_EXT: &str = "bak";

/// Which of the two on-disk tables an operation addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GptInstance {
    Primary,
    Backup,
}

#[inline]
pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Header CRC is computed over `header_size` bytes with the CRC field zeroed.
#[inline]
pub(crate) fn compute_header_crc32(mut header: GptHeader) -> u32 {
    header.header_crc = 0;
    let bytes = header.as_bytes();
    crc32(&bytes[..header.header_size as usize])
}

pub fn encode_gpt_name(name: &str) -> [u16; 36] {
    let mut buf = [0u16; 36];
    for (i, c) in name.encode_utf16().take(36).enumerate() {
        buf[i] = c;
    }
    buf
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: u32,
    pub header_size: u32,
    pub header_crc: u32,
    pub reserved: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub entries_lba: u64,
    pub num_entries: u32,
    pub entry_size: u32,
    pub entries_crc: u32,
    pub reserved2: [u8; 420],
}

impl GptHeader {
    pub fn validate(&self) -> GptResult<()> {
        if &self.signature != GPT_SIGNATURE {
            return Err(GptError::Invalid("GPT: invalid signature"));
        }
        if self.header_size < GPT_HEADER_MIN_SIZE
            || self.header_size as usize > core::mem::size_of::<GptHeader>()
        {
            return Err(GptError::Invalid("GPT: header_size out of range"));
        }
        let es = self.entry_size as usize;
        if es < GPT_ENTRY_BASE_SIZE || es > 512 || (es % 8) != 0 {
            return Err(GptError::Invalid("GPT: invalid entry_size"));
        }
        if self.num_entries == 0 || self.num_entries > 16_384 {
            return Err(GptError::Invalid("GPT: num_entries out of range"));
        }
        Ok(())
    }

    pub fn validate_crc(&self) -> GptResult<()> {
        if compute_header_crc32(*self) != self.header_crc {
            return Err(GptError::Invalid("GPT: header CRC mismatch"));
        }
        Ok(())
    }

    /// Sectors occupied by this header's partition entry array.
    fn entries_sectors(&self, block_size: u64) -> u64 {
        (self.num_entries as u64 * self.entry_size as u64).div_ceil(block_size)
    }
}

#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C)]
pub struct GptEntry {
    pub type_guid: [u8; 16],
    pub unique_guid: [u8; 16],
    pub start_lba: u64,
    pub end_lba: u64,
    pub attributes: u64,
    pub name: [u16; 36],
}

impl GptEntry {
    pub fn is_empty(&self) -> bool {
        self.type_guid.iter().all(|&b| b == 0) && self.unique_guid.iter().all(|&b| b == 0)
    }

    /// Byte-exact match of `name` against the ASCII subset of the UTF-16LE
    /// partition name. The legacy `<name>bak` alias also matches.
    pub fn matches_name(&self, name: &str) -> bool {
        let encoded = self.name;
        let want = name.as_bytes();
        if want.len() > GPT_NAME_LEN {
            return false;
        }
        for (i, &b) in want.iter().enumerate() {
            if encoded[i] != b as u16 {
                return false;
            }
        }
        let rest = &encoded[want.len()..];
        tail_is(rest, "") || tail_is(rest, BAK_NAME_EXT)
    }
}

/// True if `rest` spells exactly `suffix` followed by a NUL (or the end of
/// the name field).
fn tail_is(rest: &[u16], suffix: &str) -> bool {
    let want = suffix.as_bytes();
    if rest.len() < want.len() {
        return false;
    }
    for (i, &b) in want.iter().enumerate() {
        if rest[i] != b as u16 {
            return false;
        }
    }
    rest.get(want.len()).copied().unwrap_or(0) == 0
}

/// Both GPT tables of one physical disk, held in memory between `load` and
/// `commit`.
///
/// The two partition entry arrays are kept geometry-identical (same entry
/// size and count); every mutation helper writes through to both, so the
/// engine never produces a primary-only change.
#[derive(Debug, Clone)]
pub struct GptDisk {
    primary: GptHeader,
    backup: GptHeader,
    pentry_arr: Vec<u8>,
    pentry_arr_bak: Vec<u8>,
    entry_size: usize,
    entry_count: usize,
    block_size: u64,
    recovered: Option<GptInstance>,
}

/// One header plus its entry array, fully validated.
fn read_table<IO: BlockIO + ?Sized>(
    io: &mut IO,
    block_size: u64,
    header_lba: u64,
) -> GptResult<(GptHeader, Vec<u8>)> {
    let hdr: GptHeader = io.read_struct_lba(header_lba, block_size)?;
    hdr.validate()?;
    hdr.validate_crc()?;

    let arr_len = (hdr.num_entries as usize)
        .checked_mul(hdr.entry_size as usize)
        .ok_or(GptError::Invalid("GPT: entries byte length overflow"))?;
    let mut arr = vec![0u8; arr_len];
    io.read_at_lba(hdr.entries_lba, block_size, &mut arr)?;
    if crc32(&arr) != hdr.entries_crc {
        return Err(GptError::Invalid("GPT: entries CRC mismatch"));
    }
    Ok((hdr, arr))
}

impl GptDisk {
    /// Parses both tables from `io`.
    ///
    /// When exactly one table is unreadable or fails its CRCs, the disk is
    /// reconstructed from the surviving table (standard GPT recovery); the
    /// next `commit` heals the broken copy. When both tables are valid they
    /// must agree on entry geometry.
    pub fn load<IO: BlockIO + ?Sized>(io: &mut IO) -> GptResult<Self> {
        let block_size = io.block_size() as u64;
        let len = io.len();
        if block_size < 512 || len < block_size * 3 {
            return Err(GptError::Invalid("GPT: device too small"));
        }
        let last_lba = len / block_size - 1;

        let primary = read_table(io, block_size, GPT_PRIMARY_HEADER_LBA);
        let backup = read_table(io, block_size, last_lba);

        let (primary, backup, pentry_arr, pentry_arr_bak, recovered) = match (primary, backup) {
            (Ok((p, pa)), Ok((b, ba))) => {
                if p.entry_size != b.entry_size || p.num_entries != b.num_entries {
                    return Err(GptError::Invalid(
                        "GPT: primary/backup entry geometry mismatch",
                    ));
                }
                (p, b, pa, ba, None)
            }
            (Err(_), Ok((b, ba))) => {
                let mut p = b;
                p.current_lba = GPT_PRIMARY_HEADER_LBA;
                p.backup_lba = last_lba;
                p.entries_lba = GPT_PRIMARY_ENTRIES_LBA;
                let pa = ba.clone();
                (p, b, pa, ba, Some(GptInstance::Primary))
            }
            (Ok((p, pa)), Err(_)) => {
                let mut b = p;
                b.current_lba = last_lba;
                b.backup_lba = GPT_PRIMARY_HEADER_LBA;
                b.entries_lba = last_lba - p.entries_sectors(block_size);
                let ba = pa.clone();
                (p, b, pa, ba, Some(GptInstance::Backup))
            }
            (Err(e), Err(_)) => return Err(e),
        };

        Ok(Self {
            entry_size: primary.entry_size as usize,
            entry_count: primary.num_entries as usize,
            primary,
            backup,
            pentry_arr,
            pentry_arr_bak,
            block_size,
            recovered,
        })
    }

    #[inline]
    pub fn header(&self, which: GptInstance) -> &GptHeader {
        match which {
            GptInstance::Primary => &self.primary,
            GptInstance::Backup => &self.backup,
        }
    }

    #[inline]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    #[inline]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// The table that had to be rebuilt from its twin at load time, if any.
    #[inline]
    pub fn recovered(&self) -> Option<GptInstance> {
        self.recovered
    }

    #[inline]
    fn arr(&self, which: GptInstance) -> &[u8] {
        match which {
            GptInstance::Primary => &self.pentry_arr,
            GptInstance::Backup => &self.pentry_arr_bak,
        }
    }

    fn entry_offset(&self, name: &str, which: GptInstance) -> Option<usize> {
        let arr = self.arr(which);
        (0..self.entry_count)
            .map(|i| i * self.entry_size)
            .find(|&off| {
                GptEntry::read_from_bytes(&arr[off..off + GPT_ENTRY_BASE_SIZE])
                    .map(|e| !e.is_empty() && e.matches_name(name))
                    .unwrap_or(false)
            })
    }

    /// Locates an entry by name in the given table. Callers treat `None` as
    /// a hard error.
    pub fn find_entry(&self, name: &str, which: GptInstance) -> Option<GptEntry> {
        let off = self.entry_offset(name, which)?;
        GptEntry::read_from_bytes(&self.arr(which)[off..off + GPT_ENTRY_BASE_SIZE]).ok()
    }

    /// Applies `f` to the named entry in *both* tables.
    pub(crate) fn update_entry_pair<F>(&mut self, name: &str, f: F) -> GptResult<()>
    where
        F: Fn(&mut GptEntry),
    {
        for which in [GptInstance::Primary, GptInstance::Backup] {
            let off = self.entry_offset(name, which).ok_or(GptError::NotFound)?;
            let arr = match which {
                GptInstance::Primary => &mut self.pentry_arr,
                GptInstance::Backup => &mut self.pentry_arr_bak,
            };
            let slot = &mut arr[off..off + GPT_ENTRY_BASE_SIZE];
            let mut entry = GptEntry::read_from_bytes(slot)
                .map_err(|_| GptError::Invalid("GPT: invalid entry"))?;
            f(&mut entry);
            slot.copy_from_slice(entry.as_bytes());
        }
        Ok(())
    }

    /// Recomputes both entry-array CRCs and both header CRCs in memory.
    pub fn update_crc(&mut self) {
        self.primary.entries_crc = crc32(&self.pentry_arr);
        self.backup.entries_crc = crc32(&self.pentry_arr_bak);
        self.primary.header_crc = compute_header_crc32(self.primary);
        self.backup.header_crc = compute_header_crc32(self.backup);
    }

    /// Writes both tables back: backup entries, backup header, fsync, then
    /// primary entries, primary header, fsync.
    ///
    /// Backup goes first so that a crash between the two groups leaves the
    /// backup as the authoritative copy for the next parse.
    pub fn commit<IO: BlockIO + ?Sized>(&mut self, io: &mut IO) -> GptResult<()> {
        let bs = self.block_size;
        self.update_crc();

        io.write_at_lba(self.backup.entries_lba, bs, &self.pentry_arr_bak)?;
        io.write_struct_lba(self.backup.current_lba, bs, &self.backup)?;
        io.flush()?;

        io.write_at_lba(self.primary.entries_lba, bs, &self.pentry_arr)?;
        io.write_struct_lba(self.primary.current_lba, bs, &self.primary)?;
        io.flush()?;

        self.recovered = None;
        Ok(())
    }
}
