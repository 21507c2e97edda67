//! ext2 directory block encoding (`ext2_dir_entry_2`).
//!
//! Layout of one record: `inode: u32 | rec_len: u16 | name_len: u8 |
//! file_type: u8 | name`. Records tile the block exactly; a record with
//! `inode == 0` is a free slot.

use nsfs_types::DirEntryType;
use thiserror::Error;

/// ext2 directory entry header size.
pub const DIR_ENTRY_HEADER_LEN: usize = 8;

/// Structural problem found while walking a directory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct BlockFault(pub &'static str);

type Result<T> = std::result::Result<T, BlockFault>;

/// One live record decoded from a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    pub offset: usize,
    pub inode: u32,
    pub rec_len: usize,
    pub file_type: DirEntryType,
    pub name: Vec<u8>,
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Minimum `rec_len` for a name of `name_len` bytes.
#[must_use]
pub fn required_rec_len(name_len: usize) -> usize {
    align4(DIR_ENTRY_HEADER_LEN + name_len)
}

fn read_u16_le(buf: &[u8], off: usize) -> Option<u16> {
    let bytes = buf.get(off..off + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32_le(buf: &[u8], off: usize) -> Option<u32> {
    let bytes = buf.get(off..off + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_u16_le(buf: &mut [u8], off: usize, value: u16) -> Result<()> {
    buf.get_mut(off..off + 2)
        .ok_or(BlockFault("u16 write out of bounds"))?
        .copy_from_slice(&value.to_le_bytes());
    Ok(())
}

fn write_u32_le(buf: &mut [u8], off: usize, value: u32) -> Result<()> {
    buf.get_mut(off..off + 4)
        .ok_or(BlockFault("u32 write out of bounds"))?
        .copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Raw header of the record at `off`, validated against the block bounds.
struct RawHeader {
    inode: u32,
    rec_len: usize,
    name_len: usize,
    file_type: u8,
}

fn read_header(block: &[u8], off: usize) -> Result<RawHeader> {
    let inode = read_u32_le(block, off).ok_or(BlockFault("unable to read entry inode"))?;
    let rec_len =
        usize::from(read_u16_le(block, off + 4).ok_or(BlockFault("unable to read entry rec_len"))?);
    if rec_len < DIR_ENTRY_HEADER_LEN || rec_len % 4 != 0 {
        return Err(BlockFault("invalid directory entry rec_len"));
    }
    let end = off
        .checked_add(rec_len)
        .ok_or(BlockFault("directory entry offset overflow"))?;
    if end > block.len() {
        return Err(BlockFault("directory entry exceeds block boundary"));
    }
    let name_len = usize::from(block[off + 6]);
    if inode != 0 && DIR_ENTRY_HEADER_LEN + name_len > rec_len {
        return Err(BlockFault("directory entry name exceeds rec_len"));
    }
    Ok(RawHeader {
        inode,
        rec_len,
        name_len,
        file_type: block[off + 7],
    })
}

/// Write one record at `offset`, zeroing the slack after the name.
pub fn write_entry(
    block: &mut [u8],
    offset: usize,
    ino: u32,
    rec_len: usize,
    file_type: DirEntryType,
    name: &[u8],
) -> Result<()> {
    let name_len = u8::try_from(name.len()).map_err(|_| BlockFault("entry name exceeds 255 bytes"))?;
    let rec_len_u16 = u16::try_from(rec_len).map_err(|_| BlockFault("entry rec_len exceeds u16"))?;
    let end = offset
        .checked_add(rec_len)
        .ok_or(BlockFault("directory entry offset overflow"))?;
    if end > block.len() {
        return Err(BlockFault("directory entry exceeds block boundary"));
    }
    if rec_len < required_rec_len(name.len()) {
        return Err(BlockFault("entry rec_len smaller than minimum"));
    }

    write_u32_le(block, offset, ino)?;
    write_u16_le(block, offset + 4, rec_len_u16)?;
    block[offset + 6] = name_len;
    block[offset + 7] = file_type as u8;
    let name_start = offset + DIR_ENTRY_HEADER_LEN;
    block[name_start..name_start + name.len()].copy_from_slice(name);
    block[name_start + name.len()..end].fill(0);
    Ok(())
}

/// Decode every live record in `block`.
pub fn parse_dir_block(block: &[u8]) -> Result<Vec<DirRecord>> {
    let mut records = Vec::new();
    let mut off = 0_usize;
    while off + DIR_ENTRY_HEADER_LEN <= block.len() {
        let hdr = read_header(block, off)?;
        if hdr.inode != 0 {
            let name_start = off + DIR_ENTRY_HEADER_LEN;
            records.push(DirRecord {
                offset: off,
                inode: hdr.inode,
                rec_len: hdr.rec_len,
                file_type: DirEntryType::from_raw(hdr.file_type),
                name: block[name_start..name_start + hdr.name_len].to_vec(),
            });
        }
        off += hdr.rec_len;
    }
    if off != block.len() {
        return Err(BlockFault("directory records do not tile the block"));
    }
    Ok(records)
}

/// Find a live record by exact name.
pub fn find_entry(block: &[u8], name: &[u8]) -> Result<Option<DirRecord>> {
    Ok(parse_dir_block(block)?
        .into_iter()
        .find(|rec| rec.name == name))
}

/// Add a record into a single block.
///
/// Reuses a free slot when large enough, otherwise splits a live record
/// with enough slack. Returns the offset of the new record, or `None` when
/// the block has no room.
pub fn add_entry(
    block: &mut [u8],
    ino: u32,
    name: &[u8],
    file_type: DirEntryType,
) -> Result<Option<usize>> {
    if ino == 0 {
        return Err(BlockFault("directory entry inode cannot be zero"));
    }
    let need = required_rec_len(name.len());
    let mut off = 0_usize;
    while off + DIR_ENTRY_HEADER_LEN <= block.len() {
        let hdr = read_header(block, off)?;
        if hdr.inode == 0 {
            if hdr.rec_len >= need {
                write_entry(block, off, ino, hdr.rec_len, file_type, name)?;
                return Ok(Some(off));
            }
        } else {
            let actual = required_rec_len(hdr.name_len);
            let slack = hdr.rec_len - actual;
            if slack >= need {
                let actual_u16 =
                    u16::try_from(actual).map_err(|_| BlockFault("entry rec_len exceeds u16"))?;
                write_u16_le(block, off + 4, actual_u16)?;
                let new_off = off + actual;
                write_entry(block, new_off, ino, slack, file_type, name)?;
                return Ok(Some(new_off));
            }
        }
        off += hdr.rec_len;
    }
    Ok(None)
}

/// Remove the record starting at `offset`.
///
/// The preceding record (if any) absorbs the slot; the removed record's
/// inode is zeroed either way.
pub fn remove_entry_at(block: &mut [u8], offset: usize) -> Result<()> {
    let mut off = 0_usize;
    let mut prev: Option<usize> = None;
    while off < offset {
        let hdr = read_header(block, off)?;
        prev = Some(off);
        off += hdr.rec_len;
    }
    if off != offset {
        return Err(BlockFault("offset is not a record boundary"));
    }
    let hdr = read_header(block, offset)?;
    if let Some(prev_off) = prev {
        let prev_hdr = read_header(block, prev_off)?;
        let merged = u16::try_from(prev_hdr.rec_len + hdr.rec_len)
            .map_err(|_| BlockFault("merged rec_len exceeds u16"))?;
        write_u16_le(block, prev_off + 4, merged)?;
    }
    write_u32_le(block, offset, 0)?;
    Ok(())
}

/// Repoint the record at `offset` to a different inode (`set_link`).
pub fn set_entry_inode(
    block: &mut [u8],
    offset: usize,
    ino: u32,
    file_type: DirEntryType,
) -> Result<()> {
    if ino == 0 {
        return Err(BlockFault("directory entry inode cannot be zero"));
    }
    read_header(block, offset)?;
    write_u32_le(block, offset, ino)?;
    block[offset + 7] = file_type as u8;
    Ok(())
}

/// Inode stored in the record at `offset`, if the offset holds a record.
#[must_use]
pub fn entry_inode_at(block: &[u8], offset: usize) -> Option<u32> {
    read_header(block, offset).ok().map(|hdr| hdr.inode)
}

/// Initialize the first block of a directory with `.` and `..`.
pub fn init_dir_block(block: &mut [u8], self_ino: u32, parent_ino: u32) -> Result<()> {
    if block.len() < required_rec_len(1) + required_rec_len(2) {
        return Err(BlockFault("directory block too small for . and .."));
    }
    block.fill(0);
    let dot_len = required_rec_len(1);
    write_entry(block, 0, self_ino, dot_len, DirEntryType::Dir, b".")?;
    write_entry(
        block,
        dot_len,
        parent_ino,
        block.len() - dot_len,
        DirEntryType::Dir,
        b"..",
    )?;
    Ok(())
}

/// Initialize an appended directory block as one free slot.
pub fn init_empty_block(block: &mut [u8]) -> Result<()> {
    block.fill(0);
    let len = u16::try_from(block.len()).map_err(|_| BlockFault("block exceeds u16 rec_len"))?;
    write_u16_le(block, 4, len)
}
