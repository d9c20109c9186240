// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Interface for raw NAND flash.
//!
//! Operations are synchronous and polled: each call returns once the chip
//! reports ready. Block and page numbers refer to the currently selected
//! chip. Reads and writes cover the main area followed by the spare (OOB)
//! area of each page, so a block image is `pages_per_block * (page_size +
//! oob_size)` bytes.

use crate::ErrorCode;

/// Chips addressable through the controller's bank select.
pub const MAX_CHIPS: usize = 2;
/// Largest block count tracked in a bad-block table.
pub const MAX_BLOCKS: usize = 4096;

/// Status register bit reporting a failed program or erase.
pub const STATUS_FAIL: u8 = 1 << 0;

/// Description of one chip as reported to the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NandInfo {
    /// A chip answered READ ID.
    pub present: bool,
    /// The ID decoded to a supported geometry.
    pub known: bool,
    pub id: [u8; 8],
    /// Byte of the spare area holding the factory bad-block marker.
    pub badblock_pos: u8,
    pub num_planes: u8,
    /// Bytes.
    pub page_size: u16,
    /// Bytes.
    pub oob_size: u16,
    /// KiB.
    pub block_size: u16,
    /// MiB.
    pub chip_size: u16,
}

impl NandInfo {
    /// Length of the wire form produced by [`NandInfo::to_bytes`].
    pub const SIZE: usize = 20;

    /// Little-endian wire form: present, known, id[8], badblock_pos,
    /// num_planes, page_size, oob_size, block_size, chip_size.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0; Self::SIZE];
        out[0] = u8::from(self.present);
        out[1] = u8::from(self.known);
        out[2..10].copy_from_slice(&self.id);
        out[10] = self.badblock_pos;
        out[11] = self.num_planes;
        out[12..14].copy_from_slice(&self.page_size.to_le_bytes());
        out[14..16].copy_from_slice(&self.oob_size.to_le_bytes());
        out[16..18].copy_from_slice(&self.block_size.to_le_bytes());
        out[18..20].copy_from_slice(&self.chip_size.to_le_bytes());
        out
    }

    pub fn pages_per_block(&self) -> usize {
        match self.page_size {
            0 => 0,
            page => usize::from(self.block_size) * 1024 / usize::from(page),
        }
    }

    pub fn num_blocks(&self) -> usize {
        match self.block_size {
            0 => 0,
            block => usize::from(self.chip_size) * 1024 / usize::from(block),
        }
    }

    /// Bytes in one page including its spare area.
    pub fn page_read_size(&self) -> usize {
        usize::from(self.page_size) + usize::from(self.oob_size)
    }

    /// Bytes in one block image including all spare areas.
    pub fn block_read_size(&self) -> usize {
        self.pages_per_block() * self.page_read_size()
    }
}

/// Two bits per block, four blocks per byte, block 0 in the low bits.
///
/// Any non-zero entry marks the block bad; the particular value is up to
/// whoever marked it.
#[derive(Clone, PartialEq, Eq)]
pub struct BadBlockTable {
    bits: [u8; MAX_BLOCKS / 4],
}

impl BadBlockTable {
    pub const SIZE: usize = MAX_BLOCKS / 4;

    pub const fn new() -> BadBlockTable {
        BadBlockTable {
            bits: [0; MAX_BLOCKS / 4],
        }
    }

    pub fn get(&self, block: usize) -> u8 {
        if block >= MAX_BLOCKS {
            return 0;
        }
        (self.bits[block / 4] >> ((block % 4) * 2)) & 0b11
    }

    pub fn is_bad(&self, block: usize) -> bool {
        self.get(block) != 0
    }

    /// Set the entry for `block` to the low two bits of `mark`.
    pub fn mark(&mut self, block: usize, mark: u8) -> Result<(), ErrorCode> {
        if block >= MAX_BLOCKS {
            return Err(ErrorCode::INVAL);
        }
        let shift = (block % 4) * 2;
        let byte = &mut self.bits[block / 4];
        *byte = (*byte & !(0b11 << shift)) | ((mark & 0b11) << shift);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bits = [0; MAX_BLOCKS / 4];
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}

/// Raw NAND flash access.
pub trait NandFlash {
    /// Probe every chip select, refresh chip information and bad-block
    /// tables. Returns the number of chips found.
    fn identify_all_chips(&self) -> usize;

    /// Information about `chip`, `None` if the index is out of range.
    fn info(&self, chip: usize) -> Option<NandInfo>;

    /// Select `chip` for subsequent operations, or deselect all chips.
    fn select(&self, chip: Option<usize>) -> Result<(), ErrorCode>;

    fn selected(&self) -> Option<usize>;

    /// Copy the bad-block table of `chip` into `out`, returning the bytes
    /// written.
    fn bad_block_table(&self, chip: usize, out: &mut [u8]) -> Result<usize, ErrorCode>;

    /// Set the bad-block table entry of `block` on the selected chip.
    fn mark_block(&self, block: usize, mark: u8) -> Result<(), ErrorCode>;

    /// Erase `block`, returning the chip status byte.
    fn erase_block(&self, block: usize) -> Result<u8, ErrorCode>;

    /// Read `buf.len()` bytes of `page`, main area first then spare.
    fn read_page(&self, page: usize, buf: &mut [u8]) -> Result<(), ErrorCode>;

    /// Program `page` from `buf`, returning the chip status byte.
    fn write_page(&self, page: usize, buf: &[u8]) -> Result<u8, ErrorCode>;

    /// Geometry of the selected chip, if it is known.
    fn selected_info(&self) -> Result<NandInfo, ErrorCode> {
        self.selected()
            .and_then(|chip| self.info(chip))
            .filter(|info| info.known)
            .ok_or(ErrorCode::NODEVICE)
    }

    /// Read a whole block image into `buf`, returning its length.
    fn read_block(&self, block: usize, buf: &mut [u8]) -> Result<usize, ErrorCode> {
        let info = self.selected_info()?;
        let page_len = info.page_read_size();
        let pages = info.pages_per_block();
        if block >= info.num_blocks() || buf.len() < pages * page_len {
            return Err(ErrorCode::INVAL);
        }
        for (i, chunk) in buf[..pages * page_len].chunks_mut(page_len).enumerate() {
            self.read_page(block * pages + i, chunk)?;
        }
        Ok(pages * page_len)
    }

    /// Program a whole block image from `buf`. Stops at the first page whose
    /// status reports failure and returns that status.
    fn write_block(&self, block: usize, buf: &[u8]) -> Result<u8, ErrorCode> {
        let info = self.selected_info()?;
        let page_len = info.page_read_size();
        let pages = info.pages_per_block();
        if block >= info.num_blocks() || buf.len() < pages * page_len {
            return Err(ErrorCode::INVAL);
        }
        let mut status = 0;
        for (i, chunk) in buf[..pages * page_len].chunks(page_len).enumerate() {
            status = self.write_page(block * pages + i, chunk)?;
            if status & STATUS_FAIL != 0 {
                break;
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn info_wire_format() {
        let info = NandInfo {
            present: true,
            known: true,
            id: [0xec, 0xda, 0x10, 0x95, 0x44, 0, 0, 0],
            badblock_pos: 0,
            num_planes: 2,
            page_size: 2048,
            oob_size: 64,
            block_size: 128,
            chip_size: 256,
        };
        let bytes = info.to_bytes();
        assert_eq!(&bytes[..4], &[1, 1, 0xec, 0xda]);
        assert_eq!(bytes[11], 2);
        assert_eq!(&bytes[12..14], &[0x00, 0x08]);
        assert_eq!(&bytes[14..16], &[64, 0]);
        assert_eq!(&bytes[16..18], &[128, 0]);
        assert_eq!(&bytes[18..20], &[0x00, 0x01]);
        assert_eq!(info.pages_per_block(), 64);
        assert_eq!(info.num_blocks(), 2048);
        assert_eq!(info.block_read_size(), 64 * 2112);
    }

    #[test]
    fn bad_block_entries() {
        let mut bbt = BadBlockTable::new();
        assert!(!bbt.is_bad(5));
        bbt.mark(5, 2).unwrap();
        bbt.mark(6, 0x7).unwrap();
        assert!(bbt.is_bad(5));
        assert_eq!(bbt.get(6), 3);
        assert_eq!(bbt.as_bytes()[1], (2 << 2) | (3 << 4));
        bbt.mark(5, 0).unwrap();
        assert!(!bbt.is_bad(5));
        assert_eq!(bbt.mark(MAX_BLOCKS, 1), Err(ErrorCode::INVAL));
        bbt.clear();
        assert!(bbt.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(bbt.as_bytes().len(), BadBlockTable::SIZE);
    }
}
