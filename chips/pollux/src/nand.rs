// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! NAND flash controller.
//!
//! The POLLUX static memory controller exposes raw NAND command, address
//! and data cycles through three byte-wide windows; the chip's ready/busy
//! line latches a pending bit in the memory controller's NAND control
//! register. Two chips share the bus, selected through the same register.
//!
//! [`Nand`] talks to the chips through the [`NandBus`] trait so it can be
//! driven by a simulated chip in tests. Only large-page parts are decoded.

use core::cell::{Cell, RefCell};

use kernel::debug;
use kernel::hil::nand::{BadBlockTable, NandFlash, NandInfo, MAX_BLOCKS, MAX_CHIPS};
use kernel::utilities::registers::interfaces::{ReadWriteable, Readable, Writeable};
use kernel::utilities::registers::{register_bitfields, register_structs, ReadWrite, WriteOnly};
use kernel::utilities::StaticRef;
use kernel::ErrorCode;

register_structs! {
    pub McusRegisters {
        (0x000 => _reserved0),
        (0x074 => nfcontrol: ReadWrite<u32, NFCONTROL::Register>),
        (0x078 => @END),
    }
}

register_structs! {
    pub NandRegisters {
        (0x000 => data: ReadWrite<u8>),
        (0x001 => _reserved0),
        (0x010 => cmd: WriteOnly<u8>),
        (0x011 => _reserved1),
        (0x018 => addr: WriteOnly<u8>),
        (0x019 => @END),
    }
}

register_bitfields![u32,
    NFCONTROL [
        NFBANK OFFSET(0) NUMBITS(1) [],
        /// Ready edge seen on the ready/busy line, write one to clear
        INTPEND OFFSET(15) NUMBITS(1) []
    ]
];

pub const MCUS_BASE: StaticRef<McusRegisters> =
    unsafe { StaticRef::new(0xC001_5800 as *const McusRegisters) };
pub const NAND_BASE: StaticRef<NandRegisters> =
    unsafe { StaticRef::new(0xAC00_0000 as *const NandRegisters) };

const CMD_READ0: u8 = 0x00;
const CMD_READSTART: u8 = 0x30;
const CMD_SEQIN: u8 = 0x80;
const CMD_PAGEPROG: u8 = 0x10;
const CMD_ERASE1: u8 = 0x60;
const CMD_ERASE2: u8 = 0xd0;
const CMD_STATUS: u8 = 0x70;
const CMD_READID: u8 = 0x90;
const CMD_RESET: u8 = 0xff;

/// Polls of the ready bit before an operation is given up on.
const READY_TIMEOUT: usize = 1_000_000;

/// Byte level access to the NAND bus.
pub trait NandBus {
    /// Route subsequent cycles to chip `bank`.
    fn bank(&self, bank: usize);
    fn command(&self, cmd: u8);
    fn address(&self, byte: u8);
    fn read_byte(&self) -> u8;
    fn write_byte(&self, byte: u8);
    /// Wait for the selected chip to report ready.
    fn wait_ready(&self) -> Result<(), ErrorCode>;
}

/// The memory-mapped NAND windows of the POLLUX.
pub struct PolluxNandBus {
    mcus: StaticRef<McusRegisters>,
    nand: StaticRef<NandRegisters>,
}

impl PolluxNandBus {
    pub const fn new(mcus: StaticRef<McusRegisters>, nand: StaticRef<NandRegisters>) -> Self {
        PolluxNandBus { mcus, nand }
    }

    /// Drop a stale ready indication.
    pub fn clear_pending(&self) {
        self.mcus.nfcontrol.modify(NFCONTROL::INTPEND::SET);
    }
}

impl NandBus for PolluxNandBus {
    fn bank(&self, bank: usize) {
        // Writing INTPEND back as read would acknowledge it.
        let nfbank = if bank != 0 {
            NFCONTROL::NFBANK::SET
        } else {
            NFCONTROL::NFBANK::CLEAR
        };
        self.mcus
            .nfcontrol
            .modify(nfbank + NFCONTROL::INTPEND::CLEAR);
    }

    fn command(&self, cmd: u8) {
        self.nand.cmd.set(cmd);
    }

    fn address(&self, byte: u8) {
        self.nand.addr.set(byte);
    }

    fn read_byte(&self) -> u8 {
        self.nand.data.get()
    }

    fn write_byte(&self, byte: u8) {
        self.nand.data.set(byte);
    }

    fn wait_ready(&self) -> Result<(), ErrorCode> {
        for _ in 0..READY_TIMEOUT {
            if self.mcus.nfcontrol.is_set(NFCONTROL::INTPEND) {
                self.clear_pending();
                return Ok(());
            }
        }
        Err(ErrorCode::FAIL)
    }
}

/// Decode READ ID bytes of a large-page chip.
///
/// Byte 3 carries page, spare and block size; byte 4 the plane count and
/// plane size. A chip is known when it answered and its block count fits
/// the bad-block table.
pub fn decode_id(id: &[u8; 8]) -> NandInfo {
    let present = id[0] != 0x00 && id[0] != 0xff;
    let mut info = NandInfo {
        present,
        id: *id,
        ..NandInfo::default()
    };
    if !present {
        return info;
    }

    let ext = id[3];
    let page_size = 1024u16 << (ext & 0x3);
    let spare_per_512 = 8u16 << ((ext >> 2) & 0x1);
    let block_kib = 64u16 << ((ext >> 4) & 0x3);
    let planes = 1u8 << ((id[4] >> 2) & 0x3);
    let plane_mib = 8u16 << ((id[4] >> 4) & 0x7);

    info.page_size = page_size;
    info.oob_size = spare_per_512 * (page_size / 512);
    info.block_size = block_kib;
    info.num_planes = planes;
    info.chip_size = plane_mib.saturating_mul(u16::from(planes));
    // Factory marker in the first spare byte.
    info.badblock_pos = 0;
    info.known = info.num_blocks() > 0 && info.num_blocks() <= MAX_BLOCKS;
    info
}

const NO_CHIP: NandInfo = NandInfo {
    present: false,
    known: false,
    id: [0; 8],
    badblock_pos: 0,
    num_planes: 0,
    page_size: 0,
    oob_size: 0,
    block_size: 0,
    chip_size: 0,
};

pub struct Nand<B: NandBus> {
    bus: B,
    chips: [Cell<NandInfo>; MAX_CHIPS],
    bad_blocks: [RefCell<BadBlockTable>; MAX_CHIPS],
    selected: Cell<Option<usize>>,
}

impl<B: NandBus> Nand<B> {
    pub const fn new(bus: B) -> Self {
        Nand {
            bus,
            chips: [Cell::new(NO_CHIP), Cell::new(NO_CHIP)],
            bad_blocks: [
                RefCell::new(BadBlockTable::new()),
                RefCell::new(BadBlockTable::new()),
            ],
            selected: Cell::new(None),
        }
    }

    fn reset(&self) -> Result<(), ErrorCode> {
        self.bus.command(CMD_RESET);
        self.bus.wait_ready()
    }

    fn read_id(&self) -> [u8; 8] {
        self.bus.command(CMD_READID);
        self.bus.address(0);
        let mut id = [0; 8];
        for b in id.iter_mut() {
            *b = self.bus.read_byte();
        }
        id
    }

    fn probe(&self) -> NandInfo {
        if self.reset().is_err() {
            return NO_CHIP;
        }
        decode_id(&self.read_id())
    }

    /// Row address cycles: two up to 64Ki pages, three above.
    fn row_cycles(info: &NandInfo) -> usize {
        let pages = (u64::from(info.chip_size) << 20) / u64::from(info.page_size.max(1));
        if pages > 0x1_0000 {
            3
        } else {
            2
        }
    }

    fn send_row(&self, info: &NandInfo, page: usize) {
        for i in 0..Self::row_cycles(info) {
            self.bus.address((page >> (8 * i)) as u8);
        }
    }

    fn send_address(&self, info: &NandInfo, column: usize, page: usize) {
        self.bus.address(column as u8);
        self.bus.address((column >> 8) as u8);
        self.send_row(info, page);
    }

    fn read_status(&self) -> u8 {
        self.bus.command(CMD_STATUS);
        self.bus.read_byte()
    }

    fn read_at(
        &self,
        info: &NandInfo,
        page: usize,
        column: usize,
        buf: &mut [u8],
    ) -> Result<(), ErrorCode> {
        self.bus.command(CMD_READ0);
        self.send_address(info, column, page);
        self.bus.command(CMD_READSTART);
        self.bus.wait_ready()?;
        for b in buf.iter_mut() {
            *b = self.bus.read_byte();
        }
        Ok(())
    }

    /// Mark every block whose first or last page carries a factory bad
    /// block marker.
    fn scan_bad_blocks(&self, chip: usize, info: &NandInfo) -> Result<(), ErrorCode> {
        let pages = info.pages_per_block();
        let column = usize::from(info.page_size) + usize::from(info.badblock_pos);
        let mut table = self.bad_blocks[chip].borrow_mut();
        for block in 0..info.num_blocks() {
            for page in [block * pages, block * pages + pages - 1] {
                let mut marker = [0xff];
                self.read_at(info, page, column, &mut marker)?;
                if marker[0] != 0xff {
                    table.mark(block, 1)?;
                    break;
                }
            }
        }
        Ok(())
    }

    fn check_page(&self, page: usize, len: usize) -> Result<NandInfo, ErrorCode> {
        let info = self.selected_info()?;
        if page >= info.pages_per_block() * info.num_blocks() || len > info.page_read_size() {
            return Err(ErrorCode::INVAL);
        }
        Ok(info)
    }
}

impl<B: NandBus> NandFlash for Nand<B> {
    fn identify_all_chips(&self) -> usize {
        let mut found = 0;
        for chip in 0..MAX_CHIPS {
            self.bus.bank(chip);
            let info = self.probe();
            self.chips[chip].set(info);
            self.bad_blocks[chip].borrow_mut().clear();
            if !info.present {
                continue;
            }
            found += 1;
            if !info.known {
                debug!("nand{}: unknown chip {:02x?}", chip, info.id);
                continue;
            }
            if let Err(e) = self.scan_bad_blocks(chip, &info) {
                debug!("nand{}: bad block scan failed: {:?}", chip, e);
            }
        }
        if let Some(chip) = self.selected.get() {
            self.bus.bank(chip);
        }
        found
    }

    fn info(&self, chip: usize) -> Option<NandInfo> {
        self.chips.get(chip).map(Cell::get)
    }

    fn select(&self, chip: Option<usize>) -> Result<(), ErrorCode> {
        match chip {
            Some(chip) if chip >= MAX_CHIPS => Err(ErrorCode::INVAL),
            Some(chip) => {
                self.bus.bank(chip);
                self.selected.set(Some(chip));
                Ok(())
            }
            None => {
                self.selected.set(None);
                Ok(())
            }
        }
    }

    fn selected(&self) -> Option<usize> {
        self.selected.get()
    }

    fn bad_block_table(&self, chip: usize, out: &mut [u8]) -> Result<usize, ErrorCode> {
        let table = self.bad_blocks.get(chip).ok_or(ErrorCode::NODEVICE)?.borrow();
        let bytes = table.as_bytes();
        if out.len() < bytes.len() {
            return Err(ErrorCode::INVAL);
        }
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    fn mark_block(&self, block: usize, mark: u8) -> Result<(), ErrorCode> {
        let info = self.selected_info()?;
        if block >= info.num_blocks() {
            return Err(ErrorCode::INVAL);
        }
        let chip = self.selected.get().ok_or(ErrorCode::NODEVICE)?;
        self.bad_blocks[chip].borrow_mut().mark(block, mark)
    }

    fn erase_block(&self, block: usize) -> Result<u8, ErrorCode> {
        let info = self.selected_info()?;
        if block >= info.num_blocks() {
            return Err(ErrorCode::INVAL);
        }
        self.bus.command(CMD_ERASE1);
        self.send_row(&info, block * info.pages_per_block());
        self.bus.command(CMD_ERASE2);
        self.bus.wait_ready()?;
        Ok(self.read_status())
    }

    fn read_page(&self, page: usize, buf: &mut [u8]) -> Result<(), ErrorCode> {
        let info = self.check_page(page, buf.len())?;
        self.read_at(&info, page, 0, buf)
    }

    fn write_page(&self, page: usize, buf: &[u8]) -> Result<u8, ErrorCode> {
        let info = self.check_page(page, buf.len())?;
        self.bus.command(CMD_SEQIN);
        self.send_address(&info, 0, page);
        for b in buf {
            self.bus.write_byte(*b);
        }
        self.bus.command(CMD_PAGEPROG);
        self.bus.wait_ready()?;
        Ok(self.read_status())
    }
}

#[cfg(test)]
mod test {
    extern crate std;

    use super::*;
    use kernel::hil::nand::STATUS_FAIL;
    use std::collections::{BTreeSet, HashMap, VecDeque};
    use std::vec;
    use std::vec::Vec;

    /// 1 KiB pages, 16 spare bytes, 64 KiB blocks, 8 MiB: 128 blocks of 64
    /// pages, two row cycles.
    const SMALL_ID: [u8; 8] = [0xec, 0x73, 0x00, 0x00, 0x00, 0, 0, 0];
    const PAGE_LEN: usize = 1024 + 16;
    const PAGES_PER_BLOCK: usize = 64;

    #[derive(Default)]
    struct SimChip {
        pages: HashMap<usize, Vec<u8>>,
        failing_pages: BTreeSet<usize>,
        cmd: u8,
        addr: Vec<u8>,
        out: VecDeque<u8>,
        program: Vec<u8>,
        column: usize,
        status: u8,
    }

    impl SimChip {
        fn page(&self, page: usize) -> Vec<u8> {
            self.pages
                .get(&page)
                .cloned()
                .unwrap_or_else(|| vec![0xff; PAGE_LEN])
        }

        fn row(&self, skip: usize) -> usize {
            self.addr[skip..]
                .iter()
                .enumerate()
                .map(|(i, b)| usize::from(*b) << (8 * i))
                .sum()
        }
    }

    struct SimBus {
        bank: Cell<usize>,
        chips: [RefCell<Option<SimChip>>; MAX_CHIPS],
        log: RefCell<Vec<u8>>,
    }

    impl SimBus {
        fn new(present: [bool; MAX_CHIPS]) -> SimBus {
            SimBus {
                bank: Cell::new(0),
                chips: present.map(|p| RefCell::new(if p { Some(SimChip::default()) } else { None })),
                log: RefCell::new(Vec::new()),
            }
        }

        fn with_chip<T>(&self, f: impl FnOnce(&mut SimChip) -> T) -> Option<T> {
            self.chips[self.bank.get()].borrow_mut().as_mut().map(f)
        }
    }

    impl NandBus for SimBus {
        fn bank(&self, bank: usize) {
            self.bank.set(bank);
        }

        fn command(&self, cmd: u8) {
            self.log.borrow_mut().push(cmd);
            self.with_chip(|chip| match cmd {
                CMD_READSTART => {
                    chip.column = usize::from(chip.addr[0]) | usize::from(chip.addr[1]) << 8;
                    let page = chip.page(chip.row(2));
                    chip.out = page[chip.column.min(PAGE_LEN)..].iter().copied().collect();
                }
                CMD_PAGEPROG => {
                    let page = chip.row(2);
                    if chip.failing_pages.contains(&page) {
                        chip.status = STATUS_FAIL;
                    } else {
                        let mut data = chip.page(page);
                        for (d, p) in data.iter_mut().zip(chip.program.iter()) {
                            *d &= *p;
                        }
                        chip.pages.insert(page, data);
                        chip.status = 0;
                    }
                }
                CMD_ERASE2 => {
                    let first = chip.row(0) / PAGES_PER_BLOCK * PAGES_PER_BLOCK;
                    for page in first..first + PAGES_PER_BLOCK {
                        chip.pages.remove(&page);
                    }
                    chip.status = 0;
                }
                CMD_STATUS => chip.out = VecDeque::from([chip.status]),
                CMD_READID => chip.out = SMALL_ID.iter().copied().collect(),
                _ => {
                    chip.cmd = cmd;
                    chip.addr.clear();
                    chip.program.clear();
                }
            });
        }

        fn address(&self, byte: u8) {
            self.with_chip(|chip| chip.addr.push(byte));
        }

        fn read_byte(&self) -> u8 {
            self.with_chip(|chip| chip.out.pop_front().unwrap_or(0xff))
                .unwrap_or(0xff)
        }

        fn write_byte(&self, byte: u8) {
            self.with_chip(|chip| chip.program.push(byte));
        }

        fn wait_ready(&self) -> Result<(), ErrorCode> {
            self.with_chip(|_| ()).ok_or(ErrorCode::FAIL)
        }
    }

    fn set_marker(bus: &SimBus, chip: usize, page: usize) {
        let mut slot = bus.chips[chip].borrow_mut();
        let sim = slot.as_mut().unwrap();
        let mut data = sim.page(page);
        data[1024] = 0x00;
        sim.pages.insert(page, data);
    }

    #[test]
    fn decodes_large_page_id() {
        let info = decode_id(&[0xec, 0xda, 0x10, 0x95, 0x44, 0, 0, 0]);
        assert!(info.present);
        assert!(info.known);
        assert_eq!(info.page_size, 2048);
        assert_eq!(info.oob_size, 64);
        assert_eq!(info.block_size, 128);
        assert_eq!(info.num_planes, 2);
        assert_eq!(info.chip_size, 256);
        assert_eq!(info.num_blocks(), 2048);
        assert_eq!(Nand::<SimBus>::row_cycles(&info), 3);
    }

    #[test]
    fn absent_and_oversized_chips() {
        let info = decode_id(&[0xff; 8]);
        assert!(!info.present);
        assert!(!info.known);

        // 128 KiB blocks, 4 planes of 256 MiB: 8192 blocks.
        let info = decode_id(&[0xec, 0xd3, 0x51, 0x95, 0x58, 0, 0, 0]);
        assert!(info.present);
        assert!(!info.known);
    }

    #[test]
    fn identify_scans_bad_blocks() {
        let bus = SimBus::new([true, false]);
        set_marker(&bus, 0, 3 * PAGES_PER_BLOCK);
        set_marker(&bus, 0, 8 * PAGES_PER_BLOCK - 1);
        let nand = Nand::new(bus);

        assert_eq!(nand.identify_all_chips(), 1);
        let info = nand.info(0).unwrap();
        assert!(info.known);
        assert_eq!(info.num_blocks(), 128);
        assert!(!nand.info(1).unwrap().present);
        assert_eq!(nand.info(2), None);

        let mut table = [0u8; BadBlockTable::SIZE];
        assert_eq!(nand.bad_block_table(0, &mut table), Ok(BadBlockTable::SIZE));
        let bad: Vec<usize> = (0..128)
            .filter(|b| (table[b / 4] >> ((b % 4) * 2)) & 0b11 != 0)
            .collect();
        assert_eq!(bad, vec![3, 7]);
        assert_eq!(nand.bad_block_table(2, &mut table), Err(ErrorCode::NODEVICE));
        assert_eq!(nand.bad_block_table(0, &mut table[..10]), Err(ErrorCode::INVAL));
    }

    #[test]
    fn operations_need_a_known_selected_chip() {
        let nand = Nand::new(SimBus::new([true, false]));
        nand.identify_all_chips();
        let mut page = [0u8; 16];
        assert_eq!(nand.read_page(0, &mut page), Err(ErrorCode::NODEVICE));

        assert_eq!(nand.select(Some(2)), Err(ErrorCode::INVAL));
        nand.select(Some(1)).unwrap();
        assert_eq!(nand.erase_block(0), Err(ErrorCode::NODEVICE));

        nand.select(Some(0)).unwrap();
        assert_eq!(nand.selected(), Some(0));
        assert_eq!(nand.erase_block(128), Err(ErrorCode::INVAL));
        let mut too_long = [0u8; PAGE_LEN + 1];
        assert_eq!(nand.read_page(0, &mut too_long), Err(ErrorCode::INVAL));

        nand.select(None).unwrap();
        assert_eq!(nand.selected(), None);
    }

    #[test]
    fn block_write_read_erase() {
        let nand = Nand::new(SimBus::new([true, true]));
        assert_eq!(nand.identify_all_chips(), 2);
        nand.select(Some(1)).unwrap();

        let image: Vec<u8> = (0..PAGES_PER_BLOCK * PAGE_LEN).map(|i| (i % 251) as u8).collect();
        assert_eq!(nand.write_block(5, &image), Ok(0));

        let mut back = vec![0u8; image.len()];
        assert_eq!(nand.read_block(5, &mut back), Ok(image.len()));
        assert!(back == image);

        assert_eq!(nand.erase_block(5), Ok(0));
        nand.read_block(5, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0xff));

        // Chip 0 was not touched.
        nand.select(Some(0)).unwrap();
        let mut page = vec![0u8; PAGE_LEN];
        nand.read_page(5 * PAGES_PER_BLOCK, &mut page).unwrap();
        assert!(page.iter().all(|&b| b == 0xff));
    }

    #[test]
    fn write_block_stops_at_failing_page() {
        let bus = SimBus::new([true, false]);
        bus.chips[0]
            .borrow_mut()
            .as_mut()
            .unwrap()
            .failing_pages
            .insert(2 * PAGES_PER_BLOCK + 1);
        let nand = Nand::new(bus);
        nand.identify_all_chips();
        nand.select(Some(0)).unwrap();

        let image = vec![0u8; PAGES_PER_BLOCK * PAGE_LEN];
        assert_eq!(nand.write_block(2, &image), Ok(STATUS_FAIL));
        let programs = nand
            .bus
            .log
            .borrow()
            .iter()
            .filter(|&&c| c == CMD_PAGEPROG)
            .count();
        assert_eq!(programs, 2);
    }

    #[test]
    fn mark_block_updates_table() {
        let nand = Nand::new(SimBus::new([true, false]));
        nand.identify_all_chips();
        assert_eq!(nand.mark_block(1, 2), Err(ErrorCode::NODEVICE));
        nand.select(Some(0)).unwrap();
        nand.mark_block(9, 2).unwrap();
        assert_eq!(nand.mark_block(128, 1), Err(ErrorCode::INVAL));

        let mut table = [0u8; BadBlockTable::SIZE];
        nand.bad_block_table(0, &mut table).unwrap();
        assert_eq!(table[2], 2 << 2);
    }
}
