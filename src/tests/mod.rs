//! A simulated machine for exercising the walker and the applier.
//!
//! Physical memory is a sparse map of host pages. Page tables are built inside it
//! exactly as the hardware expects, while a separate page-granular shadow of every
//! mapping serves as the reference the tests compare against.


use core::cell::RefCell;
use std::collections::BTreeMap;

use crate::alternative::{CpuFeature, PatchRecord};
use crate::memory::{Frame, PhysMap, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::paging::{AddressSpace, EntryFlags, PageEntry, PageTableLevel};
use crate::sync::held;

/// Where the simulated kernel text lives.
pub const TEXT_BASE: usize = 0xffff_ffff_8000_0000;

/// First frame handed out; keeps physical 0 unused like real firmware maps do.
const PHYS_START: usize = 0x10_0000;

/// One call to [`PhysMap::write_page`], as the writing thread saw the text lock.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageWrite {
    pub frame: Frame,
    pub locked: bool,
    /// Text lock acquisitions the thread had made when it wrote.
    pub acquisition: usize,
}

pub struct FakeMachine {
    pages: RefCell<BTreeMap<usize, Box<[u8; PAGE_SIZE]>>>,
    writes: RefCell<Vec<PageWrite>>,
    /// Virtual page -> physical page, for every page mapped through the builders.
    shadow: BTreeMap<usize, usize>,
    next_phys: usize,
    root: Frame,
}

impl FakeMachine {
    pub fn new() -> Self {
        let mut machine = Self {
            pages: RefCell::new(BTreeMap::new()),
            writes: RefCell::new(Vec::new()),
            shadow: BTreeMap::new(),
            next_phys: PHYS_START,
            root: Frame::containing(PhysicalAddress::new(0)),
        };
        machine.root = machine.alloc(PAGE_SIZE);
        machine
    }

    pub fn space(&self) -> AddressSpace {
        AddressSpace::new(self.root)
    }

    /// Reserves `size` bytes of physical memory aligned to `size`.
    pub fn alloc(&mut self, size: usize) -> Frame {
        let base = (self.next_phys + size - 1) & !(size - 1);
        self.next_phys = base + size;
        Frame::containing(PhysicalAddress::new(base))
    }

    pub fn entry(&self, table: Frame, index: usize) -> PageEntry {
        let offset = index * 8;
        let raw = self.read_page(table, |page| {
            u64::from_le_bytes(page[offset..offset + 8].try_into().unwrap())
        });
        PageEntry::from_raw(raw)
    }

    pub fn set_entry(&self, table: Frame, index: usize, entry: PageEntry) {
        let offset = index * 8;
        self.write_page(table, |page| {
            page[offset..offset + 8].copy_from_slice(&entry.data().to_le_bytes());
        });
    }

    /// The table at `level` covering `virt`, creating intermediate tables on the way.
    pub fn table_at(&mut self, virt: usize, level: PageTableLevel) -> Frame {
        let addr = VirtualAddress::new(virt);
        let mut table = self.root;
        let mut current = PageTableLevel::PML4;
        while current > level {
            let index = current.index(addr);
            let entry = self.entry(table, index);
            table = if entry.present() {
                Frame::containing(entry.address())
            } else {
                let child = self.alloc(PAGE_SIZE);
                self.set_entry(
                    table,
                    index,
                    PageEntry::new(child.base(), EntryFlags::PRESENT | EntryFlags::WRITABLE),
                );
                child
            };
            current = current.next().unwrap();
        }
        table
    }

    /// Maps `virt` to `frame` with a 4 KiB leaf. Text is mapped read-only.
    pub fn map_page_to(&mut self, virt: usize, frame: Frame) {
        let table = self.table_at(virt, PageTableLevel::PT);
        let index = PageTableLevel::PT.index(VirtualAddress::new(virt));
        self.set_entry(table, index, PageEntry::new(frame.base(), EntryFlags::PRESENT));
        self.shadow.insert(virt & !(PAGE_SIZE - 1), frame.base().data());
    }

    /// Maps `count` pages from `virt`, each to a fresh frame.
    ///
    /// A spare frame is burned between mappings so neighboring virtual pages are
    /// never physically contiguous.
    pub fn map_pages(&mut self, virt: usize, count: usize) {
        for i in 0..count {
            let frame = self.alloc(PAGE_SIZE);
            self.alloc(PAGE_SIZE);
            self.map_page_to(virt + i * PAGE_SIZE, frame);
        }
    }

    /// Maps the 2 MiB region at `virt` with one large leaf and returns its first frame.
    pub fn map_large(&mut self, virt: usize) -> Frame {
        let size = PageTableLevel::PD.size();
        assert_eq!(virt & (size - 1), 0);
        let base = self.alloc(size);
        let table = self.table_at(virt, PageTableLevel::PD);
        let index = PageTableLevel::PD.index(VirtualAddress::new(virt));
        self.set_entry(
            table,
            index,
            PageEntry::new(base.base(), EntryFlags::PRESENT | EntryFlags::HUGE_PAGE),
        );
        for page in 0..size / PAGE_SIZE {
            self.shadow
                .insert(virt + page * PAGE_SIZE, base.base().data() + page * PAGE_SIZE);
        }
        base
    }

    /// Maps the 1 GiB region at `virt` with a leaf at the PDPT level.
    pub fn map_huge(&mut self, virt: usize) {
        let size = PageTableLevel::PDPT.size();
        assert_eq!(virt & (size - 1), 0);
        let table = self.table_at(virt, PageTableLevel::PDPT);
        let index = PageTableLevel::PDPT.index(VirtualAddress::new(virt));
        // The frames behind it are never touched, so none are reserved.
        self.set_entry(
            table,
            index,
            PageEntry::new(
                PhysicalAddress::new(0x4000_0000),
                EntryFlags::PRESENT | EntryFlags::HUGE_PAGE,
            ),
        );
    }

    fn shadow_resolve(&self, virt: usize) -> usize {
        let page = virt & !(PAGE_SIZE - 1);
        let phys = self
            .shadow
            .get(&page)
            .unwrap_or_else(|| panic!("{virt:#x} is not mapped"));
        phys + (virt - page)
    }

    /// Test setup write that bypasses the walker.
    pub fn write(&self, virt: VirtualAddress, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let phys = self.shadow_resolve(virt.data() + i);
            self.write_phys(phys, &[*b]);
        }
    }

    /// Test readback that bypasses the walker.
    pub fn read(&self, virt: VirtualAddress, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| self.read_phys(self.shadow_resolve(virt.data() + i), 1)[0])
            .collect()
    }

    /// Page writes recorded since the last call.
    pub fn take_writes(&self) -> Vec<PageWrite> {
        self.writes.take()
    }

    pub fn write_phys(&self, phys: usize, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            let at = phys + i;
            let frame = Frame::containing(PhysicalAddress::new(at));
            self.write_page(frame, |page| page[at % PAGE_SIZE] = *b);
        }
    }

    pub fn read_phys(&self, phys: usize, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let at = phys + i;
                let frame = Frame::containing(PhysicalAddress::new(at));
                self.read_page(frame, |page| page[at % PAGE_SIZE])
            })
            .collect()
    }
}

unsafe impl PhysMap for FakeMachine {
    fn read_page<R>(&self, frame: Frame, f: impl FnOnce(&[u8]) -> R) -> R {
        let mut pages = self.pages.borrow_mut();
        let page = pages
            .entry(frame.base().data())
            .or_insert_with(|| Box::new([0; PAGE_SIZE]));
        f(&page[..])
    }

    fn write_page<R>(&self, frame: Frame, f: impl FnOnce(&mut [u8]) -> R) -> R {
        self.writes.borrow_mut().push(PageWrite {
            frame,
            locked: held::by_current_thread(),
            acquisition: held::acquisitions(),
        });
        let mut pages = self.pages.borrow_mut();
        let page = pages
            .entry(frame.base().data())
            .or_insert_with(|| Box::new([0; PAGE_SIZE]));
        f(&mut page[..])
    }
}

/// A record stored as entry `index` of a table at `table`, pointing at `site` and
/// `replacement`.
pub fn record(
    table: VirtualAddress,
    index: usize,
    site: VirtualAddress,
    replacement: VirtualAddress,
    feature: CpuFeature,
    source_len: u16,
    replacement_len: u16,
) -> PatchRecord {
    let at = table.data() + index * PatchRecord::SIZE;
    let source_offset = site.data().wrapping_sub(at) as isize;
    let replacement_offset = replacement.data().wrapping_sub(at + 4) as isize;
    PatchRecord::new(
        i32::try_from(source_offset).unwrap(),
        i32::try_from(replacement_offset).unwrap(),
        feature,
        source_len,
        replacement_len,
    )
}
