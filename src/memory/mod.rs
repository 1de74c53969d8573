//! # Memory
//! Physical and virtual addresses, frames, and access to the kernel-visible alias of
//! a physical page.

use core::fmt;

use crate::error::PatchError;

pub const PAGE_SHIFT: u8 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    #[inline]
    pub const fn new(address: usize) -> Self {
        Self(address)
    }
    #[inline]
    pub const fn data(self) -> usize {
        self.0
    }
    #[inline]
    pub fn add(self, offset: usize) -> Result<Self, PatchError> {
        self.0
            .checked_add(offset)
            .map(Self)
            .ok_or(PatchError::AddressOverflow)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[phys {:#0x}]", self.0)
    }
}

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    #[inline]
    pub const fn new(address: usize) -> Self {
        Self(address)
    }
    #[inline]
    pub const fn data(self) -> usize {
        self.0
    }
    #[inline]
    pub fn add(self, offset: usize) -> Result<Self, PatchError> {
        self.0
            .checked_add(offset)
            .map(Self)
            .ok_or(PatchError::AddressOverflow)
    }
    /// Applies a signed displacement, as stored in a relative table field.
    #[inline]
    pub fn offset(self, displacement: i32) -> Result<Self, PatchError> {
        self.0
            .checked_add_signed(displacement as isize)
            .map(Self)
            .ok_or(PatchError::AddressOverflow)
    }
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[virt {:#0x}]", self.0)
    }
}

/// A page-aligned physical frame.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Frame {
    physaddr: usize,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[frame at {:p}]", self.physaddr as *const u8)
    }
}

impl Frame {
    pub const fn containing(address: PhysicalAddress) -> Frame {
        Frame {
            physaddr: address.data() & !PAGE_MASK,
        }
    }
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.physaddr)
    }
    pub fn try_next_by(self, n: usize) -> Result<Self, PatchError> {
        let offset = n.checked_mul(PAGE_SIZE).ok_or(PatchError::AddressOverflow)?;
        let physaddr = self
            .physaddr
            .checked_add(offset)
            .ok_or(PatchError::AddressOverflow)?;
        Ok(Self { physaddr })
    }
}

/// Access to the kernel-visible alias of physical pages.
///
/// Both accessors hand the closure exactly one page. Callers go through
/// [`copy_to_page`] and [`copy_from_page`] which bounds check against it.
///
/// # Safety
///
/// Implementors must pass a slice that aliases `frame` and nothing else, and must
/// not hand out another reference to the same page while a `write_page` closure runs.
pub unsafe trait PhysMap {
    fn read_page<R>(&self, frame: Frame, f: impl FnOnce(&[u8]) -> R) -> R;
    fn write_page<R>(&self, frame: Frame, f: impl FnOnce(&mut [u8]) -> R) -> R;
}

/// Reads the 64-bit entry at `index` of the table held in `frame`.
pub fn read_u64<P: PhysMap>(phys: &P, frame: Frame, index: usize) -> Result<u64, PatchError> {
    let offset = index
        .checked_mul(core::mem::size_of::<u64>())
        .ok_or(PatchError::AddressOverflow)?;
    let mut raw = [0u8; 8];
    copy_from_page(phys, frame, offset, &mut raw)?;
    Ok(u64::from_le_bytes(raw))
}

pub fn copy_to_page<P: PhysMap>(
    phys: &P,
    frame: Frame,
    offset: usize,
    bytes: &[u8],
) -> Result<(), PatchError> {
    let out_of_page = PatchError::OutOfPage {
        phys: frame.base(),
        offset,
        len: bytes.len(),
    };
    let end = offset.checked_add(bytes.len()).ok_or(out_of_page)?;
    phys.write_page(frame, |page| {
        page.get_mut(offset..end)
            .ok_or(out_of_page)
            .map(|dst| dst.copy_from_slice(bytes))
    })
}

pub fn copy_from_page<P: PhysMap>(
    phys: &P,
    frame: Frame,
    offset: usize,
    out: &mut [u8],
) -> Result<(), PatchError> {
    let out_of_page = PatchError::OutOfPage {
        phys: frame.base(),
        offset,
        len: out.len(),
    };
    let end = offset.checked_add(out.len()).ok_or(out_of_page)?;
    phys.read_page(frame, |page| {
        page.get(offset..end)
            .ok_or(out_of_page)
            .map(|src| out.copy_from_slice(src))
    })
}

/// All of physical memory mapped linearly at `offset`, as the kernel sets it up.
pub struct LinearPhysMap {
    offset: usize,
}

impl LinearPhysMap {
    /// # Safety
    ///
    /// Every frame reachable from the page tables walked with this map must be mapped
    /// writable at `offset + frame.base()`.
    pub const unsafe fn new(offset: usize) -> Self {
        Self { offset }
    }

    #[inline]
    pub fn phys_to_virt(&self, phys: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(phys.data().wrapping_add(self.offset))
    }
}

unsafe impl PhysMap for LinearPhysMap {
    fn read_page<R>(&self, frame: Frame, f: impl FnOnce(&[u8]) -> R) -> R {
        let virt = self.phys_to_virt(frame.base());
        let page = unsafe { core::slice::from_raw_parts(virt.data() as *const u8, PAGE_SIZE) };
        f(page)
    }

    fn write_page<R>(&self, frame: Frame, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let virt = self.phys_to_virt(frame.base());
        let page = unsafe { core::slice::from_raw_parts_mut(virt.data() as *mut u8, PAGE_SIZE) };
        f(page)
    }
}
