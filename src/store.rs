// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Register store: the four Modbus register banks, each in its own named
// shared memory segment `<prefix>DO`, `<prefix>DI`, `<prefix>AO`, `<prefix>AI`.
//
// Discrete banks hold one byte (0 or 1) per element, analog banks one
// native-endian u16 per element, so other processes can map a bank as a
// plain array.

use std::marker::PhantomData;
use std::ptr;

use crate::error::{Error, Result};
use crate::shm::{ShmHandle, ShmOpenMode};
use crate::shm_name;

/// Largest number of elements a bank may hold (the Modbus address space).
pub const MAX_BANK_SIZE: usize = 0x10000;

/// Permission bits used for bank segments unless configured otherwise.
pub const DEFAULT_PERMISSIONS: u32 = 0o660;

/// The four register bank types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    /// Coils; read-write for the bus master.
    DiscreteOutput,
    /// Discrete inputs; read-only for the bus master.
    DiscreteInput,
    /// Holding registers; read-write for the bus master.
    AnalogOutput,
    /// Input registers; read-only for the bus master.
    AnalogInput,
}

impl BankKind {
    /// Segment order used throughout the crate.
    pub const ALL: [BankKind; 4] = [
        BankKind::DiscreteOutput,
        BankKind::DiscreteInput,
        BankKind::AnalogOutput,
        BankKind::AnalogInput,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            BankKind::DiscreteOutput => "DO",
            BankKind::DiscreteInput => "DI",
            BankKind::AnalogOutput => "AO",
            BankKind::AnalogInput => "AI",
        }
    }

    /// Bytes per element in the segment.
    pub fn element_size(self) -> usize {
        match self {
            BankKind::DiscreteOutput | BankKind::DiscreteInput => 1,
            BankKind::AnalogOutput | BankKind::AnalogInput => std::mem::size_of::<u16>(),
        }
    }

    fn index(self) -> usize {
        match self {
            BankKind::DiscreteOutput => 0,
            BankKind::DiscreteInput => 1,
            BankKind::AnalogOutput => 2,
            BankKind::AnalogInput => 3,
        }
    }
}

/// Element counts of the four banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankSizes {
    pub discrete_outputs: usize,
    pub discrete_inputs: usize,
    pub analog_outputs: usize,
    pub analog_inputs: usize,
}

impl BankSizes {
    pub const fn new(do_: usize, di: usize, ao: usize, ai: usize) -> Self {
        Self {
            discrete_outputs: do_,
            discrete_inputs: di,
            analog_outputs: ao,
            analog_inputs: ai,
        }
    }

    pub fn get(&self, kind: BankKind) -> usize {
        match kind {
            BankKind::DiscreteOutput => self.discrete_outputs,
            BankKind::DiscreteInput => self.discrete_inputs,
            BankKind::AnalogOutput => self.analog_outputs,
            BankKind::AnalogInput => self.analog_inputs,
        }
    }

    /// Every size must lie in `[0, MAX_BANK_SIZE]`.
    pub fn validate(&self) -> Result<()> {
        for kind in BankKind::ALL {
            let n = self.get(kind);
            if n > MAX_BANK_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "too many {} registers: {n} (maximum: {MAX_BANK_SIZE})",
                    kind.suffix()
                )));
            }
        }
        Ok(())
    }
}

impl Default for BankSizes {
    fn default() -> Self {
        Self::new(MAX_BANK_SIZE, MAX_BANK_SIZE, MAX_BANK_SIZE, MAX_BANK_SIZE)
    }
}

/// Size of one bank in elements and in segment bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankLayout {
    pub kind: BankKind,
    /// Number of elements.
    pub len: usize,
    /// Bytes occupied in the segment.
    pub bytes: usize,
}

impl BankLayout {
    fn new(kind: BankKind, len: usize) -> Self {
        Self {
            kind,
            len,
            bytes: len * kind.element_size(),
        }
    }
}

/// Whether this process is responsible for removing the segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Created here; names are unlinked on destroy.
    Owned,
    /// Created elsewhere; never unlinked here.
    Attached,
}

/// The four register banks in shared memory.
pub struct RegisterStore {
    segments: [ShmHandle; 4],
    header: [BankLayout; 4],
    ownership: Ownership,
    destroyed: bool,
}

impl RegisterStore {
    /// Create the four bank segments under `name_prefix`.
    ///
    /// Sizes are validated before anything is allocated. With `force`, a
    /// segment left behind under the same name is removed and recreated; its
    /// previous contents are gone. If any bank fails, the banks created by
    /// this call are removed again.
    pub fn create(
        sizes: BankSizes,
        name_prefix: &str,
        force: bool,
        permissions: u32,
    ) -> Result<Self> {
        sizes.validate()?;
        let mode = if force {
            ShmOpenMode::CreateForce
        } else {
            ShmOpenMode::Create
        };

        let mut rollback = Rollback::default();
        let mut create = |kind: BankKind| -> Result<ShmHandle> {
            let name = shm_name::bank_name(name_prefix, kind.suffix());
            let bytes = sizes.get(kind) * kind.element_size();
            let handle = ShmHandle::acquire(&name, bytes, mode, permissions)?;
            rollback.names.push(name);
            Ok(handle)
        };
        let segments = [
            create(BankKind::DiscreteOutput)?,
            create(BankKind::DiscreteInput)?,
            create(BankKind::AnalogOutput)?,
            create(BankKind::AnalogInput)?,
        ];
        rollback.names.clear();

        log::debug!("created register banks under prefix '{name_prefix}': {sizes:?}");
        Ok(Self::from_segments(segments, Ownership::Owned))
    }

    /// Wrap segments opened elsewhere, ordered DO, DI, AO, AI.
    ///
    /// Bank lengths follow from the segment sizes. The segments are never
    /// removed by this store.
    pub fn attach(segments: [ShmHandle; 4]) -> Self {
        Self::from_segments(segments, Ownership::Attached)
    }

    /// Open the existing banks under `name_prefix` and attach to them.
    pub fn open(sizes: BankSizes, name_prefix: &str) -> Result<Self> {
        sizes.validate()?;
        let open = |kind: BankKind| -> Result<ShmHandle> {
            let name = shm_name::bank_name(name_prefix, kind.suffix());
            ShmHandle::acquire(
                &name,
                sizes.get(kind) * kind.element_size(),
                ShmOpenMode::Open,
                DEFAULT_PERMISSIONS,
            )
        };
        let segments = [
            open(BankKind::DiscreteOutput)?,
            open(BankKind::DiscreteInput)?,
            open(BankKind::AnalogOutput)?,
            open(BankKind::AnalogInput)?,
        ];
        Ok(Self::attach(segments))
    }

    fn from_segments(segments: [ShmHandle; 4], ownership: Ownership) -> Self {
        let header = BankKind::ALL.map(|kind| {
            let len = (segments[kind.index()].size() / kind.element_size()).min(MAX_BANK_SIZE);
            BankLayout::new(kind, len)
        });
        Self {
            segments,
            header,
            ownership,
            destroyed: false,
        }
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn layout(&self, kind: BankKind) -> BankLayout {
        self.header[kind.index()]
    }

    pub fn sizes(&self) -> BankSizes {
        BankSizes::new(
            self.header[0].len,
            self.header[1].len,
            self.header[2].len,
            self.header[3].len,
        )
    }

    /// Name of the segment backing `kind`.
    pub fn name(&self, kind: BankKind) -> &str {
        self.segments[kind.index()].name()
    }

    /// Bytes of all banks plus the bank table.
    pub fn footprint(&self) -> usize {
        self.header.iter().map(|l| l.bytes).sum::<usize>() + std::mem::size_of_val(&self.header)
    }

    /// Views over the four banks for the protocol engine.
    pub fn banks(&self) -> Banks<'_> {
        let seg = |kind: BankKind| {
            let l = self.header[kind.index()];
            (self.segments[kind.index()].as_mut_ptr(), l.len)
        };
        // Safety: each mapping spans `len` elements, is page aligned and
        // lives as long as `self`.
        unsafe {
            let (p, n) = seg(BankKind::DiscreteOutput);
            let coils = BitBank::from_raw(p, n);
            let (p, n) = seg(BankKind::DiscreteInput);
            let discrete_inputs = BitBank::from_raw(p, n);
            let (p, n) = seg(BankKind::AnalogOutput);
            let holding_registers = WordBank::from_raw(p as *mut u16, n);
            let (p, n) = seg(BankKind::AnalogInput);
            let input_registers = WordBank::from_raw(p as *mut u16, n);
            Banks {
                coils,
                discrete_inputs,
                holding_registers,
                input_registers,
            }
        }
    }

    /// Remove the segment names if this store owns them.
    ///
    /// Idempotent. Attached stores are left untouched. Mappings stay valid
    /// until the store is dropped.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if self.ownership == Ownership::Attached {
            return;
        }
        for segment in &self.segments {
            if let Err(e) = segment.unlink() {
                log::warn!("{e}");
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for RegisterStore {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Names created so far by a `create` call that has not finished yet.
#[derive(Default)]
struct Rollback {
    names: Vec<String>,
}

impl Drop for Rollback {
    fn drop(&mut self) {
        for name in &self.names {
            ShmHandle::unlink_by_name(name);
        }
    }
}

// ---------------------------------------------------------------------------
// Bank views
// ---------------------------------------------------------------------------

/// The four banks as seen by the protocol engine.
///
/// Other processes may change the memory at any time, so every access is a
/// volatile read or write of a single element.
#[derive(Clone, Copy)]
pub struct Banks<'a> {
    pub coils: BitBank<'a>,
    pub discrete_inputs: BitBank<'a>,
    pub holding_registers: WordBank<'a>,
    pub input_registers: WordBank<'a>,
}

/// A discrete bank: one byte per element, non-zero means set.
#[derive(Clone, Copy)]
pub struct BitBank<'a> {
    ptr: *mut u8,
    len: usize,
    _store: PhantomData<&'a RegisterStore>,
}

impl<'a> BitBank<'a> {
    /// # Safety
    /// `ptr` must be valid for `len` bytes for the lifetime `'a`.
    pub(crate) unsafe fn from_raw(ptr: *mut u8, len: usize) -> Self {
        Self {
            ptr,
            len,
            _store: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `[start, start + count)` lies inside the bank.
    pub fn contains(&self, start: usize, count: usize) -> bool {
        start.checked_add(count).is_some_and(|end| end <= self.len)
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        (index < self.len).then(|| unsafe { ptr::read_volatile(self.ptr.add(index)) != 0 })
    }

    /// Returns `false` if `index` is out of range.
    pub fn set(&self, index: usize, value: bool) -> bool {
        if index >= self.len {
            return false;
        }
        unsafe { ptr::write_volatile(self.ptr.add(index), value as u8) };
        true
    }

    pub fn read(&self, start: usize, count: usize) -> Option<Vec<bool>> {
        self.contains(start, count)
            .then(|| (start..start + count).filter_map(|i| self.get(i)).collect())
    }

    /// Returns `false`, writing nothing, if the range does not fit.
    pub fn write(&self, start: usize, values: &[bool]) -> bool {
        if !self.contains(start, values.len()) {
            return false;
        }
        for (i, &v) in values.iter().enumerate() {
            self.set(start + i, v);
        }
        true
    }
}

/// An analog bank: one native-endian u16 per element.
#[derive(Clone, Copy)]
pub struct WordBank<'a> {
    ptr: *mut u16,
    len: usize,
    _store: PhantomData<&'a RegisterStore>,
}

impl<'a> WordBank<'a> {
    /// # Safety
    /// `ptr` must be valid and aligned for `len` words for the lifetime `'a`.
    pub(crate) unsafe fn from_raw(ptr: *mut u16, len: usize) -> Self {
        Self {
            ptr,
            len,
            _store: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, start: usize, count: usize) -> bool {
        start.checked_add(count).is_some_and(|end| end <= self.len)
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        (index < self.len).then(|| unsafe { ptr::read_volatile(self.ptr.add(index)) })
    }

    pub fn set(&self, index: usize, value: u16) -> bool {
        if index >= self.len {
            return false;
        }
        unsafe { ptr::write_volatile(self.ptr.add(index), value) };
        true
    }

    pub fn read(&self, start: usize, count: usize) -> Option<Vec<u16>> {
        self.contains(start, count)
            .then(|| (start..start + count).filter_map(|i| self.get(i)).collect())
    }

    pub fn write(&self, start: usize, values: &[u16]) -> bool {
        if !self.contains(start, values.len()) {
            return false;
        }
        for (i, &v) in values.iter().enumerate() {
            self.set(start + i, v);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_above_the_address_space_are_rejected() {
        assert!(BankSizes::new(10, 10, 10, 10).validate().is_ok());
        assert!(BankSizes::new(0, 0, 0, MAX_BANK_SIZE).validate().is_ok());
        let err = BankSizes::new(0, MAX_BANK_SIZE + 1, 0, 0).validate().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref m) if m.contains("DI")));
    }

    #[test]
    fn suffixes_follow_segment_order() {
        let suffixes: Vec<_> = BankKind::ALL.iter().map(|k| k.suffix()).collect();
        assert_eq!(suffixes, ["DO", "DI", "AO", "AI"]);
    }

    #[test]
    fn views_bound_check() {
        let mut bits = [0u8; 4];
        let mut words = [0u16; 3];
        let b = unsafe { BitBank::from_raw(bits.as_mut_ptr(), bits.len()) };
        let w = unsafe { WordBank::from_raw(words.as_mut_ptr(), words.len()) };

        assert!(b.write(1, &[true, true, true]));
        assert!(!b.write(2, &[true, true, true]));
        assert_eq!(b.read(0, 4), Some(vec![false, true, true, true]));
        assert_eq!(b.read(usize::MAX, 2), None);

        assert!(w.set(2, 0xBEEF));
        assert!(!w.set(3, 1));
        assert_eq!(w.get(2), Some(0xBEEF));
        assert_eq!(w.read(1, 3), None);
    }
}
