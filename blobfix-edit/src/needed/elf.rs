//! In-process editing of an ELF file's `DT_NEEDED` entries.
//!
//! The editor never moves sections. It rewrites the dynamic array in place and only uses string
//! table bytes that already exist:
//! - remove shifts the remaining entries down and pads the tail with `DT_NULL`;
//! - add needs a spare `DT_NULL` slot and the name already present in `.dynstr`;
//! - replace points the entry at an existing copy of the new name, or overwrites the old name in
//!   place when the new one fits and no other string reference shares those bytes.
//!
//! Anything else is reported as [`FixupErrorKind::InsufficientSpace`] so a relocating backend
//! (patchelf) can take over.

use super::NeededEditor;
use crate::error::{FixupErrorKind, OpResult};
use goblin::elf::Elf;
use goblin::elf::dynamic::{
    DT_NEEDED, DT_NULL, DT_RPATH, DT_RUNPATH, DT_SONAME, DT_STRSZ, DT_STRTAB, DT_VERNEED,
    DT_VERNEEDNUM,
};
use goblin::elf::program_header::{PT_DYNAMIC, PT_LOAD, ProgramHeader};
use tracing::debug;

/// Editor that patches the dynamic section without relocating anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElfNeededEditor;

impl NeededEditor for ElfNeededEditor {
    fn name(&self) -> &'static str {
        "elf"
    }

    fn needed(&self, bytes: &[u8]) -> OpResult<Vec<String>> {
        let layout = DynLayout::parse(bytes)?;
        layout.needed_names(bytes)
    }

    fn add(&self, mut bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>> {
        let layout = DynLayout::parse(&bytes)?;
        if layout.entries.len() + 2 > layout.capacity {
            return Err(FixupErrorKind::no_space(
                "no spare DT_NULL slot in the dynamic section",
            ));
        }
        let Some(str_off) = layout.find_string(&bytes, lib) else {
            return Err(FixupErrorKind::no_space(format!(
                "'{lib}' is not present in .dynstr"
            )));
        };

        let insert_at = layout
            .entries
            .iter()
            .rposition(|e| e.tag == DT_NEEDED)
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut entries = layout.entries.clone();
        entries.insert(
            insert_at,
            DynEntry {
                tag: DT_NEEDED,
                val: str_off,
            },
        );
        layout.write_entries(&mut bytes, &entries);
        debug!(lib, slot = insert_at, "added DT_NEEDED in place");
        Ok(bytes)
    }

    fn remove(&self, mut bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>> {
        let layout = DynLayout::parse(&bytes)?;
        let mut entries = Vec::with_capacity(layout.entries.len());
        for e in &layout.entries {
            if e.tag == DT_NEEDED && layout.string_at(&bytes, e.val)? == lib {
                continue;
            }
            entries.push(*e);
        }
        if entries.len() != layout.entries.len() {
            layout.write_entries(&mut bytes, &entries);
            debug!(lib, "removed DT_NEEDED in place");
        }
        Ok(bytes)
    }

    fn replace(&self, mut bytes: Vec<u8>, from: &str, to: &str) -> OpResult<Vec<u8>> {
        let layout = DynLayout::parse(&bytes)?;

        let mut old_offsets = Vec::new();
        for e in &layout.entries {
            if e.tag == DT_NEEDED && layout.string_at(&bytes, e.val)? == from {
                old_offsets.push(e.val);
            }
        }
        let Some(&old_off) = old_offsets.first() else {
            return Err(FixupErrorKind::MissingDependencyEntry {
                entry: from.to_string(),
            });
        };

        if let Some(new_off) = layout.find_string(&bytes, to) {
            let entries: Vec<DynEntry> = layout
                .entries
                .iter()
                .map(|e| {
                    if e.tag == DT_NEEDED && old_offsets.contains(&e.val) {
                        DynEntry {
                            tag: DT_NEEDED,
                            val: new_off,
                        }
                    } else {
                        *e
                    }
                })
                .collect();
            layout.write_entries(&mut bytes, &entries);
            for pos in &layout.verneed_file_fields {
                if old_offsets.contains(&u64::from(layout.read_u32(&bytes, *pos))) {
                    layout.write_u32(&mut bytes, *pos, new_off as u32);
                }
            }
            debug!(from, to, "pointed DT_NEEDED at existing string");
            return Ok(bytes);
        }

        if to.len() > from.len() {
            return Err(FixupErrorKind::no_space(format!(
                "'{to}' is longer than '{from}' and not present in .dynstr"
            )));
        }
        if old_offsets.iter().any(|o| *o != old_off) {
            return Err(FixupErrorKind::no_space(format!(
                "'{from}' is stored more than once in .dynstr"
            )));
        }

        let span = old_off..old_off + from.len() as u64 + 1;
        // A reference shares the bytes when its string starts inside the old name, or starts
        // earlier and runs into it (linker tail merging).
        if layout
            .foreign_string_refs(&bytes, old_off)
            .into_iter()
            .any(|r| {
                r < span.end
                    && layout
                        .string_end(&bytes, r)
                        .is_none_or(|end| end >= old_off)
            })
        {
            return Err(FixupErrorKind::no_space(format!(
                "'{from}' shares .dynstr bytes with another string"
            )));
        }

        let start = layout.strtab_offset + old_off as usize;
        let slot = &mut bytes[start..start + from.len() + 1];
        slot.fill(0);
        slot[..to.len()].copy_from_slice(to.as_bytes());
        debug!(from, to, "overwrote DT_NEEDED string in place");
        Ok(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DynEntry {
    tag: u64,
    val: u64,
}

/// File layout of the parts of an ELF image the editor touches.
#[derive(Debug, Clone)]
struct DynLayout {
    is_64: bool,
    little_endian: bool,
    dyn_offset: usize,
    capacity: usize,
    /// Entries before the first `DT_NULL`.
    entries: Vec<DynEntry>,
    strtab_offset: usize,
    strtab_size: usize,
    /// File positions of `vn_file` fields.
    verneed_file_fields: Vec<usize>,
    /// `vna_name` values.
    vernaux_names: Vec<u64>,
    /// `st_name` values of dynamic symbols.
    symbol_names: Vec<u64>,
}

impl DynLayout {
    fn parse(bytes: &[u8]) -> OpResult<Self> {
        let elf = Elf::parse(bytes).map_err(|e| FixupErrorKind::malformed(e.to_string()))?;

        let dyn_ph = elf
            .program_headers
            .iter()
            .find(|ph| ph.p_type == PT_DYNAMIC)
            .ok_or_else(|| FixupErrorKind::malformed("no PT_DYNAMIC segment"))?;

        let entsize = if elf.is_64 { 16 } else { 8 };
        let dyn_offset = dyn_ph.p_offset as usize;
        let dyn_size = dyn_ph.p_filesz as usize;
        if dyn_offset.checked_add(dyn_size).is_none_or(|end| end > bytes.len()) {
            return Err(FixupErrorKind::malformed("dynamic segment out of bounds"));
        }

        let mut layout = DynLayout {
            is_64: elf.is_64,
            little_endian: elf.little_endian,
            dyn_offset,
            capacity: dyn_size / entsize,
            entries: Vec::new(),
            strtab_offset: 0,
            strtab_size: 0,
            verneed_file_fields: Vec::new(),
            vernaux_names: Vec::new(),
            symbol_names: elf.dynsyms.iter().map(|s| s.st_name as u64).collect(),
        };

        for i in 0..layout.capacity {
            let e = layout.read_entry(bytes, i);
            if e.tag == DT_NULL {
                break;
            }
            layout.entries.push(e);
        }

        let strtab_addr = layout
            .tag_value(DT_STRTAB)
            .ok_or_else(|| FixupErrorKind::malformed("no DT_STRTAB entry"))?;
        layout.strtab_size = layout
            .tag_value(DT_STRSZ)
            .ok_or_else(|| FixupErrorKind::malformed("no DT_STRSZ entry"))?
            as usize;
        layout.strtab_offset = vm_to_offset(&elf.program_headers, strtab_addr)
            .ok_or_else(|| FixupErrorKind::malformed("DT_STRTAB is not inside a PT_LOAD"))?
            as usize;
        if layout
            .strtab_offset
            .checked_add(layout.strtab_size)
            .is_none_or(|end| end > bytes.len())
        {
            return Err(FixupErrorKind::malformed(".dynstr out of bounds"));
        }

        if let (Some(addr), Some(count)) =
            (layout.tag_value(DT_VERNEED), layout.tag_value(DT_VERNEEDNUM))
        {
            let start = vm_to_offset(&elf.program_headers, addr)
                .ok_or_else(|| FixupErrorKind::malformed("DT_VERNEED is not inside a PT_LOAD"))?;
            layout.parse_verneed(bytes, start as usize, count as usize)?;
        }

        Ok(layout)
    }

    fn parse_verneed(&mut self, bytes: &[u8], start: usize, count: usize) -> OpResult<()> {
        let mut pos = start;
        for _ in 0..count {
            if pos + 16 > bytes.len() {
                return Err(FixupErrorKind::malformed("verneed entry out of bounds"));
            }
            self.verneed_file_fields.push(pos + 4);
            let vn_cnt = self.read_u16(bytes, pos + 2) as usize;
            let vn_aux = self.read_u32(bytes, pos + 8) as usize;
            let vn_next = self.read_u32(bytes, pos + 12) as usize;

            let mut aux = pos + vn_aux;
            for _ in 0..vn_cnt {
                if aux + 16 > bytes.len() {
                    return Err(FixupErrorKind::malformed("vernaux entry out of bounds"));
                }
                self.vernaux_names
                    .push(u64::from(self.read_u32(bytes, aux + 8)));
                let next = self.read_u32(bytes, aux + 12) as usize;
                if next == 0 {
                    break;
                }
                aux += next;
            }

            if vn_next == 0 {
                break;
            }
            pos += vn_next;
        }
        Ok(())
    }

    fn tag_value(&self, tag: u64) -> Option<u64> {
        self.entries.iter().find(|e| e.tag == tag).map(|e| e.val)
    }

    fn needed_names(&self, bytes: &[u8]) -> OpResult<Vec<String>> {
        self.entries
            .iter()
            .filter(|e| e.tag == DT_NEEDED)
            .map(|e| self.string_at(bytes, e.val).map(str::to_string))
            .collect()
    }

    fn strtab<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.strtab_offset..self.strtab_offset + self.strtab_size]
    }

    fn string_at<'a>(&self, bytes: &'a [u8], off: u64) -> OpResult<&'a str> {
        let tab = self.strtab(bytes);
        let start = off as usize;
        if start >= tab.len() {
            return Err(FixupErrorKind::malformed(format!(
                "string offset {off} outside .dynstr"
            )));
        }
        let len = tab[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| FixupErrorKind::malformed("unterminated .dynstr string"))?;
        std::str::from_utf8(&tab[start..start + len])
            .map_err(|_| FixupErrorKind::malformed("non UTF-8 .dynstr string"))
    }

    /// Offset of the NUL terminating the string at `off`, if it lies inside `.dynstr`.
    fn string_end(&self, bytes: &[u8], off: u64) -> Option<u64> {
        let tab = self.strtab(bytes);
        let start = usize::try_from(off).ok()?;
        tab.get(start..)?
            .iter()
            .position(|b| *b == 0)
            .map(|len| off + len as u64)
    }

    /// Offset of an existing NUL-terminated copy of `name`, including tail matches.
    fn find_string(&self, bytes: &[u8], name: &str) -> Option<u64> {
        let needle = name.as_bytes();
        if needle.is_empty() {
            return None;
        }
        self.strtab(bytes)
            .windows(needle.len() + 1)
            .position(|w| &w[..needle.len()] == needle && w[needle.len()] == 0)
            .map(|p| p as u64)
    }

    /// String references, other than the `DT_NEEDED` name at `rewritten`, that must keep their
    /// bytes when that name is overwritten.
    fn foreign_string_refs(&self, bytes: &[u8], rewritten: u64) -> Vec<u64> {
        let mut refs: Vec<u64> = self
            .entries
            .iter()
            .filter(|e| matches!(e.tag, DT_SONAME | DT_RPATH | DT_RUNPATH))
            .map(|e| e.val)
            .collect();
        refs.extend(
            self.entries
                .iter()
                .filter(|e| e.tag == DT_NEEDED && e.val != rewritten)
                .map(|e| e.val),
        );
        refs.extend(self.symbol_names.iter().copied().filter(|n| *n != 0));
        refs.extend(self.vernaux_names.iter().copied());
        // vn_file normally points at the rewritten name itself and follows it.
        refs.extend(
            self.verneed_file_fields
                .iter()
                .map(|pos| u64::from(self.read_u32(bytes, *pos)))
                .filter(|off| *off != rewritten),
        );
        refs
    }

    fn write_entries(&self, bytes: &mut [u8], entries: &[DynEntry]) {
        for (i, e) in entries.iter().enumerate() {
            self.write_entry(bytes, i, *e);
        }
        let end = self.entries.len().max(entries.len()) + 1;
        for i in entries.len()..end.min(self.capacity) {
            self.write_entry(bytes, i, DynEntry { tag: DT_NULL, val: 0 });
        }
    }

    fn read_entry(&self, bytes: &[u8], index: usize) -> DynEntry {
        let word = if self.is_64 { 8 } else { 4 };
        let pos = self.dyn_offset + index * word * 2;
        DynEntry {
            tag: self.read_word(bytes, pos),
            val: self.read_word(bytes, pos + word),
        }
    }

    fn write_entry(&self, bytes: &mut [u8], index: usize, e: DynEntry) {
        let word = if self.is_64 { 8 } else { 4 };
        let pos = self.dyn_offset + index * word * 2;
        self.write_word(bytes, pos, e.tag);
        self.write_word(bytes, pos + word, e.val);
    }

    fn read_word(&self, bytes: &[u8], pos: usize) -> u64 {
        if self.is_64 {
            let raw: [u8; 8] = bytes[pos..pos + 8].try_into().unwrap_or([0; 8]);
            if self.little_endian {
                u64::from_le_bytes(raw)
            } else {
                u64::from_be_bytes(raw)
            }
        } else {
            u64::from(self.read_u32(bytes, pos))
        }
    }

    fn write_word(&self, bytes: &mut [u8], pos: usize, v: u64) {
        if self.is_64 {
            let raw = if self.little_endian {
                v.to_le_bytes()
            } else {
                v.to_be_bytes()
            };
            bytes[pos..pos + 8].copy_from_slice(&raw);
        } else {
            self.write_u32(bytes, pos, v as u32);
        }
    }

    fn read_u16(&self, bytes: &[u8], pos: usize) -> u16 {
        let raw: [u8; 2] = bytes[pos..pos + 2].try_into().unwrap_or([0; 2]);
        if self.little_endian {
            u16::from_le_bytes(raw)
        } else {
            u16::from_be_bytes(raw)
        }
    }

    fn read_u32(&self, bytes: &[u8], pos: usize) -> u32 {
        let raw: [u8; 4] = bytes[pos..pos + 4].try_into().unwrap_or([0; 4]);
        if self.little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        }
    }

    fn write_u32(&self, bytes: &mut [u8], pos: usize, v: u32) {
        let raw = if self.little_endian {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        bytes[pos..pos + 4].copy_from_slice(&raw);
    }
}

fn vm_to_offset(phdrs: &[ProgramHeader], addr: u64) -> Option<u64> {
    phdrs
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .find(|ph| addr >= ph.p_vaddr && addr < ph.p_vaddr + ph.p_filesz)
        .map(|ph| addr - ph.p_vaddr + ph.p_offset)
}
