//! Minimal ELF64 little-endian shared objects for editor tests.
//!
//! Layout: ELF header, two program headers (one `PT_LOAD` mapping the whole file at vaddr 0 and
//! the `PT_DYNAMIC`), `.dynstr`, the dynamic array, then an opaque payload.

#![allow(dead_code)]

use std::ops::Range;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const DYNSTR_OFFSET: usize = EHDR_SIZE + 2 * PHDR_SIZE;

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const DT_NULL: u64 = 0;
const DT_NEEDED: u64 = 1;
const DT_STRTAB: u64 = 5;
const DT_STRSZ: u64 = 10;
const DT_SONAME: u64 = 14;

pub struct BuiltElf {
    pub bytes: Vec<u8>,
    pub dynamic: Range<usize>,
    pub dynstr: Range<usize>,
}

impl BuiltElf {
    /// Bytes with the dynamic array zeroed, for "everything else is identical" checks.
    pub fn outside_dynamic(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out[self.dynamic.clone()].fill(0);
        out
    }
}

#[derive(Default)]
pub struct ElfBuilder {
    needed: Vec<String>,
    soname: Option<String>,
    /// `DT_NEEDED` names stored as the tail of the SONAME string.
    soname_tail_needed: Vec<String>,
    extra_strings: Vec<String>,
    spare_slots: usize,
    payload: Vec<u8>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self {
            payload: b"\x7fTEXT-SEGMENT-PAYLOAD\x00".to_vec(),
            ..Self::default()
        }
    }

    pub fn needed(mut self, lib: &str) -> Self {
        self.needed.push(lib.to_string());
        self
    }

    pub fn soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_string());
        self
    }

    /// A `DT_NEEDED` entry pointing into the tail of the SONAME, as linkers do when one
    /// string is a suffix of another.
    pub fn needed_in_soname_tail(mut self, lib: &str) -> Self {
        self.soname_tail_needed.push(lib.to_string());
        self
    }

    /// A `.dynstr` string no dynamic entry points at.
    pub fn string(mut self, s: &str) -> Self {
        self.extra_strings.push(s.to_string());
        self
    }

    /// Extra `DT_NULL` slots after the terminator.
    pub fn spare_slots(mut self, n: usize) -> Self {
        self.spare_slots = n;
        self
    }

    pub fn build(self) -> BuiltElf {
        let mut dynstr = vec![0u8];
        let mut needed_offsets = Vec::new();
        for lib in &self.needed {
            needed_offsets.push(dynstr.len() as u64);
            dynstr.extend_from_slice(lib.as_bytes());
            dynstr.push(0);
        }
        let soname_offset = self.soname.as_ref().map(|s| {
            let off = dynstr.len() as u64;
            dynstr.extend_from_slice(s.as_bytes());
            dynstr.push(0);
            off
        });
        for s in &self.extra_strings {
            dynstr.extend_from_slice(s.as_bytes());
            dynstr.push(0);
        }

        for lib in &self.soname_tail_needed {
            let (Some(soname), Some(off)) = (&self.soname, soname_offset) else {
                panic!("needed_in_soname_tail requires a soname");
            };
            assert!(soname.ends_with(lib.as_str()), "{lib} is not a tail of {soname}");
            needed_offsets.push(off + (soname.len() - lib.len()) as u64);
        }

        let dynstr_range = DYNSTR_OFFSET..DYNSTR_OFFSET + dynstr.len();
        let dyn_offset = dynstr_range.end.next_multiple_of(8);

        let mut entries: Vec<(u64, u64)> =
            needed_offsets.iter().map(|o| (DT_NEEDED, *o)).collect();
        if let Some(off) = soname_offset {
            entries.push((DT_SONAME, off));
        }
        entries.push((DT_STRTAB, DYNSTR_OFFSET as u64));
        entries.push((DT_STRSZ, dynstr.len() as u64));
        for _ in 0..=self.spare_slots {
            entries.push((DT_NULL, 0));
        }
        let dyn_size = entries.len() * 16;
        let dyn_range = dyn_offset..dyn_offset + dyn_size;
        let total = dyn_range.end + self.payload.len();

        let mut out = Vec::with_capacity(total);
        // e_ident
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0; 8]);
        push_u16(&mut out, 3); // ET_DYN
        push_u16(&mut out, 183); // EM_AARCH64
        push_u32(&mut out, 1);
        push_u64(&mut out, 0); // e_entry
        push_u64(&mut out, EHDR_SIZE as u64); // e_phoff
        push_u64(&mut out, 0); // e_shoff
        push_u32(&mut out, 0); // e_flags
        push_u16(&mut out, EHDR_SIZE as u16);
        push_u16(&mut out, PHDR_SIZE as u16);
        push_u16(&mut out, 2);
        push_u16(&mut out, 64);
        push_u16(&mut out, 0);
        push_u16(&mut out, 0);
        assert_eq!(out.len(), EHDR_SIZE);

        push_phdr(&mut out, PT_LOAD, 0, total as u64, 0x1000);
        push_phdr(
            &mut out,
            PT_DYNAMIC,
            dyn_offset as u64,
            dyn_size as u64,
            8,
        );
        assert_eq!(out.len(), DYNSTR_OFFSET);

        out.extend_from_slice(&dynstr);
        out.resize(dyn_offset, 0);
        for (tag, val) in entries {
            push_u64(&mut out, tag);
            push_u64(&mut out, val);
        }
        out.extend_from_slice(&self.payload);
        assert_eq!(out.len(), total);

        BuiltElf {
            bytes: out,
            dynamic: dyn_range,
            dynstr: dynstr_range,
        }
    }
}

fn push_phdr(out: &mut Vec<u8>, p_type: u32, offset: u64, size: u64, align: u64) {
    push_u32(out, p_type);
    push_u32(out, 4); // PF_R
    push_u64(out, offset);
    push_u64(out, offset); // p_vaddr
    push_u64(out, offset); // p_paddr
    push_u64(out, size);
    push_u64(out, size);
    push_u64(out, align);
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// The shared object from the `libmotext_inf.so` fixup example.
pub fn motext_inf() -> BuiltElf {
    ElfBuilder::new()
        .needed("liblog.so")
        .needed("libril.so")
        .needed("libc++.so")
        .needed("libc.so")
        .soname("libmotext_inf.so")
        .build()
}

/// A keymint service linking the `-ndk_platform` AIDL libraries.
pub fn keymint_service(spare_slots: usize) -> BuiltElf {
    ElfBuilder::new()
        .needed("android.hardware.security.keymint-V1-ndk_platform.so")
        .needed("android.hardware.security.secureclock-V1-ndk_platform.so")
        .needed("android.hardware.security.sharedsecret-V1-ndk_platform.so")
        .needed("libbinder_ndk.so")
        .string("android.hardware.security.rkp-V1-ndk.so")
        .spare_slots(spare_slots)
        .build()
}
