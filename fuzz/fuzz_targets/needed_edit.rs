#![no_main]

//! Arbitrary bytes through the in-process `DT_NEEDED` editor. Errors are fine; panics are not.

use blobfix_edit::{ElfNeededEditor, NeededEditor};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let editor = ElfNeededEditor;
    let Ok(names) = editor.needed(data) else {
        return;
    };

    for name in names.iter().take(4) {
        let _ = editor.remove(data.to_vec(), name);
        let _ = editor.replace(data.to_vec(), name, "libfuzz.so");
    }
    let _ = editor.add(data.to_vec(), "libc.so");
});
