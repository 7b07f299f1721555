#![no_main]

//! Module file parsing with arbitrary TOML input.

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(module) = toml::from_str::<blobfix_types::module::ModuleFile>(s) {
        let _ = module.namespace_or_default();
        let _ = toml::to_string(&module);
    }
    let _ = toml::from_str::<blobfix_types::rules::LibRewriteRule>(s);
    let _ = toml::from_str::<blobfix_types::rules::BlobFixupRule>(s);
});
