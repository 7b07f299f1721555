#![no_main]

use arbitrary::Arbitrary;
use blobfix_edit::FixupEngine;
use blobfix_types::ops::FixupOp;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum TextOp {
    Regex { pattern: String, replacement: String },
    Binary { pattern: String, replacement: String },
    AddLine(String),
    FixXml,
}

#[derive(Debug, Arbitrary)]
struct Input {
    content: Vec<u8>,
    ops: Vec<TextOp>,
}

fuzz_target!(|input: Input| {
    let ops: Vec<FixupOp> = input
        .ops
        .into_iter()
        .take(8)
        .map(|op| match op {
            TextOp::Regex { pattern, replacement } => FixupOp::RegexReplace { pattern, replacement },
            TextOp::Binary { pattern, replacement } => {
                FixupOp::BinaryRegexReplace { pattern, replacement }
            }
            TextOp::AddLine(line) => FixupOp::AddLineIfMissing { line },
            TextOp::FixXml => FixupOp::FixXml,
        })
        .collect();

    let _ = FixupEngine::default().run_chain("fuzz.txt", input.content, &ops);
});
