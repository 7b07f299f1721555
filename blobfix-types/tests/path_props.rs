//! Property tests for blob path normalization.

use blobfix_types::path::normalize_blob_path;
use proptest::prelude::*;

fn arb_segments() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::string::string_regex(r"[a-z0-9_.@+-]{1,12}")
            .unwrap()
            .prop_filter("not a dot segment", |s| s != "." && s != ".."),
        1..6,
    )
}

proptest! {
    #[test]
    fn normalization_is_idempotent(segs in arb_segments(), lead in "(\\./|/)?") {
        let raw = format!("{}{}", lead, segs.join("/"));
        let once = normalize_blob_path(&raw);
        prop_assert_eq!(normalize_blob_path(&once), once.clone());
        prop_assert_eq!(once, segs.join("/"));
    }

    #[test]
    fn backslashes_match_forward_slashes(segs in arb_segments()) {
        prop_assert_eq!(
            normalize_blob_path(&segs.join("\\")),
            normalize_blob_path(&segs.join("/"))
        );
    }
}
