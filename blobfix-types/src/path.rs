/// Normalize a blob install path for rule lookup.
///
/// `./vendor//lib64\libfoo.so` and `/vendor/lib64/libfoo.so` both become `vendor/lib64/libfoo.so`.
pub fn normalize_blob_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    unified
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// First path segment, which names the install partition (`vendor/lib64/x.so` -> `vendor`).
pub fn partition_segment(path: &str) -> Option<&str> {
    let trimmed = path.trim_start_matches("./").trim_start_matches('/');
    trimmed.split('/').next().filter(|s| !s.is_empty())
}
