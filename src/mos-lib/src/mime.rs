/// MIME type inferred from a file basename, falling back to
/// `application/octet-stream` for unknown extensions.
pub fn mime_from_basename(basename: &str) -> String {
    mime_guess::from_path(basename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
