//! Test fixtures shared by finfeed crates: feed documents, IR pages and
//! SEC EDGAR JSON payloads built from small declarative descriptions.

pub mod feeds;
pub mod pages;
pub mod sec;

/// A temporary directory that lives as long as the returned guard.
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
