//! Network and disk I/O for downloaded artifacts.

pub mod checksum;
pub mod download;
pub mod extract;

pub use download::DownloadError;
