//! Torrent metadata primitives: magnet links and `.torrent` (metainfo)
//! decoding. This crate never talks to the swarm; it only understands the
//! identity and file layout of a torrent.

pub mod magnet;
pub mod metainfo;

pub use magnet::MagnetLink;
pub use metainfo::Metainfo;
