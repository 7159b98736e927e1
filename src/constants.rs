pub(crate) const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

pub(crate) const BOUNDARY_EXT: &'static str = "--";
pub(crate) const CRLF: &'static str = "\r\n";
