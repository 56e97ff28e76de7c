/// Magic bytes identifying a Keel snapshot file
pub const MAGIC: &[u8; 8] = b"KEEL\0\0\0\0";

/// Current file format version
pub const VERSION: u32 = 1;

/// Size of the header in bytes (always one 4KB page)
pub const HEADER_SIZE: usize = 4096;

/// Header page of a snapshot file.
///
/// Fields are little-endian at fixed offsets; the rest of the page is
/// zeroed. The payload starts at [`HEADER_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Magic bytes for file type identification
    pub magic: [u8; 8],

    /// File format version
    pub version: u32,

    /// Payload length in bytes
    pub payload_len: u64,

    /// Number of objects in the payload
    pub object_count: u64,

    /// Number of vector indexes in the payload
    pub index_count: u32,
}

impl Header {
    /// Header for a payload of `payload_len` bytes.
    #[must_use]
    pub const fn new(payload_len: u64, object_count: u64, index_count: u32) -> Self {
        Self { magic: *MAGIC, version: VERSION, payload_len, object_count, index_count }
    }

    /// Validates the header for correctness and compatibility
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == *MAGIC && self.version > 0 && self.version <= VERSION
    }

    /// Serialize into a full header page.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut page = [0u8; HEADER_SIZE];
        page[0..8].copy_from_slice(&self.magic);
        page[8..12].copy_from_slice(&self.version.to_le_bytes());
        page[12..20].copy_from_slice(&self.payload_len.to_le_bytes());
        page[20..28].copy_from_slice(&self.object_count.to_le_bytes());
        page[28..32].copy_from_slice(&self.index_count.to_le_bytes());
        page
    }

    /// Parse the first page of a file. Returns `None` if `bytes` is shorter
    /// than a page. The result is not validated; see [`Header::is_valid`].
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let page = bytes.get(..HEADER_SIZE)?;
        let field = |range: std::ops::Range<usize>| page.get(range);

        Some(Self {
            magic: field(0..8)?.try_into().ok()?,
            version: u32::from_le_bytes(field(8..12)?.try_into().ok()?),
            payload_len: u64::from_le_bytes(field(12..20)?.try_into().ok()?),
            object_count: u64::from_le_bytes(field(20..28)?.try_into().ok()?),
            index_count: u32::from_le_bytes(field(28..32)?.try_into().ok()?),
        })
    }
}
