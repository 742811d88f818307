//! Blob framing - how a node body is laid out inside the node file

/// How the payload of a blob is encoded on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobEncoding {
    /// Stored as-is
    Raw,
    /// zstd-compressed
    Zstd,
}

/// Payloads smaller than this are never worth compressing
const COMPRESS_THRESHOLD: usize = 128;

impl BlobEncoding {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobEncoding::Raw => 0,
            BlobEncoding::Zstd => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobEncoding::Raw),
            1 => Some(BlobEncoding::Zstd),
            _ => None,
        }
    }
}

/// A node body on its way to or from disk
#[derive(Clone, Debug)]
pub struct Blob {
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(data: Vec<u8>) -> Self {
        Blob { data }
    }

    /// Frame the blob for storage: one encoding byte, then the payload.
    ///
    /// Small bodies (internal nodes are 64 bytes) are stored raw; larger ones
    /// are compressed when that actually saves space.
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        if self.data.len() >= COMPRESS_THRESHOLD {
            let compressed = zstd::encode_all(self.data.as_slice(), 3)?;
            if compressed.len() < self.data.len() {
                let mut output = Vec::with_capacity(compressed.len() + 1);
                output.push(BlobEncoding::Zstd.as_byte());
                output.extend(compressed);
                return Ok(output);
            }
        }

        let mut output = Vec::with_capacity(self.data.len() + 1);
        output.push(BlobEncoding::Raw.as_byte());
        output.extend_from_slice(&self.data);
        Ok(output)
    }

    /// Decode a frame written by [`Blob::encode`]
    pub fn decode(frame: &[u8]) -> crate::Result<Self> {
        if frame.is_empty() {
            return Err(crate::Error::Corruption("Empty blob data".into()));
        }

        let encoding = BlobEncoding::from_byte(frame[0]).ok_or_else(|| {
            crate::Error::Corruption(format!("Invalid blob encoding: {}", frame[0]))
        })?;

        let data = match encoding {
            BlobEncoding::Raw => frame[1..].to_vec(),
            BlobEncoding::Zstd => zstd::decode_all(&frame[1..])?,
        };

        Ok(Blob { data })
    }

    /// Get the size of the uncompressed data
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
