use crate::byte_unit::ByteUnit;

/// A caller supplied estimate of how large a new file will become and why it
/// is being written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SizeHint {
    /// Nothing is known about the file's eventual size.
    #[default]
    None,

    /// The file belongs to a segment produced by flushing buffered documents.
    Flush {
        estimated_bytes: ByteUnit,
        num_docs: u32,
    },

    /// The file belongs to a segment produced by merging existing segments.
    Merge {
        estimated_bytes: ByteUnit,
        num_segments: u32,
    },
}

impl SizeHint {
    pub fn flush(num_docs: u32, estimated_bytes: impl Into<ByteUnit>) -> Self {
        SizeHint::Flush {
            estimated_bytes: estimated_bytes.into(),
            num_docs,
        }
    }

    pub fn merge(num_segments: u32, estimated_bytes: impl Into<ByteUnit>) -> Self {
        SizeHint::Merge {
            estimated_bytes: estimated_bytes.into(),
            num_segments,
        }
    }

    /// The estimated final size of the file, if one is known.
    pub fn estimated_bytes(&self) -> Option<ByteUnit> {
        match self {
            SizeHint::None => None,
            SizeHint::Flush { estimated_bytes, .. } | SizeHint::Merge { estimated_bytes, .. } => {
                Some(*estimated_bytes)
            }
        }
    }
}
