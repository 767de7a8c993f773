//! Transfer syntaxes and re-encoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::builder::{encode_part10, FileMeta};
use crate::error::{DicomError, DicomResult};
use crate::header::read_dataset;

pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// How a dataset is encoded on the wire.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    ExplicitVrBigEndian,
    DeflatedExplicitVrLittleEndian,
    /// Any compressed or otherwise encapsulated syntax, by UID.
    Encapsulated(String),
}

impl TransferSyntax {
    pub fn from_uid(uid: &str) -> Self {
        match uid.trim_end_matches(['\0', ' ']) {
            IMPLICIT_VR_LITTLE_ENDIAN => Self::ImplicitVrLittleEndian,
            EXPLICIT_VR_LITTLE_ENDIAN => Self::ExplicitVrLittleEndian,
            EXPLICIT_VR_BIG_ENDIAN => Self::ExplicitVrBigEndian,
            DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => Self::DeflatedExplicitVrLittleEndian,
            other => Self::Encapsulated(other.to_string()),
        }
    }

    pub fn uid(&self) -> &str {
        match self {
            Self::ImplicitVrLittleEndian => IMPLICIT_VR_LITTLE_ENDIAN,
            Self::ExplicitVrLittleEndian => EXPLICIT_VR_LITTLE_ENDIAN,
            Self::ExplicitVrBigEndian => EXPLICIT_VR_BIG_ENDIAN,
            Self::DeflatedExplicitVrLittleEndian => DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN,
            Self::Encapsulated(uid) => uid,
        }
    }

    pub fn is_explicit_vr(&self) -> bool {
        !matches!(self, Self::ImplicitVrLittleEndian)
    }

    pub fn is_little_endian(&self) -> bool {
        !matches!(self, Self::ExplicitVrBigEndian)
    }

    /// Uncompressed, element-by-element readable without inflation.
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            Self::ImplicitVrLittleEndian | Self::ExplicitVrLittleEndian | Self::ExplicitVrBigEndian
        )
    }
}

impl Default for TransferSyntax {
    fn default() -> Self {
        Self::ExplicitVrLittleEndian
    }
}

impl From<String> for TransferSyntax {
    fn from(uid: String) -> Self {
        Self::from_uid(&uid)
    }
}

impl From<TransferSyntax> for String {
    fn from(ts: TransferSyntax) -> Self {
        ts.uid().to_string()
    }
}

impl fmt::Display for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uid())
    }
}

impl fmt::Debug for TransferSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferSyntax({})", self.uid())
    }
}

/// Re-encodes a whole Part 10 object into another transfer syntax.
///
/// Used by the storage writer when decompress-on-write is enabled. Callers
/// treat any error as "keep the original bytes".
pub trait Transcoder: Send + Sync {
    fn transcode(&self, object: &[u8], target: &TransferSyntax) -> DicomResult<Vec<u8>>;
}

/// Converts between the native (uncompressed) syntaxes. Encapsulated and
/// deflated inputs are reported as unsupported.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeTranscoder;

impl Transcoder for NativeTranscoder {
    fn transcode(&self, object: &[u8], target: &TransferSyntax) -> DicomResult<Vec<u8>> {
        if !target.is_native() {
            return Err(DicomError::UnsupportedTransferSyntax(target.uid().to_string()));
        }
        let mut cursor = std::io::Cursor::new(object);
        // Rejects deflated and encapsulated sources.
        let dataset = read_dataset(&mut cursor)?;
        if &dataset.transfer_syntax == target {
            return Ok(object.to_vec());
        }
        debug!(from = %dataset.transfer_syntax, to = %target, elements = dataset.elements.len(), "transcoding");
        let meta = FileMeta {
            sop_class_uid: dataset.meta_value(crate::Tag::MEDIA_STORAGE_SOP_CLASS_UID),
            sop_instance_uid: dataset.meta_value(crate::Tag::MEDIA_STORAGE_SOP_INSTANCE_UID),
            transfer_syntax: target.clone(),
        };
        Ok(encode_part10(&meta, &dataset.elements))
    }
}
