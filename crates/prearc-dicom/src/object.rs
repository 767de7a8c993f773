//! Full header parse of one object.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{DicomError, DicomResult};
use crate::header::{read_header, DicomHeader};
use crate::tag::Tag;
use crate::transfer::TransferSyntax;

/// Identity and routing fields of a fully parsed object header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub series_number: Option<i32>,
    pub series_description: Option<String>,
    pub modality: Option<String>,
    pub transfer_syntax: TransferSyntax,
    pub header: DicomHeader,
}

impl ObjectInfo {
    /// Whether `other` is the same logical object (same class and instance).
    pub fn same_object(&self, sop_class_uid: &str, sop_instance_uid: &str) -> bool {
        self.sop_class_uid == sop_class_uid && self.sop_instance_uid == sop_instance_uid
    }
}

/// Parse everything up to pixel data and rewind the stream.
///
/// Fails with [`DicomError::MissingIdentifier`] when the SOP class or
/// instance UID is absent.
pub fn parse_object<R: Read + Seek>(reader: &mut R) -> DicomResult<ObjectInfo> {
    let header = read_header(reader, Tag::PIXEL_DATA)?;
    reader.seek(SeekFrom::Start(0))?;
    from_header(header)
}

pub(crate) fn from_header(header: DicomHeader) -> DicomResult<ObjectInfo> {
    let owned = |tag| header.get(tag).map(str::to_string);
    let sop_class_uid = owned(Tag::SOP_CLASS_UID)
        .or_else(|| owned(Tag::MEDIA_STORAGE_SOP_CLASS_UID))
        .ok_or(DicomError::MissingIdentifier("SOP class UID"))?;
    let sop_instance_uid = owned(Tag::SOP_INSTANCE_UID)
        .or_else(|| owned(Tag::MEDIA_STORAGE_SOP_INSTANCE_UID))
        .ok_or(DicomError::MissingIdentifier("SOP instance UID"))?;
    Ok(ObjectInfo {
        sop_class_uid,
        sop_instance_uid,
        study_instance_uid: owned(Tag::STUDY_INSTANCE_UID),
        series_instance_uid: owned(Tag::SERIES_INSTANCE_UID),
        series_number: header
            .get(Tag::SERIES_NUMBER)
            .and_then(|v| v.trim().parse().ok()),
        series_description: owned(Tag::SERIES_DESCRIPTION),
        modality: owned(Tag::MODALITY),
        transfer_syntax: header.transfer_syntax.clone(),
        header,
    })
}
