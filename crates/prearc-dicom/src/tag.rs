//! Attribute tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DicomError;

/// A `(group, element)` attribute tag. Tags order the way they appear in a
/// dataset, which is what makes a bounded prefix read possible.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(pub u16, pub u16);

impl Tag {
    pub const FILE_META_GROUP_LENGTH: Tag = Tag(0x0002, 0x0000);
    pub const FILE_META_VERSION: Tag = Tag(0x0002, 0x0001);
    pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag(0x0002, 0x0002);
    pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag(0x0002, 0x0003);
    pub const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);
    pub const IMPLEMENTATION_CLASS_UID: Tag = Tag(0x0002, 0x0012);

    pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
    pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
    pub const ACCESSION_NUMBER: Tag = Tag(0x0008, 0x0050);
    pub const MODALITY: Tag = Tag(0x0008, 0x0060);
    pub const STUDY_DESCRIPTION: Tag = Tag(0x0008, 0x1030);
    pub const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
    pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
    pub const PATIENT_COMMENTS: Tag = Tag(0x0010, 0x4000);
    pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
    pub const STUDY_ID: Tag = Tag(0x0020, 0x0010);
    pub const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
    pub const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
    pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);

    pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
    pub const ITEM_DELIMITATION: Tag = Tag(0xFFFE, 0xE00D);
    pub const SEQUENCE_DELIMITATION: Tag = Tag(0xFFFE, 0xE0DD);

    pub fn group(&self) -> u16 {
        self.0
    }

    pub fn element(&self) -> u16 {
        self.1
    }

    /// The smallest tag strictly greater than this one.
    pub fn next(&self) -> Tag {
        match self.1.checked_add(1) {
            Some(e) => Tag(self.0, e),
            None => Tag(self.0.saturating_add(1), 0),
        }
    }

    /// Item and delimiter tags carry no VR even in explicit-VR encodings.
    pub fn is_delimiter(&self) -> bool {
        self.0 == 0xFFFE
    }

    pub fn is_file_meta(&self) -> bool {
        self.0 == 0x0002
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag{self}")
    }
}

impl FromStr for Tag {
    type Err = DicomError;

    /// Accepts `(0008,0060)`, `0008,0060` and `00080060`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (group, element) = match trimmed.split_once(',') {
            Some((g, e)) => (g.trim(), e.trim()),
            None if trimmed.len() == 8 => trimmed.split_at(4),
            None => return Err(DicomError::InvalidTag(s.to_string())),
        };
        if group.len() != 4 || element.len() != 4 {
            return Err(DicomError::InvalidTag(s.to_string()));
        }
        let group =
            u16::from_str_radix(group, 16).map_err(|_| DicomError::InvalidTag(s.to_string()))?;
        let element =
            u16::from_str_radix(element, 16).map_err(|_| DicomError::InvalidTag(s.to_string()))?;
        Ok(Tag(group, element))
    }
}

impl TryFrom<String> for Tag {
    type Error = DicomError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}
