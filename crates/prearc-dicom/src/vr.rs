//! Value representations.

use std::fmt;

use crate::tag::Tag;

/// A two-letter value representation code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vr(pub [u8; 2]);

impl Vr {
    pub const AE: Vr = Vr(*b"AE");
    pub const AS: Vr = Vr(*b"AS");
    pub const AT: Vr = Vr(*b"AT");
    pub const CS: Vr = Vr(*b"CS");
    pub const DA: Vr = Vr(*b"DA");
    pub const DS: Vr = Vr(*b"DS");
    pub const DT: Vr = Vr(*b"DT");
    pub const FD: Vr = Vr(*b"FD");
    pub const FL: Vr = Vr(*b"FL");
    pub const IS: Vr = Vr(*b"IS");
    pub const LO: Vr = Vr(*b"LO");
    pub const LT: Vr = Vr(*b"LT");
    pub const OB: Vr = Vr(*b"OB");
    pub const OD: Vr = Vr(*b"OD");
    pub const OF: Vr = Vr(*b"OF");
    pub const OL: Vr = Vr(*b"OL");
    pub const OV: Vr = Vr(*b"OV");
    pub const OW: Vr = Vr(*b"OW");
    pub const PN: Vr = Vr(*b"PN");
    pub const SH: Vr = Vr(*b"SH");
    pub const SL: Vr = Vr(*b"SL");
    pub const SQ: Vr = Vr(*b"SQ");
    pub const SS: Vr = Vr(*b"SS");
    pub const ST: Vr = Vr(*b"ST");
    pub const SV: Vr = Vr(*b"SV");
    pub const TM: Vr = Vr(*b"TM");
    pub const UC: Vr = Vr(*b"UC");
    pub const UI: Vr = Vr(*b"UI");
    pub const UL: Vr = Vr(*b"UL");
    pub const UN: Vr = Vr(*b"UN");
    pub const UR: Vr = Vr(*b"UR");
    pub const US: Vr = Vr(*b"US");
    pub const UT: Vr = Vr(*b"UT");
    pub const UV: Vr = Vr(*b"UV");

    /// Explicit-VR encodings use a reserved word plus a 32-bit length for these.
    pub fn has_long_length(&self) -> bool {
        matches!(
            self.0,
            [b'O', _] | [b'S', b'Q'] | [b'S', b'V'] | [b'U', b'C'] | [b'U', b'N'] | [b'U', b'R']
                | [b'U', b'T'] | [b'U', b'V']
        )
    }

    /// Character-string VRs whose value is kept as text by the header reader.
    pub fn is_text(&self) -> bool {
        matches!(
            *self,
            Vr::AE
                | Vr::AS
                | Vr::CS
                | Vr::DA
                | Vr::DS
                | Vr::DT
                | Vr::IS
                | Vr::LO
                | Vr::LT
                | Vr::PN
                | Vr::SH
                | Vr::ST
                | Vr::TM
                | Vr::UC
                | Vr::UI
                | Vr::UR
                | Vr::UT
        )
    }

    /// Width of one binary word, for byte-order conversion. `None` for byte
    /// and text data.
    pub fn word_size(&self) -> Option<usize> {
        match *self {
            Vr::US | Vr::SS | Vr::OW | Vr::AT => Some(2),
            Vr::UL | Vr::SL | Vr::FL | Vr::OF | Vr::OL => Some(4),
            Vr::FD | Vr::OD | Vr::SV | Vr::UV | Vr::OV => Some(8),
            _ => None,
        }
    }

    /// Padding byte for odd-length values.
    pub fn padding(&self) -> u8 {
        if *self == Vr::UI || !self.is_text() {
            0
        } else {
            b' '
        }
    }

    /// VR of a well-known tag when the encoding does not carry one.
    pub fn for_implicit(tag: Tag) -> Vr {
        match tag {
            Tag::FILE_META_GROUP_LENGTH => Vr::UL,
            Tag::FILE_META_VERSION => Vr::OB,
            Tag::MEDIA_STORAGE_SOP_CLASS_UID
            | Tag::MEDIA_STORAGE_SOP_INSTANCE_UID
            | Tag::TRANSFER_SYNTAX_UID
            | Tag::IMPLEMENTATION_CLASS_UID
            | Tag::SOP_CLASS_UID
            | Tag::SOP_INSTANCE_UID
            | Tag::STUDY_INSTANCE_UID
            | Tag::SERIES_INSTANCE_UID => Vr::UI,
            Tag::STUDY_DATE => Vr::DA,
            Tag::ACCESSION_NUMBER | Tag::STUDY_ID => Vr::SH,
            Tag::MODALITY => Vr::CS,
            Tag::STUDY_DESCRIPTION | Tag::SERIES_DESCRIPTION | Tag::PATIENT_ID => Vr::LO,
            Tag::PATIENT_NAME => Vr::PN,
            Tag::PATIENT_COMMENTS => Vr::LT,
            Tag::SERIES_NUMBER | Tag::INSTANCE_NUMBER => Vr::IS,
            Tag::PIXEL_DATA => Vr::OW,
            // Group lengths
            Tag(_, 0x0000) => Vr::UL,
            _ => Vr::UN,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vr({})", self.as_str())
    }
}
