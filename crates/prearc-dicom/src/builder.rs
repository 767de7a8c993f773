//! Part 10 encoding.
//!
//! [`encode_part10`] writes a preamble, a file meta group and a dataset in a
//! native transfer syntax. [`DatasetBuilder`] wraps it for assembling small
//! objects (test fixtures, CLI samples).

use std::collections::BTreeMap;

use crate::header::swap_words;
use crate::tag::Tag;
use crate::transfer::TransferSyntax;
use crate::vr::Vr;

/// Implementation class UID written into the file meta group.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.190317461402718846253154917355602834871";

/// One dataset element. `value` is held in little-endian byte order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub tag: Tag,
    pub vr: Vr,
    pub value: Vec<u8>,
}

impl Element {
    pub fn text(tag: Tag, vr: Vr, value: &str) -> Self {
        Self {
            tag,
            vr,
            value: value.as_bytes().to_vec(),
        }
    }
}

/// File meta information carried into the `0002` group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMeta {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax: TransferSyntax,
}

/// Encode a complete Part 10 object. File meta elements in `elements` are
/// ignored; the meta group is rebuilt from `meta`.
pub fn encode_part10(meta: &FileMeta, elements: &[Element]) -> Vec<u8> {
    let entries: Vec<Entry> = elements.iter().cloned().map(Entry::Value).collect();
    encode(meta, &entries)
}

#[derive(Clone, Debug)]
enum Entry {
    Value(Element),
    /// An undefined-length sequence holding one item of text elements.
    UndefinedSequence(Tag, Vec<(Tag, String)>),
}

impl Entry {
    fn tag(&self) -> Tag {
        match self {
            Entry::Value(e) => e.tag,
            Entry::UndefinedSequence(tag, _) => *tag,
        }
    }
}

fn encode(meta: &FileMeta, entries: &[Entry]) -> Vec<u8> {
    let mut out = vec![0u8; 128];
    out.extend_from_slice(b"DICM");

    let mut group = Encoder::new(true, true);
    group.element(Tag::FILE_META_VERSION, Vr::OB, &[0, 1]);
    group.text(Tag::MEDIA_STORAGE_SOP_CLASS_UID, Vr::UI, &meta.sop_class_uid);
    group.text(Tag::MEDIA_STORAGE_SOP_INSTANCE_UID, Vr::UI, &meta.sop_instance_uid);
    group.text(Tag::TRANSFER_SYNTAX_UID, Vr::UI, meta.transfer_syntax.uid());
    group.text(Tag::IMPLEMENTATION_CLASS_UID, Vr::UI, IMPLEMENTATION_CLASS_UID);

    let mut head = Encoder::new(true, true);
    head.element(
        Tag::FILE_META_GROUP_LENGTH,
        Vr::UL,
        &(group.out.len() as u32).to_le_bytes(),
    );
    out.extend_from_slice(&head.out);
    out.extend_from_slice(&group.out);

    let ts = &meta.transfer_syntax;
    let mut body = Encoder::new(ts.is_explicit_vr(), ts.is_little_endian());
    for entry in entries.iter().filter(|e| !e.tag().is_file_meta()) {
        match entry {
            Entry::Value(e) => body.element(e.tag, e.vr, &e.value),
            Entry::UndefinedSequence(tag, items) => body.undefined_sequence(*tag, items),
        }
    }
    out.extend_from_slice(&body.out);
    out
}

struct Encoder {
    explicit: bool,
    little: bool,
    out: Vec<u8>,
}

impl Encoder {
    fn new(explicit: bool, little: bool) -> Self {
        Self {
            explicit,
            little,
            out: Vec::new(),
        }
    }

    fn u16(&mut self, v: u16) {
        let bytes = if self.little { v.to_le_bytes() } else { v.to_be_bytes() };
        self.out.extend_from_slice(&bytes);
    }

    fn u32(&mut self, v: u32) {
        let bytes = if self.little { v.to_le_bytes() } else { v.to_be_bytes() };
        self.out.extend_from_slice(&bytes);
    }

    fn tag(&mut self, tag: Tag) {
        self.u16(tag.group());
        self.u16(tag.element());
    }

    fn header(&mut self, tag: Tag, vr: Vr, len: u32) {
        self.tag(tag);
        if !self.explicit {
            self.u32(len);
            return;
        }
        if vr.has_long_length() {
            self.out.extend_from_slice(&vr.0);
            self.out.extend_from_slice(&[0, 0]);
            self.u32(len);
        } else {
            self.out.extend_from_slice(&vr.0);
            self.u16(len as u16);
        }
    }

    fn text(&mut self, tag: Tag, vr: Vr, value: &str) {
        self.element(tag, vr, value.as_bytes());
    }

    fn element(&mut self, tag: Tag, vr: Vr, value: &[u8]) {
        let mut value = value.to_vec();
        if value.len() % 2 == 1 {
            value.push(vr.padding());
        }
        // Short-length VRs cannot carry more than 64 KiB.
        let vr = if !vr.has_long_length() && value.len() > usize::from(u16::MAX) {
            Vr::UN
        } else {
            vr
        };
        if !self.little {
            swap_words(vr, &mut value);
        }
        self.header(tag, vr, value.len() as u32);
        self.out.extend_from_slice(&value);
    }

    fn delimiter(&mut self, tag: Tag, len: u32) {
        self.tag(tag);
        self.u32(len);
    }

    fn undefined_sequence(&mut self, tag: Tag, items: &[(Tag, String)]) {
        self.header(tag, Vr::SQ, u32::MAX);
        self.delimiter(Tag::ITEM, u32::MAX);
        for (nested, value) in items {
            self.text(*nested, Vr::for_implicit(*nested), value);
        }
        self.delimiter(Tag::ITEM_DELIMITATION, 0);
        self.delimiter(Tag::SEQUENCE_DELIMITATION, 0);
    }
}

/// Assembles a small Part 10 object.
///
/// ```
/// use prearc_dicom::{read_header, DatasetBuilder, Tag};
///
/// let bytes = DatasetBuilder::new()
///     .sop("1.2.840.10008.5.1.4.1.1.2", "1.2.3.4")
///     .study_uid("1.2.3")
///     .modality("CT")
///     .build();
/// let header = read_header(&mut std::io::Cursor::new(bytes.as_slice()), Tag::PIXEL_DATA).unwrap();
/// assert_eq!(header.get(Tag::MODALITY), Some("CT"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct DatasetBuilder {
    transfer_syntax: TransferSyntax,
    sop_class_uid: String,
    sop_instance_uid: String,
    entries: BTreeMap<Tag, Entry>,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer_syntax(mut self, ts: TransferSyntax) -> Self {
        self.transfer_syntax = ts;
        self
    }

    /// Set SOP class and instance UIDs in both the meta group and the dataset.
    pub fn sop(mut self, class_uid: &str, instance_uid: &str) -> Self {
        self.sop_class_uid = class_uid.to_string();
        self.sop_instance_uid = instance_uid.to_string();
        self.put(Element::text(Tag::SOP_CLASS_UID, Vr::UI, class_uid))
            .put(Element::text(Tag::SOP_INSTANCE_UID, Vr::UI, instance_uid))
    }

    pub fn study_uid(self, uid: &str) -> Self {
        self.put(Element::text(Tag::STUDY_INSTANCE_UID, Vr::UI, uid))
    }

    pub fn series_uid(self, uid: &str) -> Self {
        self.put(Element::text(Tag::SERIES_INSTANCE_UID, Vr::UI, uid))
    }

    pub fn series_number(self, number: i32) -> Self {
        self.put(Element::text(Tag::SERIES_NUMBER, Vr::IS, &number.to_string()))
    }

    pub fn series_description(self, value: &str) -> Self {
        self.put(Element::text(Tag::SERIES_DESCRIPTION, Vr::LO, value))
    }

    pub fn modality(self, value: &str) -> Self {
        self.put(Element::text(Tag::MODALITY, Vr::CS, value))
    }

    pub fn study_description(self, value: &str) -> Self {
        self.put(Element::text(Tag::STUDY_DESCRIPTION, Vr::LO, value))
    }

    pub fn patient_name(self, value: &str) -> Self {
        self.put(Element::text(Tag::PATIENT_NAME, Vr::PN, value))
    }

    pub fn patient_id(self, value: &str) -> Self {
        self.put(Element::text(Tag::PATIENT_ID, Vr::LO, value))
    }

    pub fn patient_comments(self, value: &str) -> Self {
        self.put(Element::text(Tag::PATIENT_COMMENTS, Vr::LT, value))
    }

    /// Any text element.
    pub fn text(self, tag: Tag, vr: Vr, value: &str) -> Self {
        self.put(Element::text(tag, vr, value))
    }

    pub fn pixel_data(self, data: Vec<u8>) -> Self {
        self.put(Element {
            tag: Tag::PIXEL_DATA,
            vr: Vr::OW,
            value: data,
        })
    }

    /// An undefined-length sequence with one item of text elements.
    pub fn raw_undefined_sequence(mut self, tag: Tag, items: &[(Tag, &str)]) -> Self {
        let items = items.iter().map(|(t, v)| (*t, v.to_string())).collect();
        self.entries.insert(tag, Entry::UndefinedSequence(tag, items));
        self
    }

    fn put(mut self, element: Element) -> Self {
        self.entries.insert(element.tag, Entry::Value(element));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let meta = FileMeta {
            sop_class_uid: self.sop_class_uid.clone(),
            sop_instance_uid: self.sop_instance_uid.clone(),
            transfer_syntax: self.transfer_syntax.clone(),
        };
        let entries: Vec<Entry> = self.entries.values().cloned().collect();
        encode(&meta, &entries)
    }
}
