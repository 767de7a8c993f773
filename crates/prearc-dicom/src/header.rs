//! Bounded header reading.
//!
//! [`read_header`] reads a Part 10 object from the start of the stream up to
//! (excluding) a stop tag and keeps the text and small numeric values of the
//! top-level elements. Sequences are skipped, never decoded. Because dataset
//! elements are stored in ascending tag order, reading to `max_tag.next()` is
//! enough to see every element at or below `max_tag`.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

use crate::builder::Element;
use crate::error::{DicomError, DicomResult};
use crate::tag::Tag;
use crate::transfer::TransferSyntax;
use crate::vr::Vr;

const PREAMBLE_LEN: u64 = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
/// Text values longer than this are skipped rather than buffered.
const MAX_TEXT_VALUE: u32 = 64 * 1024;
const MAX_SEQUENCE_DEPTH: usize = 32;

/// The decoded prefix of an object header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DicomHeader {
    pub transfer_syntax: TransferSyntax,
    /// Text and numeric values of top-level elements, file meta included.
    pub elements: BTreeMap<Tag, String>,
    /// Tag the read stopped before.
    pub stop: Tag,
    /// Stream offset reached.
    pub bytes_read: u64,
    /// The dataset ended before reaching `stop`.
    pub complete: bool,
}

impl DicomHeader {
    /// Value of a tag, if present and non-empty.
    pub fn get(&self, tag: Tag) -> Option<&str> {
        self.elements
            .get(&tag)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether the read saw far enough to answer for `tag`.
    pub fn covers(&self, tag: Tag) -> bool {
        self.complete || tag < self.stop
    }
}

/// Read the header from the start of `reader`, stopping before `stop`.
///
/// The reader is left positioned wherever the read ended; callers that need
/// the full stream afterwards must rewind.
pub fn read_header<R: Read + Seek>(reader: &mut R, stop: Tag) -> DicomResult<DicomHeader> {
    reader.seek(SeekFrom::Start(0))?;
    let mut elements = BTreeMap::new();
    let transfer_syntax = read_file_meta(reader, &mut elements)?;
    if matches!(transfer_syntax, TransferSyntax::DeflatedExplicitVrLittleEndian) {
        return Err(DicomError::UnsupportedTransferSyntax(
            transfer_syntax.uid().to_string(),
        ));
    }

    let mut el = ElementReader::new(reader, &transfer_syntax);
    let mut complete = false;
    loop {
        let Some(tag) = el.read_tag()? else {
            complete = true;
            break;
        };
        if tag >= stop {
            break;
        }
        let (vr, len) = el.read_length(tag)?;
        if len == UNDEFINED_LENGTH {
            el.skip_undefined(tag, 0)?;
            continue;
        }
        let vr = vr.unwrap_or_else(|| Vr::for_implicit(tag));
        match decode_value(&mut el, tag, vr, len)? {
            Some(value) => {
                elements.insert(tag, value);
            }
            None => el.skip(len)?,
        }
    }
    let bytes_read = el.position()?;
    Ok(DicomHeader {
        transfer_syntax,
        elements,
        stop,
        bytes_read,
        complete,
    })
}

/// A fully read native dataset, values normalized to little-endian byte order.
#[derive(Clone, Debug)]
pub struct RawDataset {
    pub transfer_syntax: TransferSyntax,
    pub meta: BTreeMap<Tag, String>,
    pub elements: Vec<Element>,
}

impl RawDataset {
    pub fn meta_value(&self, tag: Tag) -> String {
        self.meta.get(&tag).cloned().unwrap_or_default()
    }
}

/// Read every top-level element of a native dataset.
///
/// Fails with [`DicomError::UnsupportedTransferSyntax`] for deflated or
/// encapsulated objects and for undefined-length elements.
pub fn read_dataset<R: Read + Seek>(reader: &mut R) -> DicomResult<RawDataset> {
    reader.seek(SeekFrom::Start(0))?;
    let mut meta = BTreeMap::new();
    let transfer_syntax = read_file_meta(reader, &mut meta)?;
    if !transfer_syntax.is_native() {
        return Err(DicomError::UnsupportedTransferSyntax(
            transfer_syntax.uid().to_string(),
        ));
    }
    let mut el = ElementReader::new(reader, &transfer_syntax);
    let mut elements = Vec::new();
    while let Some(tag) = el.read_tag()? {
        let (vr, len) = el.read_length(tag)?;
        if len == UNDEFINED_LENGTH {
            return Err(DicomError::UnsupportedTransferSyntax(format!(
                "undefined-length element {tag} in {transfer_syntax}"
            )));
        }
        let vr = vr.unwrap_or_else(|| Vr::for_implicit(tag));
        let mut value = el.read_bytes(tag, len)?;
        if !el.little {
            swap_words(vr, &mut value);
        }
        elements.push(Element { tag, vr, value });
    }
    Ok(RawDataset {
        transfer_syntax,
        meta,
        elements,
    })
}

/// Reverse byte order word by word for binary VRs.
pub(crate) fn swap_words(vr: Vr, value: &mut [u8]) {
    if let Some(width) = vr.word_size() {
        for word in value.chunks_exact_mut(width) {
            word.reverse();
        }
    }
}

fn read_file_meta<R: Read + Seek>(
    reader: &mut R,
    out: &mut BTreeMap<Tag, String>,
) -> DicomResult<TransferSyntax> {
    let mut preamble = [0u8; PREAMBLE_LEN as usize + 4];
    if let Err(e) = reader.read_exact(&mut preamble) {
        return match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                Err(DicomError::NotDicom("shorter than the Part 10 preamble".into()))
            }
            _ => Err(e.into()),
        };
    }
    if &preamble[PREAMBLE_LEN as usize..] != MAGIC {
        return Err(DicomError::NotDicom("missing DICM magic".into()));
    }

    let meta_syntax = TransferSyntax::ExplicitVrLittleEndian;
    let mut el = ElementReader::new(reader, &meta_syntax);
    loop {
        let Some(tag) = el.read_tag()? else { break };
        if !tag.is_file_meta() {
            el.unread_tag()?;
            break;
        }
        let (vr, len) = el.read_length(tag)?;
        let vr = vr.unwrap_or(Vr::UN);
        match decode_value(&mut el, tag, vr, len)? {
            Some(value) => {
                out.insert(tag, value);
            }
            None => el.skip(len)?,
        }
    }
    out.get(&Tag::TRANSFER_SYNTAX_UID)
        .map(|uid| TransferSyntax::from_uid(uid))
        .ok_or_else(|| DicomError::NotDicom("file meta has no transfer syntax".into()))
}

/// Decode a value worth keeping. Returns `None` (nothing consumed) for
/// values the header does not retain.
fn decode_value<R: Read + Seek>(
    el: &mut ElementReader<'_, R>,
    tag: Tag,
    vr: Vr,
    len: u32,
) -> DicomResult<Option<String>> {
    if vr.is_text() && len <= MAX_TEXT_VALUE {
        let bytes = el.read_bytes(tag, len)?;
        let text = String::from_utf8_lossy(&bytes);
        return Ok(Some(text.trim_end_matches(['\0', ' ']).trim_start().to_string()));
    }
    match (vr, len) {
        (Vr::US, 2) => {
            let bytes = el.read_bytes(tag, 2)?;
            Ok(Some(el.u16_from(&bytes).to_string()))
        }
        (Vr::UL, 4) => {
            let bytes = el.read_bytes(tag, 4)?;
            Ok(Some(el.u32_from(&bytes).to_string()))
        }
        _ => Ok(None),
    }
}

struct ElementReader<'r, R> {
    reader: &'r mut R,
    explicit: bool,
    little: bool,
}

impl<'r, R: Read + Seek> ElementReader<'r, R> {
    fn new(reader: &'r mut R, ts: &TransferSyntax) -> Self {
        Self {
            reader,
            explicit: ts.is_explicit_vr(),
            little: ts.is_little_endian(),
        }
    }

    fn position(&mut self) -> DicomResult<u64> {
        Ok(self.reader.stream_position()?)
    }

    fn u16_from(&self, b: &[u8]) -> u16 {
        let arr = [b[0], b[1]];
        if self.little {
            u16::from_le_bytes(arr)
        } else {
            u16::from_be_bytes(arr)
        }
    }

    fn u32_from(&self, b: &[u8]) -> u32 {
        let arr = [b[0], b[1], b[2], b[3]];
        if self.little {
            u32::from_le_bytes(arr)
        } else {
            u32::from_be_bytes(arr)
        }
    }

    /// Next tag, or `None` on a clean end of stream.
    fn read_tag(&mut self) -> DicomResult<Option<Tag>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    let offset = self.position()?;
                    return Err(DicomError::Truncated {
                        tag: Tag(0, 0),
                        offset,
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(Some(Tag(self.u16_from(&buf[0..2]), self.u16_from(&buf[2..4]))))
    }

    fn unread_tag(&mut self) -> DicomResult<()> {
        self.reader.seek(SeekFrom::Current(-4))?;
        Ok(())
    }

    /// VR (explicit encodings only) and value length following `tag`.
    fn read_length(&mut self, tag: Tag) -> DicomResult<(Option<Vr>, u32)> {
        if tag.is_delimiter() || !self.explicit {
            let b = self.read_bytes(tag, 4)?;
            return Ok((None, self.u32_from(&b)));
        }
        let b = self.read_bytes(tag, 4)?;
        let vr = Vr([b[0], b[1]]);
        if vr.has_long_length() {
            let len = self.read_bytes(tag, 4)?;
            Ok((Some(vr), self.u32_from(&len)))
        } else {
            Ok((Some(vr), u32::from(self.u16_from(&b[2..4]))))
        }
    }

    /// Read exactly `len` bytes. The buffer grows with the data actually
    /// present, so a corrupt length cannot force a huge allocation.
    fn read_bytes(&mut self, tag: Tag, len: u32) -> DicomResult<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut *self.reader)
            .take(u64::from(len))
            .read_to_end(&mut buf)?;
        if buf.len() < len as usize {
            let offset = self.position()?;
            return Err(DicomError::Truncated { tag, offset });
        }
        Ok(buf)
    }

    fn skip(&mut self, len: u32) -> DicomResult<()> {
        self.reader.seek(SeekFrom::Current(i64::from(len)))?;
        Ok(())
    }

    /// Skip an undefined-length sequence (or encapsulated pixel data) through
    /// its sequence delimiter.
    fn skip_undefined(&mut self, owner: Tag, depth: usize) -> DicomResult<()> {
        if depth > MAX_SEQUENCE_DEPTH {
            let offset = self.position()?;
            return Err(DicomError::Malformed {
                tag: owner,
                offset,
                reason: "sequences nested too deeply".into(),
            });
        }
        loop {
            let tag = self.require_tag(owner)?;
            let (_, len) = self.read_length(tag)?;
            match tag {
                Tag::SEQUENCE_DELIMITATION => return Ok(()),
                Tag::ITEM if len == UNDEFINED_LENGTH => self.skip_item(owner, depth)?,
                Tag::ITEM => self.skip(len)?,
                other => {
                    let offset = self.position()?;
                    return Err(DicomError::Malformed {
                        tag: owner,
                        offset,
                        reason: format!("expected item, found {other}"),
                    });
                }
            }
        }
    }

    fn skip_item(&mut self, owner: Tag, depth: usize) -> DicomResult<()> {
        loop {
            let tag = self.require_tag(owner)?;
            let (_, len) = self.read_length(tag)?;
            if tag == Tag::ITEM_DELIMITATION {
                return Ok(());
            }
            if len == UNDEFINED_LENGTH {
                self.skip_undefined(tag, depth + 1)?;
            } else {
                self.skip(len)?;
            }
        }
    }

    fn require_tag(&mut self, owner: Tag) -> DicomResult<Tag> {
        match self.read_tag()? {
            Some(tag) => Ok(tag),
            None => {
                let offset = self.position()?;
                Err(DicomError::Truncated { tag: owner, offset })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DatasetBuilder;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn sample(ts: TransferSyntax) -> Vec<u8> {
        DatasetBuilder::new()
            .transfer_syntax(ts)
            .sop("1.2.840.10008.5.1.4.1.1.4", "1.2.3.4.100")
            .modality("MR")
            .study_description("Brain")
            .patient_name("Doe^Jane")
            .patient_id("SUBJ01")
            .study_uid("1.2.3")
            .series_uid("1.2.3.4")
            .series_number(3)
            .pixel_data(vec![0u8; 64])
            .build()
    }

    #[test]
    fn reads_identifiers_in_every_native_syntax() {
        for ts in [
            TransferSyntax::ImplicitVrLittleEndian,
            TransferSyntax::ExplicitVrLittleEndian,
            TransferSyntax::ExplicitVrBigEndian,
        ] {
            let data = sample(ts.clone());
            let header = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap();
            assert_eq!(header.transfer_syntax, ts);
            assert_eq!(header.get(Tag::SOP_INSTANCE_UID), Some("1.2.3.4.100"));
            assert_eq!(header.get(Tag::MODALITY), Some("MR"));
            assert_eq!(header.get(Tag::PATIENT_NAME), Some("Doe^Jane"));
            assert_eq!(header.get(Tag::STUDY_INSTANCE_UID), Some("1.2.3"));
            assert_eq!(header.get(Tag::SERIES_NUMBER), Some("3"));
            assert!(!header.complete);
        }
    }

    #[test]
    fn stop_tag_is_exclusive() {
        let data = sample(TransferSyntax::ExplicitVrLittleEndian);
        let header =
            read_header(&mut Cursor::new(data.as_slice()), Tag::MODALITY.next()).unwrap();
        assert_eq!(header.get(Tag::MODALITY), Some("MR"));
        assert_eq!(header.get(Tag::PATIENT_NAME), None);
        assert!(header.covers(Tag::MODALITY));
        assert!(!header.covers(Tag::PATIENT_NAME));
    }

    #[test]
    fn bounded_read_stays_short() {
        let data = sample(TransferSyntax::ExplicitVrLittleEndian);
        let short =
            read_header(&mut Cursor::new(data.as_slice()), Tag::SOP_INSTANCE_UID).unwrap();
        let long = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap();
        assert!(short.bytes_read < long.bytes_read);
        assert_eq!(short.get(Tag::SOP_CLASS_UID), Some("1.2.840.10008.5.1.4.1.1.4"));
        assert_eq!(short.get(Tag::SOP_INSTANCE_UID), None);
    }

    #[test]
    fn reading_past_the_end_marks_complete() {
        let data = DatasetBuilder::new().sop("1.2", "3.4").build();
        let header = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap();
        assert!(header.complete);
        assert!(header.covers(Tag(0x0099, 0x0001)));
    }

    #[test]
    fn undefined_length_sequence_is_skipped() {
        let data = DatasetBuilder::new()
            .sop("1.2", "3.4")
            .raw_undefined_sequence(Tag(0x0008, 0x1140), &[(Tag::MODALITY, "CT")])
            .patient_id("P-7")
            .build();
        let header = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap();
        assert_eq!(header.get(Tag::PATIENT_ID), Some("P-7"));
        // The nested modality must not leak to the top level.
        assert_eq!(header.get(Tag::MODALITY), None);
    }

    #[test]
    fn missing_magic_is_not_dicom() {
        let data = vec![0u8; 200];
        let err = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap_err();
        assert!(matches!(err, DicomError::NotDicom(_)));
        let err = read_header(&mut Cursor::new(&b"short"[..]), Tag::PIXEL_DATA).unwrap_err();
        assert!(matches!(err, DicomError::NotDicom(_)));
    }

    #[test]
    fn truncated_value_is_reported() {
        let mut data = sample(TransferSyntax::ExplicitVrLittleEndian);
        let header = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap();
        data.truncate(header.bytes_read as usize - 3);
        let err = read_header(&mut Cursor::new(data.as_slice()), Tag::PIXEL_DATA).unwrap_err();
        assert!(matches!(err, DicomError::Truncated { .. }));
    }

    proptest! {
        #[test]
        fn truncated_input_never_panics(cut in 0usize..400) {
            let data = sample(TransferSyntax::ExplicitVrLittleEndian);
            let cut = cut.min(data.len());
            let _ = read_header(&mut Cursor::new(&data[..cut]), Tag::PIXEL_DATA);
            let _ = read_dataset(&mut Cursor::new(&data[..cut]));
        }
    }

    #[test]
    fn raw_dataset_normalizes_big_endian() {
        let data = sample(TransferSyntax::ExplicitVrBigEndian);
        let dataset = read_dataset(&mut Cursor::new(data.as_slice())).unwrap();
        assert_eq!(dataset.meta_value(Tag::MEDIA_STORAGE_SOP_INSTANCE_UID), "1.2.3.4.100");
        assert!(dataset.elements.iter().any(|e| e.tag == Tag::PIXEL_DATA));
    }
}
