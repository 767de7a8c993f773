//! Bounded DICOM header reading for the prearchive.
//!
//! Only a configurable prefix of each object is ever decoded: enough to
//! apply inclusion filters and derive routing identifiers. Pixel data is
//! never touched.
//!
//! # Modules
//!
//! - [`tag`] / [`vr`]: attribute tags and value representations
//! - [`header`]: bounded header reader ([`read_header`])
//! - [`object`]: full header parse with identity checks ([`parse_object`])
//! - [`filter`]: the [`ImportFilter`] trait and the regex [`TagFilter`]
//! - [`identity`]: project/subject/session derivation
//! - [`progressive`]: site + project filtering with rewind-and-reread
//! - [`transfer`]: transfer syntaxes and the [`Transcoder`] seam
//! - [`builder`]: Part 10 encoding and [`DatasetBuilder`]

pub mod builder;
pub mod error;
pub mod filter;
pub mod header;
pub mod identity;
pub mod object;
pub mod progressive;
pub mod tag;
pub mod transfer;
pub mod vr;

pub use builder::{encode_part10, DatasetBuilder, Element, FileMeta};
pub use error::{DicomError, DicomResult};
pub use filter::{FilterConfig, FilterMode, ImportFilter, RuleConfig, TagFilter};
pub use header::{read_dataset, read_header, DicomHeader, RawDataset};
pub use identity::{IdentifierRules, RoutingIdentifiers};
pub use object::{parse_object, ObjectInfo};
pub use progressive::{FilterOutcome, ProgressiveFilter};
pub use tag::Tag;
pub use transfer::{NativeTranscoder, Transcoder, TransferSyntax};
pub use vr::Vr;
