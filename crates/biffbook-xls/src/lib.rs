//! # biffbook-xls
//!
//! BIFF8 (.xls) record layer for biffbook.
//!
//! This crate handles the binary side of the format and nothing above it:
//! - Reading and writing the record stream, CONTINUE records included
//! - Checking that each substream is bracketed and ordered correctly
//! - Encoding and decoding formula tokens (`rgce`)
//! - Typed records for formulas, names, links and cells
//! - The OLE2 container the stream lives in

pub mod biff;
pub mod container;
pub mod error;

pub use biff::{read_all_records, split_substreams, write_records, BiffRecord, Substream};
pub use container::{read_workbook_stream, write_workbook_stream};
pub use error::{XlsError, XlsResult};
