//! OLE2 (Compound File Binary) container access.
//!
//! An .xls file is a CFB container whose `Workbook` stream holds the BIFF8
//! records. Older BIFF5 files name the stream `Book`; those are detected so
//! the caller gets a version error instead of a missing-stream one.

use std::io::{Cursor, Read, Seek, Write};

use crate::error::{XlsError, XlsResult};

/// Stream holding the BIFF8 workbook
pub const WORKBOOK_STREAM: &str = "/Workbook";
const BIFF5_STREAM: &str = "/Book";

/// Read the bytes of the workbook stream
pub fn read_workbook_stream<R: Read + Seek>(reader: R) -> XlsResult<Vec<u8>> {
    let mut cfb = cfb::CompoundFile::open(reader)?;

    if !cfb.exists(WORKBOOK_STREAM) {
        if cfb.exists(BIFF5_STREAM) {
            return Err(XlsError::UnsupportedVersion(
                "BIFF5 workbook (Book stream)".into(),
            ));
        }
        return Err(XlsError::InvalidFormat(
            "no Workbook stream found in CFB".into(),
        ));
    }

    let mut data = Vec::new();
    let mut stream = cfb.open_stream(WORKBOOK_STREAM)?;
    stream.read_to_end(&mut data)?;
    log::debug!("read {} byte workbook stream", data.len());
    Ok(data)
}

/// Write a new container holding only the workbook stream
pub fn write_workbook_stream<W: Read + Write + Seek>(writer: W, data: &[u8]) -> XlsResult<W> {
    let mut cfb = cfb::CompoundFile::create(writer)?;
    {
        let mut stream = cfb.create_stream(WORKBOOK_STREAM)?;
        stream.write_all(data)?;
    }
    cfb.flush()?;
    Ok(cfb.into_inner())
}

/// A complete .xls file image in memory
pub fn workbook_file_bytes(data: &[u8]) -> XlsResult<Vec<u8>> {
    Ok(write_workbook_stream(Cursor::new(Vec::new()), data)?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stream_round_trip() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let file = workbook_file_bytes(&data).unwrap();
        assert_eq!(read_workbook_stream(Cursor::new(file)).unwrap(), data);
    }

    #[test]
    fn test_container_without_workbook_stream() {
        let mut cfb = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        cfb.create_stream("WordDocument").unwrap();
        let bytes = cfb.into_inner().into_inner();
        assert!(matches!(
            read_workbook_stream(Cursor::new(bytes)),
            Err(XlsError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_not_a_container() {
        assert!(read_workbook_stream(Cursor::new(vec![0u8; 64])).is_err());
    }
}
