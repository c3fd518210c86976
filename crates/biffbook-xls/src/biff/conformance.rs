//! Structural checks on a substream before its records are interpreted.
//!
//! A substream must be bracketed by BOF/EOF, contain its mandatory
//! records, hold singular records at most once, and keep the records that
//! belong to a FORMULA (SHRFMLA, ARRAY, TABLE, STRING) directly behind it.
//! In a worksheet, no cell record may come before DIMENSION.

use super::records::{self, *};
use super::{BiffRecord, Substream};
use crate::error::{XlsError, XlsResult};

/// Occurrence rules for one substream type
#[derive(Debug, Clone, Copy)]
pub struct SubstreamRules {
    /// Must appear exactly once
    pub mandatory_singular: &'static [u16],
    /// Must appear at least once
    pub mandatory_repeatable: &'static [u16],
    /// May appear at most once
    pub optional_singular: &'static [u16],
}

const GLOBALS: SubstreamRules = SubstreamRules {
    mandatory_singular: &[],
    mandatory_repeatable: &[BOUNDSHEET],
    optional_singular: &[
        CODEPAGE,
        DATEMODE,
        SST,
        EXTSST,
        EXTERNSHEET,
        INTERFACEHDR,
        COUNTRY,
    ],
};

const WORKSHEET: SubstreamRules = SubstreamRules {
    mandatory_singular: &[DIMENSION],
    mandatory_repeatable: &[],
    optional_singular: &[WINDOW2, DEFCOLWIDTH, DEFAULTROWHEIGHT],
};

const OPAQUE: SubstreamRules = SubstreamRules {
    mandatory_singular: &[],
    mandatory_repeatable: &[],
    optional_singular: &[],
};

/// Rules for a substream type (`records::BOF_*`)
pub fn rules_for(kind: u16) -> SubstreamRules {
    match kind {
        BOF_WORKBOOK_GLOBALS => GLOBALS,
        BOF_WORKSHEET => WORKSHEET,
        _ => OPAQUE,
    }
}

/// Check a substream against the bracketing, occurrence and ordering rules
pub fn verify_substream(stream: &Substream) -> XlsResult<()> {
    let first = stream.records.first().ok_or_else(|| {
        XlsError::malformed(BOF, stream.offset, "empty substream")
    })?;
    if first.record_type != BOF {
        return Err(first.malformed("substream does not start with BOF"));
    }
    let last = stream.records.last().unwrap_or(first);
    if stream.records.len() < 2 || last.record_type != EOF {
        return Err(last.malformed("substream is not terminated by EOF"));
    }

    let rules = rules_for(stream.kind);
    let is_worksheet = stream.kind == BOF_WORKSHEET;
    let mut counts: Vec<(u16, usize)> = Vec::new();
    let mut previous: Option<u16> = None;
    let mut seen_dimension = false;
    let mut depth = 0usize;

    for rec in stream.body() {
        // Embedded substreams follow their own rules
        match rec.record_type {
            BOF => {
                depth += 1;
                continue;
            }
            EOF if depth > 0 => {
                depth -= 1;
                continue;
            }
            _ if depth > 0 => continue,
            _ => {}
        }

        check_attachment(rec, previous)?;

        if is_worksheet {
            if rec.record_type == DIMENSION {
                seen_dimension = true;
            } else if !seen_dimension
                && (records::is_cell_record(rec.record_type) || rec.record_type == ROW)
            {
                return Err(rec.malformed("cell record before DIMENSION"));
            }
        }

        let singular = rules.mandatory_singular.contains(&rec.record_type)
            || rules.optional_singular.contains(&rec.record_type);
        match counts.iter_mut().find(|(t, _)| *t == rec.record_type) {
            Some((_, n)) => {
                *n += 1;
                if singular {
                    return Err(rec.malformed("record may appear only once per substream"));
                }
            }
            None => counts.push((rec.record_type, 1)),
        }

        previous = Some(rec.record_type);
    }

    if depth > 0 {
        return Err(last.malformed("embedded substream is not terminated by EOF"));
    }

    let present = |t: &u16| counts.iter().any(|(c, _)| c == t);
    if let Some(missing) = rules
        .mandatory_singular
        .iter()
        .chain(rules.mandatory_repeatable)
        .find(|t| !present(t))
    {
        return Err(XlsError::malformed(
            *missing,
            stream.offset,
            "mandatory record missing from substream",
        ));
    }

    Ok(())
}

/// SHRFMLA/ARRAY/TABLE follow a FORMULA; STRING follows a FORMULA or one of those
fn check_attachment(rec: &BiffRecord, previous: Option<u16>) -> XlsResult<()> {
    let ok = match rec.record_type {
        SHRFMLA | ARRAY | TABLE => previous == Some(FORMULA),
        STRING => matches!(previous, Some(FORMULA | SHRFMLA | ARRAY | TABLE)),
        _ => return Ok(()),
    };
    if ok {
        Ok(())
    } else {
        Err(rec.malformed("record must directly follow a FORMULA record"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn substream(kind: u16, body: &[u16]) -> Substream {
        let mut records = vec![BiffRecord::new(BOF, vec![])];
        records.extend(body.iter().map(|&t| BiffRecord::new(t, vec![])));
        records.push(BiffRecord::new(EOF, vec![]));
        Substream {
            version: BIFF8_VERSION,
            kind,
            offset: 0,
            records,
        }
    }

    fn rejected_type(stream: &Substream) -> Option<u16> {
        match verify_substream(stream) {
            Err(XlsError::Malformed { record_type, .. }) => Some(record_type),
            _ => None,
        }
    }

    #[test]
    fn test_well_formed_worksheet() {
        let s = substream(
            BOF_WORKSHEET,
            &[DIMENSION, ROW, FORMULA, SHRFMLA, STRING, NUMBER, FORMULA, ARRAY, WINDOW2],
        );
        assert!(verify_substream(&s).is_ok());
    }

    #[test]
    fn test_string_without_formula_is_rejected() {
        let s = substream(BOF_WORKSHEET, &[DIMENSION, NUMBER, STRING]);
        assert_eq!(rejected_type(&s), Some(STRING));
    }

    #[test]
    fn test_shared_formula_must_follow_formula() {
        let s = substream(BOF_WORKSHEET, &[DIMENSION, FORMULA, STRING, SHRFMLA]);
        assert_eq!(rejected_type(&s), Some(SHRFMLA));
    }

    #[test]
    fn test_cell_before_dimension_is_rejected() {
        let s = substream(BOF_WORKSHEET, &[NUMBER, DIMENSION]);
        assert_eq!(rejected_type(&s), Some(NUMBER));
    }

    #[test]
    fn test_missing_mandatory_record() {
        let s = substream(BOF_WORKSHEET, &[WINDOW2]);
        assert_eq!(rejected_type(&s), Some(DIMENSION));

        let g = substream(BOF_WORKBOOK_GLOBALS, &[CODEPAGE]);
        assert_eq!(rejected_type(&g), Some(BOUNDSHEET));
    }

    #[test]
    fn test_duplicate_singular_record() {
        let s = substream(BOF_WORKBOOK_GLOBALS, &[CODEPAGE, BOUNDSHEET, CODEPAGE]);
        assert_eq!(rejected_type(&s), Some(CODEPAGE));
    }

    #[test]
    fn test_missing_eof() {
        let mut s = substream(BOF_WORKSHEET, &[DIMENSION]);
        s.records.pop();
        assert_eq!(rejected_type(&s), Some(DIMENSION));
    }

    #[test]
    fn test_embedded_chart_is_skipped() {
        let s = substream(BOF_WORKSHEET, &[DIMENSION, BOF, STRING, EOF, NUMBER]);
        assert!(verify_substream(&s).is_ok());
    }
}
