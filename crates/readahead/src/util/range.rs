use crate::{ReadaheadError, ReadaheadResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: Option<u64>) -> Self {
        Self { offset, length }
    }

    /// Parses a single `first-last` byte-range-spec (IETF RFC 7233, 2.1) as used by
    /// `@mediaRange` and `@range`. The last byte position may be omitted.
    pub fn parse(s: &str) -> ReadaheadResult<Self> {
        let invalid = || ReadaheadError::MpdParsing(format!("Invalid byte range: {s}"));

        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let offset = start.parse::<u64>().map_err(|_| invalid())?;
        let last = match end {
            "" => None,
            end => Some(end.parse::<u64>().map_err(|_| invalid())?),
        };
        if last.is_some_and(|last| last < offset) {
            return Err(invalid());
        }

        // 0-500 means 501 bytes
        let length = match last {
            Some(last) => Some((last - offset).checked_add(1).ok_or_else(invalid)?),
            None => None,
        };
        Ok(Self { offset, length })
    }

    /// Position of the last byte. `None` for open-ended and empty ranges.
    pub fn last_byte(&self) -> Option<u64> {
        let length = self.length?.checked_sub(1)?;
        Some(self.offset.saturating_add(length))
    }

    pub fn to_http_range(&self) -> String {
        match self.last_byte() {
            Some(last) => format!("bytes={}-{last}", self.offset),
            None => format!("bytes={}-", self.offset),
        }
    }
}
