use chrono::{DateTime, Utc};

/// Two byte marker opening every AIS sentence.
pub const SENTENCE_START: &[u8; 2] = b"!A";
/// Marker preceding the two checksum characters that close a sentence.
pub const CHECKSUM_MARKER: u8 = b'*';
const CHECKSUM_LEN: usize = 2;

/// Timestamp layout used in data files, UTC with millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Lazily yields every sentence found in one received datagram.
///
/// A sentence runs from [`SENTENCE_START`] through the two bytes after the
/// next [`CHECKSUM_MARKER`]. A candidate that meets another start marker
/// before its checksum is dropped, as is one cut off by the end of the
/// buffer. Checksums are not verified.
pub fn sentences(chunk: &[u8]) -> Sentences<'_> {
    Sentences {
        chunk,
        pos: 0,
        state: ScanState::SeekingStart,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    SeekingStart,
    SeekingEnd { start: usize },
}

#[derive(Debug, Clone)]
pub struct Sentences<'a> {
    chunk: &'a [u8],
    pos: usize,
    state: ScanState,
}

impl Sentences<'_> {
    fn starts_at(&self, pos: usize) -> bool {
        self.chunk[pos..].starts_with(SENTENCE_START)
    }
}

impl<'a> Iterator for Sentences<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.chunk.len() {
            match self.state {
                ScanState::SeekingStart => {
                    if self.starts_at(self.pos) {
                        self.state = ScanState::SeekingEnd { start: self.pos };
                        self.pos += SENTENCE_START.len();
                    } else {
                        self.pos += 1;
                    }
                }
                ScanState::SeekingEnd { start } => {
                    if self.chunk[self.pos] == CHECKSUM_MARKER {
                        let end = self.pos + 1 + CHECKSUM_LEN;
                        if end > self.chunk.len() {
                            break;
                        }
                        self.pos = end;
                        self.state = ScanState::SeekingStart;
                        return Some(&self.chunk[start..end]);
                    } else if self.starts_at(self.pos) {
                        // abandon the open candidate, restart on the new sentinel
                        self.state = ScanState::SeekingEnd { start: self.pos };
                        self.pos += SENTENCE_START.len();
                    } else {
                        self.pos += 1;
                    }
                }
            }
        }

        // whatever candidate is still open has no checksum in this datagram
        self.pos = self.chunk.len();
        self.state = ScanState::SeekingStart;
        None
    }
}

/// Builds one data file row: `<ts>,AIS,"UDP port:<port>","<sentence>"` + CRLF.
pub fn format_record(received_at: DateTime<Utc>, port: u16, sentence: &[u8]) -> Vec<u8> {
    let prefix = format!(
        "{},AIS,\"UDP port:{port}\",\"",
        format_timestamp(received_at)
    );
    [prefix.as_bytes(), sentence, b"\"\r\n"].concat()
}

/// Formats every sentence of a datagram into a single buffer of rows, all
/// stamped by `clock` at extraction time.
pub fn process_complete_chunk(
    chunk: &[u8],
    port: u16,
    mut clock: impl FnMut() -> DateTime<Utc>,
) -> (Vec<u8>, usize) {
    let mut out = Vec::new();
    let mut count = 0;
    for sentence in sentences(chunk) {
        out.extend_from_slice(&format_record(clock(), port, sentence));
        count += 1;
    }
    (out, count)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn collect(chunk: &[u8]) -> Vec<&[u8]> {
        sentences(chunk).collect()
    }

    #[test]
    fn single_sentence_surrounded_by_noise() {
        let chunk = b"\x00\x01junk!AIVDM,1,1,,B,abc,0*1A\r\nmore junk";
        assert_eq!(collect(chunk), vec![&b"!AIVDM,1,1,,B,abc,0*1A"[..]]);
    }

    #[test]
    fn back_to_back_sentences() {
        let chunk = b"!AIVDM,1,1,,A,x,0*11!AIVDO,1,1,,B,y,0*22\r\n";
        assert_eq!(
            collect(chunk),
            vec![&b"!AIVDM,1,1,,A,x,0*11"[..], &b"!AIVDO,1,1,,B,y,0*22"[..]]
        );
    }

    #[test]
    fn candidate_without_checksum_is_dropped_on_new_sentinel() {
        let chunk = b"!AIVDM,broken,no,checksum!AIVDM,1,1,,B,ok,0*3C";
        assert_eq!(collect(chunk), vec![&b"!AIVDM,1,1,,B,ok,0*3C"[..]]);
    }

    #[test]
    fn trailing_open_sentence_is_dropped() {
        let chunk = b"!AIVDM,1,1,,B,ok,0*3C\r\n!AIVDM,1,2,3,A,cut";
        assert_eq!(collect(chunk), vec![&b"!AIVDM,1,1,,B,ok,0*3C"[..]]);
    }

    #[test]
    fn checksum_cut_short_is_dropped() {
        assert!(collect(b"!AIVDM,1,1,,B,ok,0*3").is_empty());
        assert!(collect(b"!AIVDM,1,1,,B,ok,0*").is_empty());
    }

    #[test]
    fn lone_checksum_marker_is_ignored() {
        let chunk = b"$GPGGA,stuff*5E\r\n!AIVDM,1,1,,A,z,0*00";
        assert_eq!(collect(chunk), vec![&b"!AIVDM,1,1,,A,z,0*00"[..]]);
    }

    #[test]
    fn bang_without_a_is_not_a_sentinel() {
        let chunk = b"!AIVDM,1,1,,A,!x,0*4F";
        assert_eq!(collect(chunk), vec![&chunk[..]]);
    }

    #[test]
    fn empty_and_tiny_buffers() {
        assert!(collect(b"").is_empty());
        assert!(collect(b"!").is_empty());
        assert!(collect(b"!A").is_empty());
        assert_eq!(collect(b"!A*00"), vec![&b"!A*00"[..]]);
    }

    #[test]
    fn exhausted_scanner_stays_exhausted() {
        let mut it = sentences(b"!AIVDM*00");
        assert!(it.next().is_some());
        assert!(it.next().is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn record_matches_data_file_layout() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
            + chrono::Duration::milliseconds(123);
        let row = format_record(at, 10110, b"!AIVDM,1,1,,B,abc,0*1A");
        assert_eq!(
            row,
            b"2024-05-01T00:00:00.123Z,AIS,\"UDP port:10110\",\"!AIVDM,1,1,,B,abc,0*1A\"\r\n"
        );
    }

    #[test]
    fn chunk_produces_one_row_per_sentence() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let (rows, count) =
            process_complete_chunk(b"!AIVDM,a*01 !AIVDM,b*02 !AIVDM,c", 2000, || at);
        assert_eq!(count, 2);
        let text = String::from_utf8(rows).unwrap();
        assert_eq!(
            text,
            "2024-05-01T12:30:00.000Z,AIS,\"UDP port:2000\",\"!AIVDM,a*01\"\r\n\
             2024-05-01T12:30:00.000Z,AIS,\"UDP port:2000\",\"!AIVDM,b*02\"\r\n"
        );
    }
}
