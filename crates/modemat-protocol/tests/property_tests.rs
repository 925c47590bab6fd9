//! Property-based tests for stop-tag matching and field decoding.
//!
//! The transport may split a response anywhere, so every property here is
//! checked against arbitrary chunkings of the same byte stream.

mod common;

use modemat_protocol::{StopTagSet, TagKind};
use proptest::prelude::*;

/// Strategy for printable row content without line terminators or quotes.
fn row_text() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 +:.,()-]{0,40}")
        .expect("Failed to create row text regex strategy")
}

/// Strategy for chunk sizes used to split a stream.
fn chunk_size() -> impl Strategy<Value = usize> {
    1usize..=16
}

/// Feed `stream` byte by byte, tracking line starts; return the hits.
fn scan(set: &mut StopTagSet, stream: &[u8]) -> Vec<(usize, TagKind)> {
    let mut hits = Vec::new();
    let mut line_start = true;
    for (i, &byte) in stream.iter().enumerate() {
        if let Some((kind, _)) = set.feed(byte, line_start) {
            hits.push((i, kind));
        }
        line_start = byte == b'\n';
    }
    hits
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

proptest! {
    /// Property: rows that do not start with a result code never terminate
    /// the response; the trailing `OK` always does.
    #[test]
    fn prop_ok_only_at_line_start(rows in prop::collection::vec(row_text(), 0..6)) {
        let mut stream = String::new();
        for row in &rows {
            stream.push_str("+ROW: ");
            stream.push_str(row);
            stream.push_str("\r\n");
        }
        stream.push_str("OK\r\n");

        let mut set = StopTagSet::response(None);
        let hits = scan(&mut set, stream.as_bytes());
        prop_assert_eq!(hits, vec![(stream.len() - 1, TagKind::Ok)]);
    }

    /// Property: the result of matching does not depend on how the stream
    /// is split between refills.
    #[test]
    fn prop_chunking_invariant(rows in prop::collection::vec(row_text(), 0..4), size in chunk_size()) {
        let mut stream = Vec::new();
        for row in &rows {
            stream.extend_from_slice(row.as_bytes());
            stream.extend_from_slice(b"\r\n");
        }
        stream.extend_from_slice(b"+CME ERROR: 3\r\n");

        let mut whole = StopTagSet::response(None);
        let expected = scan(&mut whole, &stream);

        let mut split = StopTagSet::response(None);
        let mut hits = Vec::new();
        let mut line_start = true;
        let mut offset = 0;
        for chunk in stream.chunks(size) {
            for (i, &byte) in chunk.iter().enumerate() {
                if let Some((kind, _)) = split.feed(byte, line_start) {
                    hits.push((offset + i, kind));
                }
                line_start = byte == b'\n';
            }
            offset += chunk.len();
        }
        prop_assert_eq!(hits, expected);
    }

    /// Property: a hex field read from a chunked response decodes back to
    /// the original bytes.
    #[test]
    fn prop_hex_field_decodes(data in prop::collection::vec(any::<u8>(), 0..24), size in chunk_size()) {
        let (handler, modem) = common::handler();
        let reply = format!("+CRSM: 144,0,\"{}\"\r\nOK\r\n", hex(&data));
        let chunks: Vec<Vec<u8>> = reply.as_bytes().chunks(size).map(<[u8]>::to_vec).collect();
        modem.push_chunks(chunks);

        let mut at = handler.lock();
        at.resp_start(Some("+CRSM:"));
        at.skip_param(2);
        let decoded = at.read_hex_string(data.len());
        at.resp_stop();
        prop_assert_eq!(at.unlock(), Ok(()));
        prop_assert_eq!(decoded, Some(data));
    }

    /// Property: a field longer than the read limit is truncated and the
    /// next field is still read correctly.
    #[test]
    fn prop_truncated_field_keeps_alignment(
        field in "[a-z0-9]{1,40}",
        limit in 1usize..48,
        next in 0i32..100_000,
    ) {
        let (handler, modem) = common::handler();
        modem.push(format!("+X: {field},{next}\r\nOK\r\n"));

        let mut at = handler.lock();
        at.resp_start(Some("+X:"));
        let read = at.read_string(limit);
        let value = at.read_int();
        at.resp_stop();
        prop_assert_eq!(at.unlock(), Ok(()));

        let expected: String = field.chars().take(limit).collect();
        prop_assert_eq!(read, Some(expected));
        prop_assert_eq!(value, Some(next));
    }
}
