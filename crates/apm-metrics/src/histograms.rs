// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Latency distributions ("histograms").
//!
//! One HDR histogram per transaction name, plus the overall series keyed by
//! the empty name. Values are recorded in microseconds between 1µs and one
//! hour. On the wire a histogram travels as the base64 text of its
//! zlib-compressed HdrHistogram V2 encoding.

use crate::constants::{
    DEFAULT_HISTOGRAM_PRECISION, HISTOGRAM_HIGHEST_TRACKABLE, HISTOGRAM_LOWEST_DISCERNIBLE,
    MAX_HISTOGRAM_PRECISION, TAG_TRANSACTION_NAME,
};
use crate::errors::HistogramError;
use crate::tags::SortedTags;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{write::ZlibEncoder, Compression, Decompress, FlushDecompress, Status};
use fnv::FnvHasher;
use hashbrown::HashMap;
use hdrhistogram::serialization::{Serializer, V2Serializer};
use hdrhistogram::Histogram;
use std::hash::BuildHasherDefault;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::error;

/// Cookie of a compressed V2 HdrHistogram payload
const V2_COMPRESSED_COOKIE: u32 = 0x1c84_9304 | 0x10;

/// Tail of a sync flush: an empty stored block's LEN and NLEN
const SYNC_MARKER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

type HistogramMap = HashMap<String, HistogramEntry, BuildHasherDefault<FnvHasher>>;

/// Distribution of the latencies recorded for one transaction in a cycle
#[derive(Clone, Debug)]
pub struct HistogramEntry {
    pub name: String,
    pub tags: SortedTags,
    hist: Histogram<u64>,
}

impl HistogramEntry {
    fn new(name: &str, precision: u8) -> Result<Self, HistogramError> {
        let hist = Histogram::<u64>::new_with_bounds(
            HISTOGRAM_LOWEST_DISCERNIBLE,
            HISTOGRAM_HIGHEST_TRACKABLE,
            precision,
        )
        .map_err(|e| HistogramError::Creation(format!("{e:?}")))?;
        let tags = if name.is_empty() {
            SortedTags::new()
        } else {
            SortedTags::from_pairs([(TAG_TRANSACTION_NAME, name)])
        };
        Ok(Self {
            name: name.to_string(),
            tags,
            hist,
        })
    }

    fn record_micros(&mut self, value: u64) -> Result<(), HistogramError> {
        self.hist
            .record(value)
            .map_err(|_| HistogramError::Record { value })
    }

    #[must_use]
    pub fn histogram(&self) -> &Histogram<u64> {
        &self.hist
    }

    /// Number of samples recorded
    #[must_use]
    pub fn count(&self) -> u64 {
        self.hist.len()
    }

    /// Wire form of the distribution, see [`encode_compressed`].
    pub fn encode(&self) -> Result<String, HistogramError> {
        encode_compressed(&self.hist)
    }
}

/// Encodes a histogram as base64 text of its compressed V2 form:
/// `cookie(u32 BE) | length(u32 BE) | zlib(V2 payload)`.
pub fn encode_compressed(hist: &Histogram<u64>) -> Result<String, HistogramError> {
    let mut payload = Vec::new();
    V2Serializer::new()
        .serialize(hist, &mut payload)
        .map_err(|e| HistogramError::Serialize(format!("{e:?}")))?;

    let compressed = compress(&payload)?;
    let length = u32::try_from(compressed.len()).map_err(|_| {
        HistogramError::Serialize(format!(
            "compressed payload too large: {} bytes",
            compressed.len()
        ))
    })?;

    let mut framed = Vec::with_capacity(compressed.len() + 8);
    framed.extend_from_slice(&V2_COMPRESSED_COOKIE.to_be_bytes());
    framed.extend_from_slice(&length.to_be_bytes());
    framed.extend_from_slice(&compressed);
    Ok(STANDARD.encode(framed))
}

/// Compresses `payload` into a zlib stream laid out as the collector's
/// reference encoder writes it: one non-final data block, then an empty
/// final stored block (`1 00 <pad> 00 00 ff ff`), then the Adler-32 trailer.
///
/// A sync flush produces the same stream with the stored block marked
/// non-final. The header of that block starts somewhere in the last ten bits
/// before the marker, so each candidate bit is set in turn and the first
/// stream that inflates back to `payload` wins. If none does, the plainly
/// finished stream is returned; it is valid zlib, only framed differently.
fn compress(payload: &[u8]) -> Result<Vec<u8>, HistogramError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(payload)?;
    encoder.flush()?;
    let synced = encoder.get_ref().len();
    let finished = encoder.finish()?;

    // zlib header, the shortest possible data block and the marker
    if synced < 2 + 2 + SYNC_MARKER.len()
        || finished.len() < synced + 4
        || finished[synced - SYNC_MARKER.len()..synced] != SYNC_MARKER
    {
        return Ok(finished);
    }
    let trailer = &finished[finished.len() - 4..];

    let marker_bit = (synced - SYNC_MARKER.len()) * 8;
    for bit in (marker_bit - 10..=marker_bit - 3).rev() {
        let mut candidate = Vec::with_capacity(synced + 4);
        candidate.extend_from_slice(&finished[..synced]);
        candidate[bit / 8] |= 1 << (bit % 8);
        candidate.extend_from_slice(trailer);
        if inflates_to(&candidate, payload) {
            return Ok(candidate);
        }
    }
    Ok(finished)
}

/// True if `stream` is one complete zlib stream whose content is `payload`.
fn inflates_to(stream: &[u8], payload: &[u8]) -> bool {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(payload.len() + 64);
    matches!(
        inflater.decompress_vec(stream, &mut out, FlushDecompress::Finish),
        Ok(Status::StreamEnd)
    ) && inflater.total_in() == stream.len() as u64
        && out == payload
}

#[derive(Debug)]
pub struct HistogramTable {
    histograms: Mutex<HistogramMap>,
    precision: u8,
}

impl Default for HistogramTable {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_PRECISION)
    }
}

impl HistogramTable {
    #[must_use]
    pub fn new(precision: u8) -> Self {
        let precision = if precision > MAX_HISTOGRAM_PRECISION {
            error!(
                "histogram precision must be between 0 and 5: {precision}, using {DEFAULT_HISTOGRAM_PRECISION}"
            );
            DEFAULT_HISTOGRAM_PRECISION
        } else {
            precision
        };
        Self {
            histograms: Mutex::new(HistogramMap::default()),
            precision,
        }
    }

    #[must_use]
    pub fn precision(&self) -> u8 {
        self.precision
    }

    fn lock(&self) -> MutexGuard<'_, HistogramMap> {
        self.histograms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `duration` into the histogram for `name`, creating it on first
    /// use. The empty name is the overall series.
    ///
    /// A value beyond the trackable range is logged and dropped; it never
    /// reaches the caller and leaves the histogram untouched.
    pub fn record(&self, name: &str, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let mut histograms = self.lock();

        if !histograms.contains_key(name) {
            match HistogramEntry::new(name, self.precision) {
                Ok(entry) => {
                    histograms.insert(name.to_string(), entry);
                }
                Err(e) => {
                    error!("Failed to create histogram: {e}");
                    return;
                }
            }
        }

        if let Some(entry) = histograms.get_mut(name) {
            if let Err(e) = entry.record_micros(micros) {
                error!("Failed to record histogram: {e}");
            }
        }
    }

    /// Takes every histogram recorded so far and leaves the table empty.
    /// The order of the returned entries is unspecified.
    pub fn drain_and_clear(&self) -> Vec<HistogramEntry> {
        let drained = std::mem::take(&mut *self.lock());
        drained.into_values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn get(&self, name: &str) -> Option<HistogramEntry> {
        self.lock().get(name).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use flate2::read::ZlibDecoder;
    use std::io::Read;
    use tracing_test::traced_test;

    /// Decodes wire text back to the uncompressed V2 payload.
    pub(crate) fn inflate(encoded: &str) -> Vec<u8> {
        let framed = STANDARD.decode(encoded).expect("valid base64");
        assert_eq!(&framed[..4], &V2_COMPRESSED_COOKIE.to_be_bytes());
        let length = u32::from_be_bytes(framed[4..8].try_into().expect("length")) as usize;
        assert_eq!(framed.len(), length + 8);
        let mut payload = Vec::new();
        ZlibDecoder::new(&framed[8..])
            .read_to_end(&mut payload)
            .expect("valid zlib stream");
        payload
    }

    fn hex(bytes: &str) -> Vec<u8> {
        (0..bytes.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&bytes[i..i + 2], 16).expect("hex"))
            .collect()
    }

    fn precision_0() -> HistogramTable {
        HistogramTable::new(0)
    }

    #[test]
    fn test_record_overall_histogram_matches_reference_encoding() {
        let table = precision_0();
        table.record("", Duration::from_nanos(123));
        table.record("", Duration::from_nanos(1554));
        let h = table.get("").expect("overall histogram");
        assert!(h.tags.is_empty());
        assert_eq!(h.count(), 2);
        assert_eq!(
            h.encode().expect("encodable"),
            "HISTFAAAACR42pJpmSzMwMDAxIAKGEHEtclLGOw/QASYmAABAAD//1njBIo="
        );
    }

    #[test]
    fn test_record_named_histogram_matches_reference_encoding() {
        let table = precision_0();
        table.record("hist1", Duration::from_nanos(453_122));
        let h = table.get("hist1").expect("named histogram");
        assert_eq!(h.tags.get("TransactionName"), Some("hist1"));
        assert_eq!(
            h.encode().expect("encodable"),
            "HISTFAAAACR42pJpmSzMwMDAxIAKGEHEtclLGOw/QAQEmQABAAD//1oBBJk="
        );
    }

    #[test]
    fn test_reference_encodings_at_precision_3() {
        for (value, reference) in [
            (
                34_532_123,
                "HISTFAAAACh42pJpmSzMwMDAwgABzFCaEURcm7yEwf4DRGBnAxMTIAAA//9n9AXI",
            ),
            (
                39_023,
                "HISTFAAAACZ42pJpmSzMwMDAzAABMJoRRFybvITB/gNEoDWZCRAAAP//YTIFdA==",
            ),
        ] {
            let table = HistogramTable::new(3);
            table.record("t", Duration::from_micros(value));
            let h = table.get("t").expect("histogram");
            assert_eq!(h.encode().expect("encodable"), reference);
        }
    }

    #[test]
    fn test_golden_encoding_at_default_precision() {
        let table = HistogramTable::default();
        table.record("", Duration::from_micros(123));
        table.record("", Duration::from_micros(1554));
        let h = table.get("").expect("overall histogram");
        let encoded = h.encode().expect("encodable");
        assert_eq!(
            encoded,
            "HISTFAAAACp42pJpmSzMwMDAxgABTFCaEURcm7yEwf4DROArI1M3OxMgAAD//3RLBhg="
        );

        let expected = hex(concat!(
            "1c849313", // cookie
            "00000006", // payload length
            "00000000", // normalizing index offset
            "00000002", // significant figures
            "0000000000000001",
            "00000000d693a400",
            "3ff0000000000000",
            "f501028b0702",
        ));
        assert_eq!(inflate(&encoded), expected);
    }

    #[test]
    fn test_stream_ends_with_final_stored_block() {
        let table = HistogramTable::default();
        table.record("", Duration::from_micros(42));
        let framed = STANDARD
            .decode(table.get("").expect("histogram").encode().expect("encodable"))
            .expect("valid base64");
        // empty stored block LEN/NLEN, then the Adler-32 trailer
        assert_eq!(&framed[framed.len() - 8..framed.len() - 4], &SYNC_MARKER);

        let mut payload = Vec::new();
        V2Serializer::new()
            .serialize(table.get("").expect("histogram").histogram(), &mut payload)
            .expect("serializable");
        assert!(inflates_to(&framed[8..], &payload));
        assert!(!inflates_to(&framed[8..framed.len() - 4], &payload));
    }

    #[traced_test]
    #[test]
    fn test_out_of_range_value_is_logged_and_ignored() {
        let table = HistogramTable::default();
        table.record("hist2", Duration::from_micros(39_023));
        table.record("hist2", Duration::from_nanos(4_531_224_545_454_563));
        assert!(logs_contain("Failed to record histogram: value to large"));

        let h = table.get("hist2").expect("histogram kept");
        assert_eq!(h.count(), 1);
        assert!(h.encode().is_ok());
    }

    #[test]
    fn test_sample_count_excludes_only_out_of_range_values() {
        let table = HistogramTable::default();
        let durations = [
            Duration::from_micros(1),
            Duration::from_secs(3600),
            Duration::from_secs(10 * 3600),
            Duration::from_millis(250),
            Duration::MAX,
            Duration::ZERO,
        ];
        for d in durations {
            table.record("", d);
        }
        assert_eq!(table.get("").expect("histogram").count(), 4);
    }

    #[traced_test]
    #[test]
    fn test_invalid_precision_falls_back_to_default() {
        let table = HistogramTable::new(9);
        assert_eq!(table.precision(), DEFAULT_HISTOGRAM_PRECISION);
        assert!(logs_contain("histogram precision must be between 0 and 5"));
    }

    #[test]
    fn test_drain_and_clear() {
        let table = HistogramTable::default();
        table.record("", Duration::from_micros(5));
        table.record("a", Duration::from_micros(5));
        let drained = table.drain_and_clear();
        assert_eq!(drained.len(), 2);
        assert!(table.drain_and_clear().is_empty());
        assert!(table.is_empty());
    }
}
