//! Byte-level encoding detection for subtitle files.
//!
//! Subtitles in the wild arrive as UTF-8, UTF-16 with a BOM, or one of the
//! regional 8-bit code pages. Detection runs on a bounded sample; the full
//! file is then decoded with the first candidate that produces clean text.

use chardetng::EncodingDetector;
use encoding_rs::{
    Encoding, GBK, ISO_8859_2, SHIFT_JIS, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1251, WINDOWS_1252,
};
use tracing::debug;

/// Bytes inspected by the detector.
pub const SAMPLE_LIMIT: usize = 32 * 1024;

/// Confidence reported for a statistical guess on legacy 8-bit input.
const STATISTICAL_CONFIDENCE: f32 = 0.5;

/// Tried in order when the detector is unsure.
const LEGACY_CANDIDATES: &[&Encoding] = &[WINDOWS_1252, ISO_8859_2, WINDOWS_1251, SHIFT_JIS, GBK];

#[derive(Debug, Clone, Copy)]
pub struct EncodingGuess {
    pub encoding: &'static Encoding,
    pub confidence: f32,
}

impl EncodingGuess {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    /// Nothing decoded cleanly; `text` is lossy UTF-8.
    pub uncertain: bool,
}

/// Guess the encoding of a file from its first `SAMPLE_LIMIT` bytes.
pub fn detect(bytes: &[u8]) -> EncodingGuess {
    let sample = &bytes[..bytes.len().min(SAMPLE_LIMIT)];
    let truncated = sample.len() < bytes.len();

    if let Some((encoding, _)) = Encoding::for_bom(sample) {
        return EncodingGuess {
            encoding,
            confidence: 1.0,
        };
    }
    if sample.is_ascii() {
        return EncodingGuess {
            encoding: UTF_8,
            confidence: 1.0,
        };
    }
    if is_utf8_prefix(sample, truncated) {
        return EncodingGuess {
            encoding: UTF_8,
            confidence: 0.99,
        };
    }
    if let Some(encoding) = utf16_from_nul_pattern(sample) {
        return EncodingGuess {
            encoding,
            confidence: 0.9,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, !truncated);
    EncodingGuess {
        encoding: detector.guess(None, true),
        confidence: STATISTICAL_CONFIDENCE,
    }
}

/// Decode a whole file. A confident guess is used directly; otherwise the
/// candidates are tried in order and the first clean decode wins. When
/// nothing is clean the result is lossy UTF-8 flagged as uncertain.
pub fn decode(bytes: &[u8], threshold: f32) -> DecodedText {
    let guess = detect(bytes);
    debug!(
        "Encoding guess: {} (confidence {:.2})",
        guess.name(),
        guess.confidence
    );

    if guess.confidence >= threshold {
        if let Some(text) = decode_clean(guess.encoding, bytes) {
            return DecodedText {
                text,
                encoding: guess.encoding,
                uncertain: false,
            };
        }
    }

    for encoding in candidates(guess, bytes) {
        if let Some(text) = decode_clean(encoding, bytes) {
            return DecodedText {
                text,
                encoding,
                uncertain: false,
            };
        }
    }

    let (text, _, _) = UTF_8.decode(bytes);
    DecodedText {
        text: text.into_owned(),
        encoding: UTF_8,
        uncertain: true,
    }
}

fn candidates(guess: EncodingGuess, bytes: &[u8]) -> Vec<&'static Encoding> {
    let mut list = vec![guess.encoding, UTF_8];
    // Nearly any even-length input decodes as UTF-16, so only try it on a hint.
    let sample = &bytes[..bytes.len().min(SAMPLE_LIMIT)];
    if Encoding::for_bom(sample).is_some() || utf16_from_nul_pattern(sample).is_some() {
        list.extend([UTF_16LE, UTF_16BE]);
    }
    list.extend(LEGACY_CANDIDATES.iter().copied());

    let mut unique: Vec<&'static Encoding> = Vec::with_capacity(list.len());
    for encoding in list {
        if !unique.contains(&encoding) {
            unique.push(encoding);
        }
    }
    unique
}

/// Decode without replacement; reject output carrying control characters,
/// which is what binary junk or a wrong code page turns into.
fn decode_clean(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    let body = match Encoding::for_bom(bytes) {
        Some((bom_encoding, len)) if bom_encoding == encoding => &bytes[len..],
        Some(_) => return None,
        None => bytes,
    };
    let text = encoding.decode_without_bom_handling_and_without_replacement(body)?;
    let clean = !text
        .chars()
        .any(|c| c == '\u{fffd}' || (c.is_control() && !matches!(c, '\t' | '\n' | '\r')));
    clean.then(|| text.into_owned())
}

fn is_utf8_prefix(sample: &[u8], truncated: bool) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        // A sample cut mid-character is still UTF-8.
        Err(e) => truncated && e.error_len().is_none(),
    }
}

/// UTF-16 text without a BOM shows NUL bytes on one side of each pair.
fn utf16_from_nul_pattern(sample: &[u8]) -> Option<&'static Encoding> {
    let pairs = sample.len() / 2;
    if pairs < 4 {
        return None;
    }
    let even_nuls = sample.iter().step_by(2).filter(|b| **b == 0).count();
    let odd_nuls = sample.iter().skip(1).step_by(2).filter(|b| **b == 0).count();

    if odd_nuls * 2 > pairs && even_nuls * 10 < pairs {
        Some(UTF_16LE)
    } else if even_nuls * 2 > pairs && odd_nuls * 10 < pairs {
        Some(UTF_16BE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le_with_bom(text: &str) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_ascii_is_confident_utf8() {
        let guess = detect(b"1\n00:00:01,000 --> 00:00:02,000\nhello\n");
        assert_eq!(guess.encoding, UTF_8);
        assert_eq!(guess.confidence, 1.0);
    }

    #[test]
    fn test_utf8_with_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("Grüße".as_bytes());
        let decoded = decode(&bytes, 0.8);

        assert_eq!(decoded.encoding, UTF_8);
        assert_eq!(decoded.text, "Grüße");
        assert!(!decoded.uncertain);
    }

    #[test]
    fn test_utf16le_with_bom() {
        let bytes = utf16le_with_bom("this is a tool\n");
        let decoded = decode(&bytes, 0.8);

        assert_eq!(decoded.encoding, UTF_16LE);
        assert_eq!(decoded.text, "this is a tool\n");
    }

    #[test]
    fn test_utf16le_without_bom() {
        let bytes = utf16le_with_bom("00:00:01,000 --> 00:00:02,000\n");
        let decoded = decode(&bytes[2..], 0.8);
        assert_eq!(decoded.encoding, UTF_16LE);
        assert!(decoded.text.starts_with("00:00:01,000"));
    }

    #[test]
    fn test_legacy_8bit_falls_back() {
        // "café au lait" in a Latin code page
        let bytes = b"caf\xe9 au lait\n";
        let decoded = decode(bytes, 0.8);

        assert!(!decoded.uncertain);
        assert_eq!(decoded.text, "café au lait\n");
    }

    #[test]
    fn test_binary_junk_is_uncertain() {
        let bytes = [0x01, 0x02, 0x03, 0x80, b'a', b'b', 0x04];
        let decoded = decode(&bytes, 0.8);

        assert!(decoded.uncertain);
        assert_eq!(decoded.encoding, UTF_8);
        assert!(decoded.text.contains("ab"));
    }

    #[test]
    fn test_detect_only_reads_sample() {
        let mut bytes = vec![b'a'; SAMPLE_LIMIT];
        bytes.extend_from_slice(&[0xFF, 0x00, 0x01]);
        let guess = detect(&bytes);
        assert_eq!(guess.encoding, UTF_8);
        assert_eq!(guess.confidence, 1.0);
    }
}
