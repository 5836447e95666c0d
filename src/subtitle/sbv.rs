// YouTube SBV decoder
use super::{blocks, join_lines, strip_tags, timestamp, CueSink, Decoded};
use tracing::debug;

pub fn decode(text: &str) -> Decoded {
    let mut sink = CueSink::default();

    for block in blocks(text) {
        let timing = block[0].trim().trim_start_matches('\u{feff}');
        match timestamp::parse_comma_pair(timing) {
            Some((start, end)) => {
                let body = join_lines(block[1..].iter().copied());
                sink.push(start, end, &strip_tags(&body));
            }
            None => {
                debug!("Skipping SBV block with malformed timing: {}", timing);
                sink.skip();
            }
        }
    }

    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_sbv() {
        let text = "0:00:01.000,0:00:03.000\nthis is a tool\n\n0:00:03.500,0:00:05.250\nsecond\ncue\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(1));
        assert_eq!(decoded.cues[1].end, Duration::from_millis(5250));
        assert_eq!(decoded.cues[1].text, "second\ncue");
    }

    #[test]
    fn test_bad_block_is_skipped() {
        let text = "0:00:01.000,0:00:03.000\nok\n\nbroken timing\ntext\n\n0:00:04.000,0:00:05.000\nstill ok\n";
        let decoded = decode(text);
        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_oversized_timestamp_skips_only_its_block() {
        let text = "0:00:01.000,0:00:02.000\nkept\n\n99999999999999999:00:00.000,99999999999999999:00:01.000\ndropped\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 1);
        assert_eq!(decoded.cues[0].text, "kept");
        assert_eq!(decoded.skipped, 1);
    }
}
