// WebVTT decoder
use super::{blocks, join_lines, strip_tags, timestamp, CueSink, Decoded};
use tracing::debug;

/// Decode WebVTT text. Header, NOTE, STYLE and REGION blocks are skipped;
/// a cue block may start with an identifier line before its timing line.
pub fn decode(text: &str) -> Decoded {
    let mut sink = CueSink::default();

    for block in blocks(text) {
        let first = block[0].trim().trim_start_matches('\u{feff}');
        if first.starts_with("WEBVTT") && !timestamp::contains_arrow(first) {
            continue;
        }
        if ["NOTE", "STYLE", "REGION"]
            .iter()
            .any(|kw| first == *kw || first.starts_with(&format!("{kw} ")))
        {
            continue;
        }

        let Some(timing_at) = block.iter().take(2).position(|l| timestamp::contains_arrow(l)) else {
            debug!("Skipping VTT block without timing: {:?}", first);
            sink.skip();
            continue;
        };

        match timestamp::parse_arrow(block[timing_at].trim()) {
            Some((start, end)) => {
                let body = join_lines(block[timing_at + 1..].iter().copied());
                sink.push(start, end, &clean_text(&body));
            }
            None => {
                debug!("Skipping VTT cue with malformed timing: {:?}", block[timing_at]);
                sink.skip();
            }
        }
    }

    sink.finish()
}

/// Strip cue markup (`<c.x>`, `<v Name>`, inline timestamps) and decode the
/// character references VTT allows.
fn clean_text(text: &str) -> String {
    strip_tags(text)
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&lrm;", "\u{200e}")
        .replace("&rlm;", "\u{200f}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_with_identifiers_and_notes() {
        let text = "WEBVTT - demo\n\nNOTE this is a comment\nspanning lines\n\nSTYLE\n::cue { color: red }\n\nintro\n00:01.000 --> 00:04.000 align:start\n<v Roger>Hello <c.loud>world</c></v>\n\n00:00:05.250 --> 00:00:06.000\nFish &amp; chips &lt;3\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(1));
        assert_eq!(decoded.cues[0].end, Duration::from_secs(4));
        assert_eq!(decoded.cues[0].text, "Hello world");
        assert_eq!(decoded.cues[1].start, Duration::from_millis(5250));
        assert_eq!(decoded.cues[1].text, "Fish & chips <3");
    }

    #[test]
    fn test_inline_timestamps_are_stripped() {
        let text = "WEBVTT\n\n00:00:01.000 --> 00:00:03.000\nOne <00:00:02.000>two\n";
        let decoded = decode(text);
        assert_eq!(decoded.cues[0].text, "One two");
    }

    #[test]
    fn test_malformed_cue_is_skipped() {
        let text = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nok\n\n00:0x:01.000 --> nope\nbad\n\n00:00:03.000 --> 00:00:04.000\nalso ok\n";
        let decoded = decode(text);
        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 1);
        assert_eq!(decoded.cues[1].text, "also ok");
    }

    #[test]
    fn test_missing_header_is_tolerated() {
        let decoded = decode("00:00:01.000 --> 00:00:02.000\nno header\n");
        assert_eq!(decoded.cues.len(), 1);
    }

    #[test]
    fn test_oversized_timestamp_skips_only_its_cue() {
        let text = "WEBVTT\n\n00:01.000 --> 00:02.000\nkept\n\n99999999999999999:00:00.000 --> 99999999999999999:00:01.000\ndropped\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 1);
        assert_eq!(decoded.cues[0].text, "kept");
        assert_eq!(decoded.skipped, 1);
    }
}
