// SubRip decoder
use super::{join_lines, strip_overrides, strip_tags, timestamp, CueSink, Decoded};
use std::time::Duration;
use tracing::debug;

struct OpenCue<'a> {
    start: Duration,
    end: Duration,
    lines: Vec<&'a str>,
}

/// Decode SRT text. Blocks are normally separated by blank lines, but a
/// timestamp line always starts a new cue so missing separators and missing
/// indices are tolerated. A block whose arrow line does not parse is skipped.
pub fn decode(text: &str) -> Decoded {
    let mut sink = CueSink::default();
    let mut open: Option<OpenCue> = None;
    let mut in_garbage = false;

    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim().trim_start_matches('\u{feff}');

        if let Some((start, end)) = timestamp::parse_arrow(trimmed) {
            if let Some(cue) = open.take() {
                flush(&mut sink, cue, true);
            }
            open = Some(OpenCue {
                start,
                end,
                lines: Vec::new(),
            });
            in_garbage = false;
            continue;
        }

        if timestamp::contains_arrow(trimmed) {
            if let Some(cue) = open.take() {
                flush(&mut sink, cue, true);
            }
            debug!("Skipping SRT block with malformed timing at line {}", line_no + 1);
            sink.skip();
            in_garbage = true;
            continue;
        }

        if trimmed.is_empty() {
            if let Some(cue) = open.take() {
                flush(&mut sink, cue, false);
            }
            in_garbage = false;
            continue;
        }

        match open.as_mut() {
            Some(cue) => cue.lines.push(trimmed),
            // Between blocks: an index line, or the tail of a skipped block.
            None if in_garbage || trimmed.chars().all(|c| c.is_ascii_digit()) => {}
            None => {
                debug!("Skipping stray SRT text at line {}", line_no + 1);
                sink.skip();
                in_garbage = true;
            }
        }
    }

    if let Some(cue) = open.take() {
        flush(&mut sink, cue, false);
    }

    sink.finish()
}

fn flush(sink: &mut CueSink, mut cue: OpenCue, next_follows: bool) {
    // Without a blank separator the next block's index ends up as our last line.
    if next_follows
        && cue
            .lines
            .last()
            .is_some_and(|l| l.chars().all(|c| c.is_ascii_digit()))
    {
        cue.lines.pop();
    }
    let text = clean_text(&join_lines(cue.lines));
    sink.push(cue.start, cue.end, &text);
}

fn clean_text(text: &str) -> String {
    strip_overrides(&strip_tags(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic() {
        let text = "1\n00:00:01,000 --> 00:00:03,000\nthis is a tool for testing\n\n2\n00:00:04,500 --> 00:00:07,000\nSecond line\nwraps here\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(1));
        assert_eq!(decoded.cues[0].end, Duration::from_secs(3));
        assert_eq!(decoded.cues[0].text, "this is a tool for testing");
        assert_eq!(decoded.cues[1].text, "Second line\nwraps here");
        assert_eq!(decoded.cues[1].sequence_index, 1);
    }

    #[test]
    fn test_malformed_block_between_good_ones() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\nfirst\n\n2\n00:00:xx,000 --> garbage\nbroken\n\n3\n00:00:05,000 --> 00:00:06,000\nthird\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 1);
        assert_eq!(decoded.cues[0].text, "first");
        assert_eq!(decoded.cues[1].text, "third");
    }

    #[test]
    fn test_missing_indices_and_separators() {
        let text = "00:00:01,000 --> 00:00:02,000\nno index\n2\n00:00:03.000 --> 00:00:04.000\ndot separator\n";
        let decoded = decode(text);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.cues[0].text, "no index");
        assert_eq!(decoded.cues[1].text, "dot separator");
        assert_eq!(decoded.cues[1].start, Duration::from_secs(3));
    }

    #[test]
    fn test_strips_markup() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\n<i>Hello</i> {\\an8}<font color=\"red\">there</font>\n";
        let decoded = decode(text);
        assert_eq!(decoded.cues[0].text, "Hello there");
    }

    #[test]
    fn test_numeric_dialogue_is_kept() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\n42\n\n2\n00:00:03,000 --> 00:00:04,000\nnext\n";
        let decoded = decode(text);
        assert_eq!(decoded.cues[0].text, "42");
    }

    #[test]
    fn test_well_formed_invariants() {
        let text = "1\n00:00:01,000 --> 00:00:02,000\na\n\n2\n00:00:02,000 --> 00:00:05,000\nb\n\n3\n00:00:04,000 --> 00:00:06,000\nc\n";
        let decoded = decode(text);
        for pair in decoded.cues.windows(2) {
            assert!(pair[0].sequence_index < pair[1].sequence_index);
        }
        for cue in &decoded.cues {
            assert!(cue.start <= cue.end);
        }
    }

    #[test]
    fn test_oversized_timestamp_skips_only_its_block() {
        let text = "1\n00:00:01,000 --> 00:00:03,000\na tool here\n\n2\n99999999999999999:00:00,000 --> 99999999999999999:00:01,000\ntoo late\n\n3\n00:00:05,000 --> 00:00:06,000\nafter\n";
        let decoded = decode(text);

        let texts: Vec<_> = decoded.cues.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a tool here", "after"]);
        assert_eq!(decoded.skipped, 1);
    }
}
