//! Lenient second-pass scanner for content the structured decoders could
//! not make sense of. Any line carrying a `start --> end` pair opens a cue;
//! the lines after it, up to a blank line or the next timing line, are its
//! text.

use super::{join_lines, strip_overrides, strip_tags, timestamp, CueSink, Decoded};
use std::time::Duration;

pub fn scan(text: &str) -> Decoded {
    let mut sink = CueSink::default();
    let mut open: Option<(Duration, Duration, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim();

        if let Some((start, end)) = timestamp::find_loose_arrow(trimmed) {
            if let Some((s, e, lines)) = open.take() {
                push(&mut sink, s, e, lines);
            }
            open = Some((start, end, Vec::new()));
            continue;
        }

        if trimmed.is_empty() {
            if let Some((s, e, lines)) = open.take() {
                push(&mut sink, s, e, lines);
            }
            continue;
        }

        if let Some((_, _, lines)) = open.as_mut() {
            lines.push(trimmed);
        }
    }

    if let Some((s, e, lines)) = open.take() {
        push(&mut sink, s, e, lines);
    }

    sink.finish()
}

fn push(sink: &mut CueSink, start: Duration, end: Duration, lines: Vec<&str>) {
    let text = strip_overrides(&strip_tags(&join_lines(lines)));
    sink.push(start, end, &text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_cues_from_srt_in_wrong_container() {
        let text = "Dialogue-ish header\n1\n00:00:01,000 --> 00:00:02,000\nrecovered line\n\ncue 2: 0:00:03.000 --> 0:00:04.000\n<b>bold</b> text\n";
        let decoded = scan(text);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.cues[0].text, "recovered line");
        assert_eq!(decoded.cues[0].start, Duration::from_secs(1));
        assert_eq!(decoded.cues[1].text, "bold text");
    }

    #[test]
    fn test_nothing_to_recover() {
        assert!(scan("plain prose\nwith no timing\n").cues.is_empty());
    }
}
