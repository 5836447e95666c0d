// Advanced SubStation Alpha / SubStation Alpha decoder
use super::{strip_overrides, timestamp, CueSink, Decoded};
use tracing::debug;

/// Field positions inside a `Dialogue:` line, taken from the `Format:` line.
#[derive(Debug, Clone, Copy)]
struct Layout {
    start: usize,
    end: usize,
    text: usize,
    fields: usize,
}

impl Default for Layout {
    // Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
    fn default() -> Self {
        Self {
            start: 1,
            end: 2,
            text: 9,
            fields: 10,
        }
    }
}

impl Layout {
    fn from_format(spec: &str) -> Option<Self> {
        let names: Vec<String> = spec.split(',').map(|n| n.trim().to_ascii_lowercase()).collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let text = find("text")?;
        // Text is the free-form remainder, so it has to be the last field.
        if text + 1 != names.len() {
            return None;
        }
        Some(Self {
            start: find("start")?,
            end: find("end")?,
            text,
            fields: names.len(),
        })
    }
}

/// Decode the `[Events]` section of an ASS/SSA script.
pub fn decode(text: &str) -> Decoded {
    let mut sink = CueSink::default();
    let mut in_events = false;
    let mut layout = Layout::default();

    for line in text.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');

        if line.starts_with('[') && line.ends_with(']') {
            in_events = line.eq_ignore_ascii_case("[events]");
            continue;
        }
        if !in_events {
            continue;
        }

        if let Some(spec) = strip_prefix_ci(line, "Format:") {
            match Layout::from_format(spec) {
                Some(l) => layout = l,
                None => debug!("Unusable ASS Format line, keeping default layout: {}", spec),
            }
            continue;
        }

        if let Some(fields) = strip_prefix_ci(line, "Dialogue:") {
            match parse_dialogue(fields, &layout) {
                Some((start, end, text)) => sink.push(start, end, &text),
                None => {
                    debug!("Skipping malformed ASS dialogue: {}", line);
                    sink.skip();
                }
            }
        }
    }

    sink.finish()
}

fn parse_dialogue(
    fields: &str,
    layout: &Layout,
) -> Option<(std::time::Duration, std::time::Duration, String)> {
    let parts: Vec<&str> = fields.splitn(layout.fields, ',').collect();
    if parts.len() < layout.fields {
        return None;
    }

    let start = timestamp::parse_clock(parts[layout.start])?;
    let end = timestamp::parse_clock(parts[layout.end])?;
    Some((start, end, clean_text(parts[layout.text])))
}

fn clean_text(text: &str) -> String {
    let text = strip_overrides(text)
        .replace("\\N", "\n")
        .replace("\\n", "\n")
        .replace("\\h", " ");
    super::join_lines(text.lines())
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let head = line.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &line[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const SCRIPT: &str = "[Script Info]\nTitle: Demo\nScriptType: v4.00+\n\n[V4+ Styles]\nFormat: Name, Fontname\nStyle: Default,Arial\n\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:03.50,Default,,0,0,0,,{\\i1}Hello{\\i0}, world\\Nsecond line\nComment: 0,0:00:02.00,0:00:03.00,Default,,0,0,0,,not shown\nDialogue: 0,0:00:04.00,0:00:05.00,Default,,0,0,0,,Non\\hbreaking\n";

    #[test]
    fn test_decode_events() {
        let decoded = decode(SCRIPT);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(1));
        assert_eq!(decoded.cues[0].end, Duration::from_millis(3500));
        assert_eq!(decoded.cues[0].text, "Hello, world\nsecond line");
        assert_eq!(decoded.cues[1].text, "Non breaking");
    }

    #[test]
    fn test_ssa_format_with_marked_field() {
        let script = "[Events]\nFormat: Marked, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: Marked=0,0:01:00.00,0:01:02.00,Default,NTP,0000,0000,0000,!Effect,Old, style\n";
        let decoded = decode(script);
        assert_eq!(decoded.cues.len(), 1);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(60));
        assert_eq!(decoded.cues[0].text, "Old, style");
    }

    #[test]
    fn test_custom_field_order() {
        let script = "[Events]\nFormat: Start, End, Text\nDialogue: 0:00:02.00,0:00:03.00,short layout\n";
        let decoded = decode(script);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(2));
        assert_eq!(decoded.cues[0].text, "short layout");
    }

    #[test]
    fn test_malformed_dialogue_is_skipped() {
        let script = "[Events]\nDialogue: 0,bad,0:00:03.00,Default,,0,0,0,,broken\nDialogue: 0,0:00:04.00,0:00:05.00,Default,,0,0,0,,fine\n";
        let decoded = decode(script);
        assert_eq!(decoded.cues.len(), 1);
        assert_eq!(decoded.skipped, 1);
        assert_eq!(decoded.cues[0].text, "fine");
    }

    #[test]
    fn test_dialogue_outside_events_ignored() {
        let script = "[Script Info]\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,misplaced\n";
        assert!(decode(script).cues.is_empty());
    }

    #[test]
    fn test_oversized_timestamp_skips_only_its_dialogue() {
        let script = "[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\nDialogue: 0,0:00:01.00,0:00:02.00,Default,,0,0,0,,kept\nDialogue: 0,99999999999999999:00:00.00,99999999999999999:00:01.00,Default,,0,0,0,,dropped\n";
        let decoded = decode(script);

        assert_eq!(decoded.cues.len(), 1);
        assert_eq!(decoded.cues[0].text, "kept");
        assert_eq!(decoded.skipped, 1);
    }
}
