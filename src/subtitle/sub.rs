// MicroDVD and SubViewer 2 decoders, both shipped as `.sub`
use super::{blocks, join_lines, strip_overrides, timestamp, CueSink, Decoded};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static MICRODVD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{(\d+)\}\{(\d*)\}(.*)$").expect("Invalid MicroDVD regex")
});

pub fn is_microdvd(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .is_some_and(|l| MICRODVD.is_match(l))
}

pub fn decode(text: &str, default_fps: f64) -> Decoded {
    let text = text.trim_start_matches('\u{feff}');
    if is_microdvd(text) {
        decode_microdvd(text, default_fps)
    } else {
        decode_subviewer(text)
    }
}

/// `{start}{end}text` with frame numbers. A leading `{1}{1}23.976` line
/// declares the frame rate instead of carrying text.
fn decode_microdvd(text: &str, default_fps: f64) -> Decoded {
    let mut sink = CueSink::default();
    let mut fps = default_fps;
    let mut first = true;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some(caps) = MICRODVD.captures(line) else {
            debug!("Skipping malformed MicroDVD line: {}", line);
            sink.skip();
            continue;
        };

        let Ok(start) = caps[1].parse::<u64>() else {
            sink.skip();
            continue;
        };
        let end = caps[2].parse::<u64>().unwrap_or(start);
        let body = &caps[3];

        if first {
            first = false;
            if start <= 1 && end <= 1 {
                if let Ok(declared) = body.trim().parse::<f64>() {
                    if declared > 0.0 {
                        fps = declared;
                        continue;
                    }
                }
            }
        }

        let (Some(start), Some(end)) = (
            timestamp::from_frames(start, fps),
            timestamp::from_frames(end, fps),
        ) else {
            debug!("Skipping MicroDVD line with unrepresentable timing: {}", line);
            sink.skip();
            continue;
        };
        let text = join_lines(strip_overrides(body).split('|'));
        sink.push(start, end, &text);
    }

    sink.finish()
}

/// SubViewer 2: `HH:MM:SS.cc,HH:MM:SS.cc` then text, `[br]` for line breaks.
/// The optional `[INFORMATION]` header is made of `[TAG]` lines.
fn decode_subviewer(text: &str) -> Decoded {
    let mut sink = CueSink::default();

    for block in blocks(text) {
        let Some(timing_at) = block
            .iter()
            .position(|l| timestamp::parse_comma_pair(l).is_some())
        else {
            if !block.iter().all(|l| l.trim().starts_with('[')) {
                debug!("Skipping SubViewer block without timing");
                sink.skip();
            }
            continue;
        };

        if let Some((start, end)) = timestamp::parse_comma_pair(block[timing_at]) {
            let body = block[timing_at + 1..].join("\n").replace("[br]", "\n");
            sink.push(start, end, &join_lines(body.lines()));
        }
    }

    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_microdvd_with_declared_fps() {
        let text = "{1}{1}25.000\n{25}{75}Hello|world\n{100}{}{y:i}Open ended\n";
        let decoded = decode(text, 23.976);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(1));
        assert_eq!(decoded.cues[0].end, Duration::from_secs(3));
        assert_eq!(decoded.cues[0].text, "Hello\nworld");
        assert_eq!(decoded.cues[1].start, Duration::from_secs(4));
        assert_eq!(decoded.cues[1].end, decoded.cues[1].start);
        assert_eq!(decoded.cues[1].text, "Open ended");
    }

    #[test]
    fn test_microdvd_default_fps() {
        let decoded = decode("{50}{100}Two seconds\n", 25.0);
        assert_eq!(decoded.cues[0].start, Duration::from_secs(2));
    }

    #[test]
    fn test_microdvd_skips_bad_lines() {
        let decoded = decode("{50}{100}ok\ngarbage line\n{150}{200}also ok\n", 25.0);
        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_microdvd_tiny_declared_fps_skips_lines() {
        let decoded = decode("{1}{1}0.0000000000000000001
{25}{50}lost
", 25.0);
        assert!(decoded.cues.is_empty());
        assert_eq!(decoded.skipped, 1);
    }

    #[test]
    fn test_subviewer_oversized_timing_is_skipped() {
        let text = "00:00:01.00,00:00:03.00
kept

99999999999999999:00:00.00,99999999999999999:00:01.00
dropped
";
        let decoded = decode(text, 23.976);
        assert_eq!(decoded.cues.len(), 1);
        assert_eq!(decoded.cues[0].text, "kept");
    }

    #[test]
    fn test_subviewer() {
        let text = "[INFORMATION]\n[TITLE]Demo\n[AUTHOR]Someone\n[END INFORMATION]\n\n00:00:01.00,00:00:03.00\nFirst[br]line\n\n00:00:04.50,00:00:06.00\nSecond\n";
        let decoded = decode(text, 23.976);

        assert_eq!(decoded.cues.len(), 2);
        assert_eq!(decoded.skipped, 0);
        assert_eq!(decoded.cues[0].text, "First\nline");
        assert_eq!(decoded.cues[1].start, Duration::from_millis(4500));
    }
}
