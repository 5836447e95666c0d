// Timed Text Markup Language decoder
use super::{timestamp, CueSink, Decoded};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):(\d{2}):(\d{2})(?:\.(\d+)|:(\d+)(?:\.\d+)?)?$").expect("Invalid clock-time regex")
});

static OFFSET_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(\d+))?(h|ms|m|s|f|t)$").expect("Invalid offset-time regex")
});

/// Document-level timing parameters from the `<tt>` root.
#[derive(Debug, Clone, Copy)]
struct TimeBase {
    frame_rate: f64,
    tick_rate: f64,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            tick_rate: 1.0,
        }
    }
}

/// Parse a TTML time expression: clock time (`HH:MM:SS.fff` or
/// `HH:MM:SS:FF`) or offset time (`12.5s`, `500ms`, `90f`, `10000t`).
fn parse_time(expr: &str, base: &TimeBase) -> Option<Duration> {
    let expr = expr.trim();

    if let Some(caps) = CLOCK_TIME.captures(expr) {
        let hours: u64 = caps[1].parse().ok()?;
        let minutes: u64 = caps[2].parse().ok()?;
        let seconds: u64 = caps[3].parse().ok()?;
        let seconds = timestamp::clock_seconds(hours, minutes, seconds)?;
        let time = if let Some(frac) = caps.get(4) {
            Duration::new(seconds, timestamp::fraction_to_nanos(frac.as_str()))
        } else if let Some(frames) = caps.get(5) {
            let frames: u64 = frames.as_str().parse().ok()?;
            let frames = timestamp::from_frames(frames, base.frame_rate)?;
            Duration::from_secs(seconds).checked_add(frames)?
        } else {
            Duration::from_secs(seconds)
        };
        return Some(time);
    }

    let caps = OFFSET_TIME.captures(expr)?;
    let whole: u64 = caps[1].parse().ok()?;
    let frac_nanos = caps.get(2).map_or(0, |m| timestamp::fraction_to_nanos(m.as_str()));
    let value = Duration::new(whole, frac_nanos);
    match &caps[3] {
        "h" => value.checked_mul(3600),
        "m" => value.checked_mul(60),
        "s" => Some(value),
        "ms" => Some(value / 1000),
        "f" => Duration::try_from_secs_f64(value.as_secs_f64() / base.frame_rate).ok(),
        "t" => Duration::try_from_secs_f64(value.as_secs_f64() / base.tick_rate).ok(),
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Timing {
    begin: Option<String>,
    end: Option<String>,
    dur: Option<String>,
}

fn read_timing(e: &BytesStart, base: &mut Option<&mut TimeBase>) -> Timing {
    let mut timing = Timing::default();
    for attr in e.attributes().flatten() {
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        match attr.key.local_name().as_ref() {
            b"begin" => timing.begin = Some(value.into_owned()),
            b"end" => timing.end = Some(value.into_owned()),
            b"dur" => timing.dur = Some(value.into_owned()),
            b"frameRate" => {
                if let (Some(base), Ok(rate)) = (base.as_deref_mut(), value.trim().parse::<f64>()) {
                    if rate > 0.0 {
                        base.frame_rate = rate;
                    }
                }
            }
            b"tickRate" => {
                if let (Some(base), Ok(rate)) = (base.as_deref_mut(), value.trim().parse::<f64>()) {
                    if rate > 0.0 {
                        base.tick_rate = rate;
                    }
                }
            }
            _ => {}
        }
    }
    timing
}

struct Paragraph {
    begin: Duration,
    end: Duration,
    text: String,
    depth: usize,
}

/// Decode every `<p>` of a TTML document. `begin` on enclosing `<body>` and
/// `<div>` elements offsets the paragraphs inside them.
pub fn decode(text: &str) -> Decoded {
    let mut sink = CueSink::default();
    let mut reader = Reader::from_str(text.trim_start_matches('\u{feff}'));
    let mut base = TimeBase::default();
    let mut offsets: Vec<Duration> = Vec::new();
    let mut para: Option<Paragraph> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if let Some(p) = para.as_mut() {
                    if name.as_ref() == b"br" {
                        p.text.push('\n');
                    }
                    p.depth += 1;
                    continue;
                }

                let parent = offsets.last().copied().unwrap_or_default();
                if name.as_ref() == b"p" {
                    para = open_paragraph(&e, parent, &base);
                    if para.is_none() {
                        sink.skip();
                        // Still track the element so its end tag pops cleanly.
                        offsets.push(parent);
                    }
                } else {
                    let is_root = name.as_ref() == b"tt";
                    let timing = read_timing(&e, &mut is_root.then_some(&mut base));
                    let offset = timing
                        .begin
                        .as_deref()
                        .and_then(|b| parse_time(b, &base))
                        .and_then(|b| parent.checked_add(b))
                        .unwrap_or(parent);
                    offsets.push(offset);
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(p) = para.as_mut() {
                    if e.local_name().as_ref() == b"br" {
                        p.text.push('\n');
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(p) = para.as_mut() {
                    match t.unescape() {
                        Ok(s) => push_collapsed(&mut p.text, &s),
                        Err(e) => debug!("Undecodable TTML text: {}", e),
                    }
                }
            }
            Ok(Event::CData(c)) => {
                if let Some(p) = para.as_mut() {
                    push_collapsed(&mut p.text, &String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(p) = para.as_mut() {
                    if p.depth > 0 {
                        p.depth -= 1;
                        continue;
                    }
                }
                match para.take() {
                    Some(p) => sink.push(p.begin, p.end, &super::join_lines(p.text.lines())),
                    None => {
                        offsets.pop();
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!(
                    "TTML parse error at byte {}: {}; keeping cues read so far",
                    reader.buffer_position(),
                    e
                );
                sink.skip();
                break;
            }
            _ => {}
        }
    }

    sink.finish()
}

fn open_paragraph(e: &BytesStart, parent: Duration, base: &TimeBase) -> Option<Paragraph> {
    let timing = read_timing(e, &mut None);
    let begin = parse_time(timing.begin.as_deref()?, base)?;
    let end = match (timing.end.as_deref(), timing.dur.as_deref()) {
        (Some(end), _) => parse_time(end, base)?,
        (None, Some(dur)) => begin.checked_add(parse_time(dur, base)?)?,
        (None, None) => return None,
    };
    Some(Paragraph {
        begin: parent.checked_add(begin)?,
        end: parent.checked_add(end)?,
        text: String::new(),
        depth: 0,
    })
}

/// Append XML text with whitespace runs collapsed to single spaces.
fn push_collapsed(out: &mut String, text: &str) {
    let mut last_space = out.ends_with(' ') || out.ends_with('\n') || out.is_empty();
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(c);
            last_space = false;
        }
    }
}
