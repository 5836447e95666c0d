// Timestamp grammars shared by the text decoders
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(\d+):)?(\d{1,2}):(\d{1,2})(?:[.,](\d{1,9}))?\s*$")
        .expect("Invalid clock regex")
});

static ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\d:.,]+)\s*-->\s*([\d:.,]+)").expect("Invalid arrow regex")
});

static LOOSE_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+:\d{1,2}(?::\d{1,2})?(?:[.,]\d+)?)\s*-->\s*(\d+:\d{1,2}(?::\d{1,2})?(?:[.,]\d+)?)")
        .expect("Invalid loose arrow regex")
});

static COMMA_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+:\d{1,2}:\d{1,2}(?:\.\d{1,9})?)\s*,\s*(\d+:\d{1,2}:\d{1,2}(?:\.\d{1,9})?)\s*$")
        .expect("Invalid comma pair regex")
});

/// Parse `[H:]MM:SS[.,]fff`, the clock grammar used by SRT, VTT, SBV,
/// SubViewer and ASS. Fractions of any length up to nanoseconds are accepted.
pub fn parse_clock(s: &str) -> Option<Duration> {
    let caps = CLOCK.captures(s)?;
    let hours: u64 = caps.get(1).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    if seconds >= 60 || (caps.get(1).is_some() && minutes >= 60) {
        return None;
    }
    let nanos = caps.get(4).map_or(0, |m| fraction_to_nanos(m.as_str()));

    Some(Duration::new(clock_seconds(hours, minutes, seconds)?, nanos))
}

/// `h:m:s` as whole seconds; `None` if the total does not fit.
pub fn clock_seconds(hours: u64, minutes: u64, seconds: u64) -> Option<u64> {
    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Convert the digits after a decimal separator into nanoseconds.
pub fn fraction_to_nanos(digits: &str) -> u32 {
    let mut nanos = 0u32;
    let mut scale = 100_000_000u32;
    for d in digits.chars().take(9) {
        let Some(v) = d.to_digit(10) else { break };
        nanos += v * scale;
        scale /= 10;
    }
    nanos
}

/// Parse an `start --> end` line. Anything after the end timestamp
/// (VTT cue settings, SRT coordinates) is ignored.
pub fn parse_arrow(line: &str) -> Option<(Duration, Duration)> {
    let caps = ARROW.captures(line)?;
    Some((parse_clock(&caps[1])?, parse_clock(&caps[2])?))
}

/// Whether the line carries a `-->` arrow at all, parseable or not.
pub fn contains_arrow(line: &str) -> bool {
    line.contains("-->")
}

/// Find a timestamp pair anywhere in the line, for the heuristic scanner.
pub fn find_loose_arrow(line: &str) -> Option<(Duration, Duration)> {
    let caps = LOOSE_ARROW.captures(line)?;
    Some((parse_clock(&caps[1])?, parse_clock(&caps[2])?))
}

/// Parse `H:MM:SS.fff,H:MM:SS.fff` as used by SBV and SubViewer.
pub fn parse_comma_pair(line: &str) -> Option<(Duration, Duration)> {
    let caps = COMMA_PAIR.captures(line)?;
    Some((parse_clock(&caps[1])?, parse_clock(&caps[2])?))
}

/// Frame number to time. `None` when the result is not a representable
/// duration, e.g. for a vanishingly small frame rate.
pub fn from_frames(frames: u64, fps: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(frames as f64 / fps).ok()
}

/// Format as `HH:MM:SS`, the resolution shown in result listings.
pub fn format_clock(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format as `HH:MM:SS.mmm`.
pub fn format_precise(d: Duration) -> String {
    format!("{}.{:03}", format_clock(d), d.subsec_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock_variants() {
        assert_eq!(parse_clock("00:00:01,000"), Some(Duration::from_secs(1)));
        assert_eq!(parse_clock("00:00:01.500"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_clock("0:00:02.25"), Some(Duration::from_millis(2250)));
        assert_eq!(parse_clock("01:02.5"), Some(Duration::from_millis(62_500)));
        assert_eq!(
            parse_clock("1:01:01,123"),
            Some(Duration::from_secs(3661) + Duration::from_millis(123))
        );
        assert_eq!(parse_clock("00:00:05"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_clock_rejects_garbage() {
        assert_eq!(parse_clock("00:00:xx,000"), None);
        assert_eq!(parse_clock("00:61:00,000"), None);
        assert_eq!(parse_clock("00:00:75,000"), None);
        assert_eq!(parse_clock(""), None);
    }

    #[test]
    fn test_fraction_to_nanos() {
        assert_eq!(fraction_to_nanos("5"), 500_000_000);
        assert_eq!(fraction_to_nanos("25"), 250_000_000);
        assert_eq!(fraction_to_nanos("123"), 123_000_000);
        assert_eq!(fraction_to_nanos("1234567891"), 123_456_789);
    }

    #[test]
    fn test_parse_arrow_ignores_settings() {
        let (start, end) = parse_arrow("00:01.000 --> 00:04.000 align:start position:10%").unwrap();
        assert_eq!(start, Duration::from_secs(1));
        assert_eq!(end, Duration::from_secs(4));

        let (start, end) = parse_arrow("00:00:01,000-->00:00:03,000").unwrap();
        assert_eq!(start, Duration::from_secs(1));
        assert_eq!(end, Duration::from_secs(3));

        assert!(parse_arrow("00:00:xx --> garbage").is_none());
        assert!(contains_arrow("00:00:xx --> garbage"));
    }

    #[test]
    fn test_find_loose_arrow_mid_line() {
        let (start, end) = find_loose_arrow("Cue 3: 0:00:07.5 --> 0:00:09.0 (approx)").unwrap();
        assert_eq!(start, Duration::from_millis(7500));
        assert_eq!(end, Duration::from_secs(9));
    }

    #[test]
    fn test_parse_comma_pair() {
        let (start, end) = parse_comma_pair("0:00:01.000,0:00:03.000").unwrap();
        assert_eq!(start, Duration::from_secs(1));
        assert_eq!(end, Duration::from_secs(3));
        assert!(parse_comma_pair("not, a pair").is_none());
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(Duration::from_millis(1500)), "00:00:01");
        assert_eq!(format_clock(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_precise(Duration::from_millis(61_250)), "00:01:01.250");
    }

    #[test]
    fn test_from_frames() {
        assert_eq!(from_frames(50, 25.0), Some(Duration::from_secs(2)));
        assert_eq!(from_frames(1, 1e-30), None);
        assert_eq!(from_frames(1, 0.0), None);
    }

    #[test]
    fn test_oversized_clock_is_rejected() {
        assert_eq!(parse_clock("99999999999999999:00:00,000"), None);
        assert_eq!(parse_arrow("99999999999999999:00:00,000 --> 99999999999999999:00:01,000"), None);
        assert_eq!(clock_seconds(u64::MAX / 3600, 59, 59), None);
        assert_eq!(clock_seconds(1, 2, 3), Some(3723));
    }
}
