use console::style;
use dialoguer::FuzzySelect;
use subsearch::subtitle::timestamp;
use subsearch::{SearchHit, SearchResults, SeekTarget};

const UNTIMED: &str = "--:--:--";

/// `name | HH:MM:SS | text`, with the match emphasized when `highlight` is set.
pub fn format_row(hit: &SearchHit, highlight: bool) -> String {
    let time = if hit.timed {
        timestamp::format_clock(hit.cue.start)
    } else {
        UNTIMED.to_string()
    };

    // Newline and space are both one byte, so the span stays valid.
    let text = hit.cue.text.replace('\n', " ");
    let text = if highlight {
        let span = hit.matched_span.clone();
        format!(
            "{}{}{}",
            &text[..span.start],
            style(&text[span.clone()]).yellow().bold(),
            &text[span.end..]
        )
    } else {
        text
    };

    format!("{} | {} | {}", hit.document.display_name, time, text)
}

pub fn print_results(results: &SearchResults) {
    if results.hits.is_empty() {
        println!("{} No matches", style("!").yellow());
    }

    for hit in &results.hits {
        println!("{}", format_row(hit, true));
    }

    println!();
    println!(
        "{} {} hits in {} of {} documents ({:.2}s)",
        style("✓").green(),
        results.stats.hits,
        results.stats.documents_matched,
        results.stats.documents_searched + results.stats.documents_failed,
        results.stats.elapsed.as_secs_f64()
    );
    for failure in &results.failures {
        println!(
            "{} {}: {}",
            style("!").yellow(),
            failure.document,
            failure.reason
        );
    }
}

/// Let the user choose a hit. `None` if the prompt was dismissed.
pub fn pick_hit(hits: &[SearchHit]) -> anyhow::Result<Option<usize>> {
    let items: Vec<String> = hits.iter().map(|h| format_row(h, false)).collect();
    let selection = FuzzySelect::new()
        .with_prompt("Open which hit?")
        .items(&items)
        .default(0)
        .interact_opt()?;
    Ok(selection)
}

pub fn print_seek_target(target: &SeekTarget) {
    println!(
        "{} {} @ {}",
        style("▶").cyan(),
        target.video_path.display(),
        timestamp::format_precise(target.start_time)
    );
}
