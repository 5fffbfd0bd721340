/// Turns a resolved display name into a channel-safe identifier.
///
/// Spaces become hyphens, the name is lowercased, every run of two or more
/// separator characters (hyphens, underscores and Unicode dashes) collapses to
/// a single hyphen, and hyphens are trimmed from both ends.
///
/// Applying it twice gives the same result as applying it once.
pub fn sanitize(name: &str) -> String {
    let lowered = name.replace(' ', "-").to_lowercase();

    let mut output = String::with_capacity(lowered.len());
    let mut run = String::new();

    for ch in lowered.chars() {
        if is_separator(ch) {
            run.push(ch);
            continue;
        }
        flush_run(&mut output, &mut run);
        output.push(ch);
    }
    flush_run(&mut output, &mut run);

    output.trim_matches('-').to_owned()
}

fn flush_run(output: &mut String, run: &mut String) {
    match run.chars().count() {
        0 => {}
        1 => output.push_str(run),
        _ => output.push('-'),
    }
    run.clear();
}

fn is_separator(ch: char) -> bool {
    matches!(
        ch,
        '-' | '_'
            | '\u{2010}'..='\u{2015}'
            | '\u{2212}'
            | '\u{2E3A}'
            | '\u{2E3B}'
            | '\u{FE58}'
            | '\u{FE63}'
            | '\u{FF0D}'
    )
}
