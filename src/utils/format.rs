/// Renders a duration for display: `"8 hrs 32 mins"`,
/// `"1 hr 5 mins"`, `"45 mins"`. Seconds are truncated.
pub fn format_work_time(total_seconds: u64) -> String {
    let total_minutes = total_seconds / 60;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    let mut parts = Vec::with_capacity(2);
    if hours > 0 {
        let label = if hours == 1 { "hr" } else { "hrs" };
        parts.push(format!("{hours} {label}"));
    }
    if minutes > 0 || hours == 0 {
        let label = if minutes == 1 { "min" } else { "mins" };
        parts.push(format!("{minutes} {label}"));
    }

    parts.join(" ")
}
