use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

/// Parses a due-date expression into UTC. Accepted forms: `now`, `today`,
/// `tomorrow`, RFC 3339, `YYYY-MM-DD[THH:MM[:SS]]` (local wall clock),
/// bare `HH:MM` (next occurrence), and relative `+Nd` / `+Nh` / `+Nm`.
pub fn parse_date_expr(input: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let token = input.trim();
    let lower = token.to_ascii_lowercase();

    match lower.as_str() {
        "now" => return Ok(now),
        "today" => {
            let date = now.with_timezone(&Local).date_naive();
            return local_midnight(date);
        }
        "tomorrow" => {
            let today = parse_date_expr("today", now)?;
            return Ok(today + Duration::days(1));
        }
        _ => {}
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(token, fmt) {
            return to_utc_from_local(naive, fmt);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return local_midnight(date);
    }

    if let Some((hour, minute)) = parse_clock_time(token) {
        let local_now = now.with_timezone(&Local);
        let mut day = local_now.date_naive();
        let candidate = day
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("failed to construct clock time candidate"))?;
        if candidate <= local_now.naive_local() {
            day = day
                .checked_add_signed(Duration::days(1))
                .ok_or_else(|| anyhow!("failed to advance to next day"))?;
        }
        let next = day
            .and_hms_opt(hour, minute, 0)
            .ok_or_else(|| anyhow!("failed to construct next clock time candidate"))?;
        return to_utc_from_local(next, "clock-time");
    }

    let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dhm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

    if let Some(caps) = rel_re.captures(token) {
        let num: i64 = caps
            .name("num")
            .map(|m| m.as_str())
            .unwrap_or("0")
            .parse()
            .context("invalid relative amount")?;
        let amount = match caps.name("unit").map(|m| m.as_str()) {
            Some("d") => Duration::days(num),
            Some("h") => Duration::hours(num),
            Some("m") => Duration::minutes(num),
            _ => return Err(anyhow!("invalid relative unit in: {token}")),
        };
        return if caps.name("sign").map(|m| m.as_str()) == Some("-") {
            Ok(now - amount)
        } else {
            Ok(now + amount)
        };
    }

    Err(anyhow!("unrecognized date expression: {token}"))
}

pub fn format_local(dt: DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn local_midnight(date: NaiveDate) -> anyhow::Result<DateTime<Utc>> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("failed to construct midnight"))?;
    to_utc_from_local(midnight, "midnight")
}

fn to_utc_from_local(naive: NaiveDateTime, what: &str) -> anyhow::Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("ambiguous local time ({what}): {naive}"))
}

fn parse_clock_time(token: &str) -> Option<(u32, u32)> {
    let (h, m) = token.split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    if !h.chars().all(|c| c.is_ascii_digit()) || !m.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0)
            .single()
            .expect("valid")
    }

    #[test]
    fn now_returns_now() {
        let now = fixed_now();
        assert_eq!(parse_date_expr("now", now).expect("parses"), now);
    }

    #[test]
    fn rfc3339_parses_verbatim() {
        let now = fixed_now();
        let parsed = parse_date_expr("2026-07-01T09:00:00Z", now).expect("parses");
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).single().expect("valid")
        );
    }

    #[test]
    fn relative_hours_add_to_now() {
        let now = fixed_now();
        let parsed = parse_date_expr("+2h", now).expect("parses");
        assert_eq!(parsed, now + Duration::hours(2));
    }

    #[test]
    fn relative_minutes_subtract_from_now() {
        let now = fixed_now();
        let parsed = parse_date_expr("-30m", now).expect("parses");
        assert_eq!(parsed, now - Duration::minutes(30));
    }

    #[test]
    fn tomorrow_is_a_day_after_today() {
        let now = fixed_now();
        let today = parse_date_expr("today", now).expect("parses");
        let tomorrow = parse_date_expr("tomorrow", now).expect("parses");
        assert_eq!(tomorrow - today, Duration::days(1));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_date_expr("whenever", fixed_now()).is_err());
    }

    #[test]
    fn clock_time_requires_two_minute_digits() {
        assert_eq!(parse_clock_time("9:5"), None);
        assert_eq!(parse_clock_time("9:30"), Some((9, 30)));
        assert_eq!(parse_clock_time("23:59"), Some((23, 59)));
        assert_eq!(parse_clock_time("24:00"), None);
    }
}
