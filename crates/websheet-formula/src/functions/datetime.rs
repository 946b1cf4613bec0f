use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

use super::arity;
use crate::context::Env;
use crate::evaluator::Evaluator;
use websheet_core::{Dep, Scalar, SheetError, Value};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

fn hour_minute_re() -> Option<&'static Regex> {
    static HOUR_MINUTE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    HOUR_MINUTE_RE
        .get_or_init(|| Regex::new(r"^(\d+):(\d+)$").ok())
        .as_ref()
}

/// Interpret a scalar as a point in time.
///
/// - `"HH:MM"`: that time today
/// - RFC 3339 or `YYYY-MM-DD[ HH:MM[:SS]]` strings
/// - positive numbers: milliseconds since the Unix epoch
/// - `n <= 0`: `now - n` seconds
pub fn parse_date(value: &Value, now: DateTime<Utc>) -> Result<DateTime<Utc>, SheetError> {
    let invalid = || {
        SheetError::InvalidArgument(format!("invalid date: cannot read a {} as a time", value.type_name()))
    };

    match value.as_scalar() {
        Some(Scalar::Str(s)) => {
            let s = s.trim();
            if let Some(caps) = hour_minute_re().and_then(|re| re.captures(s)) {
                let hours: u32 = caps[1].parse().map_err(|_| invalid())?;
                let minutes: u32 = caps[2].parse().map_err(|_| invalid())?;
                let naive = now
                    .date_naive()
                    .and_hms_opt(hours, minutes, 0)
                    .ok_or_else(invalid)?;
                return Ok(Utc.from_utc_datetime(&naive));
            }
            if let Ok(date) = DateTime::parse_from_rfc3339(s) {
                return Ok(date.with_timezone(&Utc));
            }
            for format in DATETIME_FORMATS {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(Utc.from_utc_datetime(&naive));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(invalid)
        }
        Some(Scalar::Number(n)) if *n <= 0.0 => Duration::try_milliseconds((-n * 1000.0) as i64)
            .and_then(|offset| now.checked_add_signed(offset))
            .ok_or_else(invalid),
        Some(Scalar::Number(n)) => Utc
            .timestamp_millis_opt(*n as i64)
            .single()
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// AFTER - `true` once the date has passed; until then `false` with a time guard
pub fn after(ev: &mut Evaluator<'_>, mut args: Vec<Value>, _env: &Env) -> Result<Value, SheetError> {
    arity("AFTER", &args, 1, 1)?;
    let value = ev.resolve(args.remove(0))?;
    let now = ev.context().now();
    let at = parse_date(&value, now)?;

    let result = if now < at {
        Value::bool(false).add_dep(Dep::Time { at })
    } else {
        Value::bool(true)
    };
    Ok(result.add_deps(&value.all_deps()))
}

/// TRIGGER - Like AFTER, but the cell is re-evaluated when the date passes
pub fn trigger(ev: &mut Evaluator<'_>, mut args: Vec<Value>, env: &Env) -> Result<Value, SheetError> {
    arity("TRIGGER", &args, 1, 1)?;
    let (Some(cell), Some(owner)) = (env.current_cell(), env.str_var("cellOwner")) else {
        return Err(SheetError::InvalidArgument(
            "cannot use TRIGGER outside a cell".into(),
        ));
    };
    let owner = owner.to_string();

    let value = ev.resolve(args.remove(0))?;
    let now = ev.context().now();
    let at = parse_date(&value, now)?;

    let result = if now < at {
        Value::bool(false).add_dep(Dep::Trigger { at, owner, cell })
    } else {
        Value::bool(true)
    };
    Ok(result.add_deps(&value.all_deps()))
}
