use chrono::{Duration, Local, NaiveDateTime, Timelike};

use crate::history::{Entry, MarkerTime, Transcript};

/// Markers younger than this are left alone.
pub const REFRESH_WINDOW_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampOutcome {
    Appended,
    Unchanged,
    Refreshed,
}

/// Keeps one up-to-date recency marker at the tail of the transcript, using local wall-clock time.
pub fn stamp(transcript: &mut Transcript) -> StampOutcome {
    stamp_at(transcript, Local::now().naive_local())
}

pub fn stamp_at(transcript: &mut Transcript, now: NaiveDateTime) -> StampOutcome {
    // The marker format carries whole seconds only.
    let now = now.with_nanosecond(0).unwrap_or(now);

    let outcome = match transcript.last_mut() {
        Some(Entry::DateMarker(time)) => match time.timestamp() {
            Some(recorded) if now - recorded <= Duration::minutes(REFRESH_WINDOW_MINUTES) => {
                StampOutcome::Unchanged
            }
            Some(_) => {
                *time = MarkerTime::At(now);
                StampOutcome::Refreshed
            }
            None => StampOutcome::Appended,
        },
        _ => StampOutcome::Appended,
    };

    if outcome == StampOutcome::Appended {
        transcript.push(Entry::date_marker(now));
    }

    tracing::debug!(?outcome, "stamped date boundary");
    outcome
}
