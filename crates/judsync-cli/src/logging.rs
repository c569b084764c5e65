//! Subscriber setup. Timestamps are rendered in the configured offset.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

struct OffsetTime(FixedOffset);

impl FormatTime for OffsetTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", render(Utc::now(), self.0))
    }
}

fn render(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        .to_string()
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), stderr output.
pub fn init(offset: FixedOffset) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(OffsetTime(offset))
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_in_offset() {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let brt = FixedOffset::west_opt(3 * 3600).unwrap();
        assert_eq!(render(at, brt), "2024-01-10T07:00:00.000-03:00");
        assert_eq!(
            render(at, FixedOffset::east_opt(0).unwrap()),
            "2024-01-10T10:00:00.000+00:00"
        );
    }
}
