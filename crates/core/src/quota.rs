use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One of the four independently-tracked quota counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum QuotaAxis {
    DailyCalls,
    MonthlyCalls,
    DailyCredits,
    MonthlyCredits,
}

impl QuotaAxis {
    /// Stable label used in the `quota_exceeded:<axis>` denial reason.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::DailyCalls => "daily_calls",
            Self::MonthlyCalls => "monthly_calls",
            Self::DailyCredits => "daily_credits",
            Self::MonthlyCredits => "monthly_credits",
        }
    }
}

/// Configured limits for the four quota axes. A value of 0 (or `None`)
/// means "no quota" on that axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QuotaPolicy {
    #[serde(default)]
    pub daily_calls: Option<u64>,
    #[serde(default)]
    pub monthly_calls: Option<u64>,
    #[serde(default)]
    pub daily_credits: Option<u64>,
    #[serde(default)]
    pub monthly_credits: Option<u64>,
}

impl QuotaPolicy {
    #[must_use]
    pub fn limit_for(&self, axis: QuotaAxis) -> Option<u64> {
        let raw = match axis {
            QuotaAxis::DailyCalls => self.daily_calls,
            QuotaAxis::MonthlyCalls => self.monthly_calls,
            QuotaAxis::DailyCredits => self.daily_credits,
            QuotaAxis::MonthlyCredits => self.monthly_credits,
        };
        raw.filter(|limit| *limit > 0)
    }
}

/// In-memory counters for one key (or the global pseudo-key), tagged with
/// the civil day/month index they were last bumped in so rollovers can be
/// detected lazily without a background sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaCounters {
    pub day_index: i64,
    pub month_index: i64,
    pub daily_calls: u64,
    pub monthly_calls: u64,
    pub daily_credits: u64,
    pub monthly_credits: u64,
}

impl QuotaCounters {
    /// Rolls daily/monthly counters over if `now` has crossed into a new
    /// civil day or month (UTC), local to the process clock.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        let (day_index, month_index) = civil_indices(now);
        if day_index != self.day_index {
            self.daily_calls = 0;
            self.daily_credits = 0;
            self.day_index = day_index;
        }
        if month_index != self.month_index {
            self.monthly_calls = 0;
            self.monthly_credits = 0;
            self.month_index = month_index;
        }
    }

    /// Projected value for `axis` after charging `credits` for one call.
    #[must_use]
    pub fn projected(&self, axis: QuotaAxis, credits: u64) -> u64 {
        match axis {
            QuotaAxis::DailyCalls => self.daily_calls + 1,
            QuotaAxis::MonthlyCalls => self.monthly_calls + 1,
            QuotaAxis::DailyCredits => self.daily_credits + credits,
            QuotaAxis::MonthlyCredits => self.monthly_credits + credits,
        }
    }

    /// Commits one call of `credits` against all four counters.
    pub fn commit(&mut self, credits: u64) {
        self.daily_calls += 1;
        self.monthly_calls += 1;
        self.daily_credits += credits;
        self.monthly_credits += credits;
    }
}

/// Civil (UTC calendar) day index and month index for `now`, used as cheap
/// rollover keys: day index is days since the epoch, month index is
/// `year * 12 + (month - 1)`.
#[must_use]
pub fn civil_indices(now: DateTime<Utc>) -> (i64, i64) {
    let day_index = now.date_naive().num_days_from_ce().into();
    let month_index = i64::from(now.year()) * 12 + i64::from(now.month()) - 1;
    (day_index, month_index)
}

/// Start/end of the civil UTC day and month containing `now`.
#[must_use]
pub fn civil_window_boundaries(
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
    let day_start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    let day_end = day_start + chrono::Duration::days(1);

    let month_start_naive = now
        .date_naive()
        .with_day(1)
        .expect("day 1 is always valid")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    let month_start = month_start_naive.and_utc();
    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let month_end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("first of month is always a valid timestamp");

    (day_start, day_end, month_start, month_end)
}
