use chrono::{NaiveDate, NaiveDateTime, Timelike, Utc};
use std::fmt;

/// Hour at which the portal switches from the first to the second half-day
/// form. Fixed by the portal; not tied to the configured trigger windows.
const SLOT_BOUNDARY_HOUR: u32 = 19;

/// Campus wall clock: UTC+8 regardless of the host timezone.
pub fn portal_now() -> NaiveDateTime {
    Utc::now().naive_utc() + chrono::Duration::hours(8)
}

/// Configured trigger times for the two daily reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportWindows {
    pub morning_hour: u32,
    pub morning_minute: u32,
    pub night_hour: u32,
    pub night_minute: u32,
}

impl ReportWindows {
    pub fn report_due(&self, now: NaiveDateTime) -> bool {
        trigger_due(now, self.morning_hour, self.morning_minute)
            || trigger_due(now, self.night_hour, self.night_minute)
    }
}

/// A trigger at `hour:minute` also matches the following minute: the watch
/// tick is a 60 s sleep, so a late tick would otherwise skip the window.
pub fn trigger_due(now: NaiveDateTime, hour: u32, minute: u32) -> bool {
    now.hour() == hour && (now.minute() == minute || now.minute() == minute + 1)
}

/// Which half-day form the portal expects, as the `t` URL parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportSlot {
    First,
    Second,
}

impl ReportSlot {
    pub fn for_hour(hour: u32) -> Self {
        if hour < SLOT_BOUNDARY_HOUR {
            ReportSlot::First
        } else {
            ReportSlot::Second
        }
    }

    pub fn query_value(self) -> &'static str {
        match self {
            ReportSlot::First => "1",
            ReportSlot::Second => "2",
        }
    }
}

/// Human-facing half-day name, derived from the *configured* window hours.
/// Distinct from [`ReportSlot`]: for hours between the fixed slot boundary
/// and the configured night hour the two disagree, and neither may be
/// derived from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowLabel {
    Morning,
    Evening,
}

impl WindowLabel {
    pub fn for_hour(hour: u32, windows: &ReportWindows) -> Self {
        if windows.morning_hour <= hour && hour < windows.night_hour {
            WindowLabel::Morning
        } else {
            WindowLabel::Evening
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WindowLabel::Morning => "morning",
            WindowLabel::Evening => "evening",
        }
    }
}

impl fmt::Display for WindowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the submitter needs to know about *when* it is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub date: NaiveDate,
    pub slot: ReportSlot,
    pub label: WindowLabel,
}

impl ReportWindow {
    pub fn at(now: NaiveDateTime, windows: &ReportWindows) -> Self {
        ReportWindow {
            date: now.date(),
            slot: ReportSlot::for_hour(now.hour()),
            label: WindowLabel::for_hour(now.hour(), windows),
        }
    }
}
