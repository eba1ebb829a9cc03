//! Daily → weekly resampling.
//!
//! Bars are grouped by ISO week. A weekly bar takes the first open, the
//! highest high, the lowest low and the last close of its week, and is dated
//! on the week's last trading day. Input order is preserved: a week is
//! closed as soon as a bar from a different week appears.

use chrono::Datelike;

use crate::domain::{Bar, Frequency};

pub fn resample_weekly(daily: &[Bar]) -> Vec<Bar> {
    let mut weekly: Vec<Bar> = Vec::new();
    let mut current_week = None;

    for bar in daily {
        let iso = bar.date.iso_week();
        let week = (iso.year(), iso.week());

        match weekly.last_mut() {
            Some(acc) if current_week == Some(week) => {
                acc.high = acc.high.max(bar.high);
                acc.low = acc.low.min(bar.low);
                acc.close = bar.close;
                acc.volume = acc.volume.saturating_add(bar.volume);
                acc.date = bar.date;
            }
            _ => {
                weekly.push(Bar {
                    frequency: Frequency::Weekly,
                    ..bar.clone()
                });
                current_week = Some(week);
            }
        }
    }

    weekly
}
