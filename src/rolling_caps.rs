use chrono::{LocalResult, TimeZone};
use chrono_tz::Tz;

use crate::activity_breakdown::ActivityBreakdown;
use crate::event_scoring::ActivityDelta;

/// 1時間あたりのメッセージ上限
pub const MSG_PER_HOUR_CAP: i64 = 30;
/// 1日あたりのボイス分数上限
pub const VC_MINUTES_PER_DAY_CAP: i64 = 60;
/// 1日あたりのカジノ賭け金上限
pub const CASINO_WAGER_PER_DAY_CAP: i64 = 20_000;

/// 1時間枠の長さ (秒)
const HOUR_WINDOW_SEC: i64 = 3600;

/// キャップ適用後に採用された量
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct CappedActivity {
    pub messages: i64,
    pub voice_minutes: i64,
    pub casino_wagered: i64,
}

/// 時間枠ごとの上限を管理するクラス
#[derive(Debug, Clone)]
pub struct RollingCapper {
    /// 日付の区切りに使うタイムゾーン
    timezone: Tz,
}

impl RollingCapper {
    /// コンストラクタ
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// `now` が属する日の0時 (設定タイムゾーン) をUNIX秒で返す
    pub fn day_start(&self, now: i64) -> i64 {
        let local = match self.timezone.timestamp_opt(now, 0) {
            LocalResult::Single(local) => local,
            _ => return now - now.rem_euclid(86_400),
        };
        let date = local.naive_local().date();
        // 0時が夏時間の切り替えで存在しない地域では最初に存在する時刻を使う
        (0..3)
            .filter_map(|hour| date.and_hms_opt(hour, 0, 0))
            .find_map(|naive| self.timezone.from_local_datetime(&naive).earliest())
            .map(|start| start.timestamp())
            .unwrap_or_else(|| now - now.rem_euclid(86_400))
    }

    /// リセット判定をしてから上限を適用する
    ///
    /// `breakdown` はその場で更新され、呼び出し側が保存する
    pub fn apply(
        &self,
        breakdown: &mut ActivityBreakdown,
        now: i64,
        delta: &ActivityDelta,
    ) -> CappedActivity {
        // メッセージより先に1時間枠をリセット
        if breakdown.last_hour_reset_ts.unwrap_or(i64::MIN) < now - HOUR_WINDOW_SEC {
            breakdown.msg_count_hour = 0;
            breakdown.last_hour_reset_ts = Some(now);
        }

        // ボイスとカジノより先に日枠をリセット
        let today_start = self.day_start(now);
        if breakdown.last_day_reset_ts.unwrap_or(i64::MIN) < today_start {
            breakdown.vc_minutes_today = 0;
            breakdown.casino_wagered_today = 0;
            breakdown.last_day_reset_ts = Some(today_start);
        }

        CappedActivity {
            messages: admit(&mut breakdown.msg_count_hour, delta.messages, MSG_PER_HOUR_CAP),
            voice_minutes: admit(
                &mut breakdown.vc_minutes_today,
                delta.voice_minutes,
                VC_MINUTES_PER_DAY_CAP,
            ),
            casino_wagered: admit(
                &mut breakdown.casino_wagered_today,
                delta.casino_wagered,
                CASINO_WAGER_PER_DAY_CAP,
            ),
        }
    }
}

/// 残り枠の分だけ加算し、採用した量を返す
fn admit(counter: &mut i64, delta: i64, ceiling: i64) -> i64 {
    // 保存値が範囲外でも枠内に戻す
    let current = (*counter).clamp(0, ceiling);
    let applied = delta.max(0).min(ceiling - current);
    *counter = current + applied;
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONDON: Tz = chrono_tz::Europe::London;

    fn delta(messages: i64, voice_minutes: i64, casino_wagered: i64) -> ActivityDelta {
        ActivityDelta {
            messages,
            voice_minutes,
            casino_wagered,
            ..ActivityDelta::default()
        }
    }

    #[test]
    fn test_day_start_follows_london_offsets() {
        let capper = RollingCapper::new(LONDON);
        // 2024-01-15 12:00 UTC (GMT) -> 2024-01-15 00:00 UTC
        assert_eq!(capper.day_start(1_705_320_000), 1_705_276_800);
        // 2024-07-10 23:30 UTC は BST で 7/11 00:30 -> 2024-07-10 23:00 UTC
        assert_eq!(capper.day_start(1_720_654_200), 1_720_652_400);
        // 2024-03-31 (夏時間開始日) の0時はまだGMT
        assert_eq!(capper.day_start(1_711_886_400), 1_711_843_200);
        // 2024-10-27 (夏時間終了日) の0時はまだBST
        assert_eq!(capper.day_start(1_730_030_400), 1_729_983_600);
    }

    #[test]
    fn test_caps_are_enforced_across_passes() {
        let capper = RollingCapper::new(LONDON);
        let now = 1_705_320_000;
        let mut breakdown = ActivityBreakdown::default();

        let first = capper.apply(&mut breakdown, now, &delta(20, 45, 15_000));
        assert_eq!(first, CappedActivity { messages: 20, voice_minutes: 45, casino_wagered: 15_000 });

        let second = capper.apply(&mut breakdown, now + 60, &delta(20, 45, 15_000));
        assert_eq!(second, CappedActivity { messages: 10, voice_minutes: 15, casino_wagered: 5_000 });
        assert_eq!(breakdown.msg_count_hour, MSG_PER_HOUR_CAP);
        assert_eq!(breakdown.vc_minutes_today, VC_MINUTES_PER_DAY_CAP);
        assert_eq!(breakdown.casino_wagered_today, CASINO_WAGER_PER_DAY_CAP);

        let third = capper.apply(&mut breakdown, now + 120, &delta(5, 5, 5));
        assert_eq!(third, CappedActivity::default());
    }

    #[test]
    fn test_hour_reset_after_3601_seconds() {
        let capper = RollingCapper::new(LONDON);
        let now = 1_705_320_000;
        let mut breakdown = ActivityBreakdown {
            msg_count_hour: 30,
            last_hour_reset_ts: Some(now - 3601),
            last_day_reset_ts: Some(capper.day_start(now)),
            ..ActivityBreakdown::default()
        };
        let applied = capper.apply(&mut breakdown, now, &delta(4, 0, 0));
        assert_eq!(applied.messages, 4);
        assert_eq!(breakdown.msg_count_hour, 4);
        assert_eq!(breakdown.last_hour_reset_ts, Some(now));
    }

    #[test]
    fn test_no_hour_reset_at_exactly_one_hour() {
        let capper = RollingCapper::new(LONDON);
        let now = 1_705_320_000;
        let mut breakdown = ActivityBreakdown {
            msg_count_hour: 30,
            last_hour_reset_ts: Some(now - 3600),
            ..ActivityBreakdown::default()
        };
        let applied = capper.apply(&mut breakdown, now, &delta(4, 0, 0));
        assert_eq!(applied.messages, 0);
        assert_eq!(breakdown.last_hour_reset_ts, Some(now - 3600));
    }

    #[test]
    fn test_repeat_pass_without_delta_is_idempotent() {
        let capper = RollingCapper::new(LONDON);
        let now = 1_705_320_000;
        let mut breakdown = ActivityBreakdown::default();
        capper.apply(&mut breakdown, now, &delta(3, 7, 900));
        let snapshot = breakdown.clone();

        let applied = capper.apply(&mut breakdown, now + 600, &ActivityDelta::default());
        assert_eq!(applied, CappedActivity::default());
        assert_eq!(breakdown, snapshot);
    }

    #[test]
    fn test_day_rolls_at_london_midnight_during_bst() {
        let capper = RollingCapper::new(LONDON);
        // 2024-07-10 の0時 (BST) にリセット済み
        let mut breakdown = ActivityBreakdown {
            vc_minutes_today: 60,
            casino_wagered_today: 20_000,
            last_hour_reset_ts: Some(1_720_650_600),
            last_day_reset_ts: Some(1_720_566_000),
            ..ActivityBreakdown::default()
        };

        // 22:30 UTC = 23:30 BST: まだ同じ日
        let applied = capper.apply(&mut breakdown, 1_720_650_600, &delta(0, 10, 100));
        assert_eq!(applied.voice_minutes, 0);
        assert_eq!(applied.casino_wagered, 0);

        // 23:30 UTC = 翌日 00:30 BST: UTCではまだ同日だがリセットされる
        let applied = capper.apply(&mut breakdown, 1_720_654_200, &delta(0, 10, 100));
        assert_eq!(applied.voice_minutes, 10);
        assert_eq!(applied.casino_wagered, 100);
        assert_eq!(breakdown.last_day_reset_ts, Some(1_720_652_400));
    }

    #[test]
    fn test_watermarks_never_move_backwards() {
        let capper = RollingCapper::new(LONDON);
        let now = 1_720_654_200;
        let mut breakdown = ActivityBreakdown {
            last_hour_reset_ts: Some(now + 500),
            last_day_reset_ts: Some(now + 500),
            ..ActivityBreakdown::default()
        };
        capper.apply(&mut breakdown, now, &delta(1, 1, 1));
        assert_eq!(breakdown.last_hour_reset_ts, Some(now + 500));
        assert_eq!(breakdown.last_day_reset_ts, Some(now + 500));
    }

    #[test]
    fn test_negative_and_out_of_range_values_are_clamped() {
        let capper = RollingCapper::new(LONDON);
        let now = 1_705_320_000;
        let mut breakdown = ActivityBreakdown {
            msg_count_hour: 95,
            vc_minutes_today: -12,
            last_hour_reset_ts: Some(now),
            last_day_reset_ts: Some(capper.day_start(now)),
            ..ActivityBreakdown::default()
        };
        let applied = capper.apply(&mut breakdown, now, &delta(5, -3, -500));
        assert_eq!(applied, CappedActivity::default());
        assert_eq!(breakdown.msg_count_hour, MSG_PER_HOUR_CAP);
        assert_eq!(breakdown.vc_minutes_today, 0);
        assert_eq!(breakdown.casino_wagered_today, 0);
    }

    #[test]
    fn test_timezone_is_configurable() {
        let capper = RollingCapper::new(chrono_tz::UTC);
        // 2024-07-10 23:30 UTC -> 2024-07-10 00:00 UTC
        assert_eq!(capper.day_start(1_720_654_200), 1_720_569_600);
    }
}
