use anyhow::{Context as _, Result};
use log::warn;
use serde::{Deserialize, Serialize};

/// ユーザーごとのキャップ集計 (ギルド+イベント+ユーザー単位で保存)
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct ActivityBreakdown {
    /// 現在の1時間枠でカウント済みのメッセージ数
    pub msg_count_hour: i64,
    /// 今日カウント済みのボイス分数
    pub vc_minutes_today: i64,
    /// 今日カウント済みのカジノ賭け金
    pub casino_wagered_today: i64,
    /// 1時間枠を最後にリセットした時刻 (UNIX秒)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_hour_reset_ts: Option<i64>,
    /// 日枠を最後にリセットした時刻 (UNIX秒)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_day_reset_ts: Option<i64>,
}

impl ActivityBreakdown {
    /// 保存済みのJSONを読み込む
    ///
    /// 壊れたJSONや欠損は空の集計として扱い、エラーにはしない
    pub fn from_json(json: Option<&str>) -> ActivityBreakdown {
        let json = match json.map(str::trim) {
            Some(json) if !json.is_empty() => json,
            _ => return ActivityBreakdown::default(),
        };
        match serde_json::from_str::<ActivityBreakdown>(json) {
            Ok(breakdown) => breakdown,
            Err(why) => {
                warn!("集計JSONが読めないため空として扱う: {:?}", why);
                ActivityBreakdown::default()
            }
        }
    }

    /// 保存用のJSONに変換する
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("集計JSONへの変換に失敗")
    }
}
