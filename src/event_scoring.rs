use crate::activity_breakdown::ActivityBreakdown;
use crate::rolling_caps::{CappedActivity, RollingCapper, MSG_PER_HOUR_CAP, VC_MINUTES_PER_DAY_CAP};

/// ボイス1分あたりのES
pub const ES_PER_VC_MINUTE: i64 = 2;
/// ES 1点に必要な賭け金
pub const WAGER_PER_ES: i64 = 200;
/// カジノ由来ESの上限
pub const CASINO_ES_CAP: i64 = 100;
/// オーダー達成1回あたりのES
pub const ES_PER_ORDER: i64 = 25;
/// 儀式達成1回あたりのES
pub const ES_PER_RITUAL: i64 = 120;

/// 前回の集計以降に観測された活動量
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ActivityDelta {
    pub messages: i64,
    pub voice_minutes: i64,
    pub casino_wagered: i64,
    pub orders_completed: i64,
    pub rituals_completed: i64,
}

impl ActivityDelta {
    /// 何も活動がないかどうか
    pub fn is_empty(&self) -> bool {
        *self == ActivityDelta::default()
    }

    /// 別の活動量を加算する
    pub fn merge(&mut self, other: &ActivityDelta) {
        self.messages += other.messages;
        self.voice_minutes += other.voice_minutes;
        self.casino_wagered += other.casino_wagered;
        self.orders_completed += other.orders_completed;
        self.rituals_completed += other.rituals_completed;
    }
}

/// 1回の集計の結果
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct ScorePass {
    /// キャップ適用後に採用された量
    pub applied: CappedActivity,
    /// 採用されたオーダー数
    pub orders_completed: i64,
    /// 採用された儀式数
    pub rituals_completed: i64,
    /// 獲得したES
    pub score: i64,
}

/// 活動量からESを計算する
///
/// 上限は呼び出し側で適用済みでもここで再度適用する。負の値は0として扱う。
pub fn calculate_es(
    messages: i64,
    voice_minutes: i64,
    casino_wagered: i64,
    orders_completed: i64,
    rituals_completed: i64,
) -> i64 {
    let msg_es = messages.max(0).min(MSG_PER_HOUR_CAP);
    let vc_es = voice_minutes.max(0).min(VC_MINUTES_PER_DAY_CAP) * ES_PER_VC_MINUTE;
    let casino_es = (casino_wagered.max(0) / WAGER_PER_ES).min(CASINO_ES_CAP);
    let orders_es = orders_completed.max(0).saturating_mul(ES_PER_ORDER);
    let rituals_es = rituals_completed.max(0).saturating_mul(ES_PER_RITUAL);

    msg_es
        .saturating_add(vc_es)
        .saturating_add(casino_es)
        .saturating_add(orders_es)
        .saturating_add(rituals_es)
}

/// リセットとキャップを適用してESを計算する
pub fn score_pass(
    capper: &RollingCapper,
    breakdown: &mut ActivityBreakdown,
    now: i64,
    delta: &ActivityDelta,
) -> ScorePass {
    let applied = capper.apply(breakdown, now, delta);
    // オーダーと儀式は上限なし
    let orders_completed = delta.orders_completed.max(0);
    let rituals_completed = delta.rituals_completed.max(0);
    let score = calculate_es(
        applied.messages,
        applied.voice_minutes,
        applied.casino_wagered,
        orders_completed,
        rituals_completed,
    );
    ScorePass {
        applied,
        orders_completed,
        rituals_completed,
        score,
    }
}
