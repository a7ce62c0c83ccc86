/// HP割合のマイルストーン (%)
pub const MILESTONES: [i64; 5] = [80, 60, 40, 20, 0];

/// イベントのボス
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct BossState {
    pub hp_max: i64,
    pub hp_current: i64,
    /// 解放済みのマイルストーン
    pub unlocked: Vec<i64>,
}

/// ダメージを与えた結果
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct BossUpdate {
    /// 残りHPの割合 (%)
    pub hp_pct: i64,
    /// 現在のフェーズ (1-4)
    pub phase: u8,
    /// 今回新たに解放されたマイルストーン
    pub newly_unlocked: Vec<i64>,
    /// 撃破されたかどうか
    pub defeated: bool,
}

impl BossState {
    /// 新しいボス
    pub fn new(hp_max: i64) -> Self {
        let hp_max = hp_max.max(1);
        Self {
            hp_max,
            hp_current: hp_max,
            unlocked: Vec::new(),
        }
    }

    /// 残りHPの割合 (%, 切り捨て)
    pub fn hp_pct(&self) -> i64 {
        self.hp_current.clamp(0, self.hp_max.max(1)).saturating_mul(100) / self.hp_max.max(1)
    }

    /// 残りHPからフェーズを決める
    pub fn phase(&self) -> u8 {
        match self.hp_pct() {
            pct if pct > 75 => 1,
            pct if pct > 50 => 2,
            pct if pct > 25 => 3,
            _ => 4,
        }
    }

    /// 獲得ESをそのままダメージとして与える
    pub fn apply_damage(&mut self, damage: i64) -> BossUpdate {
        self.hp_current = (self.hp_current - damage.max(0)).max(0);
        let hp_pct = self.hp_pct();

        let newly_unlocked = MILESTONES
            .iter()
            .copied()
            .filter(|milestone| hp_pct <= *milestone && !self.unlocked.contains(milestone))
            .collect::<Vec<_>>();
        self.unlocked.extend(newly_unlocked.iter().copied());

        BossUpdate {
            hp_pct,
            phase: self.phase(),
            newly_unlocked,
            defeated: self.hp_current <= 0,
        }
    }
}

/// HPバーを描画する
pub fn hp_bar(hp_current: i64, hp_max: i64) -> String {
    const WIDTH: i64 = 10;
    let filled = ((hp_current.max(0) * WIDTH) / hp_max.max(1)).clamp(0, WIDTH);
    format!(
        "{}{}",
        "█".repeat(filled as usize),
        "░".repeat((WIDTH - filled) as usize)
    )
}
