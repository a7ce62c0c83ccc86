use rand::seq::SliceRandom;
use rand::Rng;

/// 重み付き抽選の対象
pub trait Weighted {
    /// 抽選の重み (負の値は0として扱う)
    fn weight(&self) -> i64 {
        1
    }
}

/// 達成条件の種類
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RequirementKind {
    /// メッセージ数
    Messages,
    /// ボイス分数
    VcMinutes,
    /// カジノのラウンド数
    CasinoRounds,
    /// カジノの賭け金
    CasinoWager,
    /// スタッフが確認する手動提出
    Manual,
}

impl RequirementKind {
    /// 説明文の差し込み位置
    fn placeholder(&self) -> Option<&'static str> {
        match self {
            RequirementKind::Messages | RequirementKind::CasinoRounds => Some("{count}"),
            RequirementKind::VcMinutes => Some("{minutes}"),
            RequirementKind::CasinoWager => Some("{coins}"),
            RequirementKind::Manual => None,
        }
    }
}

/// 個人オーダーのテンプレート
#[derive(Debug, PartialEq)]
pub struct OrderTemplate {
    pub key: &'static str,
    pub weight: i64,
    pub title: &'static str,
    pub desc_variants: &'static [&'static str],
    pub requirement: RequirementKind,
    /// 制限時間の範囲 (分)
    pub duration_minutes: (u32, u32),
    pub slots: u32,
    /// 基本報酬 (コイン, 服従度)
    pub base_reward: (i64, i64),
}

impl Weighted for OrderTemplate {
    fn weight(&self) -> i64 {
        self.weight
    }
}

/// 週替わり儀式のテンプレート
#[derive(Debug, PartialEq)]
pub struct RitualTemplate {
    pub key: &'static str,
    pub theme: &'static str,
    pub title: &'static str,
    pub desc_variants: &'static [&'static str],
    pub requirement: RequirementKind,
    /// 目標値の候補
    pub targets: &'static [i64],
    pub duration_minutes: u32,
    pub slots: u32,
    pub base_reward: (i64, i64),
}

impl Weighted for RitualTemplate {}

pub const PERSONAL_TEMPLATES: &[OrderTemplate] = &[
    OrderTemplate {
        key: "chat_small",
        weight: 5,
        title: "Talk.",
        desc_variants: &[
            "Send **{count} messages**.\nKeep it moving.",
            "I want **{count} messages**.\nNo lurking.",
            "Speak.\n**{count} messages**.",
        ],
        requirement: RequirementKind::Messages,
        duration_minutes: (90, 240),
        slots: 1,
        base_reward: (180, 5),
    },
    OrderTemplate {
        key: "chat_medium",
        weight: 3,
        title: "Be seen.",
        desc_variants: &[
            "Send **{count} messages** today.\nShow up.",
            "I want you active.\n**{count} messages**.",
        ],
        requirement: RequirementKind::Messages,
        duration_minutes: (180, 360),
        slots: 1,
        base_reward: (260, 7),
    },
    OrderTemplate {
        key: "vc_small",
        weight: 3,
        title: "Voice time.",
        desc_variants: &[
            "Spend **{minutes} minutes** in voice.\nI'll notice.",
            "Voice.\n**{minutes} minutes**.\nDon't vanish.",
        ],
        requirement: RequirementKind::VcMinutes,
        duration_minutes: (180, 480),
        slots: 1,
        base_reward: (240, 6),
    },
    OrderTemplate {
        key: "casino_rounds",
        weight: 3,
        title: "Casino.",
        desc_variants: &[
            "Play **{count} casino rounds**.\nDon't be shy.",
            "Give me **{count} rounds**.\nI want to watch.",
        ],
        requirement: RequirementKind::CasinoRounds,
        duration_minutes: (120, 360),
        slots: 1,
        base_reward: (220, 6),
    },
    OrderTemplate {
        key: "casino_wager",
        weight: 2,
        title: "Wager.",
        desc_variants: &[
            "Wager **{coins} Coins** total.\nMake it count.",
            "I want **{coins} Coins** wagered.\nShow commitment.",
        ],
        requirement: RequirementKind::CasinoWager,
        duration_minutes: (120, 360),
        slots: 1,
        base_reward: (300, 8),
    },
    OrderTemplate {
        key: "manual_proof",
        weight: 1,
        title: "Proof.",
        desc_variants: &[
            "Do something useful.\nSubmit proof when you're done.",
            "I want effort.\nSend proof when you're done.",
        ],
        requirement: RequirementKind::Manual,
        duration_minutes: (240, 720),
        slots: 1,
        base_reward: (350, 9),
    },
];

pub const RITUAL_TEMPLATES: &[RitualTemplate] = &[
    RitualTemplate {
        key: "drain_marathon",
        theme: "casino",
        title: "Ritual: Drain Marathon",
        desc_variants: &[
            "Wager **{coins} Coins** across the week.\nLosses still count.",
            "A slow drain.\nWager **{coins} Coins** this week.",
        ],
        requirement: RequirementKind::CasinoWager,
        targets: &[15_000, 20_000, 25_000, 30_000],
        duration_minutes: 7 * 24 * 60,
        slots: 50,
        base_reward: (2500, 35),
    },
    RitualTemplate {
        key: "luck_submission",
        theme: "casino",
        title: "Ritual: Luck Submission",
        desc_variants: &[
            "Play **{count} rounds** this week.\nConsistency matters.",
            "I want repetition.\n**{count} rounds**.",
        ],
        requirement: RequirementKind::CasinoRounds,
        targets: &[20, 30, 40],
        duration_minutes: 7 * 24 * 60,
        slots: 50,
        base_reward: (2200, 32),
    },
    RitualTemplate {
        key: "pack_warmup",
        theme: "community",
        title: "Ritual: Pack Warmup",
        desc_variants: &[
            "Send **{count} messages** this week.\nKeep the pack alive.",
            "No silence.\n**{count} messages** this week.",
        ],
        requirement: RequirementKind::Messages,
        targets: &[120, 180, 240],
        duration_minutes: 7 * 24 * 60,
        slots: 80,
        base_reward: (1800, 28),
    },
];

/// 重み付きでテンプレートを1つ選ぶ
///
/// 重みの合計が0の場合は最後の要素を返す。空のリストの場合のみ `None`。
pub fn weighted_choice<'a, T: Weighted, R: Rng>(
    rng: &mut R,
    items: &'a [T],
) -> Option<&'a T> {
    let total: i64 = items.iter().map(|item| item.weight().max(0)).sum();
    if total <= 0 {
        return items.last();
    }

    // [0, total) から一様に引き、累積が引いた値を超えた要素を採用
    let roll = rng.gen_range(0..total);
    let mut upto = 0;
    for item in items {
        upto += item.weight().max(0);
        if roll < upto {
            return Some(item);
        }
    }
    items.last()
}

/// 直近の行動のスナップショット
#[derive(Debug, Default, Clone, Copy)]
pub struct ActivitySnapshot {
    pub messages: i64,
    pub voice_minutes: i64,
    pub casino_rounds: i64,
    pub casino_wagered: i64,
}

/// 個人ごとに重みを調整したテンプレート
#[derive(Debug)]
pub struct PersonalCandidate {
    pub template: &'static OrderTemplate,
    pub weight: i64,
}

impl Weighted for PersonalCandidate {
    fn weight(&self) -> i64 {
        self.weight
    }
}

/// 行動に合わせて重みを調整した候補リストを作る
pub fn personal_pool(snapshot: &ActivitySnapshot) -> Vec<PersonalCandidate> {
    PERSONAL_TEMPLATES
        .iter()
        .map(|template| {
            let mut weight = template.weight;
            // 静かな人にはチャット
            if snapshot.messages < 15 && template.key.starts_with("chat") {
                weight += 4;
            }
            // ボイスに来ない人にはボイス
            if snapshot.voice_minutes < 10 && template.key.starts_with("vc") {
                weight += 3;
            }
            // カジノを触っていない人にはカジノ
            if snapshot.casino_rounds < 3 && template.key.starts_with("casino") {
                weight += 2;
            }
            // すでに活発な人はチャットを減らす
            if snapshot.messages > 80 && template.key.starts_with("chat") {
                weight = (weight - 3).max(1);
            }
            PersonalCandidate { template, weight }
        })
        .collect()
}

/// 目標値
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct OrderTargets {
    pub messages: i64,
    pub voice_minutes: i64,
    pub casino_rounds: i64,
    pub casino_wager: i64,
}

/// 関係段階ごとの難易度倍率
const STAGE_DIFFICULTY: [f64; 5] = [0.9, 1.0, 1.15, 1.3, 1.5];
/// 関係段階ごとの報酬倍率
const STAGE_REWARD: [f64; 5] = [1.0, 1.05, 1.12, 1.20, 1.30];

fn stage_index(stage: usize) -> usize {
    stage.min(STAGE_DIFFICULTY.len() - 1)
}

fn scaled(base: f64, activity: i64, rate: f64, mult: f64, lo: i64, hi: i64) -> i64 {
    (((base + activity.max(0) as f64 * rate) * mult).round() as i64).clamp(lo, hi)
}

/// 行動量と関係段階から目標値を決める
pub fn scale_targets(snapshot: &ActivitySnapshot, stage: usize) -> OrderTargets {
    let mult = STAGE_DIFFICULTY[stage_index(stage)];
    OrderTargets {
        messages: scaled(10.0, snapshot.messages, 0.12, mult, 6, 35),
        voice_minutes: scaled(15.0, snapshot.voice_minutes, 0.15, mult, 10, 60),
        casino_rounds: scaled(4.0, snapshot.casino_rounds, 0.2, mult, 3, 12),
        casino_wager: scaled(1200.0, snapshot.casino_wagered, 0.08, mult, 500, 12_000),
    }
}

/// 関係段階で報酬を増やす
pub fn scale_rewards(base_coins: i64, base_obedience: i64, stage: usize) -> (i64, i64) {
    let mult = STAGE_REWARD[stage_index(stage)];
    (
        (base_coins as f64 * mult) as i64,
        (base_obedience as f64 * mult) as i64,
    )
}

/// 掲示するオーダー
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub key: &'static str,
    pub title: &'static str,
    pub description: String,
    pub requirement: RequirementKind,
    /// 目標値 (手動提出は0)
    pub target: i64,
    pub duration_minutes: u32,
    pub slots: u32,
    pub reward_coins: i64,
    pub reward_obedience: i64,
}

fn render<R: Rng>(
    rng: &mut R,
    variants: &[&str],
    requirement: RequirementKind,
    target: i64,
) -> String {
    let variant = variants.choose(rng).copied().unwrap_or_default();
    match requirement.placeholder() {
        Some(placeholder) => variant.replace(placeholder, &target.to_string()),
        None => variant.to_string(),
    }
}

/// 個人オーダーを作る
pub fn build_personal_order<R: Rng>(
    rng: &mut R,
    snapshot: &ActivitySnapshot,
    stage: usize,
) -> Option<Order> {
    let pool = personal_pool(snapshot);
    let template = weighted_choice(rng, &pool)?.template;
    let targets = scale_targets(snapshot, stage);
    let target = match template.requirement {
        RequirementKind::Messages => targets.messages,
        RequirementKind::VcMinutes => targets.voice_minutes,
        RequirementKind::CasinoRounds => targets.casino_rounds,
        RequirementKind::CasinoWager => targets.casino_wager,
        RequirementKind::Manual => 0,
    };
    let (min, max) = template.duration_minutes;
    let (reward_coins, reward_obedience) =
        scale_rewards(template.base_reward.0, template.base_reward.1, stage);

    Some(Order {
        key: template.key,
        title: template.title,
        description: render(rng, template.desc_variants, template.requirement, target),
        requirement: template.requirement,
        target,
        duration_minutes: rng.gen_range(min..=max),
        slots: template.slots,
        reward_coins,
        reward_obedience,
    })
}

/// 週替わり儀式を作る (報酬は個人で変えない)
pub fn build_ritual<R: Rng>(rng: &mut R) -> Option<Order> {
    let template = weighted_choice(rng, RITUAL_TEMPLATES)?;
    let target = template.targets.choose(rng).copied().unwrap_or_default();
    Some(Order {
        key: template.key,
        title: template.title,
        description: render(rng, template.desc_variants, template.requirement, target),
        requirement: template.requirement,
        target,
        duration_minutes: template.duration_minutes,
        slots: template.slots,
        reward_coins: template.base_reward.0,
        reward_obedience: template.base_reward.1,
    })
}
