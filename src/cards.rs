use crate::boss::{hp_bar, BossUpdate};
use crate::event_store::{ContributionRecord, EventRecord};
use crate::order_templates::Order;

/// 作者欄に出す名前
pub const AUTHOR_NAME: &str = "Isla";
/// 作者欄のアイコン
pub const AUTHOR_ICON: &str = "https://i.imgur.com/5nsuuCV.png";
/// 埋め込みの色
pub const CARD_COLOUR: u32 = 0x8B_5C_F6;

/// 埋め込みメッセージの内容
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Card {
    pub title: String,
    pub description: String,
    /// (名前, 値, インライン)
    pub fields: Vec<(String, String, bool)>,
}

impl Card {
    fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push((name.into(), value.into(), inline));
        self
    }
}

/// 3桁区切りで数値を整形する
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

/// 短いお知らせ
pub fn notice(title: &str, description: &str) -> Card {
    Card::new(title, description)
}

/// 自分のESカード
pub fn score_card(event: &EventRecord, record: Option<&ContributionRecord>) -> Card {
    let record = match record {
        Some(record) if record.score_total > 0 || record.msg_total > 0 => record,
        _ => {
            return Card::new(
                event.name.as_str(),
                "Nothing yet.\nTalk, sit in voice, play. I'm counting.",
            )
        }
    };
    Card::new(
        event.name.as_str(),
        format!("Event Score: **{} ES**", format_number(record.score_total)),
    )
    .field("Messages", format_number(record.msg_total), true)
    .field("Voice", format!("{} min", format_number(record.vc_total)), true)
    .field("Wagered", format!("{} Coins", format_number(record.wager_total)), true)
    .field("Orders", format_number(record.orders_total), true)
    .field("Rituals", format_number(record.rituals_total), true)
}

/// ランキングカード
pub fn leaderboard_card(event: &EventRecord, records: &[ContributionRecord]) -> Card {
    if records.is_empty() {
        return Card::new(format!("{} · Top", event.name), "No one has earned anything yet.");
    }
    let lines = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            format!(
                "`#{}` <@{}> · **{}** ES",
                i + 1,
                record.user_id,
                format_number(record.score_total)
            )
        })
        .collect::<Vec<_>>();
    Card::new(format!("{} · Top", event.name), lines.join("\n"))
}

/// オーダーカード
pub fn order_card(order: &Order) -> Card {
    let hours = order.duration_minutes / 60;
    let minutes = order.duration_minutes % 60;
    let duration = match (hours, minutes) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    };
    let mut card = Card::new(order.title, order.description.as_str())
        .field("Time", duration, true)
        .field(
            "Reward",
            format!("{} Coins", format_number(order.reward_coins)),
            true,
        );
    if order.slots > 1 {
        card = card.field("Slots", order.slots.to_string(), true);
    }
    card
}

/// ボスのマイルストーン告知カード
pub fn milestone_card(event: &EventRecord, update: &BossUpdate) -> Card {
    let description = if update.defeated {
        String::from("It's down.\nWell done. All of you.")
    } else {
        format!(
            "Status check.\nHP: **{}%** `{}`\nSomething just unlocked.",
            update.hp_pct,
            hp_bar(update.hp_pct, 100)
        )
    };
    Card::new(event.name.as_str(), description).field(
        "Phase",
        update.phase.to_string(),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::EventType;
    use crate::order_templates::RequirementKind;
    use serenity::model::id::{GuildId, UserId};

    fn event() -> EventRecord {
        EventRecord {
            event_id: 1,
            guild_id: GuildId(1),
            event_type: EventType::HolidayWeek,
            name: String::from("Winter Siege"),
            start_ts: 0,
            is_active: true,
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
        assert_eq!(format_number(-20_000), "-20,000");
    }

    #[test]
    fn test_score_card() {
        let empty = score_card(&event(), None);
        assert!(empty.fields.is_empty());

        let record = ContributionRecord {
            user_id: UserId(5),
            score_total: 1_250,
            msg_total: 30,
            vc_total: 60,
            ..ContributionRecord::default()
        };
        let card = score_card(&event(), Some(&record));
        assert_eq!(card.description, "Event Score: **1,250 ES**");
        assert_eq!(card.fields[1], ("Voice".to_string(), "60 min".to_string(), true));
    }

    #[test]
    fn test_leaderboard_card() {
        let records = vec![
            ContributionRecord {
                user_id: UserId(2),
                score_total: 3_000,
                ..ContributionRecord::default()
            },
            ContributionRecord {
                user_id: UserId(3),
                score_total: 80,
                ..ContributionRecord::default()
            },
        ];
        let card = leaderboard_card(&event(), &records);
        assert_eq!(card.title, "Winter Siege · Top");
        assert_eq!(card.description, "`#1` <@2> · **3,000** ES\n`#2` <@3> · **80** ES");
    }

    #[test]
    fn test_order_card_duration() {
        let order = Order {
            key: "vc_small",
            title: "Voice time.",
            description: String::from("Voice."),
            requirement: RequirementKind::VcMinutes,
            target: 20,
            duration_minutes: 185,
            slots: 1,
            reward_coins: 1_200,
            reward_obedience: 6,
        };
        let card = order_card(&order);
        assert_eq!(card.fields[0].1, "3h 5m");
        assert_eq!(card.fields[1].1, "1,200 Coins");
        assert_eq!(card.fields.len(), 2);
    }

    #[test]
    fn test_milestone_card() {
        let update = BossUpdate {
            hp_pct: 50,
            phase: 3,
            newly_unlocked: vec![50],
            defeated: false,
        };
        let card = milestone_card(&event(), &update);
        assert!(card.description.contains("**50%**"));
        assert!(card.description.contains("█████░░░░░"));
    }
}
