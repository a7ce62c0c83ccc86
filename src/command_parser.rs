use anyhow::{Context as _, Result};
use regex::Regex;
use serenity::model::id::UserId;

use crate::event_store::EventType;

/// テキストコマンド
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    /// 自分のESを表示
    EventMe,
    /// ランキングを表示
    EventTop,
    /// イベントを開始 (スタッフ用)
    EventStart {
        event_type: EventType,
        boss_hp: Option<i64>,
        name: String,
    },
    /// イベントを終了 (スタッフ用)
    EventEnd,
    /// アクティブなイベントにボスを付ける (スタッフ用)
    EventBoss { hp: i64 },
    /// 個人オーダーを表示
    Order,
    /// 儀式を表示
    Ritual,
    /// オーダー達成を記録 (スタッフ用)
    OrderDone(UserId),
    /// 儀式達成を記録 (スタッフ用)
    RitualDone(UserId),
}

impl Command {
    /// スタッフ権限が必要かどうか
    pub fn requires_staff(&self) -> bool {
        matches!(
            self,
            Command::EventStart { .. }
                | Command::EventEnd
                | Command::EventBoss { .. }
                | Command::OrderDone(_)
                | Command::RitualDone(_)
        )
    }
}

/// コマンド解析用クラス
pub struct CommandParser {
    /// コマンド全体
    command_regex: Regex,
    /// イベント開始の引数
    start_regex: Regex,
    /// ボスの引数
    boss_regex: Regex,
    /// 達成記録の引数
    done_regex: Regex,
}

impl CommandParser {
    /// 正規表現パターンを準備
    pub fn new(prefix: &str) -> Result<CommandParser> {
        let command_regex = Regex::new(&format!(
            r"^{}(event|order|ritual)(?:\s+(.*))?$",
            regex::escape(prefix)
        ))
        .context("コマンドの正規表現の構築に失敗")?;
        let start_regex =
            Regex::new(r"^start\s+(holiday_week|season_era)(?:\s+(\d+))?\s+(\S.*)$")
                .context("イベント開始の正規表現の構築に失敗")?;
        let boss_regex =
            Regex::new(r"^boss\s+(\d+)$").context("ボスの正規表現の構築に失敗")?;
        let done_regex =
            Regex::new(r"^done\s+<@!?(\d+)>$").context("達成記録の正規表現の構築に失敗")?;
        Ok(CommandParser {
            command_regex,
            start_regex,
            boss_regex,
            done_regex,
        })
    }

    /// メッセージをパースする (コマンドでなければ `None`)
    pub fn parse(&self, message: &str) -> Option<Command> {
        let caps = self.command_regex.captures(message.trim())?;
        let args = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        match (&caps[1], args) {
            ("event", "") => Some(Command::EventMe),
            ("event", "top") => Some(Command::EventTop),
            ("event", "end") => Some(Command::EventEnd),
            ("event", args) if args.starts_with("boss") => Some(Command::EventBoss {
                hp: self.boss_regex.captures(args)?[1].parse().ok()?,
            }),
            ("event", args) => {
                let start = self.start_regex.captures(args)?;
                Some(Command::EventStart {
                    event_type: start[1].parse().ok()?,
                    boss_hp: match start.get(2) {
                        Some(hp) => Some(hp.as_str().parse().ok()?),
                        None => None,
                    },
                    name: start[3].trim().to_string(),
                })
            }
            ("order", "") => Some(Command::Order),
            ("ritual", "") => Some(Command::Ritual),
            (kind, args) => {
                let user_id = UserId(self.done_regex.captures(args)?[1].parse().ok()?);
                match kind {
                    "order" => Some(Command::OrderDone(user_id)),
                    _ => Some(Command::RitualDone(user_id)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new("!").unwrap()
    }

    #[test]
    fn test_simple_commands() {
        let parser = parser();
        assert_eq!(parser.parse("!event"), Some(Command::EventMe));
        assert_eq!(parser.parse("  !event top "), Some(Command::EventTop));
        assert_eq!(parser.parse("!event end"), Some(Command::EventEnd));
        assert_eq!(parser.parse("!order"), Some(Command::Order));
        assert_eq!(parser.parse("!ritual"), Some(Command::Ritual));
    }

    #[test]
    fn test_not_commands() {
        let parser = parser();
        assert_eq!(parser.parse("event"), None);
        assert_eq!(parser.parse("hello !event"), None);
        assert_eq!(parser.parse("!events"), None);
        assert_eq!(parser.parse("!event bogus"), None);
        assert_eq!(parser.parse("!order done someone"), None);
    }

    #[test]
    fn test_event_start() {
        let parser = parser();
        assert_eq!(
            parser.parse("!event start holiday_week 500000 Winter Siege"),
            Some(Command::EventStart {
                event_type: EventType::HolidayWeek,
                boss_hp: Some(500_000),
                name: "Winter Siege".to_string(),
            })
        );
        assert_eq!(
            parser.parse("!event start season_era Autumn Era"),
            Some(Command::EventStart {
                event_type: EventType::SeasonEra,
                boss_hp: None,
                name: "Autumn Era".to_string(),
            })
        );
        assert_eq!(parser.parse("!event start weekly Nope"), None);
    }

    #[test]
    fn test_event_boss() {
        let parser = parser();
        assert_eq!(
            parser.parse("!event boss 250000"),
            Some(Command::EventBoss { hp: 250_000 })
        );
        assert!(Command::EventBoss { hp: 1 }.requires_staff());
        assert_eq!(parser.parse("!event boss"), None);
        assert_eq!(parser.parse("!event boss lots"), None);
    }

    #[test]
    fn test_done_commands() {
        let parser = parser();
        assert_eq!(
            parser.parse("!order done <@123456>"),
            Some(Command::OrderDone(UserId(123456)))
        );
        assert_eq!(
            parser.parse("!ritual done <@!42>"),
            Some(Command::RitualDone(UserId(42)))
        );
        assert!(Command::RitualDone(UserId(42)).requires_staff());
        assert!(!Command::EventTop.requires_staff());
    }

    #[test]
    fn test_custom_prefix() {
        let parser = CommandParser::new("isla.").unwrap();
        assert_eq!(parser.parse("isla.event top"), Some(Command::EventTop));
        assert_eq!(parser.parse("islaxevent top"), None);
    }
}
