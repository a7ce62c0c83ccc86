use anyhow::{anyhow, Context as _, Result};
use chrono_tz::Tz;
use config::Config;
use serenity::model::id::{ChannelId, RoleId};

/// Discordの設定
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct DiscordConfig {
    /// コマンドの接頭辞
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// イベント管理ができるロールID
    #[serde(default)]
    pub staff_roles: Vec<RoleId>,
    /// ESを数えないチャンネルID
    #[serde(default)]
    pub spam_channel: Option<ChannelId>,
    /// ボスのマイルストーンを告知するチャンネルID
    #[serde(default)]
    pub announce_channel: Option<ChannelId>,
}

/// イベント集計の設定
#[derive(Debug, serde::Deserialize, PartialEq, Clone)]
pub struct EventConfig {
    /// 日付の区切りに使うタイムゾーン
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// 集計を書き込む間隔 (秒)
    #[serde(default = "default_flush_interval_sec")]
    pub flush_interval_sec: u64,
    /// メッセージをカウントする間隔 (秒)
    #[serde(default = "default_message_cooldown_sec")]
    pub message_cooldown_sec: i64,
    /// ランキングの表示件数
    #[serde(default = "default_leaderboard_size")]
    pub leaderboard_size: usize,
    /// データベースを置くディレクトリ
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_prefix() -> String {
    String::from("!")
}

fn default_timezone() -> String {
    String::from("Europe/London")
}

fn default_flush_interval_sec() -> u64 {
    60
}

fn default_message_cooldown_sec() -> i64 {
    5
}

fn default_leaderboard_size() -> usize {
    10
}

fn default_data_dir() -> String {
    String::from("bot")
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            staff_roles: Vec::new(),
            spam_channel: None,
            announce_channel: None,
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            flush_interval_sec: default_flush_interval_sec(),
            message_cooldown_sec: default_message_cooldown_sec(),
            leaderboard_size: default_leaderboard_size(),
            data_dir: default_data_dir(),
        }
    }
}

impl EventConfig {
    /// タイムゾーンをパースする
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|why| anyhow!("タイムゾーン {} が不正: {}", self.timezone, why))
    }
}

/// アプリケーションの設定
#[derive(Debug, Default, serde::Deserialize, PartialEq, Clone)]
pub struct AppConfig {
    /// Discordの設定
    #[serde(default)]
    pub discord: DiscordConfig,
    /// イベント集計の設定
    #[serde(default)]
    pub event: EventConfig,
}

impl AppConfig {
    /// 設定を読み込む
    pub fn load_config() -> Result<AppConfig> {
        // 設定ファイルを読み込む
        let config = Config::builder()
            // Add in `./bot/config.toml`
            .add_source(config::File::with_name("bot/config.toml").required(false))
            // Add in settings from the environment (with a prefix of APP)
            // Eg.. `APP_EVENT__TIMEZONE=UTC ./target/app` would set the `event.timezone` key
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<AppConfig> {
        // 設定ファイルをパース
        let app_config = config
            .try_deserialize::<AppConfig>()
            .context("設定ファイルの読み込みに失敗")?;
        // タイムゾーンは起動時に検証
        app_config.event.timezone()?;
        Ok(app_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(toml: &str) -> Result<AppConfig> {
        let config = Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()?;
        AppConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let app_config = parse("").unwrap();
        assert_eq!(app_config, AppConfig::default());
        assert_eq!(app_config.event.timezone().unwrap(), chrono_tz::Europe::London);
        assert_eq!(app_config.discord.prefix, "!");
    }

    #[test]
    fn test_full_config() {
        let app_config = parse(
            r#"
            [discord]
            prefix = "isla."
            staff_roles = [111, 222]
            spam_channel = 333
            announce_channel = 444

            [event]
            timezone = "UTC"
            flush_interval_sec = 30
            "#,
        )
        .unwrap();
        assert_eq!(app_config.discord.staff_roles, vec![RoleId(111), RoleId(222)]);
        assert_eq!(app_config.discord.spam_channel, Some(ChannelId(333)));
        assert_eq!(app_config.event.timezone().unwrap(), chrono_tz::UTC);
        assert_eq!(app_config.event.flush_interval_sec, 30);
        assert_eq!(app_config.event.message_cooldown_sec, 5);
    }

    #[test]
    fn test_bad_timezone_is_rejected() {
        assert!(parse("[event]\ntimezone = \"Mars/Olympus\"").is_err());
    }
}
