use anyhow::{bail, Context as _, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::lock::Mutex;
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serenity::model::id::{GuildId, UserId};

use crate::activity_breakdown::ActivityBreakdown;
use crate::boss::{BossState, BossUpdate};
use crate::event_scoring::{score_pass, ActivityDelta, ScorePass};
use crate::rolling_caps::RollingCapper;

/// イベントの種類
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EventType {
    /// ホリデーウィーク (シーズンより優先)
    HolidayWeek,
    /// シーズン
    SeasonEra,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::HolidayWeek => "holiday_week",
            EventType::SeasonEra => "season_era",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "holiday_week" => Ok(EventType::HolidayWeek),
            "season_era" => Ok(EventType::SeasonEra),
            _ => bail!("不明なイベントの種類: {}", s),
        }
    }
}

/// イベントのレコード
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EventRecord {
    pub event_id: i64,
    pub guild_id: GuildId,
    pub event_type: EventType,
    pub name: String,
    pub start_ts: i64,
    pub is_active: bool,
}

/// 貢献度を探すキー
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct ContributionKey {
    pub guild_id: GuildId,
    pub event_id: i64,
    pub user_id: UserId,
}

/// ユーザーのイベント貢献度
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct ContributionRecord {
    pub user_id: UserId,
    pub score_total: i64,
    pub msg_total: i64,
    pub vc_total: i64,
    pub wager_total: i64,
    pub orders_total: i64,
    pub rituals_total: i64,
    pub breakdown: ActivityBreakdown,
    pub last_update_ts: i64,
}

/// イベント単位の集計結果
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct FlushOutcome {
    pub guild_id: GuildId,
    pub event_id: i64,
    /// このイベントで獲得されたESの合計
    pub total_es: i64,
    /// ボスがいる場合の更新結果
    pub boss: Option<BossUpdate>,
}

/// イベント記録管理クラス
pub struct EventStore {
    /// sql接続情報
    conn: Arc<Mutex<Connection>>,
}

impl EventStore {
    /// データベースを初期化する
    pub fn new(basedir: &str) -> Result<EventStore> {
        // データベースに接続
        let conn = Connection::open(format!("{}/event_score.db", basedir))
            .context("イベントデータベースのオープンに失敗")?;
        Self::init(conn)
    }

    /// メモリ上のデータベースを開く
    pub fn open_in_memory() -> Result<EventStore> {
        let conn =
            Connection::open_in_memory().context("イベントデータベースのオープンに失敗")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<EventStore> {
        // テーブルを作成
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                event_id    INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id    VARCHAR(20) NOT NULL,
                event_type  TEXT        NOT NULL,
                name        TEXT        NOT NULL,
                start_ts    INTEGER     NOT NULL,
                is_active   INTEGER     NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_events_guild_active ON events(guild_id, is_active);
            CREATE TABLE IF NOT EXISTS event_contrib (
                guild_id        VARCHAR(20) NOT NULL,
                event_id        INTEGER     NOT NULL,
                user_id         VARCHAR(20) NOT NULL,
                score_total     INTEGER     NOT NULL DEFAULT 0,
                msg_total       INTEGER     NOT NULL DEFAULT 0,
                vc_total        INTEGER     NOT NULL DEFAULT 0,
                wager_total     INTEGER     NOT NULL DEFAULT 0,
                orders_total    INTEGER     NOT NULL DEFAULT 0,
                rituals_total   INTEGER     NOT NULL DEFAULT 0,
                breakdown_json  TEXT,
                last_update_ts  INTEGER     NOT NULL DEFAULT 0,
                PRIMARY KEY (guild_id, event_id, user_id)
            );
            CREATE TABLE IF NOT EXISTS event_boss (
                guild_id         VARCHAR(20) NOT NULL,
                event_id         INTEGER     NOT NULL,
                hp_max           INTEGER     NOT NULL,
                hp_current       INTEGER     NOT NULL,
                milestones_json  TEXT        NOT NULL DEFAULT '[]',
                PRIMARY KEY (guild_id, event_id)
            );",
        )
        .context("イベントデータベースの作成に失敗")?;

        // 初期化
        Ok(EventStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // RowからEventRecordを生成する
    fn row_to_event(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String, i64, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn parse_event(row: (i64, String, String, String, i64, i64)) -> Result<EventRecord> {
        let (event_id, guild_id, event_type, name, start_ts, is_active) = row;
        Ok(EventRecord {
            event_id,
            guild_id: GuildId(guild_id.parse()?),
            event_type: event_type.parse()?,
            name,
            start_ts,
            is_active: is_active != 0,
        })
    }

    // アクティブなイベントを探す (ホリデーウィーク優先、同種なら新しい方)
    fn find_active_event(conn: &Connection, guild_id: &GuildId) -> Result<Option<EventRecord>> {
        let row = conn
            .query_row(
                "SELECT
                    event_id,
                    guild_id,
                    event_type,
                    name,
                    start_ts,
                    is_active
                FROM
                    events
                WHERE
                    guild_id = ?1
                    AND is_active = 1
                ORDER BY
                    CASE event_type WHEN 'holiday_week' THEN 0 ELSE 1 END,
                    start_ts DESC,
                    event_id DESC
                LIMIT 1",
                params!(guild_id.to_string()),
                Self::row_to_event,
            )
            .optional()
            .context("アクティブなイベントの読み込みに失敗")?;
        row.map(Self::parse_event).transpose()
    }

    /// イベントを開始する
    pub async fn start_event(
        &self,
        guild_id: &GuildId,
        event_type: EventType,
        name: &str,
        now: i64,
        boss_hp: Option<i64>,
    ) -> Result<EventRecord> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("イベント開始のトランザクション作成に失敗")?;
        tx.execute(
            "INSERT INTO events (guild_id, event_type, name, start_ts, is_active)
            VALUES (?1, ?2, ?3, ?4, 1)",
            params!(guild_id.to_string(), event_type.as_str(), name, now),
        )
        .with_context(|| format!("イベントの登録に失敗: {}", name))?;
        let event_id = tx.last_insert_rowid();

        // ボスを登録
        if let Some(hp) = boss_hp {
            Self::upsert_boss(&tx, guild_id, event_id, hp)
                .with_context(|| format!("ボスの登録に失敗: {}", name))?;
        }
        tx.commit().context("イベント開始のコミットに失敗")?;

        Ok(EventRecord {
            event_id,
            guild_id: *guild_id,
            event_type,
            name: name.to_string(),
            start_ts: now,
            is_active: true,
        })
    }

    /// アクティブなイベントを終了する
    pub async fn end_event(&self, guild_id: &GuildId) -> Result<Option<EventRecord>> {
        let conn = self.conn.lock().await;
        let event = match Self::find_active_event(&conn, guild_id)? {
            Some(event) => event,
            None => return Ok(None),
        };
        conn.execute(
            "UPDATE events SET is_active = 0 WHERE event_id = ?1",
            params!(event.event_id),
        )
        .with_context(|| format!("イベントの終了に失敗: {:?}", event))?;
        Ok(Some(EventRecord {
            is_active: false,
            ..event
        }))
    }

    /// アクティブなイベントを取得する
    pub async fn active_event(&self, guild_id: &GuildId) -> Result<Option<EventRecord>> {
        let conn = self.conn.lock().await;
        Self::find_active_event(&conn, guild_id)
    }

    // ボスを登録する (既にいれば満タンで置き換える)
    fn upsert_boss(
        conn: &Connection,
        guild_id: &GuildId,
        event_id: i64,
        hp_max: i64,
    ) -> Result<BossState> {
        let boss = BossState::new(hp_max);
        conn.execute(
            "INSERT INTO event_boss (guild_id, event_id, hp_max, hp_current, milestones_json)
            VALUES (?1, ?2, ?3, ?4, '[]')
            ON CONFLICT(guild_id, event_id) DO UPDATE SET
                hp_max = excluded.hp_max,
                hp_current = excluded.hp_current,
                milestones_json = excluded.milestones_json",
            params!(guild_id.to_string(), event_id, boss.hp_max, boss.hp_current),
        )
        .with_context(|| format!("ボスの書き込みに失敗: {} {}", guild_id, event_id))?;
        Ok(boss)
    }

    /// イベントにボスを付ける
    pub async fn set_boss(
        &self,
        guild_id: &GuildId,
        event_id: i64,
        hp_max: i64,
    ) -> Result<BossState> {
        let conn = self.conn.lock().await;
        Self::upsert_boss(&conn, guild_id, event_id, hp_max)
    }

    // TEXT以外の集計JSONは読めないものとして扱う
    fn text_or_none(value: Value) -> Option<String> {
        match value {
            Value::Text(json) => Some(json),
            Value::Null => None,
            other => {
                warn!("集計JSONが文字列ではないため空として扱う: {:?}", other.data_type());
                None
            }
        }
    }

    // トランザクション内で1ユーザー分の集計を行う
    fn apply_in_tx(
        tx: &Transaction<'_>,
        key: &ContributionKey,
        capper: &RollingCapper,
        now: i64,
        delta: &ActivityDelta,
    ) -> Result<ScorePass> {
        let stored: Option<Value> = tx
            .query_row(
                "SELECT breakdown_json FROM event_contrib
                WHERE guild_id = ?1 AND event_id = ?2 AND user_id = ?3",
                params!(key.guild_id.to_string(), key.event_id, key.user_id.to_string()),
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("集計の読み込みに失敗: {:?}", key))?;
        let stored = stored.and_then(Self::text_or_none);
        let mut breakdown = ActivityBreakdown::from_json(stored.as_deref());

        let pass = score_pass(capper, &mut breakdown, now, delta);

        tx.execute(
            "INSERT INTO event_contrib (
                guild_id,
                event_id,
                user_id,
                score_total,
                msg_total,
                vc_total,
                wager_total,
                orders_total,
                rituals_total,
                breakdown_json,
                last_update_ts
            )
            VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(guild_id, event_id, user_id) DO UPDATE SET
                score_total = score_total + excluded.score_total,
                msg_total = msg_total + excluded.msg_total,
                vc_total = vc_total + excluded.vc_total,
                wager_total = wager_total + excluded.wager_total,
                orders_total = orders_total + excluded.orders_total,
                rituals_total = rituals_total + excluded.rituals_total,
                breakdown_json = excluded.breakdown_json,
                last_update_ts = excluded.last_update_ts",
            params!(
                key.guild_id.to_string(),
                key.event_id,
                key.user_id.to_string(),
                pass.score,
                pass.applied.messages,
                pass.applied.voice_minutes,
                pass.applied.casino_wagered,
                pass.orders_completed,
                pass.rituals_completed,
                breakdown.to_json()?,
                now,
            ),
        )
        .with_context(|| format!("集計の書き込みに失敗: {:?}", key))?;

        Ok(pass)
    }

    /// 1ユーザー分の活動量を集計して保存する
    pub async fn apply_activity(
        &self,
        key: &ContributionKey,
        capper: &RollingCapper,
        now: i64,
        delta: &ActivityDelta,
    ) -> Result<ScorePass> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("集計のトランザクション作成に失敗")?;
        let pass = Self::apply_in_tx(&tx, key, capper, now, delta)?;
        tx.commit().context("集計のコミットに失敗")?;
        Ok(pass)
    }

    /// 溜まった活動量をまとめて集計し、ボスにダメージを与える
    ///
    /// 失敗したユーザーはログに残して飛ばし、残りの集計とボスへのダメージは続ける
    pub async fn flush_pending(
        &self,
        capper: &RollingCapper,
        now: i64,
        pending: Vec<(ContributionKey, ActivityDelta)>,
    ) -> Result<Vec<FlushOutcome>> {
        let mut totals: BTreeMap<(GuildId, i64), i64> = BTreeMap::new();
        for (key, delta) in pending {
            let pass = match self.apply_activity(&key, capper, now, &delta).await {
                Ok(pass) => pass,
                Err(why) => {
                    warn!("集計に失敗したため飛ばす: {:?} {:?}: {:?}", key, delta, why);
                    continue;
                }
            };
            debug!("集計: {:?} {:?} -> {}ES", key, delta, pass.score);
            *totals.entry((key.guild_id, key.event_id)).or_default() += pass.score;
        }

        let mut outcomes = Vec::new();
        for ((guild_id, event_id), total_es) in totals {
            let boss = if total_es > 0 {
                match self.damage_boss(&guild_id, event_id, total_es).await {
                    Ok(boss) => boss,
                    Err(why) => {
                        warn!("ボスへのダメージに失敗: {} {}: {:?}", guild_id, event_id, why);
                        None
                    }
                }
            } else {
                None
            };
            outcomes.push(FlushOutcome {
                guild_id,
                event_id,
                total_es,
                boss,
            });
        }
        Ok(outcomes)
    }

    // RowからContributionRecordを生成する
    #[allow(clippy::type_complexity)]
    fn row_to_contribution(
        row: &Row<'_>,
    ) -> rusqlite::Result<(String, [i64; 6], Value, i64)> {
        Ok((
            row.get(0)?,
            [
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ],
            row.get(7)?,
            row.get(8)?,
        ))
    }

    fn parse_contribution(
        row: (String, [i64; 6], Value, i64),
    ) -> Result<ContributionRecord> {
        let (user_id, totals, breakdown_json, last_update_ts) = row;
        let [score_total, msg_total, vc_total, wager_total, orders_total, rituals_total] = totals;
        Ok(ContributionRecord {
            user_id: UserId(user_id.parse()?),
            score_total,
            msg_total,
            vc_total,
            wager_total,
            orders_total,
            rituals_total,
            breakdown: ActivityBreakdown::from_json(Self::text_or_none(breakdown_json).as_deref()),
            last_update_ts,
        })
    }

    /// ユーザーの貢献度を取得する
    pub async fn contribution(&self, key: &ContributionKey) -> Result<Option<ContributionRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT
                    user_id,
                    score_total,
                    msg_total,
                    vc_total,
                    wager_total,
                    orders_total,
                    rituals_total,
                    breakdown_json,
                    last_update_ts
                FROM
                    event_contrib
                WHERE
                    guild_id = ?1
                    AND event_id = ?2
                    AND user_id = ?3",
                params!(key.guild_id.to_string(), key.event_id, key.user_id.to_string()),
                Self::row_to_contribution,
            )
            .optional()
            .with_context(|| format!("貢献度の読み込みに失敗: {:?}", key))?;
        row.map(Self::parse_contribution).transpose()
    }

    /// 貢献度の上位を取得する
    pub async fn top_contributors(
        &self,
        guild_id: &GuildId,
        event_id: i64,
        limit: usize,
    ) -> Result<Vec<ContributionRecord>> {
        // データベースをロック
        let conn = self.conn.lock().await;
        let query = "SELECT
                user_id,
                score_total,
                msg_total,
                vc_total,
                wager_total,
                orders_total,
                rituals_total,
                breakdown_json,
                last_update_ts
            FROM
                event_contrib
            WHERE
                guild_id = ?1
                AND event_id = ?2
                AND score_total > 0
            ORDER BY
                score_total DESC,
                last_update_ts ASC
            LIMIT ?3";
        // クエリを構築
        let mut stmt = conn
            .prepare(query)
            .with_context(|| format!("ランキング用のSQL文の構築に失敗: {}", query))?;
        // クエリを実行
        let rows = stmt
            .query_map(
                params!(guild_id.to_string(), event_id, limit as i64),
                Self::row_to_contribution,
            )
            .context("ランキングの読み込みに失敗")?;
        let records = rows
            .map(|row| Self::parse_contribution(row?))
            .collect::<Result<Vec<_>>>()?;
        Ok(records)
    }

    /// ボスの状態を取得する
    pub async fn boss(&self, guild_id: &GuildId, event_id: i64) -> Result<Option<BossState>> {
        let conn = self.conn.lock().await;
        Self::find_boss(&conn, guild_id, event_id)
    }

    fn find_boss(conn: &Connection, guild_id: &GuildId, event_id: i64) -> Result<Option<BossState>> {
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT hp_max, hp_current, milestones_json FROM event_boss
                WHERE guild_id = ?1 AND event_id = ?2",
                params!(guild_id.to_string(), event_id),
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .context("ボスの読み込みに失敗")?;
        Ok(row.map(|(hp_max, hp_current, milestones_json)| BossState {
            hp_max,
            hp_current,
            // 壊れていたら未解放として扱う
            unlocked: serde_json::from_str(&milestones_json).unwrap_or_default(),
        }))
    }

    /// ボスにダメージを与える (ボスがいなければ `None`)
    pub async fn damage_boss(
        &self,
        guild_id: &GuildId,
        event_id: i64,
        damage: i64,
    ) -> Result<Option<BossUpdate>> {
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .context("ボス更新のトランザクション作成に失敗")?;
        let mut boss = match Self::find_boss(&tx, guild_id, event_id)? {
            Some(boss) => boss,
            None => return Ok(None),
        };
        let update = boss.apply_damage(damage);
        tx.execute(
            "UPDATE event_boss SET hp_current = ?1, milestones_json = ?2
            WHERE guild_id = ?3 AND event_id = ?4",
            params!(
                boss.hp_current,
                serde_json::to_string(&boss.unlocked)?,
                guild_id.to_string(),
                event_id
            ),
        )
        .context("ボスの更新に失敗")?;
        tx.commit().context("ボス更新のコミットに失敗")?;
        Ok(Some(update))
    }

    // 保存済みの集計JSONを直接書き換える
    #[cfg(test)]
    async fn overwrite_breakdown_json<V: rusqlite::ToSql>(
        &self,
        key: &ContributionKey,
        json: V,
    ) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "INSERT INTO event_contrib (guild_id, event_id, user_id, breakdown_json)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(guild_id, event_id, user_id) DO UPDATE SET
                    breakdown_json = excluded.breakdown_json",
                params!(key.guild_id.to_string(), key.event_id, key.user_id.to_string(), json),
            )
            .with_context(|| format!("集計JSONの書き込みに失敗: {:?}", key))?;
        Ok(())
    }
}
