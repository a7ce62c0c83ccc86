use anyhow::{Context as _, Result};
use chrono::Utc;
use futures::lock::Mutex;
use log::{debug, error, info, warn};
use serenity::http::Http;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::voice::VoiceState;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::activity_tracker::ActivityTracker;
use crate::app_config::AppConfig;
use crate::boss::hp_bar;
use crate::cards::{self, Card, AUTHOR_ICON, AUTHOR_NAME, CARD_COLOUR};
use crate::command_parser::{Command, CommandParser};
use crate::event_store::{ContributionKey, EventRecord, EventStore};
use crate::order_templates::{build_personal_order, build_ritual, ActivitySnapshot};
use crate::rolling_caps::RollingCapper;

use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::prelude::*;

/// オーダーの難易度に使う関係段階
const DEFAULT_STAGE: usize = 1;

/// イベント受信リスナー
pub struct Handler {
    /// 設定
    app_config: AppConfig,
    /// イベント記録
    store: Arc<EventStore>,
    /// 時間枠の上限
    capper: RollingCapper,
    /// 未集計の活動量
    tracker: Arc<Mutex<ActivityTracker>>,
    /// コマンド解析
    parser: CommandParser,
    /// 集計ループを開始済みかどうか
    flush_started: AtomicBool,
}

impl Handler {
    /// コンストラクタ
    pub fn new(app_config: AppConfig) -> Result<Self> {
        let timezone = app_config.event.timezone()?;
        Ok(Self {
            store: Arc::new(EventStore::new(&app_config.event.data_dir)?),
            capper: RollingCapper::new(timezone),
            tracker: Arc::new(Mutex::new(ActivityTracker::new(
                app_config.discord.spam_channel,
                app_config.event.message_cooldown_sec,
            ))),
            parser: CommandParser::new(&app_config.discord.prefix)?,
            flush_started: AtomicBool::new(false),
            app_config,
        })
    }

    /// カードを送信する
    async fn send_card(
        http: impl AsRef<Http>,
        channel_id: ChannelId,
        reference: Option<&Message>,
        card: &Card,
    ) -> Result<Message> {
        channel_id
            .send_message(http, |m| {
                if let Some(reference) = reference {
                    m.reference_message(reference);
                }
                m.embed(|e| {
                    e.author(|a| a.name(AUTHOR_NAME).icon_url(AUTHOR_ICON));
                    e.colour(CARD_COLOUR);
                    e.title(&card.title);
                    e.description(&card.description);
                    e.fields(card.fields.iter().cloned());
                    e
                })
            })
            .await
            .with_context(|| format!("カードの送信に失敗: {}", card.title))
    }

    /// 溜まった活動量を集計する
    async fn flush(
        store: &EventStore,
        tracker: &Mutex<ActivityTracker>,
        capper: &RollingCapper,
        http: &Arc<Http>,
        announce_channel: Option<ChannelId>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();

        // ボイス接続中のギルドのアクティブイベントを調べる
        let voice_guilds = tracker.lock().await.voice_guilds();
        let mut active_events: BTreeMap<GuildId, i64> = BTreeMap::new();
        let mut events: BTreeMap<i64, EventRecord> = BTreeMap::new();
        for guild_id in voice_guilds {
            if let Some(event) = store.active_event(&guild_id).await? {
                active_events.insert(guild_id, event.event_id);
                events.insert(event.event_id, event);
            }
        }

        // 未集計の活動量を取り出す
        let pending = {
            let mut tracker = tracker.lock().await;
            tracker.credit_voice(&active_events, now);
            tracker.drain()
        };
        if pending.is_empty() {
            return Ok(());
        }
        let users = pending.len();

        let outcomes = store
            .flush_pending(capper, now, pending)
            .await
            .context("活動量の集計に失敗")?;
        info!(
            "{}人分の活動量を集計: {}ES",
            users,
            outcomes.iter().map(|o| o.total_es).sum::<i64>()
        );

        // マイルストーンを告知
        let announce_channel = match announce_channel {
            Some(channel) => channel,
            None => return Ok(()),
        };
        for outcome in outcomes {
            let update = match outcome.boss {
                Some(update) if !update.newly_unlocked.is_empty() => update,
                _ => continue,
            };
            let event = match events.get(&outcome.event_id) {
                Some(event) => event.clone(),
                None => match store.active_event(&outcome.guild_id).await? {
                    Some(event) if event.event_id == outcome.event_id => event,
                    _ => continue,
                },
            };
            info!("マイルストーン解放: {:?} {:?}", event.name, update.newly_unlocked);
            Self::send_card(http, announce_channel, None, &cards::milestone_card(&event, &update))
                .await?;
        }
        Ok(())
    }

    /// 集計ループを開始する
    fn start_flush_loop(&self, http: Arc<Http>) {
        if self.flush_started.swap(true, Ordering::SeqCst) {
            return; // 再接続時は二重に起動しない
        }
        let store = self.store.clone();
        let tracker = self.tracker.clone();
        let capper = self.capper.clone();
        let announce_channel = self.app_config.discord.announce_channel;
        let period = Duration::from_secs(self.app_config.event.flush_interval_sec.max(1));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if let Err(why) =
                    Self::flush(&store, &tracker, &capper, &http, announce_channel).await
                {
                    error!("集計に失敗: {:?}", why);
                }
            }
        });
    }

    /// スタッフかどうかを検証する
    fn is_staff(&self, msg: &Message) -> bool {
        msg.member
            .as_ref()
            .map(|member| {
                self.app_config
                    .discord
                    .staff_roles
                    .iter()
                    .any(|f| member.roles.contains(f))
            })
            .unwrap_or(false)
    }

    /// アクティブなイベントがない場合のカード
    fn no_event_card() -> Card {
        cards::notice("No event", "Nothing is running right now.")
    }

    /// 達成を記録する
    async fn record_completion(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        ritual: bool,
    ) -> Result<Card> {
        let event = match self.store.active_event(&guild_id).await? {
            Some(event) => event,
            None => return Ok(Self::no_event_card()),
        };
        let key = ContributionKey {
            guild_id,
            event_id: event.event_id,
            user_id,
        };
        let mut tracker = self.tracker.lock().await;
        if ritual {
            tracker.record_ritual_completed(key);
        } else {
            tracker.record_order_completed(key);
        }
        let what = if ritual { "Ritual" } else { "Order" };
        Ok(cards::notice(
            &format!("{} complete", what),
            &format!("<@{}> did as they were told.", user_id),
        ))
    }

    /// コマンドを実行してカードを作る
    async fn run_command(&self, guild_id: GuildId, msg: &Message, command: Command) -> Result<Card> {
        match command {
            Command::EventMe => {
                let event = match self.store.active_event(&guild_id).await? {
                    Some(event) => event,
                    None => return Ok(Self::no_event_card()),
                };
                let record = self
                    .store
                    .contribution(&ContributionKey {
                        guild_id,
                        event_id: event.event_id,
                        user_id: msg.author.id,
                    })
                    .await?;
                Ok(cards::score_card(&event, record.as_ref()))
            }
            Command::EventTop => {
                let event = match self.store.active_event(&guild_id).await? {
                    Some(event) => event,
                    None => return Ok(Self::no_event_card()),
                };
                let records = self
                    .store
                    .top_contributors(&guild_id, event.event_id, self.app_config.event.leaderboard_size)
                    .await?;
                Ok(cards::leaderboard_card(&event, &records))
            }
            Command::EventStart {
                event_type,
                boss_hp,
                name,
            } => {
                let now = Utc::now().timestamp();
                let event = self
                    .store
                    .start_event(&guild_id, event_type, &name, now, boss_hp)
                    .await?;
                info!("イベント開始: {:?}", event);
                Ok(cards::notice(
                    &event.name,
                    &format!("A {} has begun.", event.event_type.as_str().replace('_', " ")),
                ))
            }
            Command::EventBoss { hp } => {
                let event = match self.store.active_event(&guild_id).await? {
                    Some(event) => event,
                    None => return Ok(Self::no_event_card()),
                };
                let boss = self.store.set_boss(&guild_id, event.event_id, hp).await?;
                info!("ボス登録: {:?} {:?}", event, boss);
                Ok(cards::notice(
                    &event.name,
                    &format!(
                        "Something stirs.\nHP {} / {}\n{}",
                        cards::format_number(boss.hp_current),
                        cards::format_number(boss.hp_max),
                        hp_bar(boss.hp_current, boss.hp_max)
                    ),
                ))
            }
            Command::EventEnd => match self.store.end_event(&guild_id).await? {
                Some(event) => {
                    info!("イベント終了: {:?}", event);
                    Ok(cards::notice(&event.name, "It's over. Scores are final."))
                }
                None => Ok(Self::no_event_card()),
            },
            Command::Order | Command::Ritual => {
                let snapshot = match self.store.active_event(&guild_id).await? {
                    Some(event) => self
                        .store
                        .contribution(&ContributionKey {
                            guild_id,
                            event_id: event.event_id,
                            user_id: msg.author.id,
                        })
                        .await?
                        .map(|record| ActivitySnapshot {
                            messages: record.msg_total,
                            voice_minutes: record.vc_total,
                            casino_rounds: 0,
                            casino_wagered: record.wager_total,
                        })
                        .unwrap_or_default(),
                    None => ActivitySnapshot::default(),
                };
                let order = {
                    let mut rng = rand::thread_rng();
                    match command {
                        Command::Ritual => build_ritual(&mut rng),
                        _ => build_personal_order(&mut rng, &snapshot, DEFAULT_STAGE),
                    }
                };
                Ok(order
                    .map(|order| cards::order_card(&order))
                    .unwrap_or_else(|| cards::notice("Orders", "I have nothing for you.")))
            }
            Command::OrderDone(user_id) => self.record_completion(guild_id, user_id, false).await,
            Command::RitualDone(user_id) => self.record_completion(guild_id, user_id, true).await,
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    /// 準備完了時に呼ばれる
    async fn ready(&self, ctx: Context, data_about_bot: Ready) {
        info!("Bot準備完了: {}", data_about_bot.user.name);
        self.start_flush_loop(ctx.http.clone());
    }

    /// メッセージが送信された時に呼び出される
    async fn message(&self, ctx: Context, msg: Message) {
        // Botの投稿を無視
        if msg.author.bot {
            return;
        }
        // DMは対象外
        let guild_id = match msg.guild_id {
            Some(guild_id) => guild_id,
            None => return,
        };

        // イベント中ならメッセージを記録
        match self.store.active_event(&guild_id).await {
            Ok(Some(event)) => {
                let now = msg.timestamp.unix_timestamp();
                let key = ContributionKey {
                    guild_id,
                    event_id: event.event_id,
                    user_id: msg.author.id,
                };
                self.tracker
                    .lock()
                    .await
                    .record_message(key, msg.channel_id, now);
            }
            Ok(None) => (),
            Err(why) => {
                error!("アクティブなイベントの取得に失敗: {:?}", why);
            }
        }

        // コマンドを処理
        let command = match self.parser.parse(&msg.content) {
            Some(command) => command,
            None => return,
        };
        if command.requires_staff() && !self.is_staff(&msg) {
            debug!("権限のないコマンドを無視: {:?} {}", command, msg.author.id);
            return;
        }
        let card = match self.run_command(guild_id, &msg, command).await {
            Ok(card) => card,
            Err(why) => {
                error!("コマンドの実行に失敗: {:?}", why);
                return;
            }
        };
        if let Err(why) = Self::send_card(&ctx, msg.channel_id, Some(&msg), &card).await {
            error!("返信に失敗: {:?}", why);
        }
    }

    /// ボイスの状態が変わった時に呼び出される
    async fn voice_state_update(&self, _ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        let guild_id = match new.guild_id {
            Some(guild_id) => guild_id,
            None => return,
        };
        // Botを無視
        if new.member.as_ref().map(|m| m.user.bot).unwrap_or(false) {
            return;
        }
        let now = Utc::now().timestamp();

        // チャンネルの移動は接続中のまま扱う
        if new.channel_id.is_some() {
            self.tracker.lock().await.voice_join(guild_id, new.user_id, now);
            return;
        }

        let event_id = match self.store.active_event(&guild_id).await {
            Ok(event) => event.map(|event| event.event_id),
            Err(why) => {
                warn!("アクティブなイベントの取得に失敗: {:?}", why);
                None
            }
        };
        self.tracker
            .lock()
            .await
            .voice_leave(guild_id, new.user_id, event_id, now);
    }
}
