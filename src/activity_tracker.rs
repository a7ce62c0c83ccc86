use std::collections::{BTreeMap, HashMap};

use serenity::model::id::{ChannelId, GuildId, UserId};

use crate::event_scoring::ActivityDelta;
use crate::event_store::ContributionKey;

/// ボイス接続中のセッション
#[derive(Debug, Clone, Copy)]
struct VoiceSession {
    /// まだクレジットしていない時間の起点
    since: i64,
}

/// 活動量をメモリ上に溜め、定期的にまとめて集計へ渡す
#[derive(Debug, Default)]
pub struct ActivityTracker {
    /// カウントしないチャンネル
    spam_channel: Option<ChannelId>,
    /// メッセージをカウントする間隔 (秒)
    message_cooldown_sec: i64,
    /// 未集計の活動量
    pending: HashMap<ContributionKey, ActivityDelta>,
    /// 最後にメッセージをカウントした時刻
    last_msg_counted: HashMap<ContributionKey, i64>,
    /// ボイス接続中のユーザー
    voice_sessions: HashMap<(GuildId, UserId), VoiceSession>,
}

impl ActivityTracker {
    /// コンストラクタ
    pub fn new(spam_channel: Option<ChannelId>, message_cooldown_sec: i64) -> Self {
        Self {
            spam_channel,
            message_cooldown_sec: message_cooldown_sec.max(0),
            ..Self::default()
        }
    }

    fn entry(&mut self, key: ContributionKey) -> &mut ActivityDelta {
        self.pending.entry(key).or_default()
    }

    /// メッセージを記録する (カウントしたら `true`)
    pub fn record_message(&mut self, key: ContributionKey, channel_id: ChannelId, now: i64) -> bool {
        // スパムチャンネルは対象外
        if self.spam_channel == Some(channel_id) {
            return false;
        }
        // クールダウン中は数えない
        if let Some(last) = self.last_msg_counted.get(&key) {
            if now - last < self.message_cooldown_sec {
                return false;
            }
        }
        self.last_msg_counted.insert(key, now);
        self.entry(key).messages += 1;
        true
    }

    /// カジノの賭け金を記録する
    pub fn record_casino_wager(&mut self, key: ContributionKey, wager: i64) {
        self.entry(key).casino_wagered += wager.max(0);
    }

    /// オーダー達成を記録する
    pub fn record_order_completed(&mut self, key: ContributionKey) {
        self.entry(key).orders_completed += 1;
    }

    /// 儀式達成を記録する
    pub fn record_ritual_completed(&mut self, key: ContributionKey) {
        self.entry(key).rituals_completed += 1;
    }

    /// ボイス接続を開始する (接続済みなら何もしない)
    pub fn voice_join(&mut self, guild_id: GuildId, user_id: UserId, now: i64) {
        self.voice_sessions
            .entry((guild_id, user_id))
            .or_insert(VoiceSession { since: now });
    }

    /// ボイス接続を終了し、残り時間をクレジットする
    pub fn voice_leave(&mut self, guild_id: GuildId, user_id: UserId, event_id: Option<i64>, now: i64) {
        if let Some(mut session) = self.voice_sessions.remove(&(guild_id, user_id)) {
            self.credit_session(&mut session, guild_id, user_id, event_id, now);
        }
    }

    /// ボイス接続中のユーザーがいるギルド
    pub fn voice_guilds(&self) -> Vec<GuildId> {
        let mut guilds = self
            .voice_sessions
            .keys()
            .map(|(guild_id, _)| *guild_id)
            .collect::<Vec<_>>();
        guilds.sort();
        guilds.dedup();
        guilds
    }

    /// 接続中のボイスセッションを分単位でクレジットする
    pub fn credit_voice(&mut self, active_events: &BTreeMap<GuildId, i64>, now: i64) {
        let mut sessions = std::mem::take(&mut self.voice_sessions);
        for ((guild_id, user_id), session) in sessions.iter_mut() {
            let event_id = active_events.get(guild_id).copied();
            self.credit_session(session, *guild_id, *user_id, event_id, now);
        }
        self.voice_sessions = sessions;
    }

    fn credit_session(
        &mut self,
        session: &mut VoiceSession,
        guild_id: GuildId,
        user_id: UserId,
        event_id: Option<i64>,
        now: i64,
    ) {
        let minutes = (now - session.since).max(0) / 60;
        if minutes == 0 {
            return;
        }
        // 端数の秒は次回に持ち越す
        session.since += minutes * 60;
        if let Some(event_id) = event_id {
            self.entry(ContributionKey {
                guild_id,
                event_id,
                user_id,
            })
            .voice_minutes += minutes;
        }
    }

    /// 未集計の活動量をすべて取り出す
    pub fn drain(&mut self) -> Vec<(ContributionKey, ActivityDelta)> {
        let mut pending = self
            .pending
            .drain()
            .filter(|(_, delta)| !delta.is_empty())
            .collect::<Vec<_>>();
        pending.sort_by_key(|(key, _)| *key);
        pending
    }

    // 未集計の活動量があるかどうか
    #[cfg(test)]
    fn has_pending(&self) -> bool {
        self.pending.values().any(|delta| !delta.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAM: ChannelId = ChannelId(900);
    const GENERAL: ChannelId = ChannelId(100);

    fn key(user: u64) -> ContributionKey {
        ContributionKey {
            guild_id: GuildId(1),
            event_id: 7,
            user_id: UserId(user),
        }
    }

    #[test]
    fn test_message_cooldown_and_spam_channel() {
        let mut tracker = ActivityTracker::new(Some(SPAM), 5);
        assert!(tracker.record_message(key(1), GENERAL, 1000));
        assert!(!tracker.record_message(key(1), GENERAL, 1004));
        assert!(tracker.record_message(key(1), GENERAL, 1005));
        assert!(!tracker.record_message(key(1), SPAM, 2000));
        assert!(tracker.record_message(key(2), GENERAL, 1001));

        let pending = tracker.drain();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0], (key(1), ActivityDelta { messages: 2, ..ActivityDelta::default() }));
        assert!(!tracker.has_pending());
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_voice_carries_partial_minutes() {
        let mut tracker = ActivityTracker::new(None, 5);
        let active = BTreeMap::from([(GuildId(1), 7)]);
        tracker.voice_join(GuildId(1), UserId(1), 0);
        // 二重の参加は無視
        tracker.voice_join(GuildId(1), UserId(1), 50);

        tracker.credit_voice(&active, 150);
        assert_eq!(tracker.drain()[0].1.voice_minutes, 2);

        // 150秒時点の端数30秒 + 100秒 = 2分
        tracker.voice_leave(GuildId(1), UserId(1), Some(7), 250);
        assert_eq!(tracker.drain()[0].1.voice_minutes, 2);
        assert!(tracker.voice_guilds().is_empty());
    }

    #[test]
    fn test_voice_without_event_is_not_credited() {
        let mut tracker = ActivityTracker::new(None, 5);
        tracker.voice_join(GuildId(3), UserId(1), 0);
        assert_eq!(tracker.voice_guilds(), vec![GuildId(3)]);
        tracker.credit_voice(&BTreeMap::new(), 600);
        assert!(!tracker.has_pending());
        tracker.voice_leave(GuildId(3), UserId(1), None, 900);
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_hooks_accumulate() {
        let mut tracker = ActivityTracker::new(None, 5);
        tracker.record_casino_wager(key(1), 1_500);
        tracker.record_casino_wager(key(1), -20);
        tracker.record_order_completed(key(1));
        tracker.record_ritual_completed(key(1));
        let pending = tracker.drain();
        assert_eq!(
            pending,
            vec![(
                key(1),
                ActivityDelta {
                    casino_wagered: 1_500,
                    orders_completed: 1,
                    rituals_completed: 1,
                    ..ActivityDelta::default()
                }
            )]
        );
    }
}
