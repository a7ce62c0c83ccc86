use anyhow::{Context as _, Result};
use log::{error, info};
use std::env;

use serenity::prelude::*;

use isla_event_score::app_config::AppConfig;
use isla_event_score::event_handler::Handler;

#[tokio::main]
async fn main() -> Result<()> {
    // ログを初期化
    log4rs::init_file("bot/log4rs.yml", Default::default())
        .context("ログ設定の読み込みに失敗")?;

    // 設定を読み込む
    let app_config = AppConfig::load_config()?;
    info!("設定を読み込み: {:?}", app_config);
    let handler = Handler::new(app_config)?;

    // Login with a bot token from the environment
    let token = env::var("DISCORD_TOKEN").context("DISCORD_TOKEN が設定されていない")?;
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_VOICE_STATES;
    let mut client = Client::builder(token, intents)
        .event_handler(handler)
        .await
        .context("クライアントの作成に失敗")?;

    // start listening for events by starting a single shard
    if let Err(why) = client.start().await {
        error!("クライアントの実行中にエラー: {:?}", why);
    }
    Ok(())
}
