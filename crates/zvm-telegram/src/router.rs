use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::Message};
use tracing::{info, warn};

use zvm_core::{
    bot::{commands::classify, BotController},
    domain::{ChatId, UserId},
    messaging::types::{CallbackQuery as CoreCallback, IncomingUpdate},
};

/// Long-poll Telegram and hand every update to `controller`.
///
/// Returns after Ctrl-C.
pub async fn run_polling(bot: Bot, controller: Arc<BotController>) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(bot = %me.username(), "telegram bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![controller])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("telegram bot stopped");
    Ok(())
}

async fn handle_message(msg: Message, controller: Arc<BotController>) -> ResponseResult<()> {
    dispatch(&controller, message_update(&msg)).await;
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    q: teloxide::types::CallbackQuery,
    controller: Arc<BotController>,
) -> ResponseResult<()> {
    let Some(update) = callback_update(&q) else {
        // Always answer so the client stops spinning.
        let _ = bot.answer_callback_query(q.id).await;
        return Ok(());
    };
    dispatch(&controller, update).await;
    Ok(())
}

async fn dispatch(controller: &BotController, update: IncomingUpdate) {
    if let Err(e) = controller.handle(update).await {
        warn!(error = %e, "update handling failed");
    }
}

/// Stickers, photos and other non-text messages arrive as empty text so the
/// controller still runs its access check before answering.
fn message_update(msg: &Message) -> IncomingUpdate {
    let text = msg.text().unwrap_or_default();
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    classify(ChatId(msg.chat.id.0), user_id, text)
}

fn callback_update(q: &teloxide::types::CallbackQuery) -> Option<IncomingUpdate> {
    let chat_id = q.message.as_ref().map(|m| m.chat.id)?;
    let data = q.data.clone().filter(|d| !d.is_empty())?;
    Some(IncomingUpdate::Callback(CoreCallback {
        chat_id: ChatId(chat_id.0),
        user_id: Some(UserId(q.from.id.0 as i64)),
        callback_id: q.id.clone(),
        data,
    }))
}
