//! Per-update routing and conversation flows.
//!
//! The [`Router`] is the single [`UpdateHandler`] behind the ingestion
//! loop. It dispatches commands, callback presses, and free-text messages;
//! free text is interpreted through the user's stored conversation state.
//! Handlers are infallible at the loop boundary: every internal failure is
//! logged and, where it concerns the user, turned into a reply.

use std::sync::Arc;
use std::time::Instant;

use promobot_core::{
    ConversationState, GenerationKind, GenerationRecord, PlanCatalog, UserId,
};
use promobot_store::{CreditLedger, Store, StoreError};

use crate::poller::UpdateHandler;
use crate::ports::{GenerationRequest, Generator, InlineButton, Messenger};
use crate::update::{CallbackQuery, Message, Update};

use async_trait::async_trait;

/// Category applied when the user never picked one.
const DEFAULT_CATEGORY: &str = "general";

/// Reply shown for any internal failure during generation.
const GENERATION_FAILED: &str =
    "Something went wrong while generating. Your credit was not spent, please try again.";

/// The update router.
#[derive(Clone)]
pub struct Router {
    store: Arc<dyn Store>,
    ledger: CreditLedger,
    generator: Arc<dyn Generator>,
    messenger: Arc<dyn Messenger>,
    catalog: Arc<PlanCatalog>,
}

#[async_trait]
impl UpdateHandler for Router {
    async fn handle(&self, update: Update) {
        let update_id = update.update_id;
        if let Some(message) = update.message {
            self.handle_message(message).await;
        } else if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await;
        } else {
            tracing::debug!(update_id, "update carries no message or callback, skipping");
        }
    }
}

impl Router {
    /// Build a router over its ports.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: CreditLedger,
        generator: Arc<dyn Generator>,
        messenger: Arc<dyn Messenger>,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            store,
            ledger,
            generator,
            messenger,
            catalog,
        }
    }

    /// Send a text reply, logging delivery failures instead of surfacing
    /// them.
    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            tracing::warn!(chat_id, error = %e, "failed to send reply");
        }
    }

    async fn reply_keyboard(&self, chat_id: i64, text: &str, buttons: Vec<Vec<InlineButton>>) {
        if let Err(e) = self.messenger.send_keyboard(chat_id, text, buttons).await {
            tracing::warn!(chat_id, error = %e, "failed to send keyboard");
        }
    }

    async fn ack_callback(&self, callback_id: &str, text: Option<&str>) {
        if let Err(e) = self.messenger.answer_callback(callback_id, text).await {
            tracing::warn!(callback_id, error = %e, "failed to answer callback");
        }
    }

    /// Store a conversation state, replying with a generic failure when
    /// the write is lost.
    async fn set_state(&self, user_id: UserId, state: Option<&ConversationState>) -> bool {
        match self.store.set_conversation_state(user_id, state).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "failed to store conversation state");
                false
            }
        }
    }

    async fn handle_message(&self, message: Message) {
        let chat_id = message.chat.id;
        let user_id = UserId(message.from.as_ref().map_or(chat_id, |u| u.id));

        if message.photo.is_some() {
            let prompt = message.caption.clone().unwrap_or_default();
            self.run_generation(
                user_id,
                chat_id,
                GenerationKind::Photo,
                DEFAULT_CATEGORY.to_string(),
                prompt,
            )
            .await;
            return;
        }

        let Some(text) = message.text.as_deref() else {
            tracing::debug!(chat_id, "non-text, non-photo message, skipping");
            return;
        };

        if let Some(command) = text.strip_prefix('/') {
            self.handle_command(user_id, chat_id, command).await;
            return;
        }

        self.handle_free_text(user_id, chat_id, text).await;
    }

    async fn handle_command(&self, user_id: UserId, chat_id: i64, command: &str) {
        // "/buy@SomeBot arg" -> "buy"
        let name = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .split('@')
            .next()
            .unwrap_or_default();

        match name {
            "start" => self.cmd_start(user_id, chat_id).await,
            "balance" => self.cmd_balance(user_id, chat_id).await,
            "buy" => self.cmd_buy(chat_id).await,
            "category" => self.cmd_category(user_id, chat_id).await,
            "feedback" => self.cmd_feedback(user_id, chat_id).await,
            other => {
                tracing::debug!(user_id = %user_id, command = other, "unknown command");
                self.reply(chat_id, "Unknown command. Try /start for an overview.")
                    .await;
            }
        }
    }

    async fn cmd_start(&self, user_id: UserId, chat_id: i64) {
        if let Err(e) = self.store.ensure_user(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "failed to create user");
            self.reply(chat_id, GENERATION_FAILED).await;
            return;
        }
        self.reply(
            chat_id,
            "Welcome! Send me a product description and I will write promo copy for it.\n\
             Send a photo to get a promo image instead.\n\n\
             /category - pick a product category first\n\
             /balance - your remaining credits\n\
             /buy - purchase credit packs\n\
             /feedback - tell us what you think",
        )
        .await;
    }

    async fn cmd_balance(&self, user_id: UserId, chat_id: i64) {
        let user = match self.store.ensure_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "failed to load user");
                self.reply(chat_id, GENERATION_FAILED).await;
                return;
            }
        };
        let limits = &self.catalog.legacy_limits;
        let free_text = (limits.text - user.legacy_text_used).max(0);
        let free_photo = (limits.photo - user.legacy_photo_used).max(0);
        self.reply(
            chat_id,
            &format!(
                "Text credits: {}\nPhoto credits: {}\nFree text generations left: {free_text}\n\
                 Free photo generations left: {free_photo}",
                user.text_credits, user.photo_credits
            ),
        )
        .await;
    }

    async fn cmd_buy(&self, chat_id: i64) {
        let buttons: Vec<Vec<InlineButton>> = self
            .catalog
            .plans()
            .iter()
            .map(|plan| {
                vec![InlineButton::new(
                    format!(
                        "{} - {} text + {} photo ({})",
                        plan.id,
                        plan.text_credit_grant,
                        plan.photo_credit_grant,
                        format_price(plan.price)
                    ),
                    format!("buy:{}", plan.id),
                )]
            })
            .collect();
        self.reply_keyboard(chat_id, "Pick a credit pack:", buttons)
            .await;
    }

    async fn cmd_category(&self, user_id: UserId, chat_id: i64) {
        if let Err(e) = self.store.ensure_user(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "failed to create user");
            self.reply(chat_id, GENERATION_FAILED).await;
            return;
        }
        if self
            .set_state(user_id, Some(&ConversationState::AwaitingCustomCategory))
            .await
        {
            self.reply(
                chat_id,
                "Send your product category on the first line, and the product details below it.",
            )
            .await;
        } else {
            self.reply(chat_id, GENERATION_FAILED).await;
        }
    }

    async fn cmd_feedback(&self, user_id: UserId, chat_id: i64) {
        if let Err(e) = self.store.ensure_user(user_id).await {
            tracing::error!(user_id = %user_id, error = %e, "failed to create user");
            self.reply(chat_id, GENERATION_FAILED).await;
            return;
        }
        if self
            .set_state(user_id, Some(&ConversationState::AwaitingFeedbackRating))
            .await
        {
            self.reply(chat_id, "How would you rate the bot, 1 to 5?")
                .await;
        } else {
            self.reply(chat_id, GENERATION_FAILED).await;
        }
    }

    /// Interpret free text through the user's stored conversation state.
    async fn handle_free_text(&self, user_id: UserId, chat_id: i64, text: &str) {
        let user = match self.store.ensure_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "failed to load user");
                self.reply(chat_id, GENERATION_FAILED).await;
                return;
            }
        };

        match ConversationState::decode(user.conversation_state.as_deref()) {
            Some(ConversationState::AwaitingCustomCategory) => {
                let (category, details) = split_category(text);
                self.set_state(user_id, None).await;
                self.run_generation(user_id, chat_id, GenerationKind::Text, category, details)
                    .await;
            }
            Some(ConversationState::AwaitingImprovement { generation_id }) => {
                self.set_state(user_id, None).await;
                let previous = match self.store.get_generation(generation_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        self.reply(
                            chat_id,
                            "I can no longer find that result. Send the product details again.",
                        )
                        .await;
                        return;
                    }
                    Err(e) => {
                        tracing::error!(user_id = %user_id, error = %e, "failed to load generation");
                        self.reply(chat_id, GENERATION_FAILED).await;
                        return;
                    }
                };
                let prompt = format!(
                    "Previous result:\n{}\n\nRevise it following these instructions:\n{text}",
                    previous.output
                );
                self.run_generation(user_id, chat_id, previous.kind, previous.category, prompt)
                    .await;
            }
            Some(ConversationState::AwaitingFeedbackRating) => {
                match text.trim().parse::<u8>() {
                    Ok(rating @ 1..=5) => {
                        self.set_state(
                            user_id,
                            Some(&ConversationState::AwaitingFeedbackComment { rating }),
                        )
                        .await;
                        self.reply(chat_id, "Thanks! Anything you want to add in a few words?")
                            .await;
                    }
                    _ => {
                        // State stays; the next message gets another try.
                        self.reply(chat_id, "Please send a number from 1 to 5.").await;
                    }
                }
            }
            Some(ConversationState::AwaitingFeedbackComment { rating }) => {
                tracing::info!(user_id = %user_id, rating, comment = text, "feedback received");
                self.set_state(user_id, None).await;
                self.reply(chat_id, "Thank you for the feedback!").await;
            }
            None => {
                self.run_generation(
                    user_id,
                    chat_id,
                    GenerationKind::Text,
                    DEFAULT_CATEGORY.to_string(),
                    text.to_string(),
                )
                .await;
            }
        }
    }

    async fn handle_callback(&self, callback: CallbackQuery) {
        let user_id = UserId(callback.from.id);
        let chat_id = callback
            .message
            .as_ref()
            .map_or(callback.from.id, |m| m.chat.id);
        let Some(data) = callback.data.as_deref() else {
            self.ack_callback(&callback.id, None).await;
            return;
        };

        if let Some(plan_id) = data.strip_prefix("buy:") {
            self.callback_buy(&callback.id, chat_id, plan_id).await;
        } else if let Some(raw_id) = data.strip_prefix("improve:") {
            self.callback_improve(&callback.id, user_id, chat_id, raw_id)
                .await;
        } else if data == "feedback" {
            self.ack_callback(&callback.id, None).await;
            self.cmd_feedback(user_id, chat_id).await;
        } else {
            tracing::debug!(user_id = %user_id, data, "unknown callback payload");
            self.ack_callback(&callback.id, None).await;
        }
    }

    async fn callback_buy(&self, callback_id: &str, chat_id: i64, plan_id: &str) {
        let Some(plan) = self.catalog.plans().iter().find(|p| p.id == plan_id) else {
            self.ack_callback(callback_id, Some("That pack is no longer available."))
                .await;
            return;
        };
        self.ack_callback(callback_id, None).await;
        self.reply(
            chat_id,
            &format!(
                "The {} pack costs {} and adds {} text and {} photo credits.\n\
                 Complete the payment and your credits will appear automatically.",
                plan.id,
                format_price(plan.price),
                plan.text_credit_grant,
                plan.photo_credit_grant
            ),
        )
        .await;
    }

    async fn callback_improve(
        &self,
        callback_id: &str,
        user_id: UserId,
        chat_id: i64,
        raw_id: &str,
    ) {
        let Ok(generation_id) = raw_id.parse() else {
            tracing::warn!(user_id = %user_id, raw_id, "malformed improve payload");
            self.ack_callback(callback_id, None).await;
            return;
        };
        self.ack_callback(callback_id, None).await;
        if self
            .set_state(
                user_id,
                Some(&ConversationState::AwaitingImprovement { generation_id }),
            )
            .await
        {
            self.reply(chat_id, "What should be different? Describe the changes.")
                .await;
        } else {
            self.reply(chat_id, GENERATION_FAILED).await;
        }
    }

    /// The metered generation path: availability pre-check, reserve,
    /// generate, rollback on failure, record and reply on success.
    async fn run_generation(
        &self,
        user_id: UserId,
        chat_id: i64,
        kind: GenerationKind,
        category: String,
        prompt: String,
    ) {
        let user = match self.store.ensure_user(user_id).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "failed to load user");
                self.reply(chat_id, GENERATION_FAILED).await;
                return;
            }
        };

        if !user.has_available(kind, &self.catalog.legacy_limits) {
            self.cmd_buy_with_notice(chat_id, kind).await;
            return;
        }

        match self.ledger.reserve(user_id, kind).await {
            Ok(source) => {
                tracing::debug!(user_id = %user_id, kind = %kind, source = ?source, "generation paid");
            }
            Err(StoreError::NotFound { .. }) => {
                // ensure_user just succeeded; only a concurrent wipe gets here.
                self.reply(chat_id, GENERATION_FAILED).await;
                return;
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "credit reservation failed");
                self.reply(chat_id, GENERATION_FAILED).await;
                return;
            }
        }

        let started = Instant::now();
        let request = GenerationRequest {
            kind,
            category: category.clone(),
            prompt: prompt.clone(),
        };
        let output = match self.generator.generate(request).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(user_id = %user_id, kind = %kind, error = %e, "generation failed");
                self.ledger.rollback(user_id, kind).await;
                self.reply(chat_id, GENERATION_FAILED).await;
                return;
            }
        };
        let processing_ms =
            i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let record = GenerationRecord::new(
            user_id,
            kind,
            category,
            prompt,
            output.content.clone(),
            output.tokens_used,
            processing_ms,
        );
        if let Err(e) = self.store.insert_generation(&record).await {
            // The user already paid and the content exists; deliver it and
            // accept losing the improve flow for this one result.
            tracing::error!(user_id = %user_id, error = %e, "failed to record generation");
            self.reply(chat_id, &output.content).await;
            return;
        }

        self.reply_keyboard(
            chat_id,
            &output.content,
            vec![vec![InlineButton::new(
                "Improve this",
                format!("improve:{}", record.id),
            )]],
        )
        .await;
    }

    async fn cmd_buy_with_notice(&self, chat_id: i64, kind: GenerationKind) {
        self.reply(
            chat_id,
            &format!("You are out of {kind} credits. Pick a pack with /buy to continue."),
        )
        .await;
        self.cmd_buy(chat_id).await;
    }
}

/// Format a minor-unit price as a decimal string.
fn format_price(minor: i64) -> String {
    format!("{}.{:02}", minor / 100, minor % 100)
}

/// Split a category message: first line is the category, the remainder the
/// product details. A single-line message becomes a category with the same
/// text as details.
fn split_category(text: &str) -> (String, String) {
    match text.split_once('\n') {
        Some((category, details)) if !details.trim().is_empty() => {
            (category.trim().to_string(), details.trim().to_string())
        }
        _ => (text.trim().to_string(), text.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use promobot_core::ProcessedEvent;
    use promobot_store::MemoryStore;

    use crate::api::TransportError;
    use crate::ports::{GenerationOutput, GeneratorError};
    use crate::update::{Chat, TgUser};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Text(i64, String),
        Keyboard(i64, String, Vec<Vec<InlineButton>>),
        Ack(String),
    }

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<Sent>>,
    }

    impl FakeMessenger {
        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Text(_, text) | Sent::Keyboard(_, text, _) => Some(text),
                    Sent::Ack(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Text(chat_id, text.to_string()));
            Ok(())
        }

        async fn send_keyboard(
            &self,
            chat_id: i64,
            text: &str,
            buttons: Vec<Vec<InlineButton>>,
        ) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Keyboard(chat_id, text.to_string(), buttons));
            Ok(())
        }

        async fn answer_callback(
            &self,
            callback_id: &str,
            _text: Option<&str>,
        ) -> Result<(), TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Ack(callback_id.to_string()));
            Ok(())
        }
    }

    struct FakeGenerator {
        fail: bool,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl FakeGenerator {
        fn ok() -> Self {
            Self {
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Generator for FakeGenerator {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationOutput, GeneratorError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                return Err(GeneratorError("upstream timed out".into()));
            }
            Ok(GenerationOutput {
                content: "Fresh promo copy".into(),
                tokens_used: 42,
            })
        }
    }

    struct Fixture {
        router: Router,
        store: Arc<MemoryStore>,
        messenger: Arc<FakeMessenger>,
        generator: Arc<FakeGenerator>,
    }

    fn fixture(generator: FakeGenerator) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let messenger = Arc::new(FakeMessenger::default());
        let generator = Arc::new(generator);
        let router = Router::new(
            Arc::clone(&store) as Arc<dyn Store>,
            CreditLedger::new(Arc::clone(&store) as Arc<dyn Store>),
            Arc::clone(&generator) as Arc<dyn Generator>,
            Arc::clone(&messenger) as Arc<dyn Messenger>,
            Arc::new(PlanCatalog::default()),
        );
        Fixture {
            router,
            store,
            messenger,
            generator,
        }
    }

    fn text_update(user_id: i64, text: &str) -> Update {
        Update {
            update_id: 1,
            message: Some(Message {
                message_id: 1,
                from: Some(TgUser {
                    id: user_id,
                    username: None,
                }),
                chat: Chat { id: user_id },
                text: Some(text.to_string()),
                photo: None,
                caption: None,
            }),
            callback_query: None,
        }
    }

    fn callback_update(user_id: i64, data: &str) -> Update {
        Update {
            update_id: 2,
            message: None,
            callback_query: Some(CallbackQuery {
                id: "cb1".into(),
                from: TgUser {
                    id: user_id,
                    username: None,
                },
                message: None,
                data: Some(data.to_string()),
            }),
        }
    }

    async fn fund(store: &MemoryStore, user_id: i64, text: i64, photo: i64) {
        store.ensure_user(UserId(user_id)).await.unwrap();
        let event = ProcessedEvent {
            event_id: format!("fund_{user_id}"),
            event_type: "payment.succeeded".into(),
            processed_at: chrono::Utc::now(),
            subject_user_id: Some(UserId(user_id)),
            amount: None,
        };
        store
            .grant_credits(UserId(user_id), text, photo, &event)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn start_creates_the_user_and_replies() {
        let f = fixture(FakeGenerator::ok());
        f.router.handle(text_update(555, "/start")).await;

        assert!(f.store.get_user(UserId(555)).await.unwrap().is_some());
        assert!(f.messenger.texts()[0].contains("Welcome"));
    }

    #[tokio::test]
    async fn balance_reports_pool_and_legacy_headroom() {
        let f = fixture(FakeGenerator::ok());
        fund(&f.store, 555, 10, 5).await;

        f.router.handle(text_update(555, "/balance")).await;

        let text = f.messenger.texts().pop().unwrap();
        assert!(text.contains("Text credits: 10"));
        assert!(text.contains("Photo credits: 5"));
        assert!(text.contains("Free text generations left: 3"));
    }

    #[tokio::test]
    async fn buy_lists_every_plan_as_a_button() {
        let f = fixture(FakeGenerator::ok());
        f.router.handle(text_update(555, "/buy")).await;

        let sent = f.messenger.sent();
        let Sent::Keyboard(_, _, buttons) = &sent[0] else {
            panic!("expected a keyboard, got {sent:?}");
        };
        assert_eq!(buttons.len(), 3);
        assert_eq!(buttons[0][0].callback_data, "buy:starter");
        assert_eq!(buttons[2][0].callback_data, "buy:bulk");
    }

    #[tokio::test]
    async fn plain_text_generates_and_offers_improvement() {
        let f = fixture(FakeGenerator::ok());
        fund(&f.store, 555, 3, 0).await;

        f.router.handle(text_update(555, "wireless headphones")).await;

        let user = f.store.get_user(UserId(555)).await.unwrap().unwrap();
        assert_eq!(user.text_credits, 2);

        let sent = f.messenger.sent();
        let Sent::Keyboard(_, text, buttons) = &sent[0] else {
            panic!("expected a keyboard reply, got {sent:?}");
        };
        assert_eq!(text, "Fresh promo copy");
        assert!(buttons[0][0].callback_data.starts_with("improve:"));

        let request = f.generator.requests.lock().unwrap()[0].clone();
        assert_eq!(request.kind, GenerationKind::Text);
        assert_eq!(request.category, DEFAULT_CATEGORY);
    }

    #[tokio::test]
    async fn fresh_user_generates_on_the_legacy_counter() {
        let f = fixture(FakeGenerator::ok());

        f.router.handle(text_update(777, "garden chairs")).await;

        let user = f.store.get_user(UserId(777)).await.unwrap().unwrap();
        assert_eq!(user.text_credits, 0);
        assert_eq!(user.legacy_text_used, 1);
    }

    #[tokio::test]
    async fn generation_failure_rolls_the_credit_back() {
        let f = fixture(FakeGenerator::failing());
        fund(&f.store, 555, 3, 0).await;

        f.router.handle(text_update(555, "wireless headphones")).await;

        let user = f.store.get_user(UserId(555)).await.unwrap().unwrap();
        assert_eq!(user.text_credits, 3);
        assert!(f.messenger.texts()[0].contains("was not spent"));
    }

    #[tokio::test]
    async fn exhausted_user_is_sent_to_the_catalog() {
        let f = fixture(FakeGenerator::ok());
        f.store.ensure_user(UserId(555)).await.unwrap();
        // Burn the whole legacy text allowance.
        for _ in 0..3 {
            f.store
                .reserve_credit(UserId(555), GenerationKind::Text)
                .await
                .unwrap();
        }

        f.router.handle(text_update(555, "one more please")).await;

        assert!(f.generator.requests.lock().unwrap().is_empty());
        let texts = f.messenger.texts();
        assert!(texts[0].contains("out of text credits"));
        assert!(matches!(f.messenger.sent()[1], Sent::Keyboard(..)));
    }

    #[tokio::test]
    async fn category_flow_splits_the_next_message() {
        let f = fixture(FakeGenerator::ok());
        fund(&f.store, 555, 3, 0).await;

        f.router.handle(text_update(555, "/category")).await;
        f.router
            .handle(text_update(555, "electronics\nnoise-cancelling headphones"))
            .await;

        let request = f.generator.requests.lock().unwrap()[0].clone();
        assert_eq!(request.category, "electronics");
        assert_eq!(request.prompt, "noise-cancelling headphones");

        // State consumed: the next message is a plain generation again.
        let user = f.store.get_user(UserId(555)).await.unwrap().unwrap();
        assert!(user.conversation_state.is_none());
    }

    #[tokio::test]
    async fn improve_flow_reuses_the_previous_result() {
        let f = fixture(FakeGenerator::ok());
        fund(&f.store, 555, 3, 0).await;

        f.router.handle(text_update(555, "wireless headphones")).await;

        let sent = f.messenger.sent();
        let Sent::Keyboard(_, _, buttons) = &sent[0] else {
            panic!("expected a keyboard reply");
        };
        let improve_data = buttons[0][0].callback_data.clone();

        f.router.handle(callback_update(555, &improve_data)).await;
        f.router.handle(text_update(555, "make it shorter")).await;

        let requests = f.generator.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].prompt.contains("Fresh promo copy"));
        assert!(requests[1].prompt.contains("make it shorter"));

        // Two paid generations.
        let user = f.store.get_user(UserId(555)).await.unwrap().unwrap();
        assert_eq!(user.text_credits, 1);
    }

    #[tokio::test]
    async fn feedback_flow_collects_rating_then_comment() {
        let f = fixture(FakeGenerator::ok());

        f.router.handle(text_update(555, "/feedback")).await;
        f.router.handle(text_update(555, "nine")).await; // invalid, re-prompt
        f.router.handle(text_update(555, "5")).await;
        f.router.handle(text_update(555, "love it")).await;

        let texts = f.messenger.texts();
        assert!(texts.iter().any(|t| t.contains("1 to 5")));
        assert!(texts.last().unwrap().contains("Thank you"));

        let user = f.store.get_user(UserId(555)).await.unwrap().unwrap();
        assert!(user.conversation_state.is_none());
        // The invalid answer consumed no credit.
        assert_eq!(user.legacy_text_used, 0);
    }

    #[tokio::test]
    async fn photo_message_runs_a_photo_generation() {
        let f = fixture(FakeGenerator::ok());
        fund(&f.store, 555, 0, 2).await;

        let mut update = text_update(555, "ignored");
        let message = update.message.as_mut().unwrap();
        message.text = None;
        message.photo = Some(vec![crate::update::PhotoSize {
            file_id: "f1".into(),
            width: 800,
            height: 600,
        }]);
        message.caption = Some("red sneakers".into());

        f.router.handle(update).await;

        let request = f.generator.requests.lock().unwrap()[0].clone();
        assert_eq!(request.kind, GenerationKind::Photo);
        assert_eq!(request.prompt, "red sneakers");

        let user = f.store.get_user(UserId(555)).await.unwrap().unwrap();
        assert_eq!(user.photo_credits, 1);
    }

    #[tokio::test]
    async fn buy_callback_explains_the_pack() {
        let f = fixture(FakeGenerator::ok());
        f.router.handle(callback_update(555, "buy:standard")).await;

        let sent = f.messenger.sent();
        assert_eq!(sent[0], Sent::Ack("cb1".into()));
        let Sent::Text(_, text) = &sent[1] else {
            panic!("expected a text reply, got {sent:?}");
        };
        assert!(text.contains("standard"));
        assert!(text.contains("399.00"));
        assert!(text.contains("30 text"));
    }

    #[tokio::test]
    async fn stale_improve_state_asks_for_details_again() {
        let f = fixture(FakeGenerator::ok());
        f.store.ensure_user(UserId(555)).await.unwrap();
        f.store
            .set_conversation_state(
                UserId(555),
                Some(&ConversationState::AwaitingImprovement {
                    generation_id: promobot_core::GenerationId::generate(),
                }),
            )
            .await
            .unwrap();

        f.router.handle(text_update(555, "make it pop")).await;

        assert!(f.generator.requests.lock().unwrap().is_empty());
        assert!(f.messenger.texts()[0].contains("no longer find"));
    }

    #[test]
    fn category_split_handles_single_line() {
        let (category, details) = split_category("just a product");
        assert_eq!(category, "just a product");
        assert_eq!(details, "just a product");

        let (category, details) = split_category("toys\nwooden train set\nfor toddlers");
        assert_eq!(category, "toys");
        assert_eq!(details, "wooden train set\nfor toddlers");
    }
}
