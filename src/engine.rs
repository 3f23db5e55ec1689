use crate::sanitize::sanitize;
use crate::script::Script;
use crate::session::{Message, Role};
use chrono::Utc;
use rand::Rng;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;
use uuid::Uuid;

/// Bounds for the artificial "thinking" delay before a reply lands.
/// Tests pin both ends to zero for determinism.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub reply_delay_ms: RangeInclusive<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_delay_ms: 650..=1050,
        }
    }
}

/// Everything the presentation layer may observe about a conversation.
/// Mutated only through the engine's transitions.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub cursor: usize,
    pub awaiting_response: bool,
    pub last_error: Option<String>,
}

/// Handle for a reply the shell has yet to schedule: the sampled delay and
/// the generation that must still be current when the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReply {
    pub generation: u64,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    EmptyScript,
    NotAwaiting,
    StaleGeneration,
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyScript => write!(f, "the conversation script has no turns"),
            Self::NotAwaiting => write!(f, "no reply is pending"),
            Self::StaleGeneration => write!(f, "reply timer outlived its exchange"),
        }
    }
}

impl std::error::Error for TurnError {}

/// The linear dialogue state machine: user message in, next scripted turn
/// out, strictly one exchange in flight. The engine itself is synchronous;
/// the shell owns the timer that spaces the two halves of an exchange.
pub struct DialogueEngine {
    script: Script,
    config: EngineConfig,
    state: ConversationState,
    generation: u64,
}

impl DialogueEngine {
    pub fn new(script: Script, config: EngineConfig) -> Self {
        Self {
            script,
            config,
            state: ConversationState::default(),
            generation: 0,
        }
    }

    /// Restores a persisted transcript. The cursor derives from how many
    /// AI turns already landed, so it can never drift from history.
    pub fn with_messages(script: Script, config: EngineConfig, messages: Vec<Message>) -> Self {
        let ai_count = messages
            .iter()
            .filter(|message| message.role == Role::Ai)
            .count();
        let cursor = if script.is_empty() {
            0
        } else {
            ai_count % script.len()
        };
        Self {
            script,
            config,
            state: ConversationState {
                messages,
                cursor,
                awaiting_response: false,
                last_error: None,
            },
            generation: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn cursor(&self) -> usize {
        self.state.cursor
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.state.awaiting_response
    }

    pub fn last_error(&self) -> Option<&str> {
        self.state.last_error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.state.last_error = None;
    }

    pub fn script_len(&self) -> usize {
        self.script.len()
    }

    /// Appends the user's message and opens an exchange. Rejected (returns
    /// `None`) when the text trims to nothing or a reply is already
    /// pending.
    pub fn send_user_message(&mut self, text: &str) -> Option<PendingReply> {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.state.awaiting_response {
            return None;
        }

        self.state.messages.push(Message {
            id: fresh_id("user"),
            role: Role::User,
            html: sanitize(&format!("<p>{trimmed}</p>")),
            media: None,
            timestamp: Utc::now(),
        });
        self.state.awaiting_response = true;
        self.state.last_error = None;
        self.generation += 1;

        Some(PendingReply {
            generation: self.generation,
            delay: self.sample_delay(),
        })
    }

    /// Closes the open exchange with the turn under the cursor, then wraps
    /// the cursor so the script replays instead of going silent.
    pub fn advance_turn(&mut self, generation: u64) -> Result<&Message, TurnError> {
        if generation != self.generation {
            return Err(TurnError::StaleGeneration);
        }
        if !self.state.awaiting_response {
            return Err(TurnError::NotAwaiting);
        }

        let Some(turn) = self.script.turn(self.state.cursor) else {
            self.state.awaiting_response = false;
            self.state.last_error = Some(TurnError::EmptyScript.to_string());
            return Err(TurnError::EmptyScript);
        };

        let message = Message {
            id: fresh_id(&turn.id),
            role: Role::Ai,
            html: sanitize(&turn.html),
            media: turn.media().cloned(),
            timestamp: Utc::now(),
        };
        self.state.cursor = (self.state.cursor + 1) % self.script.len();
        self.state.awaiting_response = false;

        let index = self.state.messages.len();
        self.state.messages.push(message);
        Ok(&self.state.messages[index])
    }

    /// Clears the conversation entirely. Bumping the generation makes any
    /// reply timer still in flight a no-op when it lands.
    pub fn reset(&mut self) {
        self.state = ConversationState::default();
        self.generation += 1;
    }

    fn sample_delay(&self) -> Duration {
        let range = self.config.reply_delay_ms.clone();
        let millis = if range.start() == range.end() {
            *range.start()
        } else {
            rand::thread_rng().gen_range(range)
        };
        Duration::from_millis(millis)
    }
}

/// Ids stay unique even when content repeats: a replayed scripted turn
/// still yields a distinct message id.
fn fresh_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{MediaRef, ScriptedTurn};

    fn turn(id: &str, html: &str) -> ScriptedTurn {
        ScriptedTurn {
            id: id.to_string(),
            html: html.to_string(),
            image: None,
            video: None,
        }
    }

    fn test_script() -> Script {
        let mut with_image = turn("t3", "<p>an image</p>");
        with_image.image = Some(MediaRef {
            src: "https://img.example.com/shore.jpg".to_string(),
            alt: Some("shore".to_string()),
            title: None,
        });
        Script::new(vec![
            turn("t0", "<h2>First</h2>"),
            turn("t1", "<p>Second <b>turn</b></p>"),
            turn("t2", "<p onclick=\"x()\">Third</p>"),
            with_image,
        ])
    }

    fn test_engine() -> DialogueEngine {
        DialogueEngine::new(
            test_script(),
            EngineConfig {
                reply_delay_ms: 0..=0,
            },
        )
    }

    fn complete_exchange(engine: &mut DialogueEngine, text: &str) {
        let pending = engine
            .send_user_message(text)
            .expect("send should open an exchange");
        engine
            .advance_turn(pending.generation)
            .expect("reply should land");
    }

    #[test]
    fn interleaves_user_and_ai_messages_in_script_order() {
        let mut engine = test_engine();
        for text in ["one", "two", "three"] {
            complete_exchange(&mut engine, text);
        }

        let messages = engine.messages();
        assert_eq!(messages.len(), 6);
        for (index, message) in messages.iter().enumerate() {
            let expected = if index % 2 == 0 { Role::User } else { Role::Ai };
            assert_eq!(message.role, expected);
        }
        assert_eq!(messages[1].html.as_str(), "<h2>First</h2>");
        assert_eq!(messages[3].html.as_str(), "<p>Second <b>turn</b></p>");
        assert_eq!(messages[5].html.as_str(), "<p>Third</p>");
    }

    #[test]
    fn rejects_empty_and_whitespace_sends() {
        let mut engine = test_engine();
        assert!(engine.send_user_message("").is_none());
        assert!(engine.send_user_message("   \n\t").is_none());
        assert!(engine.messages().is_empty());
    }

    #[test]
    fn rejects_second_send_while_awaiting() {
        let mut engine = test_engine();
        let pending = engine
            .send_user_message("first")
            .expect("send should open an exchange");
        assert!(engine.is_awaiting_response());

        assert!(engine.send_user_message("second").is_none());
        assert_eq!(engine.messages().len(), 1);

        engine
            .advance_turn(pending.generation)
            .expect("reply should land");
        assert!(!engine.is_awaiting_response());
        assert_eq!(engine.messages().len(), 2);
    }

    #[test]
    fn user_markup_is_sanitized_on_send() {
        let mut engine = test_engine();
        engine
            .send_user_message("<img src=x onerror=alert(1)> hello <b>you</b>")
            .expect("send should open an exchange");
        assert_eq!(engine.messages()[0].html.as_str(), "<p> hello <b>you</b></p>");
    }

    #[test]
    fn media_rides_along_only_when_the_turn_carries_it() {
        let mut engine = test_engine();
        for text in ["a", "b", "c", "d"] {
            complete_exchange(&mut engine, text);
        }

        let ai_messages: Vec<_> = engine
            .messages()
            .iter()
            .filter(|message| message.role == Role::Ai)
            .collect();
        assert!(ai_messages[0].media.is_none());
        assert!(ai_messages[1].media.is_none());
        assert!(ai_messages[2].media.is_none());
        let media = ai_messages[3].media.as_ref().expect("turn 3 carries an image");
        assert_eq!(media.src, "https://img.example.com/shore.jpg");
    }

    #[test]
    fn cursor_wraps_and_replayed_turns_get_fresh_ids() {
        let mut engine = test_engine();
        for index in 0..5 {
            complete_exchange(&mut engine, &format!("message {index}"));
        }

        assert_eq!(engine.cursor(), 1);
        let ai_messages: Vec<_> = engine
            .messages()
            .iter()
            .filter(|message| message.role == Role::Ai)
            .collect();
        assert_eq!(ai_messages[4].html.as_str(), ai_messages[0].html.as_str());
        assert_ne!(ai_messages[4].id, ai_messages[0].id);
    }

    #[test]
    fn stale_generation_after_reset_is_ignored() {
        let mut engine = test_engine();
        let pending = engine
            .send_user_message("hello")
            .expect("send should open an exchange");

        engine.reset();
        assert_eq!(
            engine.advance_turn(pending.generation),
            Err(TurnError::StaleGeneration)
        );
        assert!(engine.messages().is_empty());
        assert!(!engine.is_awaiting_response());
    }

    #[test]
    fn advance_without_pending_exchange_is_rejected() {
        let mut engine = test_engine();
        assert_eq!(engine.advance_turn(0), Err(TurnError::NotAwaiting));
    }

    #[test]
    fn empty_script_fails_the_turn_but_keeps_history() {
        let mut engine = DialogueEngine::new(
            Script::new(Vec::new()),
            EngineConfig {
                reply_delay_ms: 0..=0,
            },
        );
        let pending = engine
            .send_user_message("anyone there?")
            .expect("send should open an exchange");

        assert_eq!(
            engine.advance_turn(pending.generation),
            Err(TurnError::EmptyScript)
        );
        assert_eq!(engine.messages().len(), 1);
        assert!(!engine.is_awaiting_response());
        assert!(engine.last_error().is_some());

        engine.dismiss_error();
        assert!(engine.last_error().is_none());
        assert!(engine.send_user_message("retry").is_some());
    }

    #[test]
    fn reset_clears_messages_cursor_and_error() {
        let mut engine = test_engine();
        complete_exchange(&mut engine, "hello");
        engine.reset();

        assert!(engine.messages().is_empty());
        assert_eq!(engine.cursor(), 0);
        assert!(engine.last_error().is_none());
        assert!(!engine.is_awaiting_response());
    }

    #[test]
    fn hydration_derives_cursor_from_ai_count() {
        let mut first = test_engine();
        for text in ["a", "b", "c", "d", "e", "f"] {
            complete_exchange(&mut first, text);
        }
        let saved = first.messages().to_vec();

        let resumed = DialogueEngine::with_messages(
            test_script(),
            EngineConfig {
                reply_delay_ms: 0..=0,
            },
            saved,
        );
        assert_eq!(resumed.cursor(), 6 % 4);
        assert!(!resumed.is_awaiting_response());
    }

    #[test]
    fn zero_width_delay_config_is_deterministic() {
        let engine = test_engine();
        assert_eq!(engine.sample_delay(), Duration::ZERO);

        let jittered = DialogueEngine::new(test_script(), EngineConfig::default());
        let delay = jittered.sample_delay().as_millis() as u64;
        assert!((650..=1050).contains(&delay));
    }
}
