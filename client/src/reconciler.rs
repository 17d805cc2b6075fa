use chrono::Utc;

use crate::models::{Delta, Message};

const ROLE_USER: &str = "user";
const ROLE_ASSISTANT: &str = "assistant";

/// Folds the delta stream of a chat into a stable, order-correct message
/// list: an ordered, id-deduplicated `finalized` list plus at most one
/// ephemeral in-progress assistant message.
///
/// Finalized messages are immutable once absorbed; the ephemeral message is
/// a client-only projection that lives between the first `text-delta` of a
/// turn and the arrival of the authoritative persisted message.
pub struct StreamReconciler {
    chat_id: String,
    finalized: Vec<Message>,
    ephemeral: Option<Message>,
    finished: bool,
    optimistic_user_id: Option<String>,
    // Finished ephemerals promoted into `finalized` because a new turn
    // started before their authoritative row arrived, oldest first.
    promoted_assistant_ids: Vec<String>,
}

impl StreamReconciler {
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            finalized: Vec::new(),
            ephemeral: None,
            finished: false,
            optimistic_user_id: None,
            promoted_assistant_ids: Vec::new(),
        }
    }

    /// Seeds the reconciler with already-persisted history, normalizing its
    /// order.
    pub fn with_history(chat_id: impl Into<String>, mut history: Vec<Message>) -> Self {
        history.sort_by_key(|m| m.created_at);
        let mut reconciler = Self::new(chat_id);
        reconciler.finalized = history;
        reconciler
    }

    /// Optimistically shows the just-submitted user message under a
    /// synthetic id, and starts a new turn. Any ephemeral left over from the
    /// previous turn is retired first so the new turn streams into its own
    /// buffer. Returns the synthetic id.
    pub fn push_optimistic_user(&mut self, content: impl Into<String>) -> String {
        self.retire_ephemeral();
        let id = format!("temp-{}", uuid::Uuid::new_v4());
        self.insert_ordered(Message {
            id: id.clone(),
            chat_id: self.chat_id.clone(),
            role: ROLE_USER.to_string(),
            content: content.into(),
            created_at: Utc::now(),
        });
        self.optimistic_user_id = Some(id.clone());
        self.finished = false;
        id
    }

    /// Clears the previous turn's ephemeral before a new turn starts. A
    /// finished ephemeral stays visible: it moves into the finalized list
    /// until its authoritative row arrives and replaces it. An unfinished
    /// ephemeral belongs to an aborted turn whose text was never persisted,
    /// so it is dropped.
    fn retire_ephemeral(&mut self) {
        if let Some(ephemeral) = self.ephemeral.take() {
            if self.finished {
                self.promoted_assistant_ids.push(ephemeral.id.clone());
                self.insert_ordered(ephemeral);
            }
        }
    }

    /// Applies one protocol event. Events arriving after `finish` belong to
    /// no live turn and are dropped, so a transport that could reorder
    /// cannot grow the buffer past completion.
    pub fn apply(&mut self, delta: Delta) {
        if self.finished {
            log::debug!("Ignoring delta after finish: {delta:?}");
            return;
        }
        match delta {
            Delta::UserMessageId { content } => self.adopt_user_message_id(content),
            Delta::TextDelta { content } => self.append_fragment(&content),
            Delta::Finish => self.finished = true,
        }
    }

    /// Replaces the optimistic user message's synthetic id with the
    /// authoritative one. No visible change.
    fn adopt_user_message_id(&mut self, authoritative_id: String) {
        if let Some(temp_id) = self.optimistic_user_id.take() {
            if let Some(message) = self.finalized.iter_mut().find(|m| m.id == temp_id) {
                message.id = authoritative_id;
            }
        }
    }

    /// Appends one fragment to the running buffer, creating the ephemeral
    /// message on the first fragment of the turn.
    fn append_fragment(&mut self, fragment: &str) {
        match &mut self.ephemeral {
            Some(message) => message.content.push_str(fragment),
            None => {
                self.ephemeral = Some(Message {
                    id: format!("streaming-{}", uuid::Uuid::new_v4()),
                    chat_id: self.chat_id.clone(),
                    role: ROLE_ASSISTANT.to_string(),
                    content: fragment.to_string(),
                    created_at: Utc::now(),
                });
            }
        }
    }

    /// Absorbs an authoritative persisted message from the message-list
    /// channel. Ids already present are a no-op; a finalized assistant
    /// message supersedes the oldest promoted ephemeral if one is waiting,
    /// else a pending (finished) ephemeral. A still-streaming ephemeral is
    /// never touched: it belongs to a later turn than the arriving row.
    pub fn absorb_finalized(&mut self, message: Message) {
        if self.finalized.iter().any(|m| m.id == message.id) {
            return;
        }
        if message.role == ROLE_ASSISTANT {
            if !self.promoted_assistant_ids.is_empty() {
                let promoted = self.promoted_assistant_ids.remove(0);
                self.finalized.retain(|m| m.id != promoted);
            } else if self.finished && self.ephemeral.is_some() {
                self.ephemeral = None;
            }
        }
        self.insert_ordered(message);
    }

    /// Insert keeping `created_at` order, ties broken by insertion order.
    fn insert_ordered(&mut self, message: Message) {
        let position = self
            .finalized
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.finalized.insert(position, message);
    }

    /// The render list: finalized messages in order, the ephemeral message
    /// always last.
    pub fn visible(&self) -> Vec<&Message> {
        self.finalized.iter().chain(self.ephemeral.iter()).collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.ephemeral.is_some() && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::Delta;

    fn message(id: &str, role: &str, content: &str, offset_secs: i64) -> Message {
        Message {
            id: id.to_string(),
            chat_id: "c1".to_string(),
            role: role.to_string(),
            content: content.to_string(),
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn contents(reconciler: &StreamReconciler) -> Vec<String> {
        reconciler.visible().iter().map(|m| m.content.clone()).collect()
    }

    #[test]
    fn fragments_concatenate_in_receipt_order() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.push_optimistic_user("question");

        for fragment in ["Hel", "lo", " ", "world"] {
            reconciler.apply(Delta::TextDelta { content: fragment.into() });
        }

        let visible = reconciler.visible();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[1].content, "Hello world");
        assert!(reconciler.is_streaming());

        reconciler.apply(Delta::Finish);
        assert!(!reconciler.is_streaming());
        assert_eq!(reconciler.visible()[1].content, "Hello world");
    }

    #[test]
    fn first_fragment_creates_ephemeral_with_synthetic_id() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.apply(Delta::TextDelta { content: "Hi".into() });

        let visible = reconciler.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].role, "assistant");
        assert!(visible[0].id.starts_with("streaming-"));
    }

    #[test]
    fn deltas_after_finish_are_ignored() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.apply(Delta::TextDelta { content: "Hello".into() });
        reconciler.apply(Delta::Finish);
        reconciler.apply(Delta::TextDelta { content: " again".into() });

        assert_eq!(contents(&reconciler), vec!["Hello"]);
    }

    #[test]
    fn finalized_assistant_message_supersedes_ephemeral() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.push_optimistic_user("question");
        reconciler.apply(Delta::TextDelta { content: "Hel".into() });
        reconciler.apply(Delta::TextDelta { content: "lo".into() });
        reconciler.apply(Delta::Finish);

        reconciler.absorb_finalized(message("m1", "assistant", "Hello", 1));

        let assistant_messages: Vec<_> =
            reconciler.visible().into_iter().filter(|m| m.role == "assistant").collect();
        assert_eq!(assistant_messages.len(), 1);
        assert_eq!(assistant_messages[0].id, "m1");
        assert_eq!(assistant_messages[0].content, "Hello");
    }

    #[test]
    fn absorbing_the_same_id_twice_is_a_no_op() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.absorb_finalized(message("m1", "assistant", "Hello", 0));
        reconciler.absorb_finalized(message("m1", "assistant", "Hello", 0));
        assert_eq!(reconciler.visible().len(), 1);
    }

    #[test]
    fn optimistic_user_id_adopts_authoritative_one() {
        let mut reconciler = StreamReconciler::new("c1");
        let temp_id = reconciler.push_optimistic_user("question");
        reconciler.apply(Delta::UserMessageId { content: "u-real".into() });

        let visible = reconciler.visible();
        assert_eq!(visible.len(), 1);
        assert_ne!(visible[0].id, temp_id);
        assert_eq!(visible[0].id, "u-real");

        // The authoritative copy arriving later is deduplicated.
        reconciler.absorb_finalized(message("u-real", "user", "question", 0));
        assert_eq!(reconciler.visible().len(), 1);
    }

    #[test]
    fn history_renders_sorted_with_ephemeral_last() {
        let history = vec![
            message("m2", "assistant", "second", 2),
            message("m1", "user", "first", 1),
        ];
        let mut reconciler = StreamReconciler::with_history("c1", history);
        reconciler.apply(Delta::TextDelta { content: "third".into() });

        assert_eq!(contents(&reconciler), vec!["first", "second", "third"]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let now = Utc::now();
        let mut reconciler = StreamReconciler::new("c1");
        for id in ["m1", "m2", "m3"] {
            reconciler.absorb_finalized(Message {
                id: id.to_string(),
                chat_id: "c1".to_string(),
                role: "user".to_string(),
                content: id.to_string(),
                created_at: now,
            });
        }
        assert_eq!(contents(&reconciler), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn second_turn_streams_into_its_own_ephemeral() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.push_optimistic_user("first question");
        reconciler.apply(Delta::TextDelta { content: "first answer".into() });
        reconciler.apply(Delta::Finish);

        // Turn two starts before turn one's authoritative row is absorbed.
        reconciler.push_optimistic_user("second question");
        reconciler.apply(Delta::TextDelta { content: "second ".into() });
        reconciler.apply(Delta::TextDelta { content: "answer".into() });

        let visible = contents(&reconciler);
        assert_eq!(visible.last().unwrap(), "second answer");
        assert!(visible.contains(&"first answer".to_string()));
    }

    #[test]
    fn absorbing_the_first_reply_keeps_the_second_turns_stream() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.push_optimistic_user("first question");
        reconciler.apply(Delta::TextDelta { content: "first answer".into() });
        reconciler.apply(Delta::Finish);
        reconciler.push_optimistic_user("second question");
        reconciler.apply(Delta::TextDelta { content: "second answer".into() });

        // Turn one's persisted row arrives while turn two is mid-stream: it
        // replaces the promoted copy, not the live ephemeral.
        reconciler.absorb_finalized(message("m1", "assistant", "first answer", 1));

        let assistant_messages: Vec<_> =
            reconciler.visible().into_iter().filter(|m| m.role == "assistant").collect();
        assert_eq!(assistant_messages.len(), 2);
        assert_eq!(assistant_messages[0].id, "m1");
        assert_eq!(assistant_messages[1].content, "second answer");
        assert!(reconciler.is_streaming());
    }

    #[test]
    fn aborted_turn_partial_is_dropped_when_the_next_turn_starts() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.push_optimistic_user("first question");
        reconciler.apply(Delta::TextDelta { content: "half an ans".into() });

        // No finish: the stream died and nothing was persisted server-side.
        reconciler.push_optimistic_user("second question");
        reconciler.apply(Delta::TextDelta { content: "fresh answer".into() });

        let visible = contents(&reconciler);
        assert_eq!(visible.last().unwrap(), "fresh answer");
        assert!(!visible.contains(&"half an ans".to_string()));
    }

    #[test]
    fn next_turn_starts_fresh_after_finish() {
        let mut reconciler = StreamReconciler::new("c1");
        reconciler.push_optimistic_user("first question");
        reconciler.apply(Delta::TextDelta { content: "first answer".into() });
        reconciler.apply(Delta::Finish);
        reconciler.absorb_finalized(message("m1", "assistant", "first answer", 1));

        reconciler.push_optimistic_user("second question");
        reconciler.apply(Delta::TextDelta { content: "second ".into() });
        reconciler.apply(Delta::TextDelta { content: "answer".into() });

        let visible = reconciler.visible();
        assert_eq!(visible.last().unwrap().content, "second answer");
        assert!(reconciler.is_streaming());
    }
}
