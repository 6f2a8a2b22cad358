//! Builds dialog-action responses from knowledge-base lookups.

use crate::knowledge::{FaqEntry, KbMatch, KnowledgeBase};
use helpdesk_ledger_types::*;

pub const MAX_CARDS: usize = 5;
pub const MAX_TITLE_CHARS: usize = 75;
const MAX_SUBTITLE_CHARS: usize = 80;

const DEFAULT_INTENT: &str = "HelpDeskQuery";
const QUESTION_SLOT: &str = "question";
const CARD_CONTENT_TYPE: &str = "application/vnd.amazonaws.card.generic";

const FALLBACK_MESSAGE: &str =
    "Sorry, I couldn't find an answer to that. Try rephrasing your question.";

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn attachment(entry: &FaqEntry) -> CardAttachment {
    CardAttachment {
        title: truncate_chars(&entry.question, MAX_TITLE_CHARS),
        sub_title: Some(truncate_chars(&entry.answer, MAX_SUBTITLE_CHARS)),
        image_url: entry.image_url.clone(),
        attachment_link_url: entry.url.clone(),
        buttons: Vec::new(),
    }
}

/// Up to [`MAX_CARDS`] attachments; `None` when there is nothing to show
pub fn response_card(entries: &[&FaqEntry]) -> Option<ResponseCard> {
    if entries.is_empty() {
        return None;
    }
    Some(ResponseCard {
        version: 1,
        content_type: CARD_CONTENT_TYPE.to_string(),
        generic_attachments: entries
            .iter()
            .take(MAX_CARDS)
            .map(|e| attachment(e))
            .collect(),
    })
}

/// Option cards carry a button that sends the full question back
fn option_card(entries: &[&FaqEntry]) -> Option<ResponseCard> {
    let mut card = response_card(entries)?;
    for (a, e) in card.generic_attachments.iter_mut().zip(entries) {
        a.buttons.push(CardButton {
            text: "Ask this".to_string(),
            value: e.question.clone(),
        });
    }
    Some(card)
}

pub fn elicit_slot(
    intent_name: &str,
    slots: Slots,
    slot_to_elicit: &str,
    message: Option<&str>,
    response_card: Option<ResponseCard>,
) -> DialogAction {
    DialogAction::ElicitSlot {
        intent_name: intent_name.to_string(),
        slots,
        slot_to_elicit: slot_to_elicit.to_string(),
        message: message.map(Message::plain),
        response_card,
    }
}

pub fn delegate(slots: Slots) -> DialogAction {
    DialogAction::Delegate { slots }
}

pub fn confirm_intent(
    intent_name: &str,
    slots: Slots,
    message: Option<&str>,
    response_card: Option<ResponseCard>,
) -> DialogAction {
    DialogAction::ConfirmIntent {
        intent_name: intent_name.to_string(),
        slots,
        message: message.map(Message::plain),
        response_card,
    }
}

pub fn close(
    fulfillment_state: FulfillmentState,
    message: Option<&str>,
    response_card: Option<ResponseCard>,
) -> DialogAction {
    DialogAction::Close {
        fulfillment_state,
        message: message.map(Message::plain),
        response_card,
    }
}

/// Answer a question from the knowledge base.
///
/// Empty input goes back to the orchestrator, an exact hit closes the turn,
/// a single partial hit asks for confirmation, several partial hits are
/// offered as choices, and nothing at all closes as failed.
pub fn answer(kb: &KnowledgeBase, req: &AskRequest) -> LexResponse {
    let intent = req.intent_name.as_deref().unwrap_or(DEFAULT_INTENT);
    let slots = req.slots.clone();

    let dialog_action = if req.query.trim().is_empty() {
        delegate(slots)
    } else {
        match kb.lookup(&req.query) {
            KbMatch::Exact(entry) => close(
                FulfillmentState::Fulfilled,
                Some(entry.answer.as_str()),
                response_card(&[entry]),
            ),
            KbMatch::Candidates(candidates) if candidates.len() == 1 => {
                let entry = candidates[0];
                let prompt = format!("Did you mean \"{}\"?", entry.question);
                confirm_intent(
                    intent,
                    with_question(slots, &entry.question),
                    Some(prompt.as_str()),
                    option_card(&candidates),
                )
            }
            KbMatch::Candidates(candidates) => elicit_slot(
                intent,
                slots,
                QUESTION_SLOT,
                Some("Which of these questions is closest to yours?"),
                option_card(&candidates),
            ),
            KbMatch::NoMatch => close(FulfillmentState::Failed, Some(FALLBACK_MESSAGE), None),
        }
    };

    LexResponse {
        session_attributes: req.session_attributes.clone(),
        dialog_action,
    }
}

fn with_question(mut slots: Slots, question: &str) -> Slots {
    slots.insert(QUESTION_SLOT.to_string(), Some(question.to_string()));
    slots
}
