use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use bookworm_core::domain::book::{normalize_title, BookMetadata, Recommendation, SuggestedTitle};
use bookworm_core::domain::outcome::OutcomeEnvelope;
use bookworm_core::domain::routing::{HandlerKind, Intent, RoutingDecision};

use super::{HandlerError, HandlerOutput, TurnHandler};
use crate::catalog::BookCatalog;
use crate::llm::{complete_with_retry, extract_json_object, LlmClient, RetryPolicy};
use crate::turn::{transcript, TurnContext};

const SUGGESTION_COUNT: usize = 5;
const RECOMMENDATIONS_READY: &str = "Here are some books you might enjoy.";
const TRENDING_READY: &str = "Here are some popular books right now.";
const REPHRASE: &str = "I couldn't come up with recommendations for that. Could you tell me \
                        a genre, an author or a book you enjoyed?";
const UNAVAILABLE: &str =
    "Recommendations are unavailable at the moment. Please try again shortly.";

static BY_AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:\d+[.)]\s*|[-*•]\s+)?["“*_]*(?P<title>[^"”*_\n]+?)["”*_]*\s+by\s+(?P<author>[\w.' ]+?)\s*(?:[-–—:(,]|$)"#,
    )
    .expect("title-by-author pattern compiles")
});

/// Book suggestions from the completion delegate, grounded in catalog metadata.
pub struct RecommendationHandler {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<dyn BookCatalog>,
    retry: RetryPolicy,
    greeting: String,
    history_window: usize,
}

#[derive(Debug, PartialEq)]
enum DelegateSuggestions {
    Titles(Vec<SuggestedTitle>),
    Question(String),
}

#[derive(Deserialize)]
struct SuggestionReply {
    #[serde(default)]
    recommendations: Vec<SuggestedTitle>,
    #[serde(default)]
    question: Option<String>,
}

impl RecommendationHandler {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        catalog: Arc<dyn BookCatalog>,
        retry: RetryPolicy,
        greeting: impl Into<String>,
        history_window: usize,
    ) -> Self {
        Self { llm, catalog, retry, greeting: greeting.into(), history_window }
    }

    /// Keeps the first catalog match per suggestion; suggestions without one are dropped.
    async fn ground(&self, suggestions: Vec<SuggestedTitle>) -> Vec<Recommendation> {
        let lookups = suggestions.into_iter().take(SUGGESTION_COUNT).map(|suggestion| async move {
            let query = normalize_title(&suggestion.title);
            match self.catalog.lookup_by_title(&query).await {
                Ok(books) => books.into_iter().next().map(|book| Recommendation {
                    book,
                    suggested_author: suggestion.author,
                    reason: suggestion.reason,
                }),
                Err(error) => {
                    warn!(
                        event_name = "recommendation.lookup.failed",
                        title = %query,
                        error = %error,
                        "catalog lookup failed"
                    );
                    None
                }
            }
        });
        join_all(lookups).await.into_iter().flatten().collect()
    }

    async fn trending(&self) -> Vec<Recommendation> {
        match self.catalog.lookup_trending(SUGGESTION_COUNT).await {
            Ok(books) => books.into_iter().map(trending_recommendation).collect(),
            Err(error) => {
                warn!(
                    event_name = "recommendation.trending.failed",
                    error = %error,
                    "trending lookup failed"
                );
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TurnHandler for RecommendationHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Recommendation
    }

    async fn process(
        &self,
        turn: &TurnContext,
        decision: &RoutingDecision,
    ) -> Result<HandlerOutput, HandlerError> {
        if decision.intent == Intent::Greeting {
            return Ok(HandlerOutput::keep(OutcomeEnvelope::greeting(self.greeting.clone())));
        }

        let history = transcript(turn.recent_turns(self.history_window));
        let prompt = suggestion_prompt(&turn.message, &history);
        let replied = AtomicBool::new(false);
        let parsed = complete_with_retry(self.llm.as_ref(), &prompt, &self.retry, |raw| {
            replied.store(true, Ordering::Relaxed);
            parse_suggestions(raw)
        })
        .await;

        let delegate_down = match parsed {
            Ok(DelegateSuggestions::Question(question)) => {
                return Ok(HandlerOutput::keep(OutcomeEnvelope::clarification(question)));
            }
            Ok(DelegateSuggestions::Titles(suggestions)) => {
                let requested = suggestions.len();
                let recommendations = self.ground(suggestions).await;
                info!(
                    event_name = "recommendation.grounded",
                    correlation_id = %turn.correlation_id,
                    requested,
                    kept = recommendations.len(),
                    "suggestions matched against catalog"
                );
                if !recommendations.is_empty() {
                    return Ok(HandlerOutput::keep(OutcomeEnvelope::recommendations(
                        RECOMMENDATIONS_READY,
                        recommendations,
                    )));
                }
                false
            }
            Err(error) => {
                if replied.load(Ordering::Relaxed) {
                    debug!(
                        event_name = "recommendation.unparsed",
                        correlation_id = %turn.correlation_id,
                        error = %error,
                        "delegate replies held no titles"
                    );
                    return Ok(HandlerOutput::keep(OutcomeEnvelope::clarification(REPHRASE)));
                }
                warn!(
                    event_name = "recommendation.delegate.failed",
                    correlation_id = %turn.correlation_id,
                    error = %error,
                    "falling back to trending titles"
                );
                true
            }
        };

        let trending = self.trending().await;
        let envelope = match (trending.is_empty(), delegate_down) {
            (false, _) => OutcomeEnvelope::recommendations(TRENDING_READY, trending),
            (true, true) => OutcomeEnvelope::error(UNAVAILABLE, None),
            (true, false) => OutcomeEnvelope::clarification(REPHRASE),
        };
        Ok(HandlerOutput::keep(envelope))
    }
}

fn trending_recommendation(book: BookMetadata) -> Recommendation {
    Recommendation {
        suggested_author: book.authors.first().cloned().unwrap_or_default(),
        reason: "Popular with readers right now.".to_string(),
        book,
    }
}

fn suggestion_prompt(message: &str, history: &str) -> String {
    let history = if history.is_empty() { "(no earlier messages)" } else { history };
    format!(
        "You are BookWorm, a friendly bookstore assistant.\n\
         Conversation so far:\n{history}\n\n\
         Customer: {message}\n\n\
         Suggest exactly {SUGGESTION_COUNT} real, published books that fit the request. \
         Reply with only a JSON object: \
         {{\"recommendations\": [{{\"title\": \"...\", \"author\": \"...\", \"reason\": \"...\"}}]}}. \
         If the request is too vague to answer, reply with {{\"question\": \"<one clarifying question>\"}} instead."
    )
}

/// JSON first; a free-text "Title by Author" list is accepted as a fallback.
fn parse_suggestions(raw: &str) -> Option<DelegateSuggestions> {
    if let Some(value) = extract_json_object(raw) {
        if let Ok(reply) = serde_json::from_value::<SuggestionReply>(value) {
            let titles: Vec<SuggestedTitle> = reply
                .recommendations
                .into_iter()
                .filter(|suggestion| !suggestion.title.trim().is_empty())
                .collect();
            if !titles.is_empty() {
                return Some(DelegateSuggestions::Titles(titles));
            }
            if let Some(question) = reply.question.filter(|question| !question.trim().is_empty()) {
                return Some(DelegateSuggestions::Question(question));
            }
        }
    }

    let titles = titles_by_author(raw);
    (!titles.is_empty()).then_some(DelegateSuggestions::Titles(titles))
}

fn titles_by_author(text: &str) -> Vec<SuggestedTitle> {
    text.lines()
        .filter_map(|line| BY_AUTHOR_RE.captures(line))
        .filter_map(|captures| {
            let title = captures.name("title")?.as_str().trim();
            let author = captures.name("author")?.as_str().trim().trim_end_matches('.');
            (!title.is_empty() && !author.is_empty()).then(|| SuggestedTitle {
                title: title.to_string(),
                author: author.to_string(),
                reason: String::new(),
            })
        })
        .collect()
}
