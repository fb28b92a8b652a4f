use assist::AssistantReply;
use assist::categorize::CodeCategory;
use assist::context::{ConversationTurn, ScoredTurn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub code: Option<String>,
    pub topic: String,
}

impl From<AssistantReply> for ChatResponse {
    fn from(reply: AssistantReply) -> Self {
        Self {
            response: reply.content,
            code: reply.code,
            topic: reply.topic.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryResponse {
    pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorizeRequest {
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySuggestion {
    pub category: CodeCategory,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorizeResponse {
    pub suggestions: Vec<CategorySuggestion>,
}

impl From<Vec<(CodeCategory, f64)>> for CategorizeResponse {
    fn from(scores: Vec<(CodeCategory, f64)>) -> Self {
        Self {
            suggestions: scores
                .into_iter()
                .map(|(category, confidence)| CategorySuggestion {
                    category,
                    confidence,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextRequest {
    pub query: String,
}

/// The window a query would be answered with, oldest turn first.
#[derive(Debug, Clone, Serialize)]
pub struct ContextResponse {
    pub turns: Vec<ScoredTurn>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_response_keeps_order() {
        let response = CategorizeResponse::from(vec![
            (CodeCategory::WebDevelopment, 0.8),
            (CodeCategory::Database, 0.2),
        ]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["suggestions"][0]["category"], "web_development");
        assert_eq!(json["suggestions"][1]["confidence"], 0.2);
    }

    #[test]
    fn error_envelope_uses_type_key() {
        let envelope = ErrorEnvelope {
            error: ErrorBody {
                message: "busy".to_owned(),
                error_type: "overloaded".to_owned(),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["type"], "overloaded");
    }
}
