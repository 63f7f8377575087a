use std::time::Duration;

use axum::{extract::State, Extension, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::dashboard::{self, DashboardStats};
use crate::error::AppError;
use crate::routes::AppState;
use crate::{budgets, transactions};

const GENERATE_TIMEOUT: Duration = Duration::from_secs(30);
const TAGS_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_ANALYSIS_QUESTION: &str =
    "Please analyze my financial data and provide insights.";
const UNAVAILABLE_MSG: &str =
    "Sorry, I'm having trouble connecting to the AI service right now.";
const TIMEOUT_MSG: &str = "Sorry, the request timed out. Please try again.";
const EMPTY_MSG: &str = "Sorry, I could not generate a response.";

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResp> {
    let available = ollama_available(&state).await;
    Json(HealthResp {
        status: if available { "healthy" } else { "degraded" }.to_string(),
        ollama_available: available,
        model: state.cfg.ollama_model.clone(),
    })
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatReq>,
) -> Result<Json<ChatResp>, AppError> {
    let Some(message) = req.message.filter(|m| !m.is_empty()) else {
        return Err(AppError::Validation("Message is required".to_string()));
    };
    if !ollama_available(&state).await {
        return Err(AppError::Upstream("Ollama service unavailable".to_string()));
    }

    let context = req.context.unwrap_or_default();
    let response = generate_response(&state, &message, &context).await;
    Ok(Json(ChatResp {
        response,
        model: state.cfg.ollama_model.clone(),
        timestamp: Utc::now(),
    }))
}

pub async fn financial_analysis_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AnalysisReq>,
) -> Result<Json<AnalysisResp>, AppError> {
    let txs = transactions::list_transactions_db(&state.pool, user.user_id)
        .await
        .map_err(AppError::Store)?;
    let buds = budgets::list_budget_rows_db(&state.pool, user.user_id)
        .await
        .map_err(AppError::Store)?;
    let stats = dashboard::summarize(&txs, &buds);

    if !ollama_available(&state).await {
        return Err(AppError::Upstream("Ollama service unavailable".to_string()));
    }

    let question = req
        .question
        .unwrap_or_else(|| DEFAULT_ANALYSIS_QUESTION.to_string());
    let context = financial_context(&stats);
    let analysis = generate_response(&state, &question, &context).await;

    Ok(Json(AnalysisResp {
        analysis,
        summary: AnalysisSummary {
            income: stats.total_income,
            expenses: stats.total_expenses,
            net: stats.net_income,
            transaction_count: stats.transaction_count,
        },
    }))
}

/// True when the configured model shows up in Ollama's tag list.
async fn ollama_available(state: &AppState) -> bool {
    let url = format!("{}/api/tags", state.cfg.ollama_base_url);
    let resp = state.http.get(&url).timeout(TAGS_TIMEOUT).send().await;
    match resp {
        Ok(resp) if resp.status().is_success() => match resp.json::<TagsResp>().await {
            Ok(tags) => {
                let found = model_listed(&tags, &state.cfg.ollama_model);
                if !found {
                    tracing::warn!(model = %state.cfg.ollama_model, "model not found in ollama tags");
                }
                found
            }
            Err(e) => {
                tracing::error!("failed to parse ollama tags: {e}");
                false
            }
        },
        Ok(resp) => {
            tracing::error!("failed to connect to ollama: {}", resp.status());
            false
        }
        Err(e) => {
            tracing::error!("error connecting to ollama: {e}");
            false
        }
    }
}

fn model_listed(tags: &TagsResp, model: &str) -> bool {
    tags.models.iter().any(|m| m.name.contains(model))
}

/// Proxies one generation request. Upstream failures degrade to canned
/// apology text instead of surfacing as 5xx, matching the chat UX.
async fn generate_response(state: &AppState, message: &str, context: &str) -> String {
    let prompt = enhanced_prompt(message, context);
    let payload = GenerateReq {
        model: &state.cfg.ollama_model,
        prompt: &prompt,
        stream: false,
        options: GenerateOptions::default(),
    };
    let url = format!("{}/api/generate", state.cfg.ollama_base_url);
    let resp = state
        .http
        .post(&url)
        .json(&payload)
        .timeout(GENERATE_TIMEOUT)
        .send()
        .await;

    match resp {
        Ok(resp) if resp.status().is_success() => match resp.json::<GenerateResp>().await {
            Ok(body) => body.response.unwrap_or_else(|| EMPTY_MSG.to_string()),
            Err(e) => {
                tracing::error!("bad ollama response payload: {e}");
                UNAVAILABLE_MSG.to_string()
            }
        },
        Ok(resp) => {
            tracing::error!("ollama api error: {}", resp.status());
            UNAVAILABLE_MSG.to_string()
        }
        Err(e) if e.is_timeout() => {
            tracing::error!("timeout waiting for ollama response");
            TIMEOUT_MSG.to_string()
        }
        Err(e) => {
            tracing::error!("error calling ollama api: {e}");
            UNAVAILABLE_MSG.to_string()
        }
    }
}

fn enhanced_prompt(message: &str, context: &str) -> String {
    format!(
        "You are a helpful AI financial assistant. You help users manage their finances, \
analyze spending patterns, create budgets, and provide financial advice.\n\
\n\
IMPORTANT FORMATTING RULES:\n\
- Use clear headings with ## or ### for main topics\n\
- Use bullet points (- ) for lists and key points\n\
- Use numbered lists (1. 2. 3.) for step-by-step instructions\n\
- Use **bold text** for important concepts or warnings\n\
- Use \"Key Point:\" format for highlighting critical information\n\
- Break information into digestible paragraphs\n\
- When providing financial advice, structure it clearly with sections\n\
\n\
Context: {context}\n\
\n\
User question: {message}\n\
\n\
Please provide a helpful, accurate, and well-structured response about personal finance \
management. Format your response with clear headings, bullet points, and organized \
sections for better readability."
    )
}

fn financial_context(stats: &DashboardStats) -> String {
    format!(
        "Financial Summary:\n\
         - Monthly Income: ${}\n\
         - Monthly Expenses: ${}\n\
         - Net Income: ${}\n\
         - Number of transactions: {}\n",
        stats.total_income, stats.total_expenses, stats.net_income, stats.transaction_count
    )
}

#[derive(Debug, Deserialize)]
pub struct ChatReq {
    pub message: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResp {
    pub response: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisReq {
    pub question: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalysisResp {
    pub analysis: String,
    pub summary: AnalysisSummary,
}

#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub expenses: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net: Decimal,
    pub transaction_count: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResp {
    pub status: String,
    pub ollama_available: bool,
    pub model: String,
}

#[derive(Serialize)]
struct GenerateReq<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 500,
        }
    }
}

#[derive(Deserialize)]
struct GenerateResp {
    response: Option<String>,
}

#[derive(Deserialize)]
struct TagsResp {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_context_and_question() {
        let prompt = enhanced_prompt("How do I save more?", "Net Income: $100");
        assert!(prompt.contains("Context: Net Income: $100"));
        assert!(prompt.contains("User question: How do I save more?"));
        assert!(prompt.contains("IMPORTANT FORMATTING RULES"));
    }

    #[test]
    fn tag_list_matches_on_name_substring() {
        let tags: TagsResp = serde_json::from_str(
            r#"{"models":[{"name":"gemma:2b"},{"name":"qwen2.5:7b-instruct"}]}"#,
        )
        .unwrap();
        assert!(model_listed(&tags, "gemma:2b"));
        assert!(model_listed(&tags, "qwen2.5"));
        assert!(!model_listed(&tags, "llama3"));
    }

    #[test]
    fn empty_tag_list_parses_and_matches_nothing() {
        let tags: TagsResp = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!model_listed(&tags, "gemma:2b"));
    }

    #[test]
    fn generate_payload_shape() {
        let opts = GenerateOptions::default();
        let payload = GenerateReq {
            model: "gemma:2b",
            prompt: "hello",
            stream: false,
            options: opts,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["model"], "gemma:2b");
        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["temperature"], 0.7);
        assert_eq!(json["options"]["top_p"], 0.9);
        assert_eq!(json["options"]["max_tokens"], 500);
    }

    #[test]
    fn financial_context_lists_summary_lines() {
        let stats = dashboard::summarize(&[], &[]);
        let ctx = financial_context(&stats);
        assert!(ctx.contains("- Monthly Income: $0"));
        assert!(ctx.contains("- Number of transactions: 0"));
    }
}
