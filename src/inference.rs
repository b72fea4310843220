use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::transactions::EntryType;

/// Id/name pair the adapter uses to resolve transfer endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountRef {
    pub id: i64,
    pub name: String,
}

/// An unpersisted candidate produced by the inference backend. A single text
/// input may fan out into several drafts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Draft {
    Transaction {
        name: String,
        amount: f64,
        category_name: String,
        /// `YYYY-MM-DD`.
        date: String,
    },
    BankTransfer {
        bank_from: AccountRef,
        bank_to: AccountRef,
        amount: f64,
        date: String,
    },
}

/// Advisory category draft returned by the category-suggestion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDraft {
    pub name: String,
    pub entry_type: EntryType,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unusable model output: {0}")]
    BadOutput(String),
}

/// Text inference boundary. `Gemini` talks to the hosted model; `Fixed`
/// replays scripted responses for tests and keyless local runs.
#[derive(Clone)]
pub enum InferenceClient {
    Gemini(GeminiClient),
    Fixed(FixedInference),
}

impl InferenceClient {
    pub fn from_key(gcp_key: Option<String>) -> Self {
        match gcp_key {
            Some(key) => InferenceClient::Gemini(GeminiClient::new(key)),
            None => {
                tracing::warn!("GCP_KEY not set, text inference disabled");
                InferenceClient::Fixed(FixedInference::default())
            }
        }
    }

    /// Ordered drafts extracted from free text, given the user's known
    /// category names and accounts.
    pub async fn infer_drafts(
        &self,
        text: &str,
        category_names: &[String],
        accounts: &[AccountRef],
    ) -> Result<Vec<Draft>, InferenceError> {
        match self {
            InferenceClient::Gemini(client) => {
                client.infer_drafts(text, category_names, accounts).await
            }
            InferenceClient::Fixed(fixed) => Ok(fixed.drafts.clone()),
        }
    }

    /// Up to 3 ranked category names for an uncategorized draft. Unusable
    /// model output degrades to `None` rather than an error.
    pub async fn suggest_categories(
        &self,
        text: &str,
        category_names: &[String],
    ) -> Result<Option<Vec<String>>, InferenceError> {
        match self {
            InferenceClient::Gemini(client) => client.suggest_categories(text, category_names).await,
            InferenceClient::Fixed(fixed) => Ok(fixed.suggestions.clone()),
        }
    }

    /// Up to 7 category drafts for bootstrapping a user's category list.
    pub async fn suggest_category_set(
        &self,
        text: Option<&str>,
    ) -> Result<Vec<CategoryDraft>, InferenceError> {
        match self {
            InferenceClient::Gemini(client) => client.suggest_category_set(text).await,
            InferenceClient::Fixed(fixed) => Ok(fixed.category_set.clone()),
        }
    }
}

/// Deterministic stand-in for the hosted model.
#[derive(Debug, Clone, Default)]
pub struct FixedInference {
    pub drafts: Vec<Draft>,
    pub suggestions: Option<Vec<String>>,
    pub category_set: Vec<CategoryDraft>,
}

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const INFER_MODEL: &str = "gemini-2.0-flash";
const SUGGEST_MODEL: &str = "gemini-2.0-flash";

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            key,
        }
    }

    async fn generate(
        &self,
        model: &str,
        system_instruction: &str,
        text: &str,
        temperature: f64,
    ) -> Result<String, InferenceError> {
        let url = format!("{GEMINI_ENDPOINT}/{model}:generateContent?key={}", self.key);
        let body = json!({
            "system_instruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": { "temperature": temperature },
        });
        let resp: GenerateResponse = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = resp
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| InferenceError::BadOutput("no candidates".into()))?;
        Ok(text)
    }

    fn infer_instruction(category_names: &[String], accounts: &[AccountRef]) -> String {
        let today = Utc::now().date_naive();
        let account_list = accounts
            .iter()
            .map(|a| format!("{{\"id\": {}, \"name\": \"{}\"}}", a.id, a.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"You are an autonomous financial data processing agent. Analyze the
input string and extract every financial event it contains, in order.

Respond with ONLY a JSON array, no markdown and no explanations. Each element
is one of:
- a simple transaction:
  {{"kind": "transaction", "name": "...", "amount": 0.0, "category_name": "...", "date": "YYYY-MM-DD"}}
  Derive category_name from this list: [{categories}].
  If you absolutely cannot figure out the category, assign "unknown".
- a bank transfer between two of the user's accounts:
  {{"kind": "bank_transfer", "bank_from": {{"id": 0, "name": "..."}}, "bank_to": {{"id": 0, "name": "..."}}, "amount": 0.0, "date": "YYYY-MM-DD"}}
  Derive the accounts from this list: [{accounts}].

Today is {today} ({weekday}); convert human readable dates to YYYY-MM-DD.
If no date is provided, assume today. Favour past dates unless specified.
The text may contain more than one financial event; maintain name casing and
isolate each event's date."#,
            categories = category_names.join(", "),
            accounts = account_list,
            today = today.format("%Y-%m-%d"),
            weekday = today.format("%A"),
        )
    }

    pub async fn infer_drafts(
        &self,
        text: &str,
        category_names: &[String],
        accounts: &[AccountRef],
    ) -> Result<Vec<Draft>, InferenceError> {
        let instruction = Self::infer_instruction(category_names, accounts);
        let raw = self
            .generate(
                INFER_MODEL,
                &instruction,
                &format!("<transaction>{text}</transaction>"),
                0.0,
            )
            .await?;
        let cleaned = strip_code_fences(&raw);
        serde_json::from_str::<Vec<Draft>>(cleaned)
            .map_err(|e| InferenceError::BadOutput(format!("{e}: {cleaned}")))
    }

    pub async fn suggest_categories(
        &self,
        text: &str,
        category_names: &[String],
    ) -> Result<Option<Vec<String>>, InferenceError> {
        let instruction = format!(
            r#"You seem to have forgotten to categorize this transaction. Based on the
following category list, suggest 3 possible categories for this transaction,
ordered from most likely to least likely:

Category list: [{}]

Do NOT provide any introductory text or explanations.
Ignore the `unknown` category.
Return your response as a JSON array of strings."#,
            category_names.join(", "),
        );
        let raw = self.generate(SUGGEST_MODEL, &instruction, text, 0.5).await?;
        match serde_json::from_str::<Vec<String>>(strip_code_fences(&raw)) {
            Ok(names) => Ok(Some(names)),
            Err(e) => {
                tracing::error!("unparseable category suggestions: {e}");
                Ok(None)
            }
        }
    }

    pub async fn suggest_category_set(
        &self,
        text: Option<&str>,
    ) -> Result<Vec<CategoryDraft>, InferenceError> {
        let mut instruction = String::from(
            "Suggest up to 7 categories for a budget tracking application as a JSON \
             array of {\"name\": \"...\", \"entry_type\": \"credit\"|\"debit\"} objects. \
             No markdown, no explanations.",
        );
        if let Some(summary) = text {
            instruction.push_str(&format!(
                "\nHere is a short summary of the user; tailor the categories to them:\n{summary}"
            ));
        }
        let raw = self.generate(SUGGEST_MODEL, &instruction, "", 0.5).await?;
        let cleaned = strip_code_fences(&raw);
        serde_json::from_str::<Vec<CategoryDraft>>(cleaned)
            .map_err(|e| InferenceError::BadOutput(format!("{e}: {cleaned}")))
    }
}

/// Models tend to wrap JSON in ``` fences despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
