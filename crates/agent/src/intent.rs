use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::gateway::{parse_json, CompletionGateway};
use crate::llm::CompletionRequest;
use crate::prompts::CLASSIFIER_PROMPT;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Registration,
    Summary,
    Inventory,
    Conversation,
}

impl Intent {
    pub const ALL: [Intent; 4] =
        [Intent::Registration, Intent::Summary, Intent::Inventory, Intent::Conversation];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Summary => "summary",
            Self::Inventory => "inventory",
            Self::Conversation => "conversation",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownIntent(pub String);

impl fmt::Display for UnknownIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown intent `{}`", self.0)
    }
}

impl std::error::Error for UnknownIntent {}

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str() == value.trim())
            .ok_or_else(|| UnknownIntent(value.to_string()))
    }
}

// Inventory terms outrank everything else. Bare "producto" is left out so a sale such as
// "Vendí 2 productos" still reaches registration.
const INVENTORY_TERMS: &[&str] = &[
    "agreg",
    "añad",
    "crear producto",
    "insert",
    "stock",
    "inventario",
    "rellenar",
    "cargar prueba",
    "cargar datos",
    "seed",
    "add product",
    "inventory",
    "reload test data",
];

const SUMMARY_TERMS: &[&str] = &[
    "balance",
    "how am i doing",
    "income",
    "expense",
    "profit",
    "loss",
    "money",
    "ingresos",
    "gastos",
    "dinero",
    "plata",
    "ganancia",
    "pérdida",
    "perdida",
    "cómo voy",
    "como voy",
    "cuánto he",
    "cuanto he",
    "estado financiero",
    "finanzas",
    "resumen",
];

const REGISTRATION_TERMS: &[&str] = &[
    "compré", "compre", "vendí", "vendi", "gasté", "gaste", "pagué", "pague", "cobré", "cobre",
    "bought", "sold", "spent", "paid", "charged",
];

#[derive(Deserialize)]
struct ClassifierVerdict {
    intent: String,
}

/// Keyword rules first, then one completion call; anything unresolved is conversation.
#[derive(Clone)]
pub struct IntentClassifier {
    gateway: CompletionGateway,
}

impl IntentClassifier {
    pub fn new(gateway: CompletionGateway) -> Self {
        Self { gateway }
    }

    pub async fn classify(&self, text: &str) -> Intent {
        if let Some(intent) = classify_local(text) {
            debug!(event_name = "agent.intent.keyword_match", intent = intent.as_str());
            return intent;
        }

        if !self.gateway.is_available() {
            return Intent::Conversation;
        }

        let request = CompletionRequest::new(CLASSIFIER_PROMPT, text, 0.0);
        let verdict = match self.gateway.complete_once(&request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(
                    event_name = "agent.intent.fallback_failed",
                    error = %error,
                    "classifier completion failed; defaulting to conversation"
                );
                return Intent::Conversation;
            }
        };

        match parse_json::<ClassifierVerdict>(&verdict)
            .ok()
            .and_then(|parsed| parsed.intent.parse::<Intent>().ok())
        {
            Some(intent) => intent,
            None => {
                warn!(
                    event_name = "agent.intent.unusable_verdict",
                    chars = verdict.chars().count(),
                    "classifier returned no allowed intent; defaulting to conversation"
                );
                Intent::Conversation
            }
        }
    }
}

/// Ordered keyword rules. `None` means no rule matched.
pub fn classify_local(text: &str) -> Option<Intent> {
    let lowered = text.to_lowercase();
    let mentions = |terms: &[&str]| terms.iter().any(|term| lowered.contains(term));

    if mentions(INVENTORY_TERMS) {
        Some(Intent::Inventory)
    } else if mentions(SUMMARY_TERMS) {
        Some(Intent::Summary)
    } else if mentions(REGISTRATION_TERMS) {
        Some(Intent::Registration)
    } else {
        None
    }
}
