use crate::config::Complexity;
use crate::orchestrator::collaborators::IntentClassifier;
use crate::orchestrator::types::{Classification, Entities, Intent};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:under|below|less than|cheaper than|max(?:imum)?|up to)\s*\$?\s*(\d+(?:\.\d{1,2})?)")
        .unwrap()
});

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").unwrap());

const COMPARE_WORDS: &[&str] = &["compare", " vs ", " versus ", "better than", "difference between"];
const COUPON_WORDS: &[&str] = &["coupon", "promo code", "promo", "discount code", "voucher"];
const TRENDING_WORDS: &[&str] = &["trending", "popular", "hot deals", "top deals", "best sellers"];
const SEARCH_WORDS: &[&str] = &[
    "deal", "deals", "find", "search", "looking for", "buy", "cheap", "sale", "price", "show me",
];
const GREETINGS: &[&str] = &["hi", "hello", "hey", "good morning", "good evening"];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "me", "my", "i", "im", "for", "on", "at", "in", "from", "of", "to", "any",
    "some", "find", "show", "search", "looking", "look", "want", "need", "buy", "get", "deal",
    "deals", "cheap", "cheapest", "best", "good", "great", "sale", "sales", "price", "prices",
    "please", "can", "you", "is", "are", "there", "what", "whats", "with", "and", "or", "dollars",
    "under", "below", "less", "than", "max", "up", "today", "now", "right",
];

const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "electronics",
        &["tv", "television", "laptop", "phone", "headphones", "monitor", "tablet", "camera"],
    ),
    ("apparel", &["shoes", "sneakers", "shirt", "jacket", "dress", "jeans"]),
    ("kitchen", &["blender", "cookware", "pan", "knife", "coffee", "instant"]),
];

const FAQS: &[(&[&str], &str)] = &[
    (
        &["how do coupons work", "how to use a coupon", "how do i use a coupon"],
        "Copy the coupon code and paste it into the promo code field at the store's checkout. Codes are checked when we list them, but stores can end them early.",
    ),
    (
        &["what is this", "who are you", "what can you do"],
        "I'm a shopping assistant. Ask me for deals on a product, coupons for a store, or what's trending right now.",
    ),
    (
        &["are deals verified", "are these deals real", "how often are deals updated"],
        "Deals are refreshed throughout the day. Prices can change quickly, so always confirm the final price on the store's page.",
    ),
];

const GREETING_REPLY: &str =
    "Hi! Tell me what you're shopping for and I'll look for the best deals and coupons.";

/// Rule-based intent classifier.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    stores: Vec<String>,
    complex_word_threshold: usize,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            [
                "Amazon", "Walmart", "Target", "BestBuy", "Nike", "eBay", "Costco", "Home Depot",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }
}

impl KeywordClassifier {
    pub fn new(stores: Vec<String>) -> Self {
        Self {
            stores,
            complex_word_threshold: 25,
        }
    }

    pub fn with_complex_word_threshold(mut self, words: usize) -> Self {
        self.complex_word_threshold = words;
        self
    }

    fn intent(text: &str) -> Intent {
        let padded = format!(" {} ", text);
        let has = |words: &[&str]| words.iter().any(|w| padded.contains(w));

        if has(COMPARE_WORDS) {
            Intent::Compare
        } else if has(COUPON_WORDS) {
            Intent::Coupon
        } else if has(TRENDING_WORDS) {
            Intent::Trending
        } else if has(SEARCH_WORDS) {
            Intent::Search
        } else if Self::is_greeting(text) {
            Intent::Greeting
        } else {
            Intent::General
        }
    }

    fn is_greeting(text: &str) -> bool {
        let cleaned: String = text
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();
        let cleaned = cleaned.trim();
        cleaned.split_whitespace().count() <= 3
            && GREETINGS
                .iter()
                .any(|g| cleaned == *g || cleaned.starts_with(&format!("{} ", g)))
    }

    fn faq(text: &str) -> Option<&'static str> {
        FAQS.iter()
            .find(|(questions, _)| questions.iter().any(|q| text.contains(q)))
            .map(|(_, answer)| *answer)
    }

    fn store(&self, words: &[&str]) -> Option<String> {
        let squashed = words.concat();
        self.stores
            .iter()
            .find(|store| {
                let needle: String = store.to_lowercase().split_whitespace().collect();
                words.contains(&needle.as_str()) || (needle.len() > 5 && squashed.contains(&needle))
            })
            .cloned()
    }

    fn category(words: &[&str]) -> Option<String> {
        CATEGORIES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| words.contains(k)))
            .map(|(category, _)| category.to_string())
    }

    fn query(&self, text: &str, store: Option<&str>) -> Option<String> {
        let without_price = PRICE_RE.replace_all(text, " ");
        let store_words: Vec<String> = store
            .map(|s| {
                WORD_RE
                    .find_iter(&s.to_lowercase())
                    .map(|m| m.as_str().to_string())
                    .collect()
            })
            .unwrap_or_default();

        let terms: Vec<&str> = WORD_RE
            .find_iter(&without_price)
            .map(|m| m.as_str())
            .filter(|w| !STOPWORDS.contains(w))
            .filter(|w| !store_words.iter().any(|s| s == w))
            .filter(|w| !COUPON_WORDS.contains(w) && !["coupons", "codes", "code"].contains(w))
            .collect();

        (!terms.is_empty()).then(|| terms.join(" "))
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Classification {
        let lowered = text.trim().to_lowercase();

        if let Some(answer) = Self::faq(&lowered) {
            return Classification {
                intent: Intent::Faq,
                complexity: Complexity::Simple,
                entities: Entities::default(),
                faq_response: Some(answer.to_string()),
            };
        }

        let intent = Self::intent(&lowered);
        if intent == Intent::Greeting {
            return Classification {
                intent,
                complexity: Complexity::Simple,
                entities: Entities::default(),
                faq_response: Some(GREETING_REPLY.to_string()),
            };
        }

        let words: Vec<&str> = WORD_RE.find_iter(&lowered).map(|m| m.as_str()).collect();
        let store = self.store(&words);
        let entities = Entities {
            query: self.query(&lowered, store.as_deref()),
            category: Self::category(&words),
            max_price: PRICE_RE
                .captures(&lowered)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok()),
            store,
        };

        let complexity = if intent == Intent::Compare || words.len() > self.complex_word_threshold
        {
            Complexity::Complex
        } else {
            Complexity::Simple
        };

        tracing::debug!(
            "Classified as {} ({:?}), entities: {:?}",
            intent.as_str(),
            complexity,
            entities
        );

        Classification {
            intent,
            complexity,
            entities,
            faq_response: None,
        }
    }
}
