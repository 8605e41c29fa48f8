//! Structured shipment field extraction.
//!
//! Two sources feed a [`ShipmentRecord`]: an optional [`ExtractionModel`]
//! that returns JSON, and the deterministic [`RuleExtractor`]. The
//! [`FieldExtractor`] tries the model first and falls back to the rules when
//! the model is absent, fails, times out, or returns nothing usable. Missing
//! fields are `None`; extraction never fails because a field is absent.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// Characters of document text sent to an extraction model.
pub const MODEL_INPUT_CHARS: usize = 4000;

/// Shipment fields found in a logistics document. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub shipment_id: Option<String>,
    pub shipper: Option<String>,
    pub consignee: Option<String>,
    pub pickup_datetime: Option<String>,
    pub delivery_datetime: Option<String>,
    pub booking_datetime: Option<String>,
    pub equipment_type: Option<String>,
    pub mode: Option<String>,
    pub rate: Option<f64>,
    pub currency: Option<String>,
    pub weight: Option<f64>,
    pub carrier_name: Option<String>,
}

impl ShipmentRecord {
    /// Field names in wire order.
    pub const FIELDS: [&'static str; 12] = [
        "shipment_id",
        "shipper",
        "consignee",
        "pickup_datetime",
        "delivery_datetime",
        "booking_datetime",
        "equipment_type",
        "mode",
        "rate",
        "currency",
        "weight",
        "carrier_name",
    ];

    /// Number of fields with a value.
    pub fn filled(&self) -> usize {
        let text = [
            &self.shipment_id,
            &self.shipper,
            &self.consignee,
            &self.pickup_datetime,
            &self.delivery_datetime,
            &self.booking_datetime,
            &self.equipment_type,
            &self.mode,
            &self.currency,
            &self.carrier_name,
        ];
        text.iter().filter(|f| f.is_some()).count()
            + usize::from(self.rate.is_some())
            + usize::from(self.weight.is_some())
    }

    /// Whether no field has a value.
    pub fn is_empty(&self) -> bool {
        self.filled() == 0
    }
}

/// How a record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Model,
    Rules,
}

/// An extracted record and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub record: ShipmentRecord,
    pub method: ExtractionMethod,
}

/// A model that reads document text and answers with a JSON object of
/// shipment fields.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Return the model's raw output for `document_text`.
    async fn extract_json(&self, document_text: &str) -> Result<String>;

    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        "extraction-model"
    }
}

/// Build the extraction prompt for a chat model.
pub fn extraction_prompt(document_text: &str) -> String {
    let excerpt = match document_text.char_indices().nth(MODEL_INPUT_CHARS) {
        Some((cut, _)) => &document_text[..cut],
        None => document_text,
    };
    let fields: String = ShipmentRecord::FIELDS.iter().map(|f| format!("- {f}\n")).collect();
    format!(
        "Extract the following shipment information from this logistics document.\nReturn ONLY \
         a valid JSON object with these exact fields. Use null for any missing values.\n\n\
         Required fields:\n{fields}\nDocument text:\n{excerpt}\n\n\
         Return only the JSON object, no other text:"
    )
}

/// Find the first JSON object in `raw` model output and read shipment fields
/// from it.
///
/// Unknown keys are ignored and mistyped values are coerced where the intent
/// is clear (`"1,250.00"` for a number, `42` for a string). Returns `None`
/// when no JSON object can be found.
pub fn parse_model_output(raw: &str) -> Option<ShipmentRecord> {
    let object = find_json_object(raw)?;
    Some(ShipmentRecord {
        shipment_id: text_field(&object, "shipment_id"),
        shipper: text_field(&object, "shipper"),
        consignee: text_field(&object, "consignee"),
        pickup_datetime: text_field(&object, "pickup_datetime"),
        delivery_datetime: text_field(&object, "delivery_datetime"),
        booking_datetime: text_field(&object, "booking_datetime"),
        equipment_type: text_field(&object, "equipment_type"),
        mode: text_field(&object, "mode"),
        rate: number_field(&object, "rate"),
        currency: text_field(&object, "currency").map(|c| c.to_uppercase()),
        weight: number_field(&object, "weight"),
        carrier_name: text_field(&object, "carrier_name"),
    })
}

fn find_json_object(raw: &str) -> Option<Map<String, Value>> {
    raw.match_indices('{').find_map(|(start, _)| {
        let mut values = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match values.next() {
            Some(Ok(Value::Object(object))) => Some(object),
            _ => None,
        }
    })
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    let text = match object.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    match text.to_ascii_lowercase().as_str() {
        "" | "null" | "none" | "n/a" => None,
        _ => Some(text),
    }
}

fn number_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    match object.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

fn parse_amount(raw: &str) -> Option<f64> {
    let digits: String =
        raw.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

const DATE: &str =
    r"(\d{1,2}[-/]\d{1,2}[-/]\d{2,4}(?:\s+\d{1,2}:\d{2})?(?:\s*[ap]m)?|\d{4}[-/]\d{2}[-/]\d{2})";
const NAME: &str = r"([A-Za-z0-9 \t&,.\-]+)";
const AMOUNT: &str = r"([0-9][0-9,]*(?:\.[0-9]+)?)";

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("unreachable error: invalid built-in extraction pattern"))
        .collect()
}

static SHIPMENT_ID: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\b(?:load|reference|ref)[\s_]*(?:id|#|number)?[\s:]+([A-Za-z0-9\-]{4,30})\b".into(),
        r"(?i)\b(?:shipment|bol)[_\s]*(?:id|#|number)?[\s:]+([A-Za-z0-9\-]{4,30})\b".into(),
        r"(?i)\bpro[\s_]*(?:id|#|number)[\s:]+([A-Za-z0-9\-]{4,30})\b".into(),
        r"(?i)\bbill\s+of\s+lading[\s#:]+([A-Za-z0-9\-]{4,30})\b".into(),
    ])
});
static SHIPPER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)shipper(?:\s+name)?[ \t:]+{NAME}"),
        format!(r"(?i)^\s*from[ \t:]+{NAME}"),
    ])
});
static CONSIGNEE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)consignee(?:\s+name)?[ \t:]+{NAME}"),
        format!(r"(?i)(?:deliver\s+to|^\s*to)[ \t:]+{NAME}"),
    ])
});
static PICKUP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)(?:pickup|ship)(?:\s*(?:date|time|datetime))?[\s:]+{DATE}"),
        format!(r"(?i)shipping\s+date[\s:]+{DATE}"),
        r"(?i)pickup[ \t:]+([A-Za-z0-9 \t,:\-]{3,40})".into(),
    ])
});
static DELIVERY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)delivery(?:\s*(?:date|time|datetime))?[\s:]+{DATE}"),
        r"(?i)delivery\s+time[ \t:]+([A-Za-z0-9 \t,:\-]{3,50})".into(),
    ])
});
static BOOKING: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)booking(?:\s*(?:date|time|datetime))?[\s:]+(?:on\s+)?{DATE}"),
        format!(r"(?i)(?:booked|created)[\s:]+(?:on\s+)?{DATE}"),
        format!(r"(?i)\bon\s+{DATE}"),
    ])
});
static EQUIPMENT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)equipment(?:\s+type)?[ \t:]+([A-Za-z0-9 \t\-]{2,25})".into(),
        r"(?i)trailer\s+type[ \t:]+([A-Za-z0-9 \t\-]{2,25})".into(),
        r"(?i)\b(flatbed|dry\s+van|reefer|step\s+deck|lowboy)\b".into(),
    ])
});
static MODE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)\bmode[ \t:]+([A-Za-z]{2,20})\b".into(),
        r"(?i)\bload\s+type[ \t:]+([A-Za-z]{2,3})\b".into(),
    ])
});
static RATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[format!(r"(?i)(?:rate|amount)[ \t:]*\$?\s*{AMOUNT}"), format!(r"\$\s*{AMOUNT}")])
});
static CURRENCY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"(?i)currency[ \t:]+([A-Za-z]{3})\b".into(),
        r"(?i)\b(usd|eur|gbp|cad|mxn)\b".into(),
    ])
});
static WEIGHT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        format!(r"(?i)weight[ \t:]+{AMOUNT}"),
        format!(r"(?i){AMOUNT}\s*(?:lbs?|pounds?|kgs?)\b"),
    ])
});
static CARRIER: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[format!(r"(?i)carrier(?:\s+name)?[ \t:]+{NAME}")])
});

// Patterns allowed to span line breaks, for table-like layouts where the
// label and the value sit on separate lines.
static LOAD_ID_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bload\s+id\s+([A-Z0-9\-]{4,30})\b")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static SHIP_DATE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bship\s+date\s+(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static DELIVERY_DATE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdelivery\s+date[\s:]+(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static LOAD_TYPE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bload\s+type\s*\n\s*([A-Z]{2,3})\b")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static PICKUP_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*pickup\s*\n\s*([A-Za-z][A-Za-z0-9 &,.\-]+)")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static DROP_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*drop\s*\n\s*([A-Za-z][A-Za-z0-9 &,.\-]+)")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static ACCEPTED_BY_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\baccepted\s+by\s+([A-Z][A-Za-z]+)")
        .expect("unreachable error: invalid built-in extraction pattern")
});
static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,2}[-/]\d{1,2}[-/]\d{2,4}")
        .expect("unreachable error: invalid built-in extraction pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ShipmentId,
    Party,
    Carrier,
    Date,
    Booking,
    Equipment,
    Plain,
}

/// Fragments that mark a captured value as a section header or a sentence
/// rather than a field value.
pub const DEFAULT_BLOCKLIST: &[&str] = &[
    "details", "name", "info", "information", "contact", "phone", "amount", "agreed",
    "location", "during", "follow", "driver", "procedures", "cedures", "operating", "hours",
    "normal", "standard", "receiving", "demo", "powered", "tms", "page", "email", "from the",
    "follow on", "on-", "the shipper", "the consignee", "agreed amount", "-",
];

/// Deterministic, label-driven field extraction.
///
/// Values are captured from the same line as their label, cut at the next
/// label, length-limited and checked against a blocklist of fragments.
#[derive(Debug, Clone)]
pub struct RuleExtractor {
    blocklist: Vec<String>,
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self::with_blocklist(DEFAULT_BLOCKLIST.iter().map(|s| s.to_string()))
    }
}

impl RuleExtractor {
    /// Create an extractor with a custom blocklist.
    pub fn with_blocklist(blocklist: impl IntoIterator<Item = String>) -> Self {
        Self { blocklist: blocklist.into_iter().map(|s| s.to_lowercase()).collect() }
    }

    /// Extract every field that can be found in `text`.
    pub fn extract(&self, text: &str) -> ShipmentRecord {
        let shipment_id = self
            .on_line(text, &SHIPMENT_ID, 40, &[], Field::ShipmentId)
            .or_else(|| capture(&LOAD_ID_BLOCK, text));

        let shipper = self
            .on_line(
                text,
                &SHIPPER,
                60,
                &["consignee", "carrier", "phone", "address", " to "],
                Field::Party,
            )
            .or_else(|| self.block(&PICKUP_BLOCK, text, 60, Field::Party));
        let consignee = self
            .on_line(
                text,
                &CONSIGNEE,
                60,
                &["carrier", "shipper", "phone", "address", " from "],
                Field::Party,
            )
            .or_else(|| self.block(&DROP_BLOCK, text, 60, Field::Party));

        let pickup_datetime = self
            .on_line(text, &PICKUP, 50, &[], Field::Date)
            .or_else(|| capture(&SHIP_DATE_BLOCK, text));
        let delivery_datetime = self
            .on_line(text, &DELIVERY, 50, &[], Field::Date)
            .or_else(|| capture(&DELIVERY_DATE_BLOCK, text));
        let booking_datetime = self.on_line(text, &BOOKING, 50, &[], Field::Booking);

        let equipment_type = self.on_line(text, &EQUIPMENT, 25, &[], Field::Equipment);
        let mode = self
            .on_line(text, &MODE, 20, &[], Field::Plain)
            .or_else(|| capture(&LOAD_TYPE_BLOCK, text));

        let rate = self.on_line(text, &RATE, 15, &[], Field::Plain).and_then(|r| parse_amount(&r));
        let currency = self
            .on_line(text, &CURRENCY, 5, &[], Field::Plain)
            .map(|c| c.to_uppercase())
            .or_else(|| text.contains('$').then(|| "USD".to_string()));
        let weight =
            self.on_line(text, &WEIGHT, 20, &[], Field::Plain).and_then(|w| parse_amount(&w));

        let carrier_name = self
            .on_line(
                text,
                &CARRIER,
                50,
                &["mc ", "mc#", "phone", "equipment", "rate", "details", "dot "],
                Field::Carrier,
            )
            .or_else(|| self.block(&ACCEPTED_BY_BLOCK, text, 50, Field::Carrier));

        let record = ShipmentRecord {
            shipment_id,
            shipper,
            consignee,
            pickup_datetime,
            delivery_datetime,
            booking_datetime,
            equipment_type,
            mode,
            rate,
            currency,
            weight,
            carrier_name,
        };
        debug!(filled = record.filled(), "rule extraction finished");
        record
    }

    /// First acceptable capture of any pattern, scanning line by line.
    fn on_line(
        &self,
        text: &str,
        patterns: &[Regex],
        max_chars: usize,
        stop_at: &[&str],
        field: Field,
    ) -> Option<String> {
        text.lines().find_map(|line| {
            patterns.iter().find_map(|pattern| {
                let raw = pattern.captures(line)?.get(1)?.as_str();
                let value = clean(cut_at(raw, stop_at), max_chars)?;
                (!self.is_garbage(&value, field)).then_some(value)
            })
        })
    }

    fn block(&self, pattern: &Regex, text: &str, max_chars: usize, field: Field) -> Option<String> {
        let value = clean(capture(pattern, text)?.as_str(), max_chars)?;
        (!self.is_garbage(&value, field)).then_some(value)
    }

    fn is_garbage(&self, value: &str, field: Field) -> bool {
        let lower = value.to_lowercase();
        if self.blocklist.iter().any(|b| *b == lower) {
            return true;
        }
        if matches!(field, Field::Date | Field::Booking) && NUMERIC_DATE.is_match(value) {
            return false;
        }
        let short = lower.chars().count() < 50;
        if self.blocklist.iter().any(|b| b.len() > 3 && short && lower.contains(b.as_str())) {
            return true;
        }
        match field {
            Field::Party | Field::Carrier => {
                const FRAGMENTS: [&str; 6] = [
                    " during ",
                    " to follow",
                    " location ",
                    " procedures",
                    " driver ",
                    " operating ",
                ];
                FRAGMENTS.iter().any(|f| lower.contains(f))
                    || lower.ends_with(" on-")
                    || (field == Field::Carrier && matches!(lower.as_str(), "carrier" | "mc"))
            }
            Field::Equipment => ["agreed", "amount", "rate"].iter().any(|f| lower.contains(f)),
            Field::Date => {
                const FRAGMENTS: [&str; 6] =
                    [" from the ", " location ", " during ", " shipper ", " driver ", " normal "];
                FRAGMENTS.iter().any(|f| lower.contains(f))
            }
            Field::Booking => {
                ["procedures", " driver ", " follow ", "location"].iter().any(|f| lower.contains(f))
            }
            // "Load Type: FTL" must not yield the ID "Type".
            Field::ShipmentId => !value.chars().any(|c| c.is_ascii_digit()),
            Field::Plain => false,
        }
    }
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    Some(pattern.captures(text)?.get(1)?.as_str().trim().to_string())
}

/// Cut `value` at the first occurrence of any (lowercase) label in `stop_at`.
fn cut_at<'a>(value: &'a str, stop_at: &[&str]) -> &'a str {
    let lower = value.to_ascii_lowercase();
    let cut = stop_at.iter().filter_map(|s| lower.find(s)).min().unwrap_or(value.len());
    &value[..cut]
}

fn clean(value: &str, max_chars: usize) -> Option<String> {
    let value = value.trim();
    let value = match value.char_indices().nth(max_chars) {
        Some((cut, _)) => value[..cut].trim_end(),
        None => value,
    };
    let value = value.trim_end_matches([',', '-', ' ']);
    (value.chars().count() >= 2).then(|| value.to_string())
}

/// Model-first extraction with a rule-based fallback.
pub struct FieldExtractor {
    model: Option<Arc<dyn ExtractionModel>>,
    rules: RuleExtractor,
    timeout: Duration,
}

impl FieldExtractor {
    /// Create an extractor; `model` is optional.
    pub fn new(model: Option<Arc<dyn ExtractionModel>>, timeout: Duration) -> Self {
        Self { model, rules: RuleExtractor::default(), timeout }
    }

    /// Replace the rule extractor.
    pub fn with_rules(mut self, rules: RuleExtractor) -> Self {
        self.rules = rules;
        self
    }

    /// Extract shipment fields from `document_text`.
    pub async fn extract(&self, document_text: &str) -> Extraction {
        if let Some(model) = &self.model {
            let attempt = AssertUnwindSafe(self.ask_model(model.as_ref(), document_text))
                .catch_unwind()
                .await;
            match attempt {
                Ok(Ok(record)) => return Extraction { record, method: ExtractionMethod::Model },
                Ok(Err(e)) => {
                    warn!(model = model.name(), error = %e, "model extraction failed, using rules")
                }
                Err(_) => warn!(model = model.name(), "model extraction panicked, using rules"),
            }
        }
        Extraction { record: self.rules.extract(document_text), method: ExtractionMethod::Rules }
    }

    async fn ask_model(
        &self,
        model: &dyn ExtractionModel,
        document_text: &str,
    ) -> Result<ShipmentRecord> {
        let unavailable = |message: String| RagError::GenerationUnavailable {
            provider: model.name().to_string(),
            message,
        };
        let raw = tokio::time::timeout(self.timeout, model.extract_json(document_text))
            .await
            .map_err(|_| unavailable(format!("timed out after {} ms", self.timeout.as_millis())))??;
        match parse_model_output(&raw) {
            Some(record) if !record.is_empty() => Ok(record),
            Some(_) => Err(unavailable("model found no fields".to_string())),
            None => Err(unavailable("model returned no JSON object".to_string())),
        }
    }
}
