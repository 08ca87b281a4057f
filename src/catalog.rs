use serde::{Deserialize, Serialize};

/// A known diagnostic intent and the phrase representing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentEntry {
    /// Action identifier, e.g. an OBD-II PID such as `010C`.
    pub code: String,
    /// Reference phrase compared against queries.
    #[serde(alias = "reference_text")]
    pub text: String,
}

impl IntentEntry {
    pub fn new(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            text: text.into(),
        }
    }
}

/// Ordered catalog with the reference embeddings computed at load time.
///
/// Entries whose embedding failed keep their position with no vector and
/// never rank.
#[derive(Debug, Default)]
pub struct IntentCatalog {
    entries: Vec<IntentEntry>,
    embeddings: Vec<Option<Vec<f32>>>,
}

impl IntentCatalog {
    pub(crate) fn new(entries: Vec<IntentEntry>, embeddings: Vec<Option<Vec<f32>>>) -> Self {
        debug_assert_eq!(entries.len(), embeddings.len());
        Self {
            entries,
            embeddings,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IntentEntry] {
        &self.entries
    }

    /// Entries that can be ranked, in catalog order.
    pub fn embedded(&self) -> impl Iterator<Item = (&IntentEntry, &[f32])> {
        self.entries
            .iter()
            .zip(&self.embeddings)
            .filter_map(|(entry, emb)| emb.as_deref().map(|v| (entry, v)))
    }
}

const OBD_MODE01: &[(&str, &str)] = &[
    ("0101", "What is the monitor status since DTCs cleared?"),
    ("0102", "What DTC caused the freeze frame to be stored?"),
    ("0103", "What is the fuel system status?"),
    ("0104", "What is the engine load?"),
    ("0105", "What is the engine coolant temperature?"),
    ("0106", "What is the short term fuel trim for Bank 1?"),
    ("0107", "What is the long term fuel trim for Bank 1?"),
    ("0108", "What is the short term fuel trim for Bank 2?"),
    ("0109", "What is the long term fuel trim for Bank 2?"),
    ("010A", "What is the fuel pressure?"),
    ("010B", "What is the intake manifold pressure?"),
    ("010C", "What is the engine rpm or speed or revolutions?"),
    ("010D", "What is the vehicle speed?"),
    ("010E", "What is the timing advance?"),
    ("010F", "What is the intake air temperature?"),
    ("0110", "What is the MAF air flow rate?"),
    ("0111", "What is the throttle position?"),
    ("0112", "What is the commanded secondary air status?"),
    ("0113", "How many oxygen sensors are present in the 2 banks?"),
    ("0114", "What is the status of Oxygen Sensor 1?"),
    ("0115", "What is the status of Oxygen Sensor 2?"),
];

/// Built-in catalog of OBD-II mode 01 questions.
pub fn obd_catalog() -> Vec<IntentEntry> {
    OBD_MODE01
        .iter()
        .map(|(code, text)| IntentEntry::new(*code, *text))
        .collect()
}
