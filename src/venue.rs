use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Known publication venues, plus a catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VenueCategory {
    #[serde(rename = "IEEE")]
    Ieee,
    Arxiv,
    #[serde(rename = "Neural Networks")]
    NeuralNetworks,
    Proceedings,
    Springer,
    Elsevier,
    Wiley,
    Nature,
    Science,
    Sensors,
    #[serde(rename = "Remote Sensing")]
    RemoteSensing,
    #[serde(rename = "Expert Systems")]
    ExpertSystems,
    #[serde(rename = "Pattern Recognition")]
    PatternRecognition,
    Other,
}

impl VenueCategory {
    pub fn label(&self) -> &'static str {
        match self {
            VenueCategory::Ieee => "IEEE",
            VenueCategory::Arxiv => "Arxiv",
            VenueCategory::NeuralNetworks => "Neural Networks",
            VenueCategory::Proceedings => "Proceedings",
            VenueCategory::Springer => "Springer",
            VenueCategory::Elsevier => "Elsevier",
            VenueCategory::Wiley => "Wiley",
            VenueCategory::Nature => "Nature",
            VenueCategory::Science => "Science",
            VenueCategory::Sensors => "Sensors",
            VenueCategory::RemoteSensing => "Remote Sensing",
            VenueCategory::ExpertSystems => "Expert Systems",
            VenueCategory::PatternRecognition => "Pattern Recognition",
            VenueCategory::Other => "Other",
        }
    }
}

impl fmt::Display for VenueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Patterns overlap ("IEEE Transactions on Neural Networks"), so the order of
// this table decides the category.
const VENUE_PATTERNS: &[(&str, VenueCategory)] = &[
    ("ieee", VenueCategory::Ieee),
    ("arxiv", VenueCategory::Arxiv),
    ("neural", VenueCategory::NeuralNetworks),
    ("proceedings", VenueCategory::Proceedings),
    ("springer", VenueCategory::Springer),
    ("elsevier", VenueCategory::Elsevier),
    ("wiley", VenueCategory::Wiley),
    ("nature", VenueCategory::Nature),
    ("science", VenueCategory::Science),
    ("sensors", VenueCategory::Sensors),
    ("remote sensing", VenueCategory::RemoteSensing),
    ("expert systems", VenueCategory::ExpertSystems),
    ("pattern recognition", VenueCategory::PatternRecognition),
];

/// Classify a free-text venue. Never fails; unknown venues become `Other`.
pub fn normalize(venue: &str) -> VenueCategory {
    let lowered = venue.to_lowercase();
    VENUE_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, category)| *category)
        .unwrap_or(VenueCategory::Other)
}

/// Same as [`normalize`] for a raw JSON cell; anything but a string is `Other`.
pub fn normalize_value(venue: Option<&Value>) -> VenueCategory {
    match venue {
        Some(Value::String(text)) => normalize(text),
        _ => VenueCategory::Other,
    }
}
