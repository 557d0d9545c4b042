use regex::Regex;

use crate::record::Verdict;

/// Turns an oracle's free-text answer into a [`Verdict`].
pub trait VerdictClassifier: Send + Sync {
    fn classify(&self, response: &str) -> Verdict;
}

/// Relevant when the answer mentions any positive indicator word.
#[derive(Debug, Clone)]
pub struct KeywordVerdicts {
    indicators: Vec<String>,
}

impl KeywordVerdicts {
    pub fn new(indicators: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            indicators: indicators
                .into_iter()
                .map(|word| word.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for KeywordVerdicts {
    fn default() -> Self {
        Self::new(["similar", "relevant", "related", "relevante", "relacionado"])
    }
}

impl VerdictClassifier for KeywordVerdicts {
    fn classify(&self, response: &str) -> Verdict {
        let response = response.trim().to_lowercase();
        if response.is_empty() {
            return Verdict::Unknown;
        }

        if self.indicators.iter().any(|word| response.contains(word.as_str())) {
            Verdict::Relevant
        } else {
            Verdict::NotRelevant
        }
    }
}

/// Reads a `SCORE: 0.85` line and compares it against a minimum.
#[derive(Debug, Clone)]
pub struct ScoreVerdicts {
    min_score: f32,
    number: Regex,
}

impl ScoreVerdicts {
    pub fn new(min_score: f32) -> Self {
        Self {
            min_score,
            number: Regex::new(r"\d+(?:\.\d+)?").expect("score pattern is valid"),
        }
    }

    /// Score from the `SCORE:` line, or the first number in the answer.
    pub fn score(&self, response: &str) -> Option<f32> {
        let line = response
            .lines()
            .find(|line| line.to_uppercase().contains("SCORE:"))
            .and_then(|line| line.split(':').nth(1))
            .unwrap_or(response);

        self.number
            .find(line)
            .and_then(|m| m.as_str().parse::<f32>().ok())
    }
}

impl VerdictClassifier for ScoreVerdicts {
    fn classify(&self, response: &str) -> Verdict {
        match self.score(response) {
            Some(score) if score >= self.min_score => Verdict::Relevant,
            Some(_) => Verdict::NotRelevant,
            None => Verdict::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_verdicts_match_substrings() {
        let classifier = KeywordVerdicts::default();
        assert_eq!(classifier.classify("The texts are SIMILAR in scope."), Verdict::Relevant);
        assert_eq!(classifier.classify("Both are related to attention."), Verdict::Relevant);
        assert_eq!(classifier.classify("O artigo é relevante."), Verdict::Relevant);
        assert_eq!(classifier.classify("VERDICT: distinct"), Verdict::NotRelevant);
        assert_eq!(classifier.classify("   "), Verdict::Unknown);
    }

    #[test]
    fn keyword_verdicts_accept_custom_indicators() {
        let classifier = KeywordVerdicts::new(["Match"]);
        assert_eq!(classifier.classify("match found"), Verdict::Relevant);
        assert_eq!(classifier.classify("similar"), Verdict::NotRelevant);
    }

    #[test]
    fn score_verdicts_read_the_score_line() {
        let classifier = ScoreVerdicts::new(0.6);
        assert_eq!(classifier.score("SCORE: 0.85\nVERDICT: similar"), Some(0.85));
        assert_eq!(classifier.classify("SCORE: 0.85\nVERDICT: similar"), Verdict::Relevant);
        assert_eq!(classifier.classify("Verdict first\nscore: 0.2"), Verdict::NotRelevant);
        assert_eq!(classifier.classify("I would say 0.7 overall"), Verdict::Relevant);
        assert_eq!(classifier.classify("no idea"), Verdict::Unknown);
    }
}
