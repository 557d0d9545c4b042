use tracing::info;

use crate::error::TriageError;
use crate::oracle::{cosine_similarity, SimilarityOracle};
use crate::record::{Collection, Column, Record, SimilarityScores};

const STAGE: &str = "embedding ranking";

/// Orders the collection by mean cosine similarity of each record's
/// "title snippet" embedding to the reference title and abstract embeddings.
///
/// Rows are never dropped; equal scores keep their relative order.
pub async fn rank_by_embedding(
    collection: &Collection,
    oracle: &dyn SimilarityOracle,
    title: &str,
    abstract_text: &str,
) -> Result<Collection, TriageError> {
    collection.require(STAGE, &[Column::Title, Column::Snippet])?;
    let oracle_failure = |source| TriageError::Oracle {
        stage: STAGE.to_string(),
        source,
    };

    info!(rows = collection.len(), "Embedding reference title and abstract");
    let title_embedding = oracle.embed(title).await.map_err(oracle_failure)?;
    let abstract_embedding = oracle.embed(abstract_text).await.map_err(oracle_failure)?;

    let mut records = Vec::with_capacity(collection.len());
    for record in collection.records() {
        let text = format!("{} {}", record.title, record.snippet);
        let embedding = oracle.embed(text.trim()).await.map_err(oracle_failure)?;

        let title_score = cosine_similarity(&title_embedding, &embedding);
        let abstract_score = cosine_similarity(&abstract_embedding, &embedding);
        let mut record = record.clone();
        record.similarity = Some(SimilarityScores {
            title: title_score,
            abstract_text: abstract_score,
            mean: (title_score + abstract_score) / 2.0,
        });
        records.push(record);
    }

    let mean = |r: &Record| r.similarity.as_ref().map_or(0.0, |s| s.mean);
    records.sort_by(|a, b| mean(b).total_cmp(&mean(a)));

    Ok(collection.derive(Column::Similarity, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::record::fixtures::{collection, record};
    use async_trait::async_trait;

    /// Embeds text on two axes: mentions of "attention" and of "soil".
    struct AxisOracle;

    #[async_trait]
    impl SimilarityOracle for AxisOracle {
        async fn compare(&self, _r: &str, _c: &str) -> Result<String, OracleError> {
            Ok(String::new())
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, OracleError> {
            let text = text.to_lowercase();
            Ok(vec![
                text.matches("attention").count() as f32 + 0.1,
                text.matches("soil").count() as f32 + 0.1,
            ])
        }
    }

    #[tokio::test]
    async fn ranks_without_dropping_rows() {
        let coll = collection(vec![
            record("soil moisture", "Nature", 2020),
            record("attention heads", "IEEE", 2021),
            record("soil attention", "arXiv", 2022),
        ]);

        let ranked = rank_by_embedding(&coll, &AxisOracle, "attention", "attention mechanisms")
            .await
            .unwrap();

        assert_eq!(ranked.len(), 3);
        assert!(ranked.has_column(&Column::Similarity));
        let titles: Vec<&str> = ranked.records().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["attention heads", "soil attention", "soil moisture"]);

        let scores: Vec<f32> = ranked
            .records()
            .iter()
            .map(|r| r.similarity.as_ref().unwrap().mean)
            .collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }
}
