mod aggregate;
mod corpus;
mod matcher;
mod rebuttal;
mod report;
mod run;
mod scorer;
mod segmenter;
mod significance;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;

pub(crate) use matcher::{EmbeddingContext, MatchScoring};
pub(crate) use run::run;
pub(crate) use scorer::{PaperScore, PaperScorer};
pub(crate) use segmenter::{TextSegmenter, parse_reference_set, parse_review_record};
